//! Prefix routing and middleware chains
//!
//! A [`Router`] mounts [`Handler`]s under path prefixes. The longest
//! matching prefix wins; a prefix matches the exact path or any path below
//! it (`/resources` matches `/resources` and `/resources/sse`, not
//! `/resourcesx`). Unmatched requests get a JSON 404.
//!
//! Middleware wraps the chosen handler. Router-wide middleware runs first,
//! then the route's own chain, in the order they were added.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;

use super::server::RemoteAddr;
use super::utils::{log_access, not_found_response, Req, Resp};
use super::Handler;

/// Request interceptor wrapping a handler
#[async_trait]
pub trait Middleware: Send + Sync {
    /// Handle `req`, calling `next.run(req)` to continue the chain
    async fn call(&self, req: Req, next: Next<'_>) -> Resp;
}

/// Remainder of a middleware chain
pub struct Next<'a> {
    handler: &'a dyn Handler,
    chain: &'a [Arc<dyn Middleware>],
}

impl<'a> Next<'a> {
    pub async fn run(self, req: Req) -> Resp {
        match self.chain.split_first() {
            Some((first, rest)) => {
                first.call(req, Next { handler: self.handler, chain: rest }).await
            }
            None => self.handler.handle(req).await,
        }
    }
}

/// One JSON access-log line per request
#[derive(Debug, Default, Clone, Copy)]
pub struct AccessLog;

#[async_trait]
impl Middleware for AccessLog {
    async fn call(&self, req: Req, next: Next<'_>) -> Resp {
        let start = Instant::now();
        let remote = req.extensions().get::<RemoteAddr>().map(|r| r.0);
        let method = req.method().clone();
        let path = req.uri().path().to_string();

        let resp = next.run(req).await;
        log_access(remote, method.as_str(), &path, &resp, start);
        resp
    }
}

struct Route {
    prefix: String,
    handler: Arc<dyn Handler>,
    middleware: Vec<Arc<dyn Middleware>>,
}

impl Route {
    fn matches(&self, path: &str) -> bool {
        if self.prefix == "/" {
            return path.starts_with('/');
        }
        match path.strip_prefix(self.prefix.as_str()) {
            Some(rest) => rest.is_empty() || rest.starts_with('/'),
            None => false,
        }
    }
}

struct NotFound;

#[async_trait]
impl Handler for NotFound {
    async fn handle(&self, _req: Req) -> Resp {
        not_found_response("route")
    }
}

/// Path-prefix router
pub struct Router {
    routes: Vec<Route>,
    middleware: Vec<Arc<dyn Middleware>>,
    not_found: Arc<dyn Handler>,
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

impl Router {
    pub fn new() -> Self {
        Self { routes: Vec::new(), middleware: Vec::new(), not_found: Arc::new(NotFound) }
    }

    /// Mount a handler under `prefix`
    pub fn mount<H: Handler + 'static>(self, prefix: &str, handler: H) -> Self {
        self.mount_with(prefix, handler, Vec::new())
    }

    /// Mount a handler with its own middleware chain
    pub fn mount_with<H: Handler + 'static>(
        mut self,
        prefix: &str,
        handler: H,
        middleware: Vec<Arc<dyn Middleware>>,
    ) -> Self {
        let prefix = normalize_prefix(prefix);
        log::debug!("Mounting handler at {}", prefix);

        self.routes.retain(|r| r.prefix != prefix);
        self.routes.push(Route { prefix, handler: Arc::new(handler), middleware });
        self.routes.sort_by(|a, b| b.prefix.len().cmp(&a.prefix.len()));
        self
    }

    /// Add router-wide middleware, run before any route's own chain
    pub fn layer<M: Middleware + 'static>(mut self, middleware: M) -> Self {
        self.middleware.push(Arc::new(middleware));
        self
    }

    /// Mounted prefixes, longest first
    pub fn prefixes(&self) -> Vec<&str> {
        self.routes.iter().map(|r| r.prefix.as_str()).collect()
    }
}

fn normalize_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{}", trimmed)
    }
}

#[async_trait]
impl Handler for Router {
    async fn handle(&self, req: Req) -> Resp {
        let route = self.routes.iter().find(|r| r.matches(req.uri().path()));

        let (handler, route_chain): (&dyn Handler, &[Arc<dyn Middleware>]) = match route {
            Some(route) => (&*route.handler, &route.middleware),
            None => (&*self.not_found, &[]),
        };

        if self.middleware.is_empty() {
            return Next { handler, chain: route_chain }.run(req).await;
        }

        let chain: Vec<Arc<dyn Middleware>> =
            self.middleware.iter().chain(route_chain).cloned().collect();
        Next { handler, chain: &chain }.run(req).await
    }
}
