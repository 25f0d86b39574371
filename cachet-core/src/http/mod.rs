//! HTTP front door built on Hyper
//!
//! Everything that answers a request implements [`Handler`]: the cache
//! ([`crate::Cacher`]), the SSE bridge ([`crate::UpdateBridge`]), the proxies
//! and the static-file responder. A [`Router`] mounts handlers under path
//! prefixes and [`CacheServer`] drives a router over HTTP/1.1 with
//! connection upgrades enabled.
//!
//! # Architecture
//!
//! - [`server`] - Hyper accept loop with graceful shutdown
//! - [`router`] - Prefix routing and middleware chains
//! - [`fallback`] - Static files and error-to-fallback substitution
//! - [`utils`] - Body types, error responses and access logging

pub mod fallback;
pub mod router;
pub mod server;
pub mod utils;

pub use fallback::{Fallback, StaticFiles};
pub use router::{AccessLog, Middleware, Router};
pub use server::{CacheServer, RemoteAddr};
pub use utils::{
    body_from, json_error_response, log_access, not_found_response, request_body,
    strip_hop_by_hop, text_response, Req, ReqBody, Resp, RespBody,
};

use async_trait::async_trait;
use std::sync::Arc;

/// Anything that turns a request into a response
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, req: Req) -> Resp;
}

#[async_trait]
impl<H: Handler + ?Sized> Handler for Arc<H> {
    async fn handle(&self, req: Req) -> Resp {
        (**self).handle(req).await
    }
}
