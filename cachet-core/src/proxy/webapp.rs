//! Development proxy for a web application server
//!
//! Upgrade requests (hot-reload sockets and the like) go through the duplex
//! proxy; everything else through the reverse proxy. Both point at the same
//! upstream.

use async_trait::async_trait;

use super::reverse::ReverseProxy;
use super::upgrade::{DuplexProxy, TcpDialer};
use super::utils::{is_upgrade, ProxyResult};
use crate::http::utils::{Req, Resp};
use crate::http::Handler;

pub struct WebAppProxy {
    http: ReverseProxy,
    upgrade: DuplexProxy<TcpDialer>,
}

impl WebAppProxy {
    pub fn new(target: &str) -> ProxyResult<Self> {
        let proxy = Self { http: ReverseProxy::new(target)?, upgrade: DuplexProxy::to_url(target)? };
        log::info!("Web app proxy to {} ({})", proxy.http.base(), proxy.upgrade.target());
        Ok(proxy)
    }
}

#[async_trait]
impl Handler for WebAppProxy {
    async fn handle(&self, req: Req) -> Resp {
        if is_upgrade(&req) {
            self.upgrade.handle(req).await
        } else {
            self.http.handle(req).await
        }
    }
}
