//! Reverse proxy for ordinary requests
//!
//! Forwards method, path and query, end-to-end headers and the body to one
//! upstream base URL and relays the answer. Any failure to reach the
//! upstream becomes a `502`.

use async_trait::async_trait;
use http::Response;
use http_body_util::BodyExt;

use super::utils::{copy_end_to_end, ProxyError, ProxyResult};
use crate::http::utils::{bad_gateway_response, body_from, Req, Resp};
use crate::http::Handler;

/// Single-upstream reverse proxy backed by `reqwest`
#[derive(Debug, Clone)]
pub struct ReverseProxy {
    client: reqwest::Client,
    base: reqwest::Url,
}

impl ReverseProxy {
    /// Forward to `base`; its path is prepended to every request path
    pub fn new(base: &str) -> ProxyResult<Self> {
        let base = reqwest::Url::parse(base)
            .map_err(|e| ProxyError::Upstream(format!("{}: {}", base, e)))?;
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| ProxyError::Upstream(e.to_string()))?;
        Ok(Self { client, base })
    }

    pub fn base(&self) -> &str {
        self.base.as_str()
    }

    /// Upstream URL for a request path and query
    pub fn target_url(&self, path_and_query: &str) -> String {
        let (path, query) = path_and_query.split_once('?').unwrap_or((path_and_query, ""));
        let base_path = self.base.path().trim_end_matches('/');

        let mut url = self.base.clone();
        url.set_path(&format!("{}/{}", base_path, path.trim_start_matches('/')));
        match (self.base.query(), query.is_empty()) {
            (Some(base_query), false) => url.set_query(Some(&format!("{}&{}", base_query, query))),
            (None, false) => url.set_query(Some(query)),
            _ => {}
        }
        url.to_string()
    }

    async fn forward(&self, req: Req) -> ProxyResult<Resp> {
        let (parts, body) = req.into_parts();
        let path_and_query = parts.uri.path_and_query().map_or("/", |pq| pq.as_str());
        let url = self.target_url(path_and_query);

        let body = body
            .collect()
            .await
            .map_err(|e| ProxyError::Upstream(format!("reading request body: {}", e)))?
            .to_bytes();

        let mut headers = http::HeaderMap::new();
        copy_end_to_end(&parts.headers, &mut headers);
        // reqwest sets Host from the target URL
        headers.remove(http::header::HOST);

        let upstream = self
            .client
            .request(parts.method.clone(), &url)
            .headers(headers)
            .body(body)
            .send()
            .await
            .map_err(|e| ProxyError::Upstream(e.to_string()))?;

        let status = upstream.status();
        let mut resp_headers = http::HeaderMap::new();
        copy_end_to_end(upstream.headers(), &mut resp_headers);
        let bytes = upstream.bytes().await.map_err(|e| ProxyError::Upstream(e.to_string()))?;

        log::debug!("Proxied {} {} -> {}", parts.method, url, status);

        let mut resp = Response::new(body_from(bytes));
        *resp.status_mut() = status;
        *resp.headers_mut() = resp_headers;
        Ok(resp)
    }
}

#[async_trait]
impl Handler for ReverseProxy {
    async fn handle(&self, req: Req) -> Resp {
        match self.forward(req).await {
            Ok(resp) => resp,
            Err(e) => {
                log::warn!("Reverse proxy to {} failed: {}", self.base, e);
                bad_gateway_response(&e.to_string())
            }
        }
    }
}
