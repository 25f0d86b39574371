//! HTTP serving contract for cached resources
//!
//! Checks run in a fixed order, and each failure answers before any cached
//! header or content byte is written:
//!
//! 1. no alias → `400 Missing alias`
//! 2. unknown alias → `400 Invalid alias`
//! 3. origin not allowed → `401 Invalid Origin`
//! 4. `If-None-Match` equals the stored hash → `304`, empty body
//! 5. stored headers, `Vary`/CORS headers, stored status and content
//!
//! Serving never triggers a fetch.

use async_trait::async_trait;
use bytes::Bytes;
use http::header::{ACCESS_CONTROL_ALLOW_ORIGIN, IF_NONE_MATCH, ORIGIN, VARY};
use http::{HeaderMap, HeaderValue, Request, Response, StatusCode};

use super::{AliasSource, Cacher};
use crate::http::utils::{body_from, text_response, Req, Resp};
use crate::http::Handler;

/// Read the alias from the request as configured by `source`
///
/// Returns `None` when the alias is absent or empty.
pub fn alias_from_request<B>(req: &Request<B>, source: AliasSource) -> Option<String> {
    let alias = match source {
        AliasSource::Query => req.uri().query().and_then(|query| {
            query.split('&').find_map(|pair| {
                let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
                (key == "alias").then(|| decode(value))
            })
        }),
        AliasSource::Path => {
            req.uri().path().trim_end_matches('/').rsplit('/').next().map(decode)
        }
    };
    alias.filter(|alias| !alias.is_empty())
}

fn decode(raw: &str) -> String {
    let raw = raw.replace('+', " ");
    match urlencoding::decode(&raw) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => raw,
    }
}

/// The request's `Origin` header, if present and valid UTF-8
pub fn request_origin<B>(req: &Request<B>) -> Option<&str> {
    req.headers().get(ORIGIN).and_then(|v| v.to_str().ok())
}

/// `Vary` for the CORS request headers, plus `Access-Control-Allow-Origin`
/// echoing the origin when one was sent
pub fn write_common_headers(headers: &mut HeaderMap, origin: Option<&str>) {
    headers.append(VARY, HeaderValue::from_static("Origin"));
    headers.append(VARY, HeaderValue::from_static("Access-Control-Request-Method"));
    headers.append(VARY, HeaderValue::from_static("Access-Control-Request-Headers"));

    if let Some(origin) = origin.filter(|o| !o.is_empty()) {
        if let Ok(value) = HeaderValue::from_str(origin) {
            headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, value);
        }
    }
}

impl Cacher {
    /// Answer a read request from the cache
    pub async fn serve<B>(&self, req: &Request<B>) -> Resp {
        let Some(alias) = alias_from_request(req, self.options().alias_source) else {
            return text_response(StatusCode::BAD_REQUEST, "Missing alias");
        };

        let Some(resource) = self.get(&alias).await else {
            log::debug!("Serve rejected: unknown alias '{}'", alias);
            return text_response(StatusCode::BAD_REQUEST, "Invalid alias");
        };

        let origin = request_origin(req);
        if !resource.is_origin_allowed(origin) {
            log::debug!("Serve rejected: origin {:?} not allowed for '{}'", origin, alias);
            return text_response(StatusCode::UNAUTHORIZED, "Invalid Origin");
        }

        let snapshot = resource.snapshot().await;

        let if_none_match = req.headers().get(IF_NONE_MATCH).and_then(|v| v.to_str().ok());
        if let Some(tag) = if_none_match.filter(|t| !t.is_empty()) {
            if tag == snapshot.hash {
                return Response::builder()
                    .status(StatusCode::NOT_MODIFIED)
                    .body(body_from(Bytes::new()))
                    .expect("valid HTTP response");
            }
        }

        let mut resp = Response::new(body_from(snapshot.content.clone()));
        *resp.status_mut() = snapshot.status;

        let headers = resp.headers_mut();
        for (name, value) in snapshot.headers.iter() {
            headers.append(name, value.clone());
        }
        write_common_headers(headers, origin);

        resp
    }
}

#[async_trait]
impl Handler for Cacher {
    async fn handle(&self, req: Req) -> Resp {
        self.serve(&req).await
    }
}
