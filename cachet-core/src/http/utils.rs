//! HTTP utility functions shared by every handler
//!
//! Body constructors, hop-by-hop header handling, plain-text and JSON error
//! responses and the structured access log line.

use bytes::Bytes;
use http::header::{HeaderMap, CONTENT_TYPE};
use http::StatusCode;
use http_body_util::{combinators::BoxBody, BodyExt, Full};
use hyper::{Request, Response};
use std::convert::Infallible;

/// Response body used by every handler
pub type RespBody = BoxBody<Bytes, Infallible>;
/// Request body: hyper's `Incoming`, boxed so handlers are testable
pub type ReqBody = BoxBody<Bytes, hyper::Error>;
pub type Req = Request<ReqBody>;
pub type Resp = Response<RespBody>;

/// Headers meaningful for a single transport hop only
pub const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Create a response body from any data that can be converted to Bytes
pub fn body_from<T: Into<Bytes>>(data: T) -> RespBody {
    Full::new(data.into()).boxed()
}

/// Create a request body, for handlers driven outside a live connection
pub fn request_body<T: Into<Bytes>>(data: T) -> ReqBody {
    Full::new(data.into()).map_err(|never: Infallible| match never {}).boxed()
}

/// Remove hop-by-hop headers before storing or forwarding a header map
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
}

/// Plain-text response with the given status
pub fn text_response(status: StatusCode, message: &str) -> Resp {
    Response::builder()
        .status(status)
        .header(CONTENT_TYPE, "text/plain; charset=utf-8")
        .body(body_from(format!("{}\n", message)))
        .expect("valid HTTP response")
}

/// Create a JSON error response with given status code
pub fn json_error_response(status: StatusCode, error: &str, message: &str) -> Resp {
    use serde_json::json;

    Response::builder()
        .status(status)
        .header(CONTENT_TYPE, "application/json")
        .body(body_from(json!({ "error": error, "message": message }).to_string()))
        .expect("valid HTTP response")
}

/// Standard 404 Not Found JSON response
pub fn not_found_response(resource: &str) -> Resp {
    json_error_response(StatusCode::NOT_FOUND, "not_found", &format!("{} not found", resource))
}

/// Standard 502 Bad Gateway JSON response
pub fn bad_gateway_response(context: &str) -> Resp {
    json_error_response(StatusCode::BAD_GATEWAY, "bad_gateway", context)
}

/// Escape a string for safe inclusion in a JSON value.
fn escape_json_value(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => {
                use std::fmt::Write;
                let _ = write!(out, "\\u{:04x}", c as u32);
            }
            c => out.push(c),
        }
    }
    out
}

/// Log an HTTP access entry in structured JSON format.
///
/// Only reads status and headers, so it works for streaming responses too.
pub fn log_access<B>(
    remote: Option<std::net::SocketAddr>,
    method: &str,
    path: &str,
    resp: &Response<B>,
    start: std::time::Instant,
) {
    let remote_ip = remote.map(|r| r.ip().to_string()).unwrap_or_else(|| "-".into());
    let status = resp.status().as_u16();
    let headers = resp.headers();
    let len = headers.get("content-length").and_then(|v| v.to_str().ok()).unwrap_or("-");
    let ctype = headers.get("content-type").and_then(|v| v.to_str().ok()).unwrap_or("-");
    log::info!(
        "{{\"remote\":\"{}\",\"method\":\"{}\",\"path\":\"{}\",\"status\":{},\"len\":\"{}\",\"type\":\"{}\",\"dur_ms\":{}}}",
        escape_json_value(&remote_ip),
        escape_json_value(method),
        escape_json_value(path),
        status,
        escape_json_value(len),
        escape_json_value(ctype),
        start.elapsed().as_millis()
    );
}

/// Collect a response body into bytes; test helper for handler assertions
#[cfg(test)]
pub(crate) async fn read_body(resp: Resp) -> Bytes {
    match resp.into_body().collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(never) => match never {},
    }
}
