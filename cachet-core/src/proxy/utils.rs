//! Utility functions and types for proxy operations

use http::header::{CONNECTION, UPGRADE};
use http::{HeaderMap, Request};

/// Error types for proxy operations
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    /// The upstream could not be reached
    #[error("Error dialing backend {target}: {source}")]
    Dial {
        target: String,
        #[source]
        source: std::io::Error,
    },

    /// The client connection cannot be taken over
    #[error("Connection does not support upgrades")]
    UpgradeUnsupported,

    /// The upstream handshake response was malformed
    #[error("Invalid upstream handshake: {0}")]
    Handshake(String),

    /// Reading or writing a bridged stream failed
    #[error("Proxy I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A forwarded request failed
    #[error("Upstream error: {0}")]
    Upstream(String),
}

/// Result type for proxy operations
pub type ProxyResult<T> = Result<T, ProxyError>;

/// Whether the request asks for a protocol upgrade
///
/// True when the first `Connection` header is exactly `upgrade` (any case)
/// and an `Upgrade` header is present.
pub fn is_upgrade<B>(req: &Request<B>) -> bool {
    let connection = req.headers().get(CONNECTION).and_then(|v| v.to_str().ok());
    connection.is_some_and(|c| c.trim().eq_ignore_ascii_case("upgrade"))
        && req.headers().contains_key(UPGRADE)
}

/// Copy end-to-end headers from `src` into `dst`
///
/// Hop-by-hop headers, and any header named in `Connection`, stay behind.
pub fn copy_end_to_end(src: &HeaderMap, dst: &mut HeaderMap) {
    let listed: Vec<String> = src
        .get_all(CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|name| name.trim().to_ascii_lowercase())
        .filter(|name| !name.is_empty())
        .collect();

    for (name, value) in src.iter() {
        let lower = name.as_str();
        if crate::http::utils::HOP_BY_HOP.contains(&lower) || listed.iter().any(|l| l == lower) {
            continue;
        }
        dst.append(name, value.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req(headers: &[(&str, &str)]) -> Request<()> {
        let mut builder = Request::get("/ws");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        builder.body(()).unwrap()
    }

    #[test]
    fn test_is_upgrade() {
        assert!(is_upgrade(&req(&[("connection", "Upgrade"), ("upgrade", "websocket")])));
        assert!(is_upgrade(&req(&[("connection", "UPGRADE"), ("upgrade", "h2c")])));
        assert!(!is_upgrade(&req(&[("connection", "keep-alive, Upgrade"), ("upgrade", "websocket")])));
        assert!(!is_upgrade(&req(&[("connection", "upgrade")])));
        assert!(!is_upgrade(&req(&[("upgrade", "websocket")])));
        assert!(!is_upgrade(&req(&[])));
    }

    #[test]
    fn test_copy_end_to_end() {
        let mut src = HeaderMap::new();
        src.append("connection", "x-session".parse().unwrap());
        src.append("x-session", "secret".parse().unwrap());
        src.append("transfer-encoding", "chunked".parse().unwrap());
        src.append("accept", "a".parse().unwrap());
        src.append("accept", "b".parse().unwrap());

        let mut dst = HeaderMap::new();
        copy_end_to_end(&src, &mut dst);

        assert_eq!(dst.len(), 2);
        assert_eq!(dst.get_all("accept").iter().count(), 2);
    }

    #[test]
    fn test_dial_error_message() {
        let err = ProxyError::Dial {
            target: "localhost:9".into(),
            source: std::io::Error::from(std::io::ErrorKind::ConnectionRefused),
        };
        assert!(err.to_string().starts_with("Error dialing backend localhost:9"));
    }
}
