//! Duplex stream proxy for upgraded connections
//!
//! For a request that asks for a protocol upgrade (typically a WebSocket
//! handshake) the proxy:
//!
//! 1. takes the cached upstream connection, or dials a new one (`502` on failure);
//! 2. claims the client connection from Hyper (`500` if it cannot be upgraded);
//! 3. replays the request head verbatim to the upstream;
//! 4. reads the upstream's handshake response and answers the client with it;
//! 5. on `101 Switching Protocols`, pumps raw bytes both ways until either
//!    side closes or fails.
//!
//! The connection is consumed by the bridge, so the next request dials fresh.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use http::header::CONTENT_LENGTH;
use http::{HeaderMap, HeaderName, HeaderValue, Response, StatusCode};
use hyper::upgrade::OnUpgrade;
use hyper_util::rt::TokioIo;
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, Mutex};

use super::utils::{ProxyError, ProxyResult};
use crate::http::utils::{body_from, text_response, Req, Resp};
use crate::http::Handler;

/// Largest upstream handshake head accepted
const MAX_HEAD: usize = 64 * 1024;

/// Opens byte streams to the upstream
#[async_trait]
pub trait Dialer: Send + Sync + 'static {
    type Conn: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    /// `host:port` label for logs and errors
    fn target(&self) -> &str;

    async fn dial(&self) -> io::Result<Self::Conn>;
}

/// Plain TCP [`Dialer`]
#[derive(Debug, Clone)]
pub struct TcpDialer {
    target: String,
}

impl TcpDialer {
    /// Dial `host:port`
    pub fn new(target: impl Into<String>) -> Self {
        Self { target: target.into() }
    }

    /// Dial the host and port of a URL, using the scheme's default port
    pub fn from_url(url: &str) -> ProxyResult<Self> {
        let parsed =
            reqwest::Url::parse(url).map_err(|e| ProxyError::Upstream(format!("{}: {}", url, e)))?;
        let host =
            parsed.host_str().ok_or_else(|| ProxyError::Upstream(format!("{}: no host", url)))?;
        let port = parsed
            .port_or_known_default()
            .or(match parsed.scheme() {
                "ws" => Some(80),
                "wss" => Some(443),
                _ => None,
            })
            .ok_or_else(|| ProxyError::Upstream(format!("{}: no port", url)))?;
        Ok(Self::new(format!("{}:{}", host, port)))
    }
}

#[async_trait]
impl Dialer for TcpDialer {
    type Conn = tokio::net::TcpStream;

    fn target(&self) -> &str {
        &self.target
    }

    async fn dial(&self) -> io::Result<Self::Conn> {
        tokio::net::TcpStream::connect(&self.target).await
    }
}

/// Upstream answer to a replayed handshake
#[derive(Debug)]
pub struct Handshake {
    pub status: StatusCode,
    pub headers: HeaderMap,
    /// Bytes read past the head; the start of the body or of the stream
    pub leftover: Bytes,
}

/// Reverse proxy for upgrade requests to a single upstream
pub struct DuplexProxy<D: Dialer> {
    dialer: D,
    /// At most one dialed connection not yet claimed by a bridge
    cached: Mutex<Option<D::Conn>>,
}

impl DuplexProxy<TcpDialer> {
    /// Proxy to the host and port of `url`
    pub fn to_url(url: &str) -> ProxyResult<Self> {
        Ok(Self::new(TcpDialer::from_url(url)?))
    }
}

impl<D: Dialer> DuplexProxy<D> {
    pub fn new(dialer: D) -> Self {
        Self { dialer, cached: Mutex::new(None) }
    }

    pub fn target(&self) -> &str {
        self.dialer.target()
    }

    /// Whether a dialed connection is waiting for the next request
    pub async fn has_cached_connection(&self) -> bool {
        self.cached.lock().await.is_some()
    }

    async fn connect(&self) -> ProxyResult<D::Conn> {
        if let Some(conn) = self.cached.lock().await.take() {
            return Ok(conn);
        }
        log::debug!("Dialing upgrade backend {}", self.dialer.target());
        self.dialer
            .dial()
            .await
            .map_err(|source| ProxyError::Dial { target: self.dialer.target().to_string(), source })
    }

    async fn proxy(&self, mut req: Req) -> ProxyResult<Resp> {
        let mut upstream = self.connect().await?;

        let Some(on_upgrade) = req.extensions_mut().remove::<OnUpgrade>() else {
            *self.cached.lock().await = Some(upstream);
            return Err(ProxyError::UpgradeUnsupported);
        };

        upstream.write_all(&request_head(&req)).await?;
        upstream.flush().await?;

        let handshake = read_handshake(&mut upstream).await?;
        if handshake.status != StatusCode::SWITCHING_PROTOCOLS {
            log::debug!("Upgrade refused by {}: {}", self.dialer.target(), handshake.status);
            return relay_refusal(handshake, upstream).await;
        }

        let target = self.dialer.target().to_string();
        let Handshake { status, headers, leftover } = handshake;
        tokio::spawn(async move {
            let upgraded = match on_upgrade.await {
                Ok(upgraded) => upgraded,
                Err(e) => {
                    log::warn!("Client upgrade for {} failed: {}", target, e);
                    return;
                }
            };

            let mut client = TokioIo::new(upgraded);
            if !leftover.is_empty() {
                if let Err(e) = client.write_all(&leftover).await {
                    log::debug!("Bridge to {} closed early: {}", target, e);
                    return;
                }
            }

            log::debug!("Bridge to {} open", target);
            match bridge(client, upstream).await {
                Ok(()) => log::debug!("Bridge to {} closed", target),
                Err(e) => log::debug!("Bridge to {} closed: {}", target, e),
            }
        });

        let mut resp = Response::new(body_from(Bytes::new()));
        *resp.status_mut() = status;
        *resp.headers_mut() = headers;
        Ok(resp)
    }
}

#[async_trait]
impl<D: Dialer> Handler for DuplexProxy<D> {
    async fn handle(&self, req: Req) -> Resp {
        match self.proxy(req).await {
            Ok(resp) => resp,
            Err(e @ ProxyError::Dial { .. }) => {
                log::warn!("{}", e);
                text_response(StatusCode::BAD_GATEWAY, &e.to_string())
            }
            Err(e @ ProxyError::UpgradeUnsupported) => {
                text_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string())
            }
            Err(e) => {
                log::warn!("Upgrade proxy to {} failed: {}", self.dialer.target(), e);
                text_response(StatusCode::BAD_GATEWAY, &e.to_string())
            }
        }
    }
}

/// Serialize the request line and headers as received
pub fn request_head<B>(req: &http::Request<B>) -> Vec<u8> {
    let target = req.uri().path_and_query().map_or("/", |pq| pq.as_str());
    let mut head = format!("{} {} {:?}\r\n", req.method(), target, req.version()).into_bytes();
    for (name, value) in req.headers() {
        head.extend_from_slice(name.as_str().as_bytes());
        head.extend_from_slice(b": ");
        head.extend_from_slice(value.as_bytes());
        head.extend_from_slice(b"\r\n");
    }
    head.extend_from_slice(b"\r\n");
    head
}

/// Read and parse an HTTP/1.x response head
pub async fn read_handshake<S>(stream: &mut S) -> ProxyResult<Handshake>
where
    S: AsyncRead + Unpin,
{
    let mut buf = BytesMut::with_capacity(1024);
    let head_end = loop {
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos;
        }
        if buf.len() > MAX_HEAD {
            return Err(ProxyError::Handshake("response head too large".into()));
        }
        if stream.read_buf(&mut buf).await? == 0 {
            return Err(ProxyError::Handshake("upstream closed before response".into()));
        }
    };

    let head = buf.split_to(head_end + 4);
    let text = std::str::from_utf8(&head[..head_end])
        .map_err(|_| ProxyError::Handshake("response head is not UTF-8".into()))?;
    let mut lines = text.split("\r\n");

    let status_line = lines.next().unwrap_or_default();
    let mut parts = status_line.splitn(3, ' ');
    let version = parts.next().unwrap_or_default();
    if !version.starts_with("HTTP/1.") {
        return Err(ProxyError::Handshake(format!("bad status line: {}", status_line)));
    }
    let status = parts
        .next()
        .and_then(|code| StatusCode::from_bytes(code.as_bytes()).ok())
        .ok_or_else(|| ProxyError::Handshake(format!("bad status line: {}", status_line)))?;

    let mut headers = HeaderMap::new();
    for line in lines {
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| ProxyError::Handshake(format!("bad header line: {}", line)))?;
        let name = HeaderName::from_bytes(name.trim().as_bytes())
            .map_err(|e| ProxyError::Handshake(e.to_string()))?;
        let value = HeaderValue::from_str(value.trim())
            .map_err(|e| ProxyError::Handshake(e.to_string()))?;
        headers.append(name, value);
    }

    Ok(Handshake { status, headers, leftover: buf.freeze() })
}

/// Answer the client with a non-101 upstream response and drop the connection
async fn relay_refusal<S>(handshake: Handshake, mut upstream: S) -> ProxyResult<Resp>
where
    S: AsyncRead + Unpin,
{
    let Handshake { status, mut headers, leftover } = handshake;

    let length = headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(leftover.len())
        .min(MAX_HEAD);

    let mut body = BytesMut::from(&leftover[..]);
    while body.len() < length {
        if upstream.read_buf(&mut body).await? == 0 {
            break;
        }
    }
    body.truncate(length);

    crate::http::strip_hop_by_hop(&mut headers);
    headers.insert(CONTENT_LENGTH, HeaderValue::from(body.len()));

    let mut resp = Response::new(body_from(body.freeze()));
    *resp.status_mut() = status;
    *resp.headers_mut() = headers;
    Ok(resp)
}

/// Pump bytes between `client` and `upstream` until one direction ends
///
/// The first direction to hit EOF or an error ends the bridge; the other is
/// aborted and both streams are dropped.
pub async fn bridge<C, U>(client: C, upstream: U) -> io::Result<()>
where
    C: AsyncRead + AsyncWrite + Send + 'static,
    U: AsyncRead + AsyncWrite + Send + 'static,
{
    let (mut client_rd, mut client_wr) = tokio::io::split(client);
    let (mut upstream_rd, mut upstream_wr) = tokio::io::split(upstream);
    let (done_tx, mut done_rx) = mpsc::channel::<io::Result<u64>>(2);

    let to_upstream = {
        let done = done_tx.clone();
        tokio::spawn(async move {
            let result = tokio::io::copy(&mut client_rd, &mut upstream_wr).await;
            let _ = upstream_wr.shutdown().await;
            let _ = done.send(result).await;
        })
    };
    let to_client = tokio::spawn(async move {
        let result = tokio::io::copy(&mut upstream_rd, &mut client_wr).await;
        let _ = client_wr.shutdown().await;
        let _ = done_tx.send(result).await;
    });

    let first = done_rx.recv().await;
    to_upstream.abort();
    to_client.abort();

    match first {
        Some(Err(e)) => Err(e),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::utils::{read_body, request_body};
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::{duplex, DuplexStream};

    /// Hands out in-memory pipes; the far ends are kept for the test
    #[derive(Default)]
    struct PipeDialer {
        fail: bool,
        dials: AtomicUsize,
        far_ends: std::sync::Mutex<VecDeque<DuplexStream>>,
    }

    #[async_trait]
    impl Dialer for PipeDialer {
        type Conn = DuplexStream;

        fn target(&self) -> &str {
            "pipe:0"
        }

        async fn dial(&self) -> io::Result<DuplexStream> {
            self.dials.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(io::ErrorKind::ConnectionRefused.into());
            }
            let (near, far) = duplex(4096);
            self.far_ends.lock().unwrap().push_back(far);
            Ok(near)
        }
    }

    fn upgrade_request() -> Req {
        http::Request::get("/socket?room=1")
            .header("host", "app.local")
            .header("connection", "Upgrade")
            .header("upgrade", "websocket")
            .body(request_body(""))
            .unwrap()
    }

    #[tokio::test]
    async fn test_dial_failure_is_bad_gateway() {
        let proxy = DuplexProxy::new(PipeDialer { fail: true, ..Default::default() });
        let resp = proxy.handle(upgrade_request()).await;
        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
        let body = read_body(resp).await;
        assert!(String::from_utf8_lossy(&body).starts_with("Error dialing backend pipe:0"));
    }

    #[tokio::test]
    async fn test_no_upgrade_keeps_connection_cached() {
        let proxy = DuplexProxy::new(PipeDialer::default());

        let resp = proxy.handle(upgrade_request()).await;
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(proxy.has_cached_connection().await);

        proxy.handle(upgrade_request()).await;
        assert_eq!(proxy.dialer.dials.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_request_head_is_verbatim() {
        let head = request_head(&upgrade_request());
        assert_eq!(
            String::from_utf8(head).unwrap(),
            "GET /socket?room=1 HTTP/1.1\r\nhost: app.local\r\nconnection: Upgrade\r\n\
             upgrade: websocket\r\n\r\n"
        );
    }

    #[tokio::test]
    async fn test_read_handshake_keeps_leftover() {
        let (mut near, mut far) = duplex(1024);
        far.write_all(
            b"HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\nConnection: Upgrade\r\n\r\nhello",
        )
        .await
        .unwrap();

        let handshake = read_handshake(&mut near).await.unwrap();
        assert_eq!(handshake.status, StatusCode::SWITCHING_PROTOCOLS);
        assert_eq!(handshake.headers["upgrade"], "websocket");
        assert_eq!(handshake.leftover, "hello");
    }

    #[tokio::test]
    async fn test_read_handshake_rejects_garbage() {
        let (mut near, mut far) = duplex(1024);
        far.write_all(b"SSH-2.0-OpenSSH\r\n\r\n").await.unwrap();
        assert!(matches!(read_handshake(&mut near).await, Err(ProxyError::Handshake(_))));

        let (mut near, far) = duplex(1024);
        drop(far);
        assert!(matches!(read_handshake(&mut near).await, Err(ProxyError::Handshake(_))));
    }

    #[tokio::test]
    async fn test_refusal_is_relayed_with_body() {
        let (mut near, mut far) = duplex(1024);
        far.write_all(b"HTTP/1.1 403 Forbidden\r\nContent-Length: 9\r\nX-Reason: origin\r\n\r\nnot")
            .await
            .unwrap();
        let writer = tokio::spawn(async move {
            far.write_all(b" today").await.unwrap();
            far
        });

        let handshake = read_handshake(&mut near).await.unwrap();
        let resp = relay_refusal(handshake, near).await.unwrap();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
        assert_eq!(resp.headers()["x-reason"], "origin");
        assert_eq!(read_body(resp).await, "not today");
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn test_bridge_pumps_both_ways_until_close() {
        let (client, mut client_peer) = duplex(1024);
        let (upstream, mut upstream_peer) = duplex(1024);
        let bridged = tokio::spawn(bridge(client, upstream));

        client_peer.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        upstream_peer.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");

        upstream_peer.write_all(b"pong").await.unwrap();
        client_peer.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"pong");

        drop(upstream_peer);
        bridged.await.unwrap().unwrap();

        // Client side sees EOF once the bridge is gone
        let mut rest = Vec::new();
        client_peer.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
    }

    #[test]
    fn test_tcp_dialer_from_url() {
        assert_eq!(TcpDialer::from_url("http://localhost:8081/app").unwrap().target(), "localhost:8081");
        assert_eq!(TcpDialer::from_url("http://example.com").unwrap().target(), "example.com:80");
        assert_eq!(TcpDialer::from_url("wss://example.com/ws").unwrap().target(), "example.com:443");
        assert!(TcpDialer::from_url("not a url").is_err());
    }
}
