//! HTTP/1.1 front door
//!
//! Accepts TCP connections, serves each with Hyper (upgrades enabled so the
//! duplex proxy can take over a connection) and hands every request to a
//! single [`Handler`], normally a [`super::Router`].

use http_body_util::BodyExt;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, ToSocketAddrs};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use super::Handler;

/// How long open connections get to finish after shutdown is requested
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Peer address of the connection a request arrived on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteAddr(pub SocketAddr);

/// Bound HTTP server, ready to run
pub struct CacheServer {
    listener: TcpListener,
    handler: Arc<dyn Handler>,
}

impl CacheServer {
    /// Bind the listener; use port 0 to let the OS pick one
    pub async fn bind<A, H>(addr: A, handler: H) -> crate::Result<Self>
    where
        A: ToSocketAddrs,
        H: Handler + 'static,
    {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { listener, handler: Arc::new(handler) })
    }

    pub fn local_addr(&self) -> crate::Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve forever
    pub async fn run(self) -> crate::Result<()> {
        self.run_until(std::future::pending()).await
    }

    /// Serve until `shutdown` resolves, then drain open connections
    pub async fn run_until<F>(self, shutdown: F) -> crate::Result<()>
    where
        F: Future<Output = ()>,
    {
        let local = self.local_addr()?;
        log::info!("Server listening on http://{}", local);

        let cancel = CancellationToken::new();
        let mut connections = JoinSet::new();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
                accepted = self.listener.accept() => {
                    let (stream, remote) = match accepted {
                        Ok(pair) => pair,
                        Err(e) => {
                            log::warn!("Failed to accept connection: {}", e);
                            continue;
                        }
                    };
                    connections.spawn(serve_connection(
                        stream,
                        remote,
                        Arc::clone(&self.handler),
                        cancel.clone(),
                    ));
                }
            }
        }

        log::info!("Shutting down, draining {} connections", connections.len());
        cancel.cancel();
        let drain = async { while connections.join_next().await.is_some() {} };
        if tokio::time::timeout(DRAIN_TIMEOUT, drain).await.is_err() {
            log::warn!("Connections still open after {:?}, aborting", DRAIN_TIMEOUT);
            connections.shutdown().await;
        }

        log::info!("Server on {} stopped", local);
        Ok(())
    }
}

async fn serve_connection(
    stream: tokio::net::TcpStream,
    remote: SocketAddr,
    handler: Arc<dyn Handler>,
    cancel: CancellationToken,
) {
    let service = service_fn(move |req: hyper::Request<hyper::body::Incoming>| {
        let handler = Arc::clone(&handler);
        async move {
            let mut req = req.map(|body| body.boxed());
            req.extensions_mut().insert(RemoteAddr(remote));
            Ok::<_, Infallible>(handler.handle(req).await)
        }
    });

    let conn = http1::Builder::new().serve_connection(TokioIo::new(stream), service).with_upgrades();
    tokio::pin!(conn);

    let result = tokio::select! {
        result = conn.as_mut() => result,
        _ = cancel.cancelled() => {
            conn.as_mut().graceful_shutdown();
            conn.await
        }
    };

    if let Err(e) = result {
        log::debug!("Connection error from {}: {}", remote, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::utils::{text_response, Req, Resp};
    use async_trait::async_trait;
    use http::StatusCode;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    struct Echo;

    #[async_trait]
    impl Handler for Echo {
        async fn handle(&self, req: Req) -> Resp {
            let remote = req.extensions().get::<RemoteAddr>().map(|r| r.0.ip().to_string());
            text_response(StatusCode::OK, &format!("{} {:?}", req.uri().path(), remote))
        }
    }

    #[tokio::test]
    async fn test_serves_requests_until_shutdown() {
        let server = CacheServer::bind("127.0.0.1:0", Echo).await.unwrap();
        let addr = server.local_addr().unwrap();
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let task = tokio::spawn(server.run_until(async {
            let _ = rx.await;
        }));

        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"GET /hello HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        let mut raw = String::new();
        stream.read_to_string(&mut raw).await.unwrap();

        assert!(raw.starts_with("HTTP/1.1 200 OK"));
        assert!(raw.ends_with("/hello Some(\"127.0.0.1\")\n"));

        tx.send(()).unwrap();
        task.await.unwrap().unwrap();
        assert!(tokio::net::TcpStream::connect(addr).await.is_err());
    }
}
