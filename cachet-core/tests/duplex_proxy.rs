//! End-to-end tests for the development proxy
//!
//! The upstream is a raw TCP server: it answers an upgrade with `101` and then
//! echoes bytes, and answers anything else with a fixed plain response.

use cachet_core::http::{CacheServer, Router};
use cachet_core::proxy::WebAppProxy;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;

async fn read_head<S: tokio::io::AsyncBufRead + Unpin>(reader: &mut S) -> String {
    let mut head = String::new();
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).await.unwrap() == 0 {
            break;
        }
        head.push_str(&line);
        if line == "\r\n" {
            break;
        }
    }
    head
}

async fn spawn_upstream() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else { return };
            tokio::spawn(async move {
                let mut reader = BufReader::new(stream);
                let head = read_head(&mut reader).await;

                if head.to_ascii_lowercase().contains("upgrade: websocket") {
                    let mut stream = reader.into_inner();
                    stream
                        .write_all(
                            b"HTTP/1.1 101 Switching Protocols\r\nConnection: Upgrade\r\nUpgrade: websocket\r\n\r\n",
                        )
                        .await
                        .unwrap();
                    let (mut rd, mut wr) = stream.split();
                    let _ = tokio::io::copy(&mut rd, &mut wr).await;
                } else {
                    let mut stream = reader.into_inner();
                    stream
                        .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\nConnection: close\r\n\r\nplain")
                        .await
                        .unwrap();
                }
            });
        }
    });

    addr
}

async fn spawn_proxy(upstream: SocketAddr) -> (SocketAddr, oneshot::Sender<()>) {
    let proxy = WebAppProxy::new(&format!("http://{}", upstream)).unwrap();
    let router = Router::new().mount("/", proxy);
    let server = CacheServer::bind("127.0.0.1:0", router).await.unwrap();
    let addr = server.local_addr().unwrap();
    let (tx, rx) = oneshot::channel::<()>();
    tokio::spawn(server.run_until(async move {
        let _ = rx.await;
    }));
    (addr, tx)
}

#[tokio::test]
async fn test_upgrade_is_bridged_end_to_end() {
    let upstream = spawn_upstream().await;
    let (addr, _stop) = spawn_proxy(upstream).await;

    let stream = TcpStream::connect(addr).await.unwrap();
    let mut reader = BufReader::new(stream);
    reader
        .get_mut()
        .write_all(b"GET /ws HTTP/1.1\r\nHost: app\r\nConnection: Upgrade\r\nUpgrade: websocket\r\n\r\n")
        .await
        .unwrap();

    let head = read_head(&mut reader).await;
    assert!(head.starts_with("HTTP/1.1 101"), "unexpected head: {}", head);
    assert!(head.to_ascii_lowercase().contains("upgrade: websocket"));

    reader.get_mut().write_all(b"ping").await.unwrap();
    let mut buf = [0u8; 4];
    tokio::time::timeout(Duration::from_secs(5), reader.read_exact(&mut buf))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&buf, b"ping");

    reader.get_mut().write_all(b"pong").await.unwrap();
    tokio::time::timeout(Duration::from_secs(5), reader.read_exact(&mut buf))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&buf, b"pong");
}

#[tokio::test]
async fn test_plain_request_goes_through_reverse_proxy() {
    let upstream = spawn_upstream().await;
    let (addr, _stop) = spawn_proxy(upstream).await;

    let resp = reqwest::get(format!("http://{}/ws", addr)).await.unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.text().await.unwrap(), "plain");
}

#[tokio::test]
async fn test_unreachable_upstream_upgrade_is_bad_gateway() {
    // Bind then drop to get a port nothing listens on
    let closed = TcpListener::bind("127.0.0.1:0").await.unwrap().local_addr().unwrap();
    let (addr, _stop) = spawn_proxy(closed).await;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(b"GET /ws HTTP/1.1\r\nHost: app\r\nConnection: Upgrade\r\nUpgrade: websocket\r\n\r\n")
        .await
        .unwrap();

    let mut reader = BufReader::new(stream);
    let head = read_head(&mut reader).await;
    assert!(head.starts_with("HTTP/1.1 502"), "unexpected head: {}", head);
}
