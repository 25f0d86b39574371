//! Server-Sent Events wire format and streaming bodies

use bytes::Bytes;
use http::header::{CACHE_CONTROL, CONNECTION, CONTENT_TYPE};
use http::{HeaderValue, Response, StatusCode};
use http_body::Frame;
use http_body_util::{BodyExt, StreamBody};
use std::collections::HashSet;
use std::convert::Infallible;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{Instant, Interval};

use crate::http::utils::Resp;
use crate::registry::write_common_headers;

/// Comment line sent to keep idle connections open
const HEARTBEAT: &[u8] = b": heartbeat\n\n";

/// Frames buffered between a subscriber's pump task and its connection
const FRAME_BUFFER: usize = 16;

/// One SSE event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseMessage {
    pub id: String,
    pub event: String,
    pub data: String,
}

impl SseMessage {
    /// A `message` event
    pub fn new(id: impl Into<String>, data: impl Into<String>) -> Self {
        Self { id: id.into(), event: "message".to_string(), data: data.into() }
    }

    /// Serialize as `id`, `event` and one `data` line per data line
    pub fn encode(&self) -> Bytes {
        let mut out = String::with_capacity(self.data.len() + self.id.len() + 32);
        if !self.id.is_empty() {
            out.push_str("id: ");
            out.push_str(&self.id);
            out.push('\n');
        }
        if !self.event.is_empty() {
            out.push_str("event: ");
            out.push_str(&self.event);
            out.push('\n');
        }
        for line in self.data.split('\n') {
            out.push_str("data: ");
            out.push_str(line.strip_suffix('\r').unwrap_or(line));
            out.push('\n');
        }
        out.push('\n');
        Bytes::from(out)
    }
}

/// Client reconnection delay frame
pub fn retry_frame(retry: Duration) -> Bytes {
    Bytes::from(format!("retry: {}\n\n", retry.as_millis()))
}

/// What a new subscriber receives
pub(crate) struct Subscription {
    pub receiver: broadcast::Receiver<SseMessage>,
    /// Sent before any live message
    pub replay: Vec<SseMessage>,
    pub retry: Duration,
    pub heartbeat: Duration,
    /// Label for logs
    pub channel: String,
}

/// Build the streaming SSE response for one subscriber
///
/// A pump task forwards broadcast messages and heartbeats into the body. It
/// ends when the channel closes or the client goes away.
pub(crate) fn sse_response(subscription: Subscription, origin: Option<&str>) -> Resp {
    let (tx, mut rx) = mpsc::channel::<Bytes>(FRAME_BUFFER);
    tokio::spawn(pump(subscription, tx));

    let stream = futures::stream::poll_fn(move |cx| {
        rx.poll_recv(cx).map(|frame| frame.map(|bytes| Ok::<_, Infallible>(Frame::data(bytes))))
    });

    let mut resp = Response::new(StreamBody::new(stream).boxed());
    *resp.status_mut() = StatusCode::OK;

    let headers = resp.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
    headers.insert("x-accel-buffering", HeaderValue::from_static("no"));
    headers.insert("access-control-allow-methods", HeaderValue::from_static("GET, OPTIONS"));
    headers.insert(
        "access-control-allow-headers",
        HeaderValue::from_static(
            "Keep-Alive,X-Requested-With,Cache-Control,Content-Type,Last-Event-ID",
        ),
    );
    write_common_headers(headers, origin);

    resp
}

async fn pump(subscription: Subscription, tx: mpsc::Sender<Bytes>) {
    let Subscription { mut receiver, replay, retry, heartbeat, channel } = subscription;
    log::info!("SSE subscriber connected to '{}'", channel);

    if tx.send(retry_frame(retry)).await.is_err() {
        return;
    }

    // A live message may duplicate one already replayed
    let mut replayed = HashSet::with_capacity(replay.len());
    for message in replay {
        if tx.send(message.encode()).await.is_err() {
            return;
        }
        replayed.insert(message.id);
    }

    // A zero period turns heartbeats off
    let mut ticker = (!heartbeat.is_zero())
        .then(|| tokio::time::interval_at(Instant::now() + heartbeat, heartbeat));

    loop {
        let frame = tokio::select! {
            _ = tx.closed() => break,
            _ = tick(&mut ticker) => Bytes::from_static(HEARTBEAT),
            received = receiver.recv() => match received {
                Ok(message) => {
                    if replayed.remove(&message.id) {
                        continue;
                    }
                    message.encode()
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    log::warn!("SSE subscriber on '{}' lagged, {} events dropped", channel, skipped);
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        };

        if tx.send(frame).await.is_err() {
            break;
        }
    }

    log::info!("SSE subscriber disconnected from '{}'", channel);
}

async fn tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}
