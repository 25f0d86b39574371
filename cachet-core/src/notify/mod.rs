//! Update notification bridge
//!
//! Turns registry events into Server-Sent Events. Two channel layouts are
//! supported:
//!
//! - [`ChannelPolicy::PerAlias`]: one channel per resource. Each update is
//!   sent as the raw content with the content hash as event id. Subscribers
//!   only see future updates.
//! - [`ChannelPolicy::Common`]: one channel for everything. Each update is a
//!   `{"resource": <alias>, "payload": ...}` envelope with id `alias-hash`, and a
//!   new subscriber first gets the latest content of every resource.
//!
//! Only content changes produce messages, so a refresh that fetches the
//! same bytes is silent.

pub mod sse;

pub use sse::SseMessage;

use async_trait::async_trait;
use http::{Request, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, Weak};
use std::time::Duration;
use tokio::sync::broadcast;

use crate::http::utils::{text_response, Req, Resp};
use crate::http::Handler;
use crate::registry::{
    alias_from_request, request_origin, CacheEvent, CacheObserver, Cacher, ResourceUpdate,
};
use sse::{sse_response, Subscription};

/// Request header carrying the client's resumption token
pub const LAST_EVENT_ID: &str = "last-event-id";

/// How updates are grouped into channels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelPolicy {
    #[default]
    PerAlias,
    Common,
}

#[derive(Debug, Clone)]
pub struct NotifyOptions {
    pub policy: ChannelPolicy,
    /// Reconnection delay advertised to clients
    pub retry: Duration,
    /// Interval between keep-alive comments
    pub heartbeat: Duration,
    /// Messages buffered per channel before slow subscribers lag
    pub capacity: usize,
}

impl Default for NotifyOptions {
    fn default() -> Self {
        Self {
            policy: ChannelPolicy::PerAlias,
            retry: Duration::from_millis(5000),
            heartbeat: Duration::from_secs(15),
            capacity: 64,
        }
    }
}

impl NotifyOptions {
    pub fn policy(mut self, policy: ChannelPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn retry(mut self, retry: Duration) -> Self {
        self.retry = retry;
        self
    }

    /// Keep-alive interval; `Duration::ZERO` sends no heartbeats
    pub fn heartbeat(mut self, heartbeat: Duration) -> Self {
        self.heartbeat = heartbeat;
        self
    }
}

/// `503` answered by the subscription endpoint when notifications are off
pub fn disabled_response() -> Resp {
    text_response(StatusCode::SERVICE_UNAVAILABLE, "SSE support not enabled")
}

/// Subscription endpoint stand-in when no bridge is configured
#[derive(Debug, Default, Clone, Copy)]
pub struct NotifyDisabled;

#[async_trait]
impl Handler for NotifyDisabled {
    async fn handle(&self, _req: Req) -> Resp {
        disabled_response()
    }
}

/// Registry observer republishing content updates to SSE subscribers
pub struct UpdateBridge {
    cacher: Cacher,
    options: NotifyOptions,
    /// Per-alias channels, keyed by alias
    channels: RwLock<HashMap<String, broadcast::Sender<SseMessage>>>,
    common: RwLock<broadcast::Sender<SseMessage>>,
}

/// Forwards events without keeping the bridge alive
struct BridgeObserver(Weak<UpdateBridge>);

impl CacheObserver for BridgeObserver {
    fn on_event(&self, event: &CacheEvent) {
        if let Some(bridge) = self.0.upgrade() {
            bridge.on_event(event);
        }
    }
}

impl UpdateBridge {
    /// Build a bridge and subscribe it to `cacher`'s events
    ///
    /// Aliases registered before the bridge get their channels right away.
    pub async fn attach(cacher: &Cacher, options: NotifyOptions) -> Arc<Self> {
        let bridge = Arc::new(Self {
            cacher: cacher.clone(),
            common: RwLock::new(broadcast::channel(options.capacity).0),
            channels: RwLock::new(HashMap::new()),
            options,
        });

        if bridge.options.policy == ChannelPolicy::PerAlias {
            for resource in cacher.resources().await {
                bridge.open_channel(resource.alias());
            }
        }

        cacher.subscribe(Arc::new(BridgeObserver(Arc::downgrade(&bridge))));
        log::info!("SSE bridge attached ({:?} channels)", bridge.options.policy);
        bridge
    }

    pub fn policy(&self) -> ChannelPolicy {
        self.options.policy
    }

    /// Live subscribers on an alias channel, or on the common channel
    pub fn subscriber_count(&self, alias: Option<&str>) -> usize {
        match alias {
            Some(alias) => self
                .channels
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .get(alias)
                .map_or(0, |tx| tx.receiver_count()),
            None => self.common.read().unwrap_or_else(PoisonError::into_inner).receiver_count(),
        }
    }

    fn on_event(&self, event: &CacheEvent) {
        match (self.options.policy, event) {
            (ChannelPolicy::PerAlias, CacheEvent::Added { alias }) => self.open_channel(alias),
            (ChannelPolicy::PerAlias, CacheEvent::Removed { alias }) => self.close_channel(alias),
            (_, CacheEvent::Updated(update)) => self.publish(update),
            (_, CacheEvent::Started) => log::debug!("SSE channels open"),
            (_, CacheEvent::Stopped) => self.close_all(),
            _ => {}
        }
    }

    fn open_channel(&self, alias: &str) {
        let mut channels = self.channels.write().unwrap_or_else(PoisonError::into_inner);
        if !channels.contains_key(alias) {
            channels.insert(alias.to_string(), broadcast::channel(self.options.capacity).0);
            log::debug!("SSE channel '{}' opened", alias);
        }
    }

    fn close_channel(&self, alias: &str) {
        // Dropping the sender ends every stream on it
        if self.channels.write().unwrap_or_else(PoisonError::into_inner).remove(alias).is_some() {
            log::debug!("SSE channel '{}' closed", alias);
        }
    }

    /// End every open stream
    ///
    /// Each channel is replaced by a fresh one, so the bridge is ready for
    /// new subscribers as soon as the registry starts again.
    fn close_all(&self) {
        let capacity = self.options.capacity;
        for tx in self.channels.write().unwrap_or_else(PoisonError::into_inner).values_mut() {
            *tx = broadcast::channel(capacity).0;
        }
        *self.common.write().unwrap_or_else(PoisonError::into_inner) =
            broadcast::channel(capacity).0;
        log::debug!("SSE channels closed");
    }

    fn publish(&self, update: &ResourceUpdate) {
        match self.options.policy {
            ChannelPolicy::PerAlias => {
                let payload = String::from_utf8_lossy(&update.snapshot.content);
                let channels = self.channels.read().unwrap_or_else(PoisonError::into_inner);
                if let Some(tx) = channels.get(&update.alias) {
                    // No subscribers is not an error
                    let _ = tx.send(SseMessage::new(update.snapshot.hash.clone(), payload));
                }
            }
            ChannelPolicy::Common => {
                let message = common_message(update);
                let _ = self.common.read().unwrap_or_else(PoisonError::into_inner).send(message);
            }
        }
    }

    /// Open a subscription stream for this request
    pub async fn serve<B>(&self, req: &Request<B>) -> Resp {
        let origin = request_origin(req);

        let subscription = match self.options.policy {
            ChannelPolicy::PerAlias => {
                let Some(alias) = alias_from_request(req, self.cacher.options().alias_source)
                else {
                    return text_response(StatusCode::BAD_REQUEST, "Missing alias");
                };
                let Some(resource) = self.cacher.get(&alias).await else {
                    return text_response(StatusCode::BAD_REQUEST, "Invalid alias");
                };
                if !resource.is_origin_allowed(origin) {
                    return text_response(StatusCode::UNAUTHORIZED, "Invalid Origin");
                }

                self.open_channel(&alias);
                let receiver = match self
                    .channels
                    .read()
                    .unwrap_or_else(PoisonError::into_inner)
                    .get(&alias)
                {
                    Some(tx) => tx.subscribe(),
                    None => return text_response(StatusCode::BAD_REQUEST, "Invalid alias"),
                };
                self.subscription(receiver, Vec::new(), alias)
            }
            ChannelPolicy::Common => {
                let resources = self.cacher.resources().await;
                if let Some(denied) = resources.iter().find(|r| !r.is_origin_allowed(origin)) {
                    let message = format!("Invalid Origin for {}", denied.alias());
                    return text_response(StatusCode::UNAUTHORIZED, &message);
                }

                // Subscribe before reading snapshots so no update falls in between
                let receiver = self.common.read().unwrap_or_else(PoisonError::into_inner).subscribe();

                let last_event_id = req.headers().get(LAST_EVENT_ID).and_then(|v| v.to_str().ok());
                let mut replay = Vec::with_capacity(resources.len());
                for resource in resources {
                    let snapshot = resource.snapshot().await;
                    if !snapshot.is_populated() {
                        continue;
                    }
                    let update = ResourceUpdate { alias: resource.alias().to_string(), snapshot };
                    let message = common_message(&update);
                    if Some(message.id.as_str()) != last_event_id {
                        replay.push(message);
                    }
                }
                self.subscription(receiver, replay, "common".to_string())
            }
        };

        sse_response(subscription, origin)
    }

    fn subscription(
        &self,
        receiver: broadcast::Receiver<SseMessage>,
        replay: Vec<SseMessage>,
        channel: String,
    ) -> Subscription {
        Subscription {
            receiver,
            replay,
            retry: self.options.retry,
            heartbeat: self.options.heartbeat,
            channel,
        }
    }
}

/// Envelope sent on the shared channel
fn common_message(update: &ResourceUpdate) -> SseMessage {
    let envelope = serde_json::json!({
        "resource": update.alias,
        "payload": String::from_utf8_lossy(&update.snapshot.content),
    });
    SseMessage::new(update.event_id(), envelope.to_string())
}

#[async_trait]
impl Handler for UpdateBridge {
    async fn handle(&self, req: Req) -> Resp {
        self.serve(&req).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::utils::RespBody;
    use crate::registry::CacherOptions;
    use crate::resource::{content_hash, FetchedResponse, ResourceSpec};
    use crate::testing::ScriptedFetcher;
    use bytes::Bytes;
    use http_body_util::BodyExt;

    fn spec(alias: &str) -> ResourceSpec {
        ResourceSpec::get(alias, format!("http://upstream.test/{}", alias))
            .interval(Duration::from_secs(3600))
    }

    async fn setup(policy: ChannelPolicy) -> (Cacher, Arc<ScriptedFetcher>, Arc<UpdateBridge>) {
        let fetcher = Arc::new(ScriptedFetcher::new());
        let cacher = Cacher::with_fetcher(CacherOptions::default(), fetcher.clone());
        let bridge = UpdateBridge::attach(&cacher, NotifyOptions::default().policy(policy)).await;
        (cacher, fetcher, bridge)
    }

    /// Read the next data frame as text
    async fn next_frame(body: &mut RespBody) -> String {
        let frame = tokio::time::timeout(Duration::from_secs(2), body.frame())
            .await
            .expect("frame in time")
            .expect("stream open")
            .unwrap();
        let data: Bytes = frame.into_data().unwrap();
        String::from_utf8(data.to_vec()).unwrap()
    }

    fn get(uri: &str) -> Request<()> {
        Request::get(uri).body(()).unwrap()
    }

    #[tokio::test]
    async fn test_disabled_response() {
        let req = Request::get("/").body(crate::http::request_body("")).unwrap();
        let resp = NotifyDisabled.handle(req).await;
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_per_alias_rejections() {
        let (cacher, fetcher, bridge) = setup(ChannelPolicy::PerAlias).await;
        fetcher.push_response(FetchedResponse::new(StatusCode::OK, "v1"));
        cacher
            .add_resource(spec("a").allowed_origins(["http://good.origin"]), None)
            .await
            .unwrap();

        assert_eq!(bridge.serve(&get("/sse")).await.status(), StatusCode::BAD_REQUEST);
        assert_eq!(bridge.serve(&get("/sse?alias=zz")).await.status(), StatusCode::BAD_REQUEST);
        assert_eq!(bridge.serve(&get("/sse?alias=a")).await.status(), StatusCode::UNAUTHORIZED);

        cacher.stop().await;
    }

    #[tokio::test]
    async fn test_per_alias_stream_receives_updates() {
        let (cacher, fetcher, bridge) = setup(ChannelPolicy::PerAlias).await;
        fetcher.push_response(FetchedResponse::new(StatusCode::OK, "v1"));
        cacher.add_resource(spec("a"), None).await.unwrap();

        let resp = bridge.serve(&get("/sse?alias=a")).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()["content-type"], "text/event-stream");
        assert_eq!(resp.headers()["cache-control"], "no-cache");
        assert_eq!(resp.headers()["access-control-allow-methods"], "GET, OPTIONS");
        assert_eq!(resp.headers().get_all("vary").iter().count(), 3);

        let mut body = resp.into_body();
        assert_eq!(next_frame(&mut body).await, "retry: 5000\n\n");
        assert_eq!(bridge.subscriber_count(Some("a")), 1);

        // Same content again is silent; new content is pushed
        fetcher.push_response(FetchedResponse::new(StatusCode::OK, "v1"));
        fetcher.push_response(FetchedResponse::new(StatusCode::OK, "v2"));
        cacher.fetch("a").await.unwrap();
        cacher.fetch("a").await.unwrap();

        let expected = format!("id: {}\nevent: message\ndata: v2\n\n", content_hash(b"v2"));
        assert_eq!(next_frame(&mut body).await, expected);

        // Removal ends the stream
        cacher.remove_resource("a").await.unwrap();
        let end = tokio::time::timeout(Duration::from_secs(2), body.frame()).await.unwrap();
        assert!(end.is_none());
    }

    #[tokio::test]
    async fn test_common_replays_latest_content() {
        let (cacher, fetcher, bridge) = setup(ChannelPolicy::Common).await;
        fetcher.push_response(FetchedResponse::new(StatusCode::OK, "A"));
        cacher.add_resource(spec("a"), None).await.unwrap();
        fetcher.push_response(FetchedResponse::new(StatusCode::OK, "B"));
        cacher.add_resource(spec("b"), None).await.unwrap();

        let resp = bridge.serve(&get("/sse")).await;
        let mut body = resp.into_body();
        assert_eq!(next_frame(&mut body).await, "retry: 5000\n\n");

        let first = next_frame(&mut body).await;
        assert!(first.starts_with(&format!("id: a-{}\n", content_hash(b"A"))));
        assert!(first.contains(r#"data: {"resource":"a","payload":"A"}"#));
        let second = next_frame(&mut body).await;
        assert!(second.starts_with(&format!("id: b-{}\n", content_hash(b"B"))));

        fetcher.push_response(FetchedResponse::new(StatusCode::OK, "A2"));
        cacher.fetch("a").await.unwrap();
        let live = next_frame(&mut body).await;
        assert!(live.contains(r#""payload":"A2""#));

        cacher.stop().await;
        let end = tokio::time::timeout(Duration::from_secs(2), body.frame()).await.unwrap();
        assert!(end.is_none());
    }

    #[tokio::test]
    async fn test_common_skips_last_event_id_and_checks_every_origin() {
        let (cacher, fetcher, bridge) = setup(ChannelPolicy::Common).await;
        fetcher.push_response(FetchedResponse::new(StatusCode::OK, "A"));
        cacher.add_resource(spec("a"), None).await.unwrap();
        fetcher.push_response(FetchedResponse::new(StatusCode::OK, "B"));
        cacher
            .add_resource(spec("b").allowed_origins(["http://good.origin"]), None)
            .await
            .unwrap();

        let resp = bridge.serve(&get("/sse")).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(crate::http::utils::read_body(resp).await, "Invalid Origin for b\n");

        let req = Request::get("/sse")
            .header("origin", "http://good.origin")
            .header("last-event-id", format!("a-{}", content_hash(b"A")))
            .body(())
            .unwrap();
        let resp = bridge.serve(&req).await;
        assert_eq!(resp.headers()["access-control-allow-origin"], "http://good.origin");

        let mut body = resp.into_body();
        next_frame(&mut body).await;
        let replayed = next_frame(&mut body).await;
        assert!(replayed.starts_with("id: b-"));

        cacher.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_comment() {
        let (cacher, fetcher, bridge) = setup(ChannelPolicy::PerAlias).await;
        fetcher.push_response(FetchedResponse::new(StatusCode::OK, "v1"));
        cacher.add_resource(spec("a"), None).await.unwrap();

        let mut body = bridge.serve(&get("/sse?alias=a")).await.into_body();
        next_frame(&mut body).await;

        tokio::time::advance(Duration::from_secs(16)).await;
        assert_eq!(next_frame(&mut body).await, ": heartbeat\n\n");

        cacher.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_heartbeat_disables_keepalive() {
        let fetcher = Arc::new(ScriptedFetcher::new());
        let cacher = Cacher::with_fetcher(CacherOptions::default(), fetcher.clone());
        let options = NotifyOptions::default().heartbeat(Duration::ZERO);
        let bridge = UpdateBridge::attach(&cacher, options).await;
        fetcher.push_response(FetchedResponse::new(StatusCode::OK, "v1"));
        cacher.add_resource(spec("a"), None).await.unwrap();

        let mut body = bridge.serve(&get("/sse?alias=a")).await.into_body();
        next_frame(&mut body).await;

        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(tokio::time::timeout(Duration::from_secs(1), body.frame()).await.is_err());

        fetcher.push_response(FetchedResponse::new(StatusCode::OK, "v2"));
        cacher.fetch("a").await.unwrap();
        assert!(next_frame(&mut body).await.contains("data: v2\n\n"));

        cacher.stop().await;
    }
}
