//! Cached upstream resources
//!
//! A [`Resource`] is one cached endpoint. It owns:
//!
//! - its configuration ([`ResourceSpec`]): alias, method, url, refresh interval,
//!   origin allow-list and an optional body transform;
//! - the last successful fetch as an immutable [`Snapshot`] (content, hash,
//!   headers, status), swapped in as a whole so readers never see a mix of
//!   two fetches;
//! - a background fetch loop driven by a `tokio::time::interval` and stopped
//!   through a `CancellationToken`.
//!
//! # Lifecycle
//!
//! ```text
//!   Idle ──start()──► Starting ──first fetch──► Running ──stop()──► Stopped
//!                        │                       │  ▲
//!                        └────stop()──► Stopped  └──┘ tick: fetch()
//! ```
//!
//! `start()` fetches once before spawning the loop so the cache is warm when
//! it returns. The first fetch runs without holding the lifecycle lock, so a
//! concurrent `stop()` returns at once and the loop is never spawned. A fetch that yields the same content hash as the stored
//! snapshot changes nothing and notifies nobody.

pub mod fetch;

pub use fetch::{FetchError, FetchedResponse, Fetcher, HttpFetcher, FETCH_TIMEOUT};

use bytes::Bytes;
use http::header::{CACHE_CONTROL, CONTENT_LENGTH, ETAG};
use http::{HeaderMap, HeaderValue, Method, StatusCode};
use sha1::{Digest, Sha1};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::http::utils::strip_hop_by_hop;
use crate::registry::events::{CacheEvent, EventBus, ResourceUpdate};
use crate::registry::CacheError;

/// Pure body transform applied before hashing and storing
pub type TransformFn = Arc<dyn Fn(Bytes) -> Bytes + Send + Sync>;

/// Per-resource update callback, called before the registry-wide event
pub type UpdateHook = Arc<dyn Fn(&ResourceUpdate) + Send + Sync>;

/// Compute the content fingerprint used for change detection and as `Etag`
pub fn content_hash(content: &[u8]) -> String {
    hex::encode(Sha1::digest(content))
}

/// Declarative description of a resource to cache
#[derive(Clone)]
pub struct ResourceSpec {
    pub alias: String,
    pub method: Method,
    pub url: String,
    pub interval: Duration,
    /// Exact-match origins; empty means unrestricted
    pub allowed_origins: Vec<String>,
    pub transform: Option<TransformFn>,
}

impl ResourceSpec {
    /// Create a spec with a zero interval; set one with [`ResourceSpec::interval`]
    pub fn new(alias: impl Into<String>, method: Method, url: impl Into<String>) -> Self {
        Self {
            alias: alias.into(),
            method,
            url: url.into(),
            interval: Duration::ZERO,
            allowed_origins: Vec::new(),
            transform: None,
        }
    }

    /// Shorthand for a `GET` resource
    pub fn get(alias: impl Into<String>, url: impl Into<String>) -> Self {
        Self::new(alias, Method::GET, url)
    }

    /// Set the refresh interval
    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Restrict reads and subscriptions to these origins
    pub fn allowed_origins<I, S>(mut self, origins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_origins = origins.into_iter().map(Into::into).collect();
        self
    }

    /// Transform fetched bodies before they are hashed and stored
    pub fn transform<F>(mut self, f: F) -> Self
    where
        F: Fn(Bytes) -> Bytes + Send + Sync + 'static,
    {
        self.transform = Some(Arc::new(f));
        self
    }

    /// Check the registration invariants
    pub fn validate(&self) -> Result<(), CacheError> {
        if self.alias.is_empty() {
            return Err(CacheError::Validation("missing alias"));
        }
        if self.method.as_str().is_empty() {
            return Err(CacheError::Validation("missing method"));
        }
        if self.url.is_empty() {
            return Err(CacheError::Validation("missing url"));
        }
        if self.interval.is_zero() {
            return Err(CacheError::Validation("invalid interval"));
        }
        Ok(())
    }
}

impl fmt::Debug for ResourceSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceSpec")
            .field("alias", &self.alias)
            .field("method", &self.method)
            .field("url", &self.url)
            .field("interval", &self.interval)
            .field("allowed_origins", &self.allowed_origins)
            .field("transform", &self.transform.is_some())
            .finish()
    }
}

/// Content, hash, headers and status produced by one fetch
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub content: Bytes,
    pub hash: String,
    pub headers: HeaderMap,
    pub status: StatusCode,
}

impl Snapshot {
    /// The state before the first successful fetch
    pub fn empty() -> Self {
        Self {
            content: Bytes::new(),
            hash: String::new(),
            headers: HeaderMap::new(),
            status: StatusCode::OK,
        }
    }

    /// Whether any fetch has succeeded yet
    pub fn is_populated(&self) -> bool {
        !self.hash.is_empty()
    }
}

/// Result of a successful fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    /// New content was stored and observers notified
    Updated,
    /// Content hash matched the stored snapshot; nothing changed
    Unchanged,
}

/// State of the background fetch loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopStatus {
    Idle,
    /// First fetch in flight
    Starting,
    Running,
    Stopped,
}

enum LoopState {
    Idle,
    Starting,
    Running { cancel: CancellationToken, handle: JoinHandle<()> },
    Stopped,
}

/// One cached upstream endpoint
pub struct Resource {
    spec: ResourceSpec,
    fetcher: Arc<dyn Fetcher>,
    on_update: Option<UpdateHook>,
    bus: Option<Arc<EventBus>>,
    snapshot: RwLock<Arc<Snapshot>>,
    /// Serializes fetches; readers never wait on it
    fetch_lock: Mutex<()>,
    lifecycle: Mutex<LoopState>,
}

impl Resource {
    /// Create a detached resource with no observers
    pub fn new(spec: ResourceSpec, fetcher: Arc<dyn Fetcher>) -> Self {
        Self {
            spec,
            fetcher,
            on_update: None,
            bus: None,
            snapshot: RwLock::new(Arc::new(Snapshot::empty())),
            fetch_lock: Mutex::new(()),
            lifecycle: Mutex::new(LoopState::Idle),
        }
    }

    /// Chain the per-resource hook and the registry event bus
    pub(crate) fn with_observers(mut self, on_update: Option<UpdateHook>, bus: Arc<EventBus>) -> Self {
        self.on_update = on_update;
        self.bus = Some(bus);
        self
    }

    pub fn alias(&self) -> &str {
        &self.spec.alias
    }

    pub fn method(&self) -> &Method {
        &self.spec.method
    }

    pub fn url(&self) -> &str {
        &self.spec.url
    }

    pub fn interval(&self) -> Duration {
        self.spec.interval
    }

    pub fn allowed_origins(&self) -> &[String] {
        &self.spec.allowed_origins
    }

    /// Current snapshot; cheap to clone and never mutated in place
    pub async fn snapshot(&self) -> Arc<Snapshot> {
        Arc::clone(&*self.snapshot.read().await)
    }

    /// Check an `Origin` header value against the allow-list
    ///
    /// An empty allow-list accepts everything, including a missing origin.
    /// Otherwise the origin must be present and match one entry exactly.
    pub fn is_origin_allowed(&self, origin: Option<&str>) -> bool {
        if self.spec.allowed_origins.is_empty() {
            return true;
        }

        match origin {
            Some(origin) if !origin.is_empty() => {
                self.spec.allowed_origins.iter().any(|allowed| allowed == origin)
            }
            _ => false,
        }
    }

    /// Fetch the upstream once and store the result if it changed
    ///
    /// Transport failures leave the stored snapshot untouched.
    pub async fn fetch(&self) -> Result<FetchOutcome, FetchError> {
        let _guard = self.fetch_lock.lock().await;

        let FetchedResponse { status, mut headers, body } =
            self.fetcher.fetch(&self.spec.method, &self.spec.url).await?;

        strip_hop_by_hop(&mut headers);

        let content = match &self.spec.transform {
            Some(transform) => {
                let out = transform(body);
                headers.insert(CONTENT_LENGTH, HeaderValue::from(out.len()));
                out
            }
            None => body,
        };

        let hash = content_hash(&content);
        if self.snapshot.read().await.hash == hash {
            log::debug!("[{}] content unchanged ({})", self.spec.alias, hash);
            return Ok(FetchOutcome::Unchanged);
        }

        if let Ok(etag) = HeaderValue::from_str(&hash) {
            headers.insert(ETAG, etag);
        }
        let max_age = format!("max-age={}", self.spec.interval.as_secs());
        if let Ok(cache_control) = HeaderValue::from_str(&max_age) {
            headers.insert(CACHE_CONTROL, cache_control);
        }

        let snapshot = Arc::new(Snapshot { content, hash, headers, status });
        *self.snapshot.write().await = Arc::clone(&snapshot);

        log::debug!(
            "[{}] cached {} bytes, status {}, hash {}",
            self.spec.alias,
            snapshot.content.len(),
            snapshot.status.as_u16(),
            snapshot.hash
        );

        self.notify(snapshot);
        Ok(FetchOutcome::Updated)
    }

    fn notify(&self, snapshot: Arc<Snapshot>) {
        let update = ResourceUpdate { alias: self.spec.alias.clone(), snapshot };

        if let Some(hook) = &self.on_update {
            hook(&update);
        }
        if let Some(bus) = &self.bus {
            bus.publish(&CacheEvent::Updated(update));
        }
    }

    /// Warm the cache and start the periodic fetch loop
    ///
    /// No-op unless idle. `Stopped` is terminal, so a stopped resource is
    /// not restarted, and a `stop()` during the first fetch wins.
    pub async fn start(self: &Arc<Self>) {
        {
            let mut state = self.lifecycle.lock().await;
            match *state {
                LoopState::Starting | LoopState::Running { .. } => return,
                LoopState::Stopped => {
                    log::debug!("[{}] fetch loop already stopped, not restarting", self.spec.alias);
                    return;
                }
                LoopState::Idle => {}
            }
            *state = LoopState::Starting;
        }

        if let Err(e) = self.fetch().await {
            log::warn!("[{}] initial fetch of {} failed: {}", self.spec.alias, self.spec.url, e);
        }

        let mut state = self.lifecycle.lock().await;
        if !matches!(*state, LoopState::Starting) {
            log::debug!("[{}] stopped during first fetch, loop not started", self.spec.alias);
            return;
        }

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(Arc::clone(self).run(cancel.clone()));
        *state = LoopState::Running { cancel, handle };

        log::info!(
            "[{}] fetch loop started ({} {} every {:?})",
            self.spec.alias,
            self.spec.method,
            self.spec.url,
            self.spec.interval
        );
    }

    async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let period = self.spec.interval;
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.fetch().await {
                        log::warn!("[{}] fetch failed, serving stale content: {}", self.spec.alias, e);
                    }
                }
            }
        }

        log::debug!("[{}] fetch loop ended", self.spec.alias);
    }

    /// Stop the fetch loop and wait for it to finish
    ///
    /// Safe to call any number of times.
    pub async fn stop(&self) {
        let previous = {
            let mut state = self.lifecycle.lock().await;
            std::mem::replace(&mut *state, LoopState::Stopped)
        };

        if let LoopState::Running { cancel, handle } = previous {
            cancel.cancel();
            if let Err(e) = handle.await {
                log::error!("[{}] fetch loop terminated abnormally: {}", self.spec.alias, e);
            }
            log::info!("[{}] fetch loop stopped", self.spec.alias);
        }
    }

    pub async fn status(&self) -> LoopStatus {
        match *self.lifecycle.lock().await {
            LoopState::Idle => LoopStatus::Idle,
            LoopState::Starting => LoopStatus::Starting,
            LoopState::Running { .. } => LoopStatus::Running,
            LoopState::Stopped => LoopStatus::Stopped,
        }
    }
}

impl fmt::Debug for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resource").field("spec", &self.spec).finish_non_exhaustive()
    }
}
