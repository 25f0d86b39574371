//! Resource registry
//!
//! The [`Cacher`] maps aliases to [`Resource`]s. It validates registrations,
//! starts and stops fetch loops in bulk, publishes [`CacheEvent`]s to its
//! observers and serves cached content over HTTP (see [`serve`]).
//!
//! # Architecture
//!
//! ```text
//!                         Cacher (cheap clone)
//!                 ┌──────────────────────────────┐
//!                 │ resources: RwLock<HashMap<   │
//!                 │   alias, Arc<Resource>>>     │
//!                 │ bus: Arc<EventBus>           │
//!                 └──────┬───────────────┬───────┘
//!                        │               │
//!           fetch loop ──┘               └── serve(): read Arc<Snapshot>
//!           (one task per resource)          never fetches
//!                │
//!                └─► on_update hook ─► bus.publish(Updated) ─► UpdateBridge
//! ```

pub mod events;
pub mod serve;

pub use events::{CacheEvent, CacheObserver, EventBus, ResourceUpdate};
pub use serve::{alias_from_request, request_origin, write_common_headers};

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError};
use std::time::Duration;
use tokio::sync::RwLock;

use crate::resource::{
    FetchError, FetchOutcome, Fetcher, HttpFetcher, Resource, ResourceSpec, UpdateHook,
    FETCH_TIMEOUT,
};

/// Registry errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum CacheError {
    /// A registration field is missing or out of range
    #[error("invalid resource: {0}")]
    Validation(&'static str),

    /// The alias is already registered (or being registered)
    #[error("alias already registered: {0}")]
    DuplicateAlias(String),

    /// No resource is registered under the alias
    #[error("unknown alias: {0}")]
    UnknownAlias(String),

    /// A manual fetch failed
    #[error(transparent)]
    Fetch(#[from] FetchError),
}

/// Where the serving endpoints read the alias from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AliasSource {
    /// `?alias=<name>`
    #[default]
    Query,
    /// Last path segment: `/resources/<name>`
    Path,
}

/// Registry options
#[derive(Debug, Clone)]
pub struct CacherOptions {
    pub alias_source: AliasSource,
    /// Timeout applied by the default [`HttpFetcher`]
    pub fetch_timeout: Duration,
}

impl Default for CacherOptions {
    fn default() -> Self {
        Self { alias_source: AliasSource::Query, fetch_timeout: FETCH_TIMEOUT }
    }
}

impl CacherOptions {
    pub fn alias_source(mut self, source: AliasSource) -> Self {
        self.alias_source = source;
        self
    }

    pub fn fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }
}

struct CacherInner {
    resources: RwLock<HashMap<String, Arc<Resource>>>,
    /// Resources between validation and insertion, still in their first fetch
    pending: std::sync::Mutex<HashMap<String, Arc<Resource>>>,
    bus: Arc<EventBus>,
    fetcher: Arc<dyn Fetcher>,
    options: CacherOptions,
}

/// Alias → resource registry and HTTP serving front
///
/// Cloning is cheap; all clones share the same registry.
#[derive(Clone)]
pub struct Cacher {
    inner: Arc<CacherInner>,
}

impl Cacher {
    /// Create a registry that fetches through `reqwest`
    pub fn new(options: CacherOptions) -> crate::Result<Self> {
        let fetcher = HttpFetcher::with_timeout(options.fetch_timeout)?;
        Ok(Self::with_fetcher(options, Arc::new(fetcher)))
    }

    /// Create a registry with a custom fetch primitive
    pub fn with_fetcher(options: CacherOptions, fetcher: Arc<dyn Fetcher>) -> Self {
        Self {
            inner: Arc::new(CacherInner {
                resources: RwLock::new(HashMap::new()),
                pending: std::sync::Mutex::new(HashMap::new()),
                bus: Arc::new(EventBus::new()),
                fetcher,
                options,
            }),
        }
    }

    pub fn options(&self) -> &CacherOptions {
        &self.inner.options
    }

    /// Register an observer for registry events
    pub fn subscribe(&self, observer: Arc<dyn CacheObserver>) {
        self.inner.bus.subscribe(observer);
    }

    /// Validate, start and register a resource
    ///
    /// The first fetch completes before this returns, so the returned
    /// resource is already populated unless that fetch failed. `on_update`
    /// runs before registry observers on every content change.
    pub async fn add_resource(
        &self,
        spec: ResourceSpec,
        on_update: Option<UpdateHook>,
    ) -> Result<Arc<Resource>, CacheError> {
        spec.validate()?;
        let alias = spec.alias.clone();

        let resource = Arc::new(
            Resource::new(spec, Arc::clone(&self.inner.fetcher))
                .with_observers(on_update, Arc::clone(&self.inner.bus)),
        );

        // Released on every exit path, including a dropped future or a panic
        let _reservation = {
            let resources = self.inner.resources.read().await;
            let mut pending = self.inner.pending.lock().unwrap_or_else(PoisonError::into_inner);
            if resources.contains_key(&alias) || pending.contains_key(&alias) {
                return Err(CacheError::DuplicateAlias(alias));
            }
            pending.insert(alias.clone(), Arc::clone(&resource));
            Reservation { pending: &self.inner.pending, alias: alias.clone() }
        };

        self.inner.bus.publish(&CacheEvent::Added { alias: alias.clone() });
        resource.start().await;

        self.inner.resources.write().await.insert(alias.clone(), Arc::clone(&resource));

        log::info!("Resource '{}' registered ({})", alias, resource.url());
        Ok(resource)
    }

    /// Remove a resource and stop its fetch loop
    pub async fn remove_resource(&self, alias: &str) -> Result<Arc<Resource>, CacheError> {
        let resource = {
            let mut resources = self.inner.resources.write().await;
            if !resources.contains_key(alias) {
                return Err(CacheError::UnknownAlias(alias.to_string()));
            }
            self.inner.bus.publish(&CacheEvent::Removed { alias: alias.to_string() });
            resources.remove(alias)
        };

        let resource = resource.ok_or_else(|| CacheError::UnknownAlias(alias.to_string()))?;
        resource.stop().await;

        log::info!("Resource '{}' removed", alias);
        Ok(resource)
    }

    /// Start every registered fetch loop
    pub async fn start(&self) {
        let resources = self.resources().await;
        join_all(resources.iter().map(|r| r.start())).await;
        self.inner.bus.publish(&CacheEvent::Started);
    }

    /// Stop every registered fetch loop and wait for them to end
    ///
    /// Resources still being added are stopped too; their loop never starts.
    pub async fn stop(&self) {
        let resources = {
            let registered = self.inner.resources.read().await;
            let pending = self.inner.pending.lock().unwrap_or_else(PoisonError::into_inner);
            registered.values().chain(pending.values()).cloned().collect::<Vec<_>>()
        };
        join_all(resources.iter().map(|r| r.stop())).await;
        self.inner.bus.publish(&CacheEvent::Stopped);
        log::info!("Cacher stopped ({} resources)", resources.len());
    }

    /// Fetch one resource now, outside its schedule
    pub async fn fetch(&self, alias: &str) -> Result<FetchOutcome, CacheError> {
        let resource =
            self.get(alias).await.ok_or_else(|| CacheError::UnknownAlias(alias.to_string()))?;
        Ok(resource.fetch().await?)
    }

    pub async fn get(&self, alias: &str) -> Option<Arc<Resource>> {
        self.inner.resources.read().await.get(alias).cloned()
    }

    /// All registered resources, sorted by alias
    pub async fn resources(&self) -> Vec<Arc<Resource>> {
        let mut resources: Vec<_> = self.inner.resources.read().await.values().cloned().collect();
        resources.sort_by(|a, b| a.alias().cmp(b.alias()));
        resources
    }

    pub async fn len(&self) -> usize {
        self.inner.resources.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// Holds an alias in the pending set until dropped
struct Reservation<'a> {
    pending: &'a std::sync::Mutex<HashMap<String, Arc<Resource>>>,
    alias: String,
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner).remove(&self.alias);
    }
}
