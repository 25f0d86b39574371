//! Cachet - Core
//!
//! An in-process HTTP resource cache for Rust services.
//!
//! # Overview
//!
//! Cachet periodically re-fetches a set of upstream resources and serves the
//! last successfully fetched copy to clients, with `Etag`/`If-None-Match`
//! conditional caching and per-resource origin gating. Changes can be pushed
//! to live subscribers over Server-Sent Events, and a companion proxy bridges
//! protocol-upgrade connections (WebSocket and friends) to a single upstream.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use cachet_core::prelude::*;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let cacher = Cacher::new(CacherOptions::default())?;
//!     let bridge = UpdateBridge::attach(&cacher, NotifyOptions::default()).await;
//!
//!     cacher
//!         .add_resource(
//!             ResourceSpec::get("clock", "http://worldclockapi.com/api/json/est/now")
//!                 .interval(Duration::from_secs(10)),
//!             None,
//!         )
//!         .await?;
//!
//!     let router = Router::new()
//!         .mount("/resources/sse", bridge)
//!         .mount("/resources", cacher.clone());
//!
//!     CacheServer::bind("127.0.0.1:3000", router).await?.run().await?;
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! - [`resource`] - A single cached endpoint and its fetch loop
//! - [`registry`] - The alias registry (`Cacher`), its event bus and serving contract
//! - [`notify`] - SSE update bridge (per-alias or common channel)
//! - [`proxy`] - Duplex upgrade bridge, plain reverse proxy and the web-app switch
//! - [`http`] - Hyper front door: router, middleware, fallback responder, static files
//! - [`config`] - TOML configuration with environment overrides
//! - [`logging`] - `env_logger` initialisation for the `log` facade

pub mod config;
pub mod error;
pub mod http;
pub mod logging;
pub mod notify;
pub mod proxy;
pub mod registry;
pub mod resource;

#[cfg(test)]
pub mod testing;

// Prelude module for convenient imports
pub mod prelude;

pub use error::{Error, Result};
pub use http::{CacheServer, Router};
pub use notify::{ChannelPolicy, NotifyOptions, UpdateBridge};
pub use proxy::{is_upgrade, DuplexProxy, ReverseProxy, WebAppProxy};
pub use registry::{CacheError, CacheEvent, Cacher, CacherOptions};
pub use resource::{FetchError, Fetcher, HttpFetcher, Resource, ResourceSpec, Snapshot};
