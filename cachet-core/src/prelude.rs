//! Prelude module for convenient imports.
//!
//! ```rust,ignore
//! use cachet_core::prelude::*;
//! ```

// === Cache ===
pub use crate::registry::{AliasSource, CacheError, CacheEvent, CacheObserver, Cacher, CacherOptions};
pub use crate::resource::{FetchOutcome, Fetcher, HttpFetcher, Resource, ResourceSpec, Snapshot};

// === Notifications ===
pub use crate::notify::{ChannelPolicy, NotifyDisabled, NotifyOptions, UpdateBridge};

// === HTTP ===
pub use crate::http::{AccessLog, CacheServer, Fallback, Handler, Middleware, Router, StaticFiles};
pub use crate::proxy::{DuplexProxy, ReverseProxy, WebAppProxy};

// === Configuration ===
pub use crate::config::CachetConfig;
pub use crate::logging::init_logging;

// === Errors ===
pub use crate::error::{Error, Result};
