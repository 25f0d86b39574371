//! Configuration system for Cachet
//!
//! Values are resolved in the following order (highest priority wins):
//!
//! 1. **Environment Variables** (`CACHET_HOST`, `CACHET_PORT`, `CACHET_LOG_LEVEL`)
//! 2. **Config File** (`cachet.toml`)
//! 3. **Defaults**
//!
//! # Example
//!
//! ```no_run
//! use cachet_core::config::CachetConfig;
//!
//! let config = CachetConfig::load_from("cachet.toml")?;
//! config.validate()?;
//! # Ok::<(), anyhow::Error>(())
//! ```
//!
//! # File layout
//!
//! ```toml
//! [server]
//! host = "127.0.0.1"
//! port = 3000
//!
//! [notify]
//! policy = "common"
//!
//! [[resources]]
//! alias = "clock"
//! url = "http://worldclockapi.com/api/json/est/now"
//! interval_secs = 10
//! ```

pub mod cache;
pub mod logging;
pub mod notify;
pub mod resources;
pub mod routes;
pub mod server;

pub use cache::CacheConfig;
pub use logging::LoggingConfig;
pub use notify::NotifyConfig;
pub use resources::ResourceConfig;
pub use routes::{DevProxyConfig, WebAppConfig};
pub use server::ServerConfig;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// Default config file name
pub const DEFAULT_CONFIG_FILE: &str = "cachet.toml";

/// Complete Cachet configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CachetConfig {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub notify: NotifyConfig,
    pub cache: CacheConfig,
    pub resources: Vec<ResourceConfig>,
    pub dev_proxy: Option<DevProxyConfig>,
    pub webapp: Option<WebAppConfig>,
}

impl CachetConfig {
    /// Load `cachet.toml` from the working directory, if present
    pub fn load() -> Result<Self> {
        Self::load_from(DEFAULT_CONFIG_FILE)
    }

    /// Load configuration from a specific file
    ///
    /// A missing file yields the defaults; environment variables apply last.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let mut config = Self::default();

        if path.exists() {
            let file_config = Self::from_file(path)
                .with_context(|| format!("Failed to load config from {}", path.display()))?;
            config.merge(file_config);
        } else {
            log::debug!("No config file at {}, using defaults", path.display());
        }

        config.apply_env_vars();

        Ok(config)
    }

    /// Load configuration from TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        Self::from_toml(&content)
            .with_context(|| format!("Failed to parse TOML config: {}", path.as_ref().display()))
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Merge another config into this one (other takes priority)
    pub fn merge(&mut self, other: Self) {
        self.server.merge(other.server);
        self.logging.merge(other.logging);
        self.notify.merge(other.notify);
        self.cache.merge(other.cache);
        self.resources = other.resources;
        self.dev_proxy = other.dev_proxy;
        self.webapp = other.webapp;
    }

    /// Apply environment variables to configuration
    pub fn apply_env_vars(&mut self) {
        self.server.apply_env_vars();
        self.logging.apply_env_vars();
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        self.server.validate()?;
        self.logging.validate()?;
        self.notify.validate()?;
        self.cache.validate()?;

        let mut aliases = HashSet::new();
        for resource in &self.resources {
            resource.validate()?;
            if !aliases.insert(resource.alias.as_str()) {
                bail!("Duplicate resource alias '{}'", resource.alias);
            }
        }

        if let Some(dev_proxy) = &self.dev_proxy {
            dev_proxy.validate()?;
        }
        if let Some(webapp) = &self.webapp {
            webapp.validate()?;
        }
        Ok(())
    }
}
