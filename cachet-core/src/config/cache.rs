//! Cache serving configuration

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::registry::{AliasSource, CacherOptions};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub mount: String,
    pub alias_source: AliasSource,
    pub fetch_timeout_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { mount: "/resources".to_string(), alias_source: AliasSource::Query, fetch_timeout_secs: 10 }
    }
}

impl CacheConfig {
    pub fn merge(&mut self, other: Self) {
        *self = other;
    }

    pub fn validate(&self) -> Result<()> {
        if !self.mount.starts_with('/') {
            bail!("Invalid cache.mount '{}': must start with '/'", self.mount);
        }
        if self.fetch_timeout_secs == 0 {
            bail!("Invalid cache.fetch_timeout_secs: must be greater than 0");
        }
        Ok(())
    }

    pub fn to_options(&self) -> CacherOptions {
        CacherOptions::default()
            .alias_source(self.alias_source)
            .fetch_timeout(Duration::from_secs(self.fetch_timeout_secs))
    }
}
