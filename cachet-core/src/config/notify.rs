//! Update notification configuration

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::notify::{ChannelPolicy, NotifyOptions};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    /// Mount the SSE bridge; when off the endpoint answers 503
    pub enabled: bool,
    pub policy: ChannelPolicy,
    /// Reconnection delay advertised to clients, in milliseconds
    pub retry_ms: u64,
    pub heartbeat_secs: u64,
    pub mount: String,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            policy: ChannelPolicy::PerAlias,
            retry_ms: 5000,
            heartbeat_secs: 15,
            mount: "/resources/sse".to_string(),
        }
    }
}

impl NotifyConfig {
    pub fn merge(&mut self, other: Self) {
        *self = other;
    }

    pub fn validate(&self) -> Result<()> {
        if self.heartbeat_secs == 0 {
            bail!("Invalid notify.heartbeat_secs: must be greater than 0");
        }
        if !self.mount.starts_with('/') {
            bail!("Invalid notify.mount '{}': must start with '/'", self.mount);
        }
        Ok(())
    }

    pub fn to_options(&self) -> NotifyOptions {
        NotifyOptions::default()
            .policy(self.policy)
            .retry(Duration::from_millis(self.retry_ms))
            .heartbeat(Duration::from_secs(self.heartbeat_secs))
    }
}
