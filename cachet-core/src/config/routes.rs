//! Optional extra mounts: development proxy and static web app

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Forward a prefix to a development server, upgrades included
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DevProxyConfig {
    pub prefix: String,
    pub target: String,
}

impl DevProxyConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.prefix.starts_with('/') {
            bail!("Invalid dev_proxy.prefix '{}': must start with '/'", self.prefix);
        }
        if reqwest::Url::parse(&self.target).is_err() {
            bail!("Invalid dev_proxy.target '{}'", self.target);
        }
        Ok(())
    }
}

/// Serve a directory, with fallback content for missing paths
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebAppConfig {
    #[serde(default = "default_prefix")]
    pub prefix: String,
    pub root: PathBuf,
    #[serde(default)]
    pub fallback: Option<PathBuf>,
}

fn default_prefix() -> String {
    "/".to_string()
}

impl WebAppConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.prefix.starts_with('/') {
            bail!("Invalid webapp.prefix '{}': must start with '/'", self.prefix);
        }
        if !self.root.is_dir() {
            bail!("Web app root not found: {}", self.root.display());
        }
        if let Some(fallback) = &self.fallback {
            if !fallback.is_file() {
                bail!("Web app fallback not found: {}", fallback.display());
            }
        }
        Ok(())
    }
}
