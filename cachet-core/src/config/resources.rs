//! Declared upstream resources

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::resource::ResourceSpec;

/// One `[[resources]]` entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceConfig {
    pub alias: String,
    #[serde(default = "default_method")]
    pub method: String,
    pub url: String,
    pub interval_secs: u64,
    #[serde(default)]
    pub allowed_origins: Vec<String>,
}

fn default_method() -> String {
    "GET".to_string()
}

impl ResourceConfig {
    pub fn validate(&self) -> Result<()> {
        if self.alias.is_empty() {
            bail!("Invalid resource: alias cannot be empty");
        }
        if self.interval_secs == 0 {
            bail!("Invalid resource '{}': interval_secs must be greater than 0", self.alias);
        }
        self.to_spec().map(|_| ())
    }

    /// Build the registration spec
    pub fn to_spec(&self) -> Result<ResourceSpec> {
        let method = http::Method::from_bytes(self.method.to_ascii_uppercase().as_bytes())
            .with_context(|| format!("Invalid method '{}' for '{}'", self.method, self.alias))?;
        reqwest::Url::parse(&self.url)
            .with_context(|| format!("Invalid url '{}' for '{}'", self.url, self.alias))?;

        Ok(ResourceSpec::new(&self.alias, method, &self.url)
            .interval(Duration::from_secs(self.interval_secs))
            .allowed_origins(self.allowed_origins.iter().cloned()))
    }
}
