//! Server configuration

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::env;

/// Listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listening address
    /// Env: CACHET_HOST
    /// Default: "127.0.0.1"
    pub host: String,

    /// Listening port
    /// Env: CACHET_PORT
    /// Default: 3000
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { host: "127.0.0.1".to_string(), port: 3000 }
    }
}

impl ServerConfig {
    /// Merge another config into this one (other takes priority)
    pub fn merge(&mut self, other: Self) {
        self.host = other.host;
        self.port = other.port;
    }

    /// Apply environment variables
    pub fn apply_env_vars(&mut self) {
        if let Ok(host) = env::var("CACHET_HOST") {
            self.host = host;
        }

        if let Ok(port) = env::var("CACHET_PORT") {
            if let Ok(p) = port.parse() {
                self.port = p;
            }
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.port == 0 {
            bail!("Invalid port: port must be between 1 and 65535");
        }

        if self.host.is_empty() {
            bail!("Invalid host: host cannot be empty");
        }

        Ok(())
    }

    /// `host:port` to bind
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let cfg = ServerConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.bind_addr(), "127.0.0.1:3000");
    }

    #[test]
    fn test_invalid_values() {
        let cfg = ServerConfig { port: 0, ..Default::default() };
        assert!(cfg.validate().unwrap_err().to_string().contains("Invalid port"));

        let cfg = ServerConfig { host: String::new(), ..Default::default() };
        assert!(cfg.validate().unwrap_err().to_string().contains("Invalid host"));
    }

    #[test]
    fn test_apply_env_vars() {
        let mut cfg = ServerConfig::default();
        std::env::set_var("CACHET_HOST", "0.0.0.0");
        std::env::set_var("CACHET_PORT", "not-a-port");
        cfg.apply_env_vars();
        assert_eq!(cfg.host, "0.0.0.0");
        assert_eq!(cfg.port, 3000);
        std::env::remove_var("CACHET_HOST");
        std::env::remove_var("CACHET_PORT");
    }
}
