//! Logging configuration

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::env;

const LEVELS: [&str; 6] = ["off", "error", "warn", "info", "debug", "trace"];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Env: CACHET_LOG_LEVEL
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string() }
    }
}

impl LoggingConfig {
    pub fn merge(&mut self, other: Self) {
        *self = other;
    }

    pub fn apply_env_vars(&mut self) {
        if let Ok(level) = env::var("CACHET_LOG_LEVEL") {
            self.level = level;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !LEVELS.contains(&self.level.to_ascii_lowercase().as_str()) {
            bail!("Invalid log level '{}': expected one of {}", self.level, LEVELS.join(", "));
        }
        Ok(())
    }

    pub fn level_filter(&self) -> log::LevelFilter {
        self.level.parse().unwrap_or(log::LevelFilter::Info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_levels() {
        let cfg = LoggingConfig { level: "DEBUG".into() };
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.level_filter(), log::LevelFilter::Debug);

        let cfg = LoggingConfig { level: "loud".into() };
        assert!(cfg.validate().is_err());
        assert_eq!(cfg.level_filter(), log::LevelFilter::Info);
    }
}
