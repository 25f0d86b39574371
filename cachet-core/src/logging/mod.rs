//! Logger setup
//!
//! Library code logs through the `log` macros; binaries call
//! [`init_logging`] once at startup to install `env_logger`.
//!
//! ```rust,no_run
//! use cachet_core::config::LoggingConfig;
//!
//! cachet_core::logging::init_logging(&LoggingConfig::default());
//! log::info!("Server starting on port {}", 3000);
//! ```

use std::sync::Once;

use crate::config::LoggingConfig;

static INIT: Once = Once::new();

/// Install `env_logger` at the configured level
///
/// `RUST_LOG`, when set, overrides the configured level. Safe to call more
/// than once; only the first call has an effect.
pub fn init_logging(config: &LoggingConfig) {
    INIT.call_once(|| {
        let env = env_logger::Env::default().default_filter_or(config.level_filter().as_str());
        let _ = env_logger::Builder::from_env(env)
            .format_timestamp_millis()
            .format_module_path(false)
            .try_init();
    });
}
