//! Top-level error type for the Cachet core crate

use crate::proxy::ProxyError;
use crate::registry::CacheError;
use crate::resource::FetchError;

/// Main result type for the framework
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for Cachet
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Registration and lookup errors from the registry
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// Upstream fetch errors
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// Duplex or reverse proxy errors
    #[error(transparent)]
    Proxy(#[from] ProxyError),

    /// Socket binding and other I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
