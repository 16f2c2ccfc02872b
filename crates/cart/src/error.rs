//! Crate-level error type.
//!
//! Cart operations themselves never fail: local changes always apply, and
//! reconciliation failures are only logged. These errors come from setting
//! the engine up.

use thiserror::Error;

use crate::api::ApiError;
use crate::config::ConfigError;
use crate::storage::StorageError;

/// Errors raised while building a [`CartEngine`](crate::CartEngine).
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration could not be loaded.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The backend client could not be built.
    #[error("API error: {0}")]
    Api(#[from] ApiError),

    /// The storage directory could not be prepared.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Result alias for engine setup.
pub type Result<T, E = Error> = std::result::Result<T, E>;
