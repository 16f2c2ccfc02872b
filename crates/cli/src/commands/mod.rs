//! CLI command implementations.

pub mod cart;

use afrikraga_cart::ConfigError;
use afrikraga_core::LineId;
use thiserror::Error;

/// Errors that can occur running a command.
#[derive(Debug, Error)]
pub enum CliError {
    /// Configuration could not be loaded.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The cart engine could not start.
    #[error("Cart error: {0}")]
    Cart(#[from] afrikraga_cart::Error),

    /// No row has the given id.
    #[error("No cart row with id {0}")]
    NotInCart(LineId),

    /// Output could not be encoded.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
