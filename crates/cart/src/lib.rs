//! AfrikRaga cart synchronization engine.
//!
//! An optimistic client-side shopping cart: every operation applies locally
//! and returns immediately, the rows are mirrored into persistent storage so
//! they survive restarts, and a background reconciler brings the backend cart
//! in line with local intent without ever blocking the caller.
//!
//! ```no_run
//! # async fn demo() -> afrikraga_cart::Result<()> {
//! use afrikraga_cart::{CartConfig, CartEngine};
//!
//! let config = CartConfig::from_env()?;
//! let cart = CartEngine::from_config(&config)?;
//! println!("{} items", cart.total_items());
//! cart.flush().await;
//! # Ok(())
//! # }
//! ```

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod api;
pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod persist;
pub mod reconcile;
pub mod storage;
pub mod store;

#[cfg(test)]
mod testing;

pub use api::{ApiError, CartApi, RestCartClient};
pub use config::{ApiConfig, CartConfig, ConfigError};
pub use engine::{CartEngine, EngineOptions};
pub use error::{Error, Result};
pub use storage::{FileStore, KeyValueStore, MemoryStore, StorageError};
pub use store::{CartStore, QuantityChange};
