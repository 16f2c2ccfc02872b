//! Core types for AfrikRaga.
//!
//! This module provides type-safe wrappers for the cart domain.

pub mod id;
pub mod line;
pub mod session;
pub mod totals;

pub use id::*;
pub use line::{CartLineItem, LOCAL_ID_SEPARATOR, LineId, LineIdError, LineKey, NewLineItem};
pub use session::SessionToken;
pub use totals::CartTotals;
