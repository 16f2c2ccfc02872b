//! AfrikRaga Core - Shared cart domain types.
//!
//! This crate provides the types used across the AfrikRaga cart components:
//! - `cart` - Cart state container and background reconciliation engine
//! - `cli` - Command-line driver for the cart engine
//!
//! # Architecture
//!
//! The core crate contains only types - no I/O, no storage access, no HTTP
//! clients. This keeps it lightweight and allows it to be used anywhere.
//!
//! # Modules
//!
//! - [`types`] - Typed IDs, line identifiers, line items, totals, session tokens

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod types;

pub use types::*;
