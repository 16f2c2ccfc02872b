//! Backend cart REST API.
//!
//! # Architecture
//!
//! - [`CartApi`] is the seam the reconciler talks through; tests substitute
//!   scripted implementations
//! - [`RestCartClient`] implements it over `reqwest`
//! - Responses are unwrapped from the `{ success, data, message }` envelope and
//!   normalized into [`ConfirmedLine`]s
//!
//! # Endpoints
//!
//! | operation | request |
//! |---|---|
//! | load | `GET /cart` |
//! | add | `POST /cart/items` |
//! | update | `PUT /cart/items/{id}` |
//! | remove | `DELETE /cart/items/{id}` |
//! | clear | `DELETE /cart` |

mod client;
mod types;

use std::future::Future;

use afrikraga_core::{CartLineItem, LineId, LineItemId, LineKey, ProductId, SessionToken, VariantId};
use rust_decimal::Decimal;
use thiserror::Error;

pub use client::RestCartClient;

/// Errors that can occur when talking to the backend cart API.
#[derive(Debug, Error)]
pub enum ApiError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Backend answered with a non-success status.
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    /// Backend answered `success: false`.
    #[error("Request rejected: {0}")]
    Rejected(String),

    /// Response body could not be parsed.
    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),

    /// Rate limited by the backend.
    #[error("Rate limited, retry after {0} seconds")]
    RateLimited(u64),

    /// A successful response carried no data where data was required.
    #[error("Missing data in response: {0}")]
    MissingData(&'static str),

    /// A configured value cannot be sent as a header.
    #[error("Invalid header value for {0}")]
    InvalidHeader(&'static str),

    /// Configured base URL cannot be extended into an endpoint.
    #[error("Invalid endpoint: {0}")]
    Endpoint(#[from] url::ParseError),
}

/// A line item as the backend reports it, normalized.
///
/// Price and display fields are optional because the backend does not always
/// echo them; grafting onto a local row keeps the local values in that case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmedLine {
    pub id: LineItemId,
    pub product_id: ProductId,
    pub variant_id: Option<VariantId>,
    pub quantity: u32,
    pub unit_price: Option<Decimal>,
    pub name: Option<String>,
    pub image: Option<String>,
}

impl ConfirmedLine {
    #[must_use]
    pub const fn key(&self) -> LineKey {
        LineKey::new(self.product_id, self.variant_id)
    }

    /// Row for a line loaded from the server cart.
    #[must_use]
    pub fn into_item(self) -> CartLineItem {
        CartLineItem {
            id: LineId::Server(self.id),
            product_id: self.product_id,
            variant_id: self.variant_id,
            quantity: self.quantity,
            unit_price: self.unit_price.unwrap_or_default(),
            name: self.name.unwrap_or_default(),
            image: self.image,
        }
    }

    /// Upgrade an optimistic row with the server's id and normalized fields.
    ///
    /// The local quantity is kept: later local changes to it are already
    /// queued behind this confirmation.
    #[must_use]
    pub fn graft_onto(&self, local: &CartLineItem) -> CartLineItem {
        CartLineItem {
            id: LineId::Server(self.id),
            product_id: local.product_id,
            variant_id: local.variant_id,
            quantity: local.quantity,
            unit_price: self.unit_price.unwrap_or(local.unit_price),
            name: self
                .name
                .clone()
                .filter(|name| !name.is_empty())
                .unwrap_or_else(|| local.name.clone()),
            image: self.image.clone().or_else(|| local.image.clone()),
        }
    }
}

/// The backend's view of the cart.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ServerCart {
    pub session: Option<SessionToken>,
    pub lines: Vec<ConfirmedLine>,
}

/// Response to a successful add or update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineResponse {
    /// Session token, present when the backend created or rotated the cart.
    pub session: Option<SessionToken>,
    pub line: ConfirmedLine,
}

/// Body of an add request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddLine {
    pub key: LineKey,
    pub quantity: u32,
}

/// Backend cart operations used by the reconciler.
pub trait CartApi: Send + Sync + 'static {
    /// Fetch the server cart.
    fn fetch_cart(
        &self,
        session: Option<&SessionToken>,
    ) -> impl Future<Output = Result<ServerCart, ApiError>> + Send;

    /// Add a quantity of a product/variant to the server cart.
    fn add_line(
        &self,
        session: Option<&SessionToken>,
        line: AddLine,
    ) -> impl Future<Output = Result<LineResponse, ApiError>> + Send;

    /// Set the quantity of a server row.
    ///
    /// Returns the updated line when the backend echoes it.
    fn update_line(
        &self,
        session: Option<&SessionToken>,
        id: LineItemId,
        quantity: u32,
    ) -> impl Future<Output = Result<Option<ConfirmedLine>, ApiError>> + Send;

    /// Delete a server row.
    fn remove_line(
        &self,
        session: Option<&SessionToken>,
        id: LineItemId,
    ) -> impl Future<Output = Result<(), ApiError>> + Send;

    /// Delete every row of the server cart.
    fn clear_cart(
        &self,
        session: Option<&SessionToken>,
    ) -> impl Future<Output = Result<(), ApiError>> + Send;
}
