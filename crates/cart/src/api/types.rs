//! Wire types for the backend cart API and their normalization.

use afrikraga_core::{LineItemId, ProductId, SessionToken, VariantId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::{ConfirmedLine, LineResponse, ServerCart};

/// Response envelope shared by every endpoint.
#[derive(Debug, Deserialize)]
pub(crate) struct Envelope<T> {
    #[serde(default)]
    pub success: bool,
    pub data: Option<T>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Envelope fields only, for reading error messages off failed responses.
#[derive(Debug, Deserialize)]
pub(crate) struct ErrorEnvelope {
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ApiCart {
    #[serde(default, alias = "sessionId")]
    pub session_id: Option<String>,
    #[serde(default)]
    pub items: Vec<ApiLineItem>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ApiLineResponse {
    #[serde(default, alias = "sessionId")]
    pub session_id: Option<String>,
    pub item: ApiLineItem,
}

/// Priced catalog entry nested in a line item.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct ApiCatalogRef {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub price: Option<Decimal>,
    #[serde(default, alias = "salePrice")]
    pub sale_price: Option<Decimal>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ApiLineItem {
    pub id: i64,
    #[serde(alias = "productId")]
    pub product_id: i64,
    #[serde(default, alias = "variantId")]
    pub variant_id: Option<i64>,
    pub quantity: i64,
    #[serde(default)]
    pub price: Option<Decimal>,
    #[serde(default, alias = "salePrice")]
    pub sale_price: Option<Decimal>,
    #[serde(default)]
    pub product: Option<ApiCatalogRef>,
    #[serde(default)]
    pub variant: Option<ApiCatalogRef>,
}

#[derive(Debug, Serialize)]
pub(crate) struct AddLineRequest {
    pub product_id: i64,
    pub variant_id: Option<i64>,
    pub quantity: u32,
}

#[derive(Debug, Serialize)]
pub(crate) struct UpdateLineRequest {
    pub quantity: u32,
}

// =============================================================================
// Normalization
// =============================================================================

impl ApiLineItem {
    /// Unit price, most specific first: variant sale, variant, line sale,
    /// line, product sale, product.
    fn unit_price(&self) -> Option<Decimal> {
        let variant = self.variant.as_ref();
        let product = self.product.as_ref();

        variant
            .and_then(|v| v.sale_price)
            .or_else(|| variant.and_then(|v| v.price))
            .or(self.sale_price)
            .or(self.price)
            .or_else(|| product.and_then(|p| p.sale_price))
            .or_else(|| product.and_then(|p| p.price))
            .filter(|price| !price.is_sign_negative())
    }

    /// Normalize into a [`ConfirmedLine`].
    ///
    /// Lines with a non-positive quantity are dropped: the cart never holds
    /// them.
    pub fn into_confirmed(self) -> Option<ConfirmedLine> {
        let Ok(quantity) = u32::try_from(self.quantity) else {
            warn!(line_id = self.id, quantity = self.quantity, "Dropping server line with invalid quantity");
            return None;
        };
        if quantity == 0 {
            warn!(line_id = self.id, "Dropping server line with zero quantity");
            return None;
        }

        let unit_price = self.unit_price();
        let product = self.product.unwrap_or_default();
        let variant = self.variant.unwrap_or_default();

        Some(ConfirmedLine {
            id: LineItemId::new(self.id),
            product_id: ProductId::new(self.product_id),
            variant_id: self.variant_id.map(VariantId::new),
            quantity,
            unit_price,
            name: product.name.or(variant.name),
            image: variant.image.or(product.image),
        })
    }
}

impl From<ApiCart> for ServerCart {
    fn from(cart: ApiCart) -> Self {
        Self {
            session: cart.session_id.and_then(SessionToken::new),
            lines: cart
                .items
                .into_iter()
                .filter_map(ApiLineItem::into_confirmed)
                .collect(),
        }
    }
}

impl ApiLineResponse {
    pub fn into_line_response(self) -> Option<LineResponse> {
        let session = self.session_id.and_then(SessionToken::new);
        self.item
            .into_confirmed()
            .map(|line| LineResponse { session, line })
    }
}
