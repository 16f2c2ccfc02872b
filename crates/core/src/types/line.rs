//! Cart line items and their identifiers.
//!
//! A line item is identified either by the backend's numeric row id or, before
//! the backend has confirmed it, by the `(product, variant)` pair it was added
//! for. [`LineId`] makes that distinction a pattern match:
//!
//! ```rust
//! # use afrikraga_core::{LineId, LineKey, ProductId, VariantId};
//! let local: LineId = "7_2".parse().unwrap();
//! assert_eq!(
//!     local,
//!     LineId::Local(LineKey::new(ProductId::new(7), Some(VariantId::new(2))))
//! );
//!
//! let server: LineId = "99".parse().unwrap();
//! assert!(!server.is_local());
//! ```

use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

use super::id::{LineItemId, ProductId, VariantId};

/// Separator between product and variant in a composite local id.
pub const LOCAL_ID_SEPARATOR: char = '_';

/// Placeholder written for a missing variant in a composite local id.
const NO_VARIANT: &str = "null";

/// The identity of a catalog entry in the cart: a product and its selected
/// option, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LineKey {
    pub product_id: ProductId,
    pub variant_id: Option<VariantId>,
}

impl LineKey {
    #[must_use]
    pub const fn new(product_id: ProductId, variant_id: Option<VariantId>) -> Self {
        Self {
            product_id,
            variant_id,
        }
    }
}

impl fmt::Display for LineKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.variant_id {
            Some(variant) => write!(f, "{}{LOCAL_ID_SEPARATOR}{variant}", self.product_id),
            None => write!(f, "{}{LOCAL_ID_SEPARATOR}{NO_VARIANT}", self.product_id),
        }
    }
}

/// Error parsing a [`LineId`] from its string form.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid line id: {0:?}")]
pub struct LineIdError(String);

/// Identifier of a cart row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LineId {
    /// Not yet confirmed by the backend.
    Local(LineKey),
    /// Assigned by the backend.
    Server(LineItemId),
}

impl LineId {
    /// Whether this row has not been confirmed by the backend yet.
    #[must_use]
    pub const fn is_local(&self) -> bool {
        matches!(self, Self::Local(_))
    }

    /// The backend row id, if confirmed.
    #[must_use]
    pub const fn server_id(&self) -> Option<LineItemId> {
        match self {
            Self::Server(id) => Some(*id),
            Self::Local(_) => None,
        }
    }
}

impl fmt::Display for LineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local(key) => key.fmt(f),
            Self::Server(id) => id.fmt(f),
        }
    }
}

impl From<LineItemId> for LineId {
    fn from(id: LineItemId) -> Self {
        Self::Server(id)
    }
}

impl From<LineKey> for LineId {
    fn from(key: LineKey) -> Self {
        Self::Local(key)
    }
}

impl FromStr for LineId {
    type Err = LineIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || LineIdError(s.to_string());

        let Some((product, variant)) = s.split_once(LOCAL_ID_SEPARATOR) else {
            return s
                .trim()
                .parse::<i64>()
                .map(|id| Self::Server(LineItemId::new(id)))
                .map_err(|_| invalid());
        };

        let product_id = product.parse::<i64>().map_err(|_| invalid())?;
        let variant_id = match variant {
            NO_VARIANT | "" | "undefined" => None,
            v => Some(VariantId::new(v.parse::<i64>().map_err(|_| invalid())?)),
        };

        Ok(Self::Local(LineKey::new(
            ProductId::new(product_id),
            variant_id,
        )))
    }
}

// Server ids are stored as JSON numbers and local ids as their composite
// string, so snapshots stay readable and the two forms never collide.
impl Serialize for LineId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Server(id) => serializer.serialize_i64(id.as_i64()),
            Self::Local(key) => serializer.collect_str(key),
        }
    }
}

impl<'de> Deserialize<'de> for LineId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Number(i64),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Number(id) => Ok(Self::Server(LineItemId::new(id))),
            Raw::Text(text) => text.parse().map_err(serde::de::Error::custom),
        }
    }
}

/// One row of the cart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartLineItem {
    pub id: LineId,
    pub product_id: ProductId,
    pub variant_id: Option<VariantId>,
    /// Always at least 1; a row with no quantity is removed instead.
    pub quantity: u32,
    /// Price per unit captured when the row was added.
    pub unit_price: Decimal,
    pub name: String,
    pub image: Option<String>,
}

impl CartLineItem {
    #[must_use]
    pub const fn key(&self) -> LineKey {
        LineKey::new(self.product_id, self.variant_id)
    }

    #[must_use]
    pub const fn is_local(&self) -> bool {
        self.id.is_local()
    }

    /// `quantity * unit_price`.
    #[must_use]
    pub fn line_total(&self) -> Decimal {
        self.unit_price * Decimal::from(self.quantity)
    }
}

/// A request to put something in the cart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewLineItem {
    pub product_id: ProductId,
    pub variant_id: Option<VariantId>,
    pub quantity: u32,
    pub unit_price: Decimal,
    pub name: String,
    pub image: Option<String>,
}

impl NewLineItem {
    #[must_use]
    pub const fn key(&self) -> LineKey {
        LineKey::new(self.product_id, self.variant_id)
    }

    /// Build the optimistic row for this request, identified by its key.
    #[must_use]
    pub fn into_local_item(self) -> CartLineItem {
        CartLineItem {
            id: LineId::Local(self.key()),
            product_id: self.product_id,
            variant_id: self.variant_id,
            quantity: self.quantity,
            unit_price: self.unit_price,
            name: self.name,
            image: self.image,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn key(product: i64, variant: Option<i64>) -> LineKey {
        LineKey::new(ProductId::new(product), variant.map(VariantId::new))
    }

    #[test]
    fn test_local_id_composite_format() {
        assert_eq!(LineId::Local(key(7, Some(2))).to_string(), "7_2");
        assert_eq!(LineId::Local(key(1, None)).to_string(), "1_null");
    }

    #[test]
    fn test_parse_line_ids() {
        assert_eq!("7_2".parse::<LineId>().unwrap(), LineId::Local(key(7, Some(2))));
        assert_eq!("1_null".parse::<LineId>().unwrap(), LineId::Local(key(1, None)));
        assert_eq!("1_undefined".parse::<LineId>().unwrap(), LineId::Local(key(1, None)));
        assert_eq!(
            "99".parse::<LineId>().unwrap(),
            LineId::Server(LineItemId::new(99))
        );
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!("abc".parse::<LineId>().is_err());
        assert!("7_x".parse::<LineId>().is_err());
        assert!("_2".parse::<LineId>().is_err());
    }

    #[test]
    fn test_line_id_json_shape() {
        let server = serde_json::to_value(LineId::Server(LineItemId::new(99))).unwrap();
        assert_eq!(server, serde_json::json!(99));

        let local = serde_json::to_value(LineId::Local(key(7, Some(2)))).unwrap();
        assert_eq!(local, serde_json::json!("7_2"));

        let parsed: LineId = serde_json::from_value(serde_json::json!("7_2")).unwrap();
        assert!(parsed.is_local());
    }

    #[test]
    fn test_new_item_becomes_local_row() {
        let item = NewLineItem {
            product_id: ProductId::new(7),
            variant_id: Some(VariantId::new(2)),
            quantity: 3,
            unit_price: Decimal::new(1250, 2),
            name: "Kente scarf".to_string(),
            image: None,
        }
        .into_local_item();

        assert_eq!(item.id.to_string(), "7_2");
        assert!(item.is_local());
        assert_eq!(item.line_total(), Decimal::new(3750, 2));
    }
}
