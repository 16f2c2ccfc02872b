//! Derived cart aggregates.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::line::CartLineItem;

/// Item count and subtotal of a set of cart rows.
///
/// Always computed from the rows; never stored on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CartTotals {
    /// Sum of all row quantities.
    pub item_count: u64,
    /// Sum of `quantity * unit_price` over all rows.
    pub subtotal: Decimal,
}

impl CartTotals {
    /// Compute totals for the given rows.
    #[must_use]
    pub fn from_items(items: &[CartLineItem]) -> Self {
        items.iter().fold(Self::default(), |acc, item| Self {
            item_count: acc.item_count + u64::from(item.quantity),
            subtotal: acc.subtotal + item.line_total(),
        })
    }
}
