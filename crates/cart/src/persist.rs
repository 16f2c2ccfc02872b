//! Mirrors the cart rows and session token into key-value storage.
//!
//! Every failure here is logged and swallowed: a snapshot that can't be read
//! loads as an empty cart, and a snapshot that can't be written leaves the
//! in-memory rows untouched.

use afrikraga_core::{CartLineItem, SessionToken};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::storage::{KeyValueStore, StorageError};

/// Storage keys used by the cart.
pub mod keys {
    /// Key for the serialized row list.
    pub const CART_ITEMS: &str = "afrikraga.cart.items";

    /// Key for the backend cart session token.
    pub const CART_SESSION: &str = "afrikraga.cart.session";
}

/// Serialized form of the row list.
#[derive(Debug, Serialize, Deserialize)]
struct CartSnapshot {
    saved_at: DateTime<Utc>,
    items: Vec<CartLineItem>,
}

/// Reads and writes the cart snapshot and session token.
#[derive(Debug)]
pub struct PersistenceMirror<S> {
    storage: S,
}

impl<S: KeyValueStore> PersistenceMirror<S> {
    #[must_use]
    pub const fn new(storage: S) -> Self {
        Self { storage }
    }

    /// Load the persisted rows. Missing or malformed snapshots load as empty.
    pub fn load_items(&self) -> Vec<CartLineItem> {
        let raw = match self.storage.get(keys::CART_ITEMS) {
            Ok(Some(raw)) => raw,
            Ok(None) => return Vec::new(),
            Err(e) => {
                warn!(error = %e, "Failed to read cart snapshot, starting empty");
                return Vec::new();
            }
        };

        match serde_json::from_str::<CartSnapshot>(&raw) {
            Ok(snapshot) => {
                // Quantities are never zero in memory; drop anything that is.
                let items: Vec<_> = snapshot
                    .items
                    .into_iter()
                    .filter(|item| item.quantity > 0)
                    .collect();
                debug!(rows = items.len(), saved_at = %snapshot.saved_at, "Loaded cart snapshot");
                items
            }
            Err(e) => {
                warn!(error = %e, "Malformed cart snapshot, starting empty");
                Vec::new()
            }
        }
    }

    /// Persist the full row list.
    pub fn save_items(&self, items: &[CartLineItem]) {
        let snapshot = CartSnapshot {
            saved_at: Utc::now(),
            items: items.to_vec(),
        };

        let result = serde_json::to_string(&snapshot)
            .map_err(StorageError::from)
            .and_then(|json| self.storage.set(keys::CART_ITEMS, &json));

        if let Err(e) = result {
            warn!(error = %e, "Failed to persist cart snapshot");
        }
    }

    /// Wipe the persisted row list.
    pub fn clear_items(&self) {
        if let Err(e) = self.storage.remove(keys::CART_ITEMS) {
            warn!(error = %e, "Failed to wipe cart snapshot");
        }
    }

    /// Cached backend session token, if any.
    pub fn session_token(&self) -> Option<SessionToken> {
        match self.storage.get(keys::CART_SESSION) {
            Ok(raw) => raw.and_then(SessionToken::new),
            Err(e) => {
                warn!(error = %e, "Failed to read cart session token");
                None
            }
        }
    }

    /// Cache the backend session token.
    pub fn save_session_token(&self, token: &SessionToken) {
        if let Err(e) = self.storage.set(keys::CART_SESSION, token.as_str()) {
            warn!(error = %e, "Failed to persist cart session token");
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use afrikraga_core::{LineId, LineItemId, ProductId, VariantId};
    use rust_decimal::Decimal;

    use super::*;
    use crate::storage::MemoryStore;

    fn row() -> CartLineItem {
        CartLineItem {
            id: LineId::Server(LineItemId::new(12)),
            product_id: ProductId::new(3),
            variant_id: Some(VariantId::new(4)),
            quantity: 2,
            unit_price: Decimal::new(4500, 2),
            name: "Ankara tote".to_string(),
            image: Some("https://cdn.afrikraga.com/tote.jpg".to_string()),
        }
    }

    #[test]
    fn test_missing_snapshot_is_empty() {
        let mirror = PersistenceMirror::new(MemoryStore::new());
        assert!(mirror.load_items().is_empty());
    }

    #[test]
    fn test_malformed_snapshot_is_empty() {
        let storage = MemoryStore::new();
        storage.set(keys::CART_ITEMS, "{not json").unwrap();
        let mirror = PersistenceMirror::new(storage);
        assert!(mirror.load_items().is_empty());
    }

    #[test]
    fn test_snapshot_reload() {
        let storage = MemoryStore::new();
        PersistenceMirror::new(storage.clone()).save_items(&[row()]);

        let reloaded = PersistenceMirror::new(storage).load_items();
        assert_eq!(reloaded, vec![row()]);
    }

    #[test]
    fn test_zero_quantity_rows_dropped_on_load() {
        let storage = MemoryStore::new();
        let mut empty = row();
        empty.quantity = 0;
        PersistenceMirror::new(storage.clone()).save_items(&[empty, row()]);

        let reloaded = PersistenceMirror::new(storage).load_items();
        assert_eq!(reloaded.len(), 1);
    }

    #[test]
    fn test_clear_items() {
        let storage = MemoryStore::new();
        let mirror = PersistenceMirror::new(storage.clone());
        mirror.save_items(&[row()]);
        mirror.clear_items();
        assert!(storage.get(keys::CART_ITEMS).unwrap().is_none());
        assert!(mirror.load_items().is_empty());
    }

    #[test]
    fn test_session_token_roundtrip() {
        let mirror = PersistenceMirror::new(MemoryStore::new());
        assert!(mirror.session_token().is_none());

        let token = SessionToken::new("sess_abc123").unwrap();
        mirror.save_session_token(&token);
        assert_eq!(mirror.session_token(), Some(token));
    }
}
