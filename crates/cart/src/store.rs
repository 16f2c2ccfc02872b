//! In-memory cart state container.
//!
//! [`CartStore`] owns the row list. Every operation applies synchronously,
//! writes the new rows through the [`PersistenceMirror`] and publishes a
//! snapshot to subscribers before returning. It never talks to the network;
//! the [`CartEngine`](crate::CartEngine) pairs each local change with a
//! reconciliation task.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use afrikraga_core::{CartLineItem, CartTotals, LineId, LineKey, NewLineItem, SessionToken};
use rust_decimal::Decimal;
use tokio::sync::watch;
use tracing::debug;

use crate::persist::PersistenceMirror;
use crate::storage::KeyValueStore;

/// Outcome of [`CartStore::set_quantity`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuantityChange {
    /// The row now has the requested quantity.
    Updated(CartLineItem),
    /// The requested quantity was below 1, so the row was removed.
    Removed(CartLineItem),
    /// No row has that id.
    Missing,
}

/// Shared, cheaply cloneable handle to the cart rows.
pub struct CartStore<S> {
    inner: Arc<StoreInner<S>>,
}

struct StoreInner<S> {
    rows: Mutex<Vec<CartLineItem>>,
    /// Quantity added per row key that the server has not answered for yet.
    /// Always locked after `rows`.
    unconfirmed: Mutex<HashMap<LineKey, u32>>,
    mirror: PersistenceMirror<S>,
    changes: watch::Sender<Vec<CartLineItem>>,
}

impl<S> Clone for CartStore<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: KeyValueStore> CartStore<S> {
    /// Open the store, rehydrating rows from the persisted snapshot.
    #[must_use]
    pub fn open(mirror: PersistenceMirror<S>) -> Self {
        let rows = mirror.load_items();
        let (changes, _) = watch::channel(rows.clone());

        Self {
            inner: Arc::new(StoreInner {
                rows: Mutex::new(rows),
                unconfirmed: Mutex::new(HashMap::new()),
                mirror,
                changes,
            }),
        }
    }

    fn rows(&self) -> MutexGuard<'_, Vec<CartLineItem>> {
        self.inner
            .rows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn unconfirmed(&self) -> MutexGuard<'_, HashMap<LineKey, u32>> {
        self.inner
            .unconfirmed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn commit(&self, rows: &[CartLineItem]) {
        self.inner.mirror.save_items(rows);
        self.inner.changes.send_replace(rows.to_vec());
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    /// Add an item, merging into an existing row for the same product and
    /// variant.
    ///
    /// The added quantity counts as unconfirmed until
    /// [`confirm_add`](Self::confirm_add) is called for it.
    ///
    /// Returns the resulting row, or `None` when `item.quantity` is 0.
    pub fn add(&self, item: NewLineItem) -> Option<CartLineItem> {
        if item.quantity == 0 {
            debug!(key = %item.key(), "Ignoring add with zero quantity");
            return None;
        }

        let mut rows = self.rows();
        let key = item.key();
        let quantity = item.quantity;
        let row = if let Some(existing) = rows.iter_mut().find(|row| row.key() == key) {
            existing.quantity = existing.quantity.saturating_add(quantity);
            existing.clone()
        } else {
            let row = item.into_local_item();
            rows.push(row.clone());
            row
        };

        let mut unconfirmed = self.unconfirmed();
        let pending = unconfirmed.entry(key).or_default();
        *pending = pending.saturating_add(quantity);
        drop(unconfirmed);

        self.commit(&rows);
        Some(row)
    }

    /// Mark `quantity` of an earlier add of `key` as answered by the server,
    /// whether it succeeded or not.
    pub fn confirm_add(&self, key: &LineKey, quantity: u32) {
        let mut unconfirmed = self.unconfirmed();
        if let Some(pending) = unconfirmed.get_mut(key) {
            *pending = pending.saturating_sub(quantity);
            if *pending == 0 {
                unconfirmed.remove(key);
            }
        }
    }

    /// Quantity per row key still waiting for an add response.
    ///
    /// Call it inside [`replace_all_with`](Self::replace_all_with) to read it
    /// consistently with the rows.
    #[must_use]
    pub fn unconfirmed_adds(&self) -> HashMap<LineKey, u32> {
        self.unconfirmed().clone()
    }

    /// Remove the row with `id`, returning it.
    pub fn remove(&self, id: &LineId) -> Option<CartLineItem> {
        let mut rows = self.rows();
        let index = rows.iter().position(|row| row.id == *id)?;
        let removed = rows.remove(index);
        self.commit(&rows);
        Some(removed)
    }

    /// Set a row's quantity. Anything below 1 removes the row.
    pub fn set_quantity(&self, id: &LineId, quantity: i64) -> QuantityChange {
        if quantity < 1 {
            return self.removed_or_missing(id);
        }
        let quantity = u32::try_from(quantity).unwrap_or(u32::MAX);

        let mut rows = self.rows();
        let Some(row) = rows.iter_mut().find(|row| row.id == *id) else {
            return QuantityChange::Missing;
        };
        row.quantity = quantity;
        let updated = row.clone();
        self.commit(&rows);
        QuantityChange::Updated(updated)
    }

    fn removed_or_missing(&self, id: &LineId) -> QuantityChange {
        self.remove(id)
            .map_or(QuantityChange::Missing, QuantityChange::Removed)
    }

    /// Remove every row and wipe the persisted snapshot.
    ///
    /// Returns the number of rows removed.
    pub fn clear(&self) -> usize {
        let mut rows = self.rows();
        let removed = rows.len();
        rows.clear();
        self.inner.mirror.clear_items();
        self.inner.changes.send_replace(Vec::new());
        removed
    }

    /// Replace the whole row list.
    pub fn replace_all(&self, items: Vec<CartLineItem>) {
        self.replace_all_with(|_| items);
    }

    /// Replace the whole row list with one computed from the current rows.
    ///
    /// The rows are locked for the duration of `f`, so no mutation can slip in
    /// between reading and replacing them.
    pub fn replace_all_with<F>(&self, f: F)
    where
        F: FnOnce(&[CartLineItem]) -> Vec<CartLineItem>,
    {
        let mut rows = self.rows();
        let next: Vec<_> = f(&rows).into_iter().filter(|row| row.quantity > 0).collect();
        *rows = next;
        self.commit(&rows);
    }

    /// Swap the row matched by `old_id` for `new_item`.
    ///
    /// Returns `false` (and changes nothing) if no row has `old_id`.
    pub fn replace_one(&self, old_id: &LineId, new_item: CartLineItem) -> bool {
        self.replace_one_with(old_id, |_| new_item)
    }

    /// Swap the row matched by `old_id` for one derived from it.
    pub fn replace_one_with<F>(&self, old_id: &LineId, f: F) -> bool
    where
        F: FnOnce(&CartLineItem) -> CartLineItem,
    {
        let mut rows = self.rows();
        let Some(row) = rows.iter_mut().find(|row| row.id == *old_id) else {
            return false;
        };
        let replacement = f(row);
        if replacement.quantity == 0 {
            return false;
        }
        *row = replacement;
        self.commit(&rows);
        true
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Copy of the current rows.
    #[must_use]
    pub fn snapshot(&self) -> Vec<CartLineItem> {
        self.rows().clone()
    }

    /// Row with `id`, if present.
    #[must_use]
    pub fn find(&self, id: &LineId) -> Option<CartLineItem> {
        self.rows().iter().find(|row| row.id == *id).cloned()
    }

    #[must_use]
    pub fn totals(&self) -> CartTotals {
        CartTotals::from_items(&self.rows())
    }

    /// Sum of all row quantities.
    #[must_use]
    pub fn total_items(&self) -> u64 {
        self.totals().item_count
    }

    /// Sum of `quantity * unit_price` over all rows.
    #[must_use]
    pub fn total_price(&self) -> Decimal {
        self.totals().subtotal
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows().is_empty()
    }

    /// Whether the cart has rows and none of them is confirmed yet.
    #[must_use]
    pub fn has_only_local_rows(&self) -> bool {
        let rows = self.rows();
        !rows.is_empty() && rows.iter().all(CartLineItem::is_local)
    }

    /// Receive a snapshot of the rows after every change.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Vec<CartLineItem>> {
        self.inner.changes.subscribe()
    }

    // =========================================================================
    // Session token
    // =========================================================================

    /// Persisted backend session token.
    #[must_use]
    pub fn session_token(&self) -> Option<SessionToken> {
        self.inner.mirror.session_token()
    }

    /// Persist a backend session token.
    pub fn save_session_token(&self, token: &SessionToken) {
        self.inner.mirror.save_session_token(token);
    }
}
