//! The cart engine: local state plus background reconciliation.
//!
//! Every operation changes the [`CartStore`] synchronously, so callers read
//! their own writes immediately, and pairs the change with a [`SyncTask`]
//! that a background [`Reconciler`] sends to the backend later. Nothing here
//! waits on the network, and backend failures never surface to the caller.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use afrikraga_core::{CartLineItem, CartTotals, LineId, NewLineItem};
use rust_decimal::Decimal;
use tokio::sync::watch;
use tracing::{debug, info, instrument};

use crate::api::{CartApi, RestCartClient};
use crate::cache::ServerCartCache;
use crate::config::CartConfig;
use crate::error::Result;
use crate::persist::PersistenceMirror;
use crate::reconcile::{ReconcileHandle, Reconciler, SyncTask};
use crate::storage::{FileStore, KeyValueStore, StorageError};
use crate::store::{CartStore, QuantityChange};

/// Tunables for [`CartEngine::start`].
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// How long a fetched server cart may be reused.
    pub cache_ttl: Duration,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            cache_ttl: Duration::from_secs(60),
        }
    }
}

/// Optimistic shopping cart kept in sync with the backend.
pub struct CartEngine<S> {
    store: CartStore<S>,
    sync: ReconcileHandle,
    loaded: AtomicBool,
}

impl CartEngine<FileStore> {
    /// Build an engine from configuration, persisting to
    /// `config.storage_dir` and reconciling over REST.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage directory cannot be created or the
    /// HTTP client cannot be built.
    pub fn from_config(config: &CartConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.storage_dir).map_err(StorageError::from)?;
        let api = RestCartClient::new(&config.api)?;
        let options = EngineOptions {
            cache_ttl: config.cache_ttl,
        };
        Ok(Self::start(
            api,
            FileStore::new(&config.storage_dir),
            &options,
        ))
    }
}

impl<S: KeyValueStore> CartEngine<S> {
    /// Open the persisted cart and start reconciling it through `api`.
    ///
    /// The server cart is loaded in the background right away. Must be
    /// called from within a Tokio runtime.
    pub fn start<A: CartApi>(api: A, storage: S, options: &EngineOptions) -> Self {
        let store = CartStore::open(PersistenceMirror::new(storage));
        let cache = ServerCartCache::new(options.cache_ttl);
        let sync = Reconciler::spawn(api, store.clone(), cache);

        let engine = Self {
            store,
            sync,
            loaded: AtomicBool::new(false),
        };
        engine.ensure_loaded();
        engine
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    /// Put `item` in the cart, merging with an existing row for the same
    /// product and variant.
    ///
    /// Returns the resulting row, or `None` when the quantity is 0.
    #[instrument(skip(self, item), fields(key = %item.key(), quantity = item.quantity))]
    pub fn add(&self, item: NewLineItem) -> Option<CartLineItem> {
        let quantity = item.quantity;
        let row = self.store.add(item)?;
        self.sync.enqueue(SyncTask::Add {
            key: row.key(),
            quantity,
        });
        Some(row)
    }

    /// Remove a row. Unknown ids are ignored.
    #[instrument(skip(self), fields(line_id = %id))]
    pub fn remove(&self, id: &LineId) -> Option<CartLineItem> {
        let Some(row) = self.store.remove(id) else {
            debug!("No cart row to remove");
            return None;
        };
        self.sync.enqueue(SyncTask::Remove {
            key: row.key(),
            id: row.id,
        });
        Some(row)
    }

    /// Set a row's quantity; anything below 1 removes the row.
    #[instrument(skip(self), fields(line_id = %id))]
    pub fn set_quantity(&self, id: &LineId, quantity: i64) -> QuantityChange {
        let change = self.store.set_quantity(id, quantity);
        match &change {
            QuantityChange::Updated(row) => self.sync.enqueue(SyncTask::Update {
                key: row.key(),
                id: row.id,
                quantity: row.quantity,
            }),
            QuantityChange::Removed(row) => self.sync.enqueue(SyncTask::Remove {
                key: row.key(),
                id: row.id,
            }),
            QuantityChange::Missing => debug!("No cart row to update"),
        }
        change
    }

    /// Empty the cart locally and on the server.
    #[instrument(skip(self))]
    pub fn clear(&self) {
        let removed = self.store.clear();
        self.sync.enqueue(SyncTask::Clear);
        info!(removed, "Cart cleared");
    }

    /// Replace every row. Local only; nothing is sent to the server.
    pub fn replace_all(&self, items: Vec<CartLineItem>) {
        self.store.replace_all(items);
    }

    /// Swap one row for another. Local only; returns `false` if `old_id` is
    /// not in the cart.
    pub fn replace_one(&self, old_id: &LineId, new_item: CartLineItem) -> bool {
        self.store.replace_one(old_id, new_item)
    }

    // =========================================================================
    // Loading
    // =========================================================================

    /// Load the server cart if it has never been loaded, or if every row is
    /// still unsynced.
    pub fn ensure_loaded(&self) {
        let first = !self.loaded.swap(true, Ordering::AcqRel);
        if first || self.store.has_only_local_rows() {
            self.sync.enqueue(SyncTask::Load);
        }
    }

    /// Load the server cart unconditionally.
    pub fn reload(&self) {
        self.loaded.store(true, Ordering::Release);
        self.sync.enqueue(SyncTask::Load);
    }

    /// Wait until every reconciliation queued so far has finished.
    pub async fn flush(&self) {
        self.sync.flush().await;
    }

    /// Flush, then stop reconciling. Later changes stay local.
    pub async fn shutdown(&self) {
        self.sync.shutdown().await;
    }

    // =========================================================================
    // Queries
    // =========================================================================

    #[must_use]
    pub fn snapshot(&self) -> Vec<CartLineItem> {
        self.store.snapshot()
    }

    #[must_use]
    pub fn find(&self, id: &LineId) -> Option<CartLineItem> {
        self.store.find(id)
    }

    #[must_use]
    pub fn totals(&self) -> CartTotals {
        self.store.totals()
    }

    /// Sum of quantities across rows.
    #[must_use]
    pub fn total_items(&self) -> u64 {
        self.store.total_items()
    }

    /// Sum of `unit_price * quantity` across rows.
    #[must_use]
    pub fn total_price(&self) -> Decimal {
        self.store.total_price()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// Receive a snapshot of the rows after every change.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Vec<CartLineItem>> {
        self.store.subscribe()
    }

    /// The underlying state container.
    #[must_use]
    pub const fn store(&self) -> &CartStore<S> {
        &self.store
    }
}
