//! Background reconciliation of local cart changes with the backend.
//!
//! # Architecture
//!
//! - [`ReconcileHandle`] is the non-blocking sender the engine enqueues
//!   [`SyncTask`]s through
//! - A single dispatcher task receives them in order. Row tasks are routed to
//!   one *lane* per product/variant pair; each lane calls the server strictly
//!   in FIFO order while different lanes run concurrently
//! - `Clear` is a barrier: every lane drains before the server cart is
//!   cleared, and later tasks queue behind it
//! - `Load` drains the lanes, then fetches the server cart in a separate task.
//!   Row tasks arriving while the load runs wait for it; a newer load aborts it
//!
//! Failures are logged with `warn!` and otherwise ignored: local state is
//! never rolled back and nothing is retried.

mod lane;
mod merge;
mod session;

use std::collections::HashMap;
use std::sync::Arc;

use afrikraga_core::{CartLineItem, LineId, LineKey};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::api::{CartApi, ConfirmedLine};
use crate::cache::ServerCartCache;
use crate::storage::KeyValueStore;
use crate::store::CartStore;

use lane::{Lane, LaneHandle, LaneMsg, RowTask};
use session::SessionSlot;

pub use merge::merge_server_rows;

/// A unit of server reconciliation work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncTask {
    /// Add `quantity` of the row's product/variant to the server cart.
    Add { key: LineKey, quantity: u32 },
    /// Set the quantity of the row that had `id` when the change was made.
    Update {
        key: LineKey,
        id: LineId,
        quantity: u32,
    },
    /// Delete the row that had `id` when it was removed locally.
    Remove { key: LineKey, id: LineId },
    /// Clear the server cart.
    Clear,
    /// Fetch the server cart and merge it into the local rows.
    Load,
}

enum Command {
    Task(SyncTask),
    Flush(oneshot::Sender<()>),
    Shutdown(oneshot::Sender<()>),
}

/// Handle for queueing work on a running reconciler.
#[derive(Debug, Clone)]
pub struct ReconcileHandle {
    tx: mpsc::UnboundedSender<Command>,
}

impl ReconcileHandle {
    /// Queue a task without waiting for it.
    pub fn enqueue(&self, task: SyncTask) {
        if self.tx.send(Command::Task(task)).is_err() {
            warn!("Reconciler has stopped; change stays local only");
        }
    }

    /// Wait until every task queued before this call has finished.
    pub async fn flush(&self) {
        let (done, wait) = oneshot::channel();
        if self.tx.send(Command::Flush(done)).is_ok() {
            let _ = wait.await;
        }
    }

    /// Flush, then stop the reconciler. Later tasks are dropped.
    pub async fn shutdown(&self) {
        let (done, wait) = oneshot::channel();
        if self.tx.send(Command::Shutdown(done)).is_ok() {
            let _ = wait.await;
        }
    }
}

/// State shared by the dispatcher, its lanes and its loads.
pub(crate) struct SyncContext<A, S> {
    api: A,
    store: CartStore<S>,
    session: SessionSlot<S>,
    cache: ServerCartCache,
}

impl<A: CartApi, S: KeyValueStore> SyncContext<A, S> {
    async fn invalidate_cache(&self) {
        if let Some(token) = self.session.current().await {
            self.cache.invalidate(&token).await;
        }
    }

    #[instrument(skip(self))]
    async fn load_server_cart(&self) {
        let Some(token) = self.session.current().await else {
            debug!("No cart session yet; nothing to load");
            return;
        };

        let cart = match self.cache.get(&token).await {
            Some(cart) => cart,
            None => match self.api.fetch_cart(Some(&token)).await {
                Ok(cart) => {
                    let cart = Arc::new(cart);
                    self.cache.insert(&token, Arc::clone(&cart)).await;
                    cart
                }
                Err(e) => {
                    warn!(error = %e, "Failed to load server cart; keeping local rows");
                    return;
                }
            },
        };

        if let Some(issued) = &cart.session {
            self.session.adopt(None, issued).await;
        }

        let server_rows: Vec<CartLineItem> = cart
            .lines
            .iter()
            .cloned()
            .map(ConfirmedLine::into_item)
            .collect();
        let server_count = server_rows.len();
        self.store.replace_all_with(|current| {
            merge_server_rows(server_rows, current, &self.store.unconfirmed_adds())
        });

        info!(server_rows = server_count, "Merged server cart");
    }
}

/// Dispatcher that owns the lanes.
pub struct Reconciler<A, S> {
    ctx: Arc<SyncContext<A, S>>,
    lanes: HashMap<LineKey, LaneHandle>,
    load: Option<JoinHandle<()>>,
}

impl<A: CartApi, S: KeyValueStore> Reconciler<A, S> {
    /// Start a reconciler on the current Tokio runtime.
    pub fn spawn(api: A, store: CartStore<S>, cache: ServerCartCache) -> ReconcileHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let session = SessionSlot::new(store.clone());
        let reconciler = Self {
            ctx: Arc::new(SyncContext {
                api,
                store,
                session,
                cache,
            }),
            lanes: HashMap::new(),
            load: None,
        };
        tokio::spawn(reconciler.run(rx));
        ReconcileHandle { tx }
    }

    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Command>) {
        while let Some(command) = rx.recv().await {
            match command {
                Command::Task(task) => self.dispatch(task).await,
                Command::Flush(done) => {
                    self.settle().await;
                    let _ = done.send(());
                }
                Command::Shutdown(done) => {
                    self.settle().await;
                    self.lanes.clear();
                    let _ = done.send(());
                    break;
                }
            }
        }
        debug!("Reconciler stopped");
    }

    async fn dispatch(&mut self, task: SyncTask) {
        match task {
            SyncTask::Add { key, quantity } => self.route(key, RowTask::Add { quantity }).await,
            SyncTask::Update { key, id, quantity } => {
                self.route(key, RowTask::Update { id, quantity }).await;
            }
            SyncTask::Remove { key, id } => self.route(key, RowTask::Remove { id }).await,
            SyncTask::Clear => self.clear().await,
            SyncTask::Load => self.load().await,
        }
    }

    async fn route(&mut self, key: LineKey, task: RowTask) {
        // The load's merge must see rows before their add reaches the server.
        self.await_load().await;

        let ctx = &self.ctx;
        let lane = self
            .lanes
            .entry(key)
            .or_insert_with(|| Lane::spawn(key, Arc::clone(ctx)));

        if let Err(mpsc::error::SendError(LaneMsg::Task(task))) = lane.tx.send(LaneMsg::Task(task))
        {
            warn!(%key, "Reconciliation lane stopped; restarting it");
            let lane = Lane::spawn(key, Arc::clone(&self.ctx));
            if let Err(mpsc::error::SendError(LaneMsg::Task(task))) =
                lane.tx.send(LaneMsg::Task(task))
            {
                warn!(%key, "Dropping reconciliation task");
                if let RowTask::Add { quantity } = task {
                    self.ctx.store.confirm_add(&key, quantity);
                }
            }
            self.lanes.insert(key, lane);
        }
    }

    #[instrument(skip(self))]
    async fn clear(&mut self) {
        self.abort_load();
        self.drain_lanes().await;
        self.lanes.clear();

        let Some(token) = self.ctx.session.current().await else {
            debug!("No cart session yet; nothing to clear on the server");
            return;
        };

        match self.ctx.api.clear_cart(Some(&token)).await {
            Ok(()) => info!("Server cart cleared"),
            Err(e) => warn!(error = %e, "Failed to clear server cart"),
        }
        self.ctx.cache.invalidate(&token).await;
    }

    async fn load(&mut self) {
        self.abort_load();
        self.drain_lanes().await;

        let ctx = Arc::clone(&self.ctx);
        self.load = Some(tokio::spawn(async move { ctx.load_server_cart().await }));
    }

    fn abort_load(&mut self) {
        if let Some(load) = self.load.take() {
            if !load.is_finished() {
                debug!("Aborting superseded cart load");
            }
            load.abort();
        }
    }

    async fn await_load(&mut self) {
        if let Some(load) = self.load.take() {
            if let Err(e) = load.await {
                if e.is_panic() {
                    warn!(error = %e, "Cart load panicked");
                }
            }
        }
    }

    async fn drain_lanes(&self) {
        let mut pending = Vec::with_capacity(self.lanes.len());
        for lane in self.lanes.values() {
            let (done, wait) = oneshot::channel();
            if lane.tx.send(LaneMsg::Drain(done)).is_ok() {
                pending.push(wait);
            }
        }
        for wait in pending {
            let _ = wait.await;
        }
    }

    async fn settle(&mut self) {
        self.drain_lanes().await;
        self.await_load().await;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use afrikraga_core::{LineItemId, NewLineItem, ProductId, SessionToken, VariantId};
    use rust_decimal::Decimal;

    use super::*;
    use crate::persist::PersistenceMirror;
    use crate::storage::MemoryStore;
    use crate::testing::{Call, FakeApi};

    fn start(api: &FakeApi, storage: MemoryStore) -> (CartStore<MemoryStore>, ReconcileHandle) {
        let store = CartStore::open(PersistenceMirror::new(storage));
        let cache = ServerCartCache::new(Duration::from_secs(60));
        let handle = Reconciler::spawn(api.clone(), store.clone(), cache);
        (store, handle)
    }

    fn item(product: i64, variant: Option<i64>, quantity: u32) -> NewLineItem {
        NewLineItem {
            product_id: ProductId::new(product),
            variant_id: variant.map(VariantId::new),
            quantity,
            unit_price: Decimal::new(2500, 2),
            name: format!("Product {product}"),
            image: None,
        }
    }

    fn add(store: &CartStore<MemoryStore>, sync: &ReconcileHandle, new: NewLineItem) -> LineId {
        let quantity = new.quantity;
        let row = store.add(new).unwrap();
        sync.enqueue(SyncTask::Add {
            key: row.key(),
            quantity,
        });
        row.id
    }

    fn adds(calls: &[Call]) -> Vec<Option<String>> {
        calls
            .iter()
            .filter_map(|call| match call {
                Call::Add(_, _, session) => Some(session.clone()),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_add_upgrades_local_row() {
        let api = FakeApi::new();
        api.set_server_price(Decimal::new(2200, 2));
        let (store, sync) = start(&api, MemoryStore::new());

        let id = add(&store, &sync, item(7, Some(2), 1));
        assert_eq!(id.to_string(), "7_2");
        sync.flush().await;

        let rows = store.snapshot();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, LineId::Server(LineItemId::new(99)));
        assert_eq!(rows[0].unit_price, Decimal::new(2200, 2));
        assert_eq!(rows[0].name, "Product 7");
        assert_eq!(store.session_token(), api.session());
        assert!(store.session_token().is_some());
    }

    #[tokio::test]
    async fn test_add_then_remove_reach_server_in_order() {
        let api = FakeApi::new();
        api.set_add_delay(Duration::from_millis(20));
        let (store, sync) = start(&api, MemoryStore::new());

        let id = add(&store, &sync, item(7, Some(2), 1));
        let removed = store.remove(&id).unwrap();
        sync.enqueue(SyncTask::Remove {
            key: removed.key(),
            id: removed.id,
        });
        sync.flush().await;

        assert!(store.is_empty());
        assert_eq!(
            api.calls(),
            vec![
                Call::Add(removed.key(), 1, None),
                Call::Remove(LineItemId::new(99)),
            ]
        );
        assert!(api.lines().is_empty());
    }

    #[tokio::test]
    async fn test_update_before_confirmation_targets_confirmed_row() {
        let api = FakeApi::new();
        api.set_add_delay(Duration::from_millis(20));
        let (store, sync) = start(&api, MemoryStore::new());

        let id = add(&store, &sync, item(4, None, 1));
        let crate::store::QuantityChange::Updated(row) = store.set_quantity(&id, 3) else {
            panic!("row should be updated");
        };
        sync.enqueue(SyncTask::Update {
            key: row.key(),
            id: row.id,
            quantity: row.quantity,
        });
        sync.flush().await;

        assert!(api.calls().contains(&Call::Update(LineItemId::new(99), 3)));
        let rows = store.snapshot();
        assert_eq!(rows[0].id, LineId::Server(LineItemId::new(99)));
        assert_eq!(rows[0].quantity, 3);
        assert_eq!(api.lines()[0].quantity, 3);
    }

    #[tokio::test]
    async fn test_backend_failure_keeps_local_state() {
        let api = FakeApi::new();
        api.set_failing(true);
        let (store, sync) = start(&api, MemoryStore::new());

        let id = add(&store, &sync, item(1, None, 2));
        sync.flush().await;

        let row = store.find(&id).unwrap();
        assert!(row.is_local());
        assert_eq!(row.quantity, 2);
        assert!(store.session_token().is_none());
    }

    #[tokio::test]
    async fn test_clear_waits_for_pending_adds() {
        let api = FakeApi::new();
        api.set_add_delay(Duration::from_millis(20));
        let (store, sync) = start(&api, MemoryStore::new());

        add(&store, &sync, item(1, None, 1));
        add(&store, &sync, item(2, None, 1));
        store.clear();
        sync.enqueue(SyncTask::Clear);
        sync.flush().await;

        let calls = api.calls();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls.last(), Some(&Call::Clear));
        assert!(api.lines().is_empty());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_clear_without_session_skips_server() {
        let api = FakeApi::new();
        let (store, sync) = start(&api, MemoryStore::new());

        store.clear();
        sync.enqueue(SyncTask::Clear);
        sync.flush().await;

        assert!(api.calls().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_first_adds_create_one_session() {
        let api = FakeApi::new();
        api.set_add_delay(Duration::from_millis(20));
        let (store, sync) = start(&api, MemoryStore::new());

        add(&store, &sync, item(1, None, 1));
        add(&store, &sync, item(2, None, 1));
        sync.flush().await;

        let sessions = adds(&api.calls());
        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions.iter().filter(|s| s.is_none()).count(), 1);
        assert!(sessions.contains(&Some("sess_99".to_string())));
        assert!(store.snapshot().iter().all(|row| !row.is_local()));
    }

    #[tokio::test]
    async fn test_load_merges_server_cart_with_local_rows() {
        let api = FakeApi::new();
        let token = SessionToken::new("sess_saved").unwrap();
        api.seed(
            token.clone(),
            vec![ConfirmedLine {
                id: LineItemId::new(5),
                product_id: ProductId::new(1),
                variant_id: None,
                quantity: 2,
                unit_price: Some(Decimal::new(1000, 2)),
                name: Some("Kente scarf".to_string()),
                image: None,
            }],
        );
        let storage = MemoryStore::new();
        PersistenceMirror::new(storage.clone()).save_session_token(&token);
        let (store, sync) = start(&api, storage);

        store.add(item(3, None, 1)).unwrap();
        sync.enqueue(SyncTask::Load);
        sync.flush().await;

        let ids: Vec<String> = store.snapshot().iter().map(|row| row.id.to_string()).collect();
        assert_eq!(ids, vec!["5", "3_null"]);
        assert_eq!(api.calls(), vec![Call::Fetch(Some("sess_saved".to_string()))]);
    }

    #[tokio::test]
    async fn test_load_without_session_skips_fetch() {
        let api = FakeApi::new();
        let (store, sync) = start(&api, MemoryStore::new());

        store.add(item(3, None, 1)).unwrap();
        sync.enqueue(SyncTask::Load);
        sync.flush().await;

        assert!(api.calls().is_empty());
        assert_eq!(store.snapshot().len(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_stops_worker() {
        let api = FakeApi::new();
        let (store, sync) = start(&api, MemoryStore::new());

        sync.shutdown().await;
        add(&store, &sync, item(1, None, 1));
        sync.flush().await;
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(api.calls().is_empty());
        assert!(store.snapshot()[0].is_local());
    }

    fn seeded_line(id: i64, quantity: u32) -> ConfirmedLine {
        ConfirmedLine {
            id: LineItemId::new(id),
            product_id: ProductId::new(7),
            variant_id: Some(VariantId::new(2)),
            quantity,
            unit_price: Some(Decimal::new(1000, 2)),
            name: Some("Adire dress".to_string()),
            image: None,
        }
    }

    #[tokio::test]
    async fn test_load_keeps_add_queued_on_confirmed_row() {
        let api = FakeApi::new();
        let token = SessionToken::new("sess_saved").unwrap();
        api.seed(token.clone(), vec![seeded_line(12, 1)]);
        let storage = MemoryStore::new();
        let mirror = PersistenceMirror::new(storage.clone());
        mirror.save_session_token(&token);
        mirror.save_items(&[seeded_line(12, 1).into_item()]);
        let (store, sync) = start(&api, storage);

        sync.enqueue(SyncTask::Load);
        add(&store, &sync, item(7, Some(2), 1));
        sync.flush().await;

        let rows = store.snapshot();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, LineId::Server(LineItemId::new(12)));
        assert_eq!(rows[0].quantity, 2);
        assert_eq!(api.lines()[0].quantity, 2);
        assert!(store.unconfirmed_adds().is_empty());
    }

    #[tokio::test]
    async fn test_load_after_failed_add_matches_server() {
        let api = FakeApi::new();
        let token = SessionToken::new("sess_saved").unwrap();
        api.seed(token.clone(), vec![seeded_line(12, 1)]);
        let storage = MemoryStore::new();
        PersistenceMirror::new(storage.clone()).save_session_token(&token);
        let (store, sync) = start(&api, storage);

        api.set_failing(true);
        add(&store, &sync, item(7, Some(2), 3));
        sync.flush().await;
        assert!(store.unconfirmed_adds().is_empty());

        api.set_failing(false);
        sync.enqueue(SyncTask::Load);
        sync.flush().await;

        let rows = store.snapshot();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, LineId::Server(LineItemId::new(12)));
        assert_eq!(rows[0].quantity, 1);
        assert_eq!(api.lines()[0].quantity, 1);
    }
}
