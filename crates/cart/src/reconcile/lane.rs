//! Per-row FIFO worker.

use std::sync::Arc;

use afrikraga_core::{CartLineItem, LineId, LineItemId, LineKey};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, instrument, warn};

use super::SyncContext;
use crate::api::{AddLine, CartApi};
use crate::storage::KeyValueStore;

/// Server call for one row.
#[derive(Debug, Clone)]
pub(super) enum RowTask {
    Add { quantity: u32 },
    Update { id: LineId, quantity: u32 },
    Remove { id: LineId },
}

pub(super) enum LaneMsg {
    Task(RowTask),
    /// Acknowledged once every task queued before it has finished.
    Drain(oneshot::Sender<()>),
}

pub(super) struct LaneHandle {
    pub tx: mpsc::UnboundedSender<LaneMsg>,
}

/// Sends one row's tasks to the server strictly in the order they were queued.
pub(super) struct Lane<A, S> {
    key: LineKey,
    ctx: Arc<SyncContext<A, S>>,
    /// Server id learned from this lane's own add responses.
    confirmed: Option<LineItemId>,
}

impl<A: CartApi, S: KeyValueStore> Lane<A, S> {
    pub fn spawn(key: LineKey, ctx: Arc<SyncContext<A, S>>) -> LaneHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let lane = Self {
            key,
            ctx,
            confirmed: None,
        };
        tokio::spawn(lane.run(rx));
        LaneHandle { tx }
    }

    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<LaneMsg>) {
        while let Some(msg) = rx.recv().await {
            match msg {
                LaneMsg::Task(RowTask::Add { quantity }) => self.add(quantity).await,
                LaneMsg::Task(RowTask::Update { id, quantity }) => self.update(id, quantity).await,
                LaneMsg::Task(RowTask::Remove { id }) => self.remove(id).await,
                LaneMsg::Drain(done) => {
                    let _ = done.send(());
                }
            }
        }
    }

    #[instrument(skip(self), fields(key = %self.key))]
    async fn add(&mut self, quantity: u32) {
        let ctx = &self.ctx;
        let lease = ctx.session.lease().await;
        let line = AddLine {
            key: self.key,
            quantity,
        };

        let result = ctx.api.add_line(lease.token.as_ref(), line).await;
        ctx.store.confirm_add(&self.key, quantity);
        let response = match result {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "Failed to add item to server cart; keeping local row");
                return;
            }
        };

        match &response.session {
            Some(issued) => ctx.session.adopt(Some(lease), issued).await,
            None => drop(lease),
        }

        let confirmed = response.line;
        self.confirmed = Some(confirmed.id);

        let grafted = ctx
            .store
            .replace_one_with(&LineId::Local(self.key), |row| confirmed.graft_onto(row))
            || ctx
                .store
                .replace_one_with(&LineId::Server(confirmed.id), |row| confirmed.graft_onto(row));
        if grafted {
            debug!(line_id = %confirmed.id, "Confirmed cart row");
        } else {
            debug!(line_id = %confirmed.id, "Row left the cart before its add was confirmed");
        }

        ctx.invalidate_cache().await;
    }

    #[instrument(skip(self), fields(key = %self.key))]
    async fn update(&mut self, id: LineId, quantity: u32) {
        let Some(server_id) = self.resolve(&id) else {
            debug!("Row never reached the server; skipping quantity update");
            return;
        };

        let ctx = &self.ctx;
        let session = ctx.session.current().await;
        match ctx.api.update_line(session.as_ref(), server_id, quantity).await {
            Ok(echoed) => {
                // Also repairs a row that a concurrent load reset.
                ctx.store
                    .replace_one_with(&LineId::Server(server_id), |row| match &echoed {
                        Some(line) => CartLineItem {
                            quantity: line.quantity,
                            ..line.graft_onto(row)
                        },
                        None => CartLineItem {
                            quantity,
                            ..row.clone()
                        },
                    });
                ctx.invalidate_cache().await;
            }
            Err(e) => {
                warn!(error = %e, line_id = %server_id, "Failed to update server cart quantity");
            }
        }
    }

    #[instrument(skip(self), fields(key = %self.key))]
    async fn remove(&mut self, id: LineId) {
        let Some(server_id) = self.resolve(&id) else {
            debug!("Row never reached the server; nothing to delete");
            return;
        };

        let ctx = &self.ctx;
        let session = ctx.session.current().await;
        match ctx.api.remove_line(session.as_ref(), server_id).await {
            Ok(()) => {
                if self.confirmed == Some(server_id) {
                    self.confirmed = None;
                }
                if ctx.store.remove(&LineId::Server(server_id)).is_some() {
                    debug!(line_id = %server_id, "Dropped row a concurrent load brought back");
                }
                ctx.invalidate_cache().await;
            }
            Err(e) => {
                warn!(error = %e, line_id = %server_id, "Failed to remove item from server cart");
            }
        }
    }

    /// Server id a task on `id` should be sent against.
    fn resolve(&self, id: &LineId) -> Option<LineItemId> {
        id.server_id().or(self.confirmed)
    }
}
