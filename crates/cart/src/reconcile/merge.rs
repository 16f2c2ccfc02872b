//! Merging a fetched server cart into the local rows.

use std::collections::HashMap;

use afrikraga_core::{CartLineItem, LineId, LineKey};
use tracing::warn;

/// Combine freshly loaded server rows with the rows currently held locally.
///
/// `unconfirmed` is the quantity per row key whose add is still queued for
/// the server. Those adds will land on top of what was fetched, so each
/// server row is raised by its key's unconfirmed quantity.
///
/// Server rows come first, in server order, and replace every previously
/// confirmed local row. Rows that never reached the server follow. A local
/// row whose product/variant pair is already on the server is folded into
/// that server row; if none of its quantity is still queued, the server's
/// quantity wins. A confirmed row the server no longer has is dropped unless
/// an add for it is queued, in which case it comes back as a local row
/// holding the queued quantity.
#[must_use]
pub fn merge_server_rows(
    mut server: Vec<CartLineItem>,
    current: &[CartLineItem],
    unconfirmed: &HashMap<LineKey, u32>,
) -> Vec<CartLineItem> {
    for row in &mut server {
        if let Some(&queued) = unconfirmed.get(&row.key()) {
            row.quantity = row.quantity.saturating_add(queued);
        }
    }

    for row in current {
        let key = row.key();
        let queued = unconfirmed.get(&key).copied().unwrap_or(0);

        if let Some(on_server) = server.iter().find(|s| s.key() == key) {
            if row.is_local() && queued == 0 {
                warn!(
                    %key,
                    local = row.quantity,
                    server = on_server.quantity,
                    "Unsynced local quantity replaced by server cart"
                );
            }
            continue;
        }

        if row.is_local() {
            server.push(row.clone());
        } else if queued > 0 {
            server.push(CartLineItem {
                id: LineId::Local(key),
                quantity: queued,
                ..row.clone()
            });
        }
    }
    server
}
