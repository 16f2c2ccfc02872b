//! Shared holder of the backend session token.

use afrikraga_core::SessionToken;
use tokio::sync::{Mutex, MutexGuard};
use tracing::info;

use crate::storage::KeyValueStore;
use crate::store::CartStore;

/// The session token every lane sends with its requests.
///
/// While no token exists, the first request that may create the server cart
/// holds the slot until its response arrives, so two lanes never create two
/// carts.
pub(crate) struct SessionSlot<S> {
    token: Mutex<Option<SessionToken>>,
    store: CartStore<S>,
}

/// Token to send with one request.
///
/// When the slot was empty the lease keeps it locked until it is handed back
/// through [`SessionSlot::adopt`] or dropped.
pub(crate) struct SessionLease<'a> {
    pub token: Option<SessionToken>,
    guard: Option<MutexGuard<'a, Option<SessionToken>>>,
}

impl<S: KeyValueStore> SessionSlot<S> {
    pub fn new(store: CartStore<S>) -> Self {
        Self {
            token: Mutex::new(store.session_token()),
            store,
        }
    }

    pub async fn current(&self) -> Option<SessionToken> {
        self.token.lock().await.clone()
    }

    /// Take the token for a request that may create the server cart.
    pub async fn lease(&self) -> SessionLease<'_> {
        let guard = self.token.lock().await;
        match &*guard {
            Some(token) => SessionLease {
                token: Some(token.clone()),
                guard: None,
            },
            None => SessionLease {
                token: None,
                guard: Some(guard),
            },
        }
    }

    /// Record a token issued by the backend, releasing `lease` if given.
    pub async fn adopt(&self, lease: Option<SessionLease<'_>>, issued: &SessionToken) {
        let mut guard = match lease.and_then(|lease| lease.guard) {
            Some(guard) => guard,
            None => self.token.lock().await,
        };

        if guard.as_ref() != Some(issued) {
            *guard = Some(issued.clone());
            self.store.save_session_token(issued);
            info!("Adopted cart session token");
        }
    }
}
