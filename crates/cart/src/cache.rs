//! Session-scoped cache of fetched server carts.
//!
//! A hit saves a round trip when several views ask for the server cart in
//! quick succession. Every reconciled mutation invalidates the entry, and
//! losing it only means fetching again.

use std::sync::Arc;
use std::time::Duration;

use afrikraga_core::SessionToken;
use moka::future::Cache;
use tracing::debug;

use crate::api::ServerCart;

/// Cache key for server carts.
#[derive(Debug, Clone, Hash, PartialEq, Eq)]
pub enum CacheKey {
    Cart(SessionToken),
}

/// Cached server carts keyed by session token.
#[derive(Clone)]
pub struct ServerCartCache {
    cache: Cache<CacheKey, Arc<ServerCart>>,
}

impl ServerCartCache {
    /// Create a cache whose entries live for `ttl`.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        let cache = Cache::builder().max_capacity(64).time_to_live(ttl).build();
        Self { cache }
    }

    pub async fn get(&self, session: &SessionToken) -> Option<Arc<ServerCart>> {
        let hit = self.cache.get(&CacheKey::Cart(session.clone())).await;
        if hit.is_some() {
            debug!("Cache hit for server cart");
        }
        hit
    }

    pub async fn insert(&self, session: &SessionToken, cart: Arc<ServerCart>) {
        self.cache.insert(CacheKey::Cart(session.clone()), cart).await;
    }

    /// Drop the cached cart for a session.
    pub async fn invalidate(&self, session: &SessionToken) {
        self.cache.invalidate(&CacheKey::Cart(session.clone())).await;
    }
}
