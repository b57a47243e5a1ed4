//! The key/value store abstraction the cache is layered on top of.
//!
//! A store only needs to hold values together with their expiration time. It must *not* hide
//! expired entries: the [`SelfLoadingCache`](crate::SelfLoadingCache) decides what to do with an
//! expired entry, and serves it as a stale value while a refresh is running.

use std::fmt::Debug;
use std::hash::Hash;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::StoreError;

mod memory;

/// Stands in for the expiration time of entries whose TTL does not fit into an [`Instant`].
///
/// Roughly 30 years, same as the far future used by tokio timers.
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

pub use memory::{MemoryStore, MemoryStoreBuilder};

/// The requirements on keys of a [`SelfLoadingCache`](crate::SelfLoadingCache).
///
/// Keys are cloned into the in-flight registry and into background refreshes, and are printed
/// when reporting errors.
pub trait CacheKey: Eq + Hash + Clone + Debug + Send + Sync + 'static {}

impl<T> CacheKey for T where T: Eq + Hash + Clone + Debug + Send + Sync + 'static {}

/// A value held by a [`CacheStore`], along with the point in time it expires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry<V> {
    value: V,
    expires_at: Instant,
}

impl<V> CacheEntry<V> {
    /// Creates a new entry that is fresh for the given `ttl`, starting now.
    ///
    /// A `ttl` too large to be represented, like [`Duration::MAX`], means the entry never expires.
    pub fn new(value: V, ttl: Duration) -> Self {
        let now = Instant::now();
        let expires_at = now
            .checked_add(ttl)
            .unwrap_or_else(|| now + FAR_FUTURE);
        Self::with_expiration(value, expires_at)
    }

    /// Creates a new entry which expires at exactly `expires_at`.
    pub fn with_expiration(value: V, expires_at: Instant) -> Self {
        Self { value, expires_at }
    }

    pub fn value(&self) -> &V {
        &self.value
    }

    pub fn into_value(self) -> V {
        self.value
    }

    pub fn expires_at(&self) -> Instant {
        self.expires_at
    }

    /// Whether this entry is past its expiration time.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Instant::now())
    }

    pub fn is_expired_at(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// A key/value store used as the backing storage of a [`SelfLoadingCache`](crate::SelfLoadingCache).
///
/// Implementations are expected to be internally synchronized. The cache does not do any locking
/// around store accesses, apart from making sure only a single load per key is running at a time.
#[async_trait]
pub trait CacheStore<K, V>: Send + Sync {
    /// Looks up the entry for `key`, returning it even if it is already expired.
    async fn get(&self, key: &K) -> Result<Option<CacheEntry<V>>, StoreError>;

    /// Inserts or overwrites the entry for `key`, which is fresh for `ttl`.
    async fn put(&self, key: K, value: V, ttl: Duration) -> Result<(), StoreError>;

    /// Removes the entry for `key`, if any.
    async fn remove(&self, key: &K) -> Result<(), StoreError>;
}
