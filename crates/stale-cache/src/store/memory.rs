use std::fmt;
use std::hash::Hash;
use std::sync::Arc;
use std::time::{Duration, Instant as StdInstant};

use async_trait::async_trait;
use tokio::time::Instant;

use super::{CacheEntry, CacheStore};
use crate::StoreError;
use crate::config::CacheConfig;

type Weigher<K, V> = Arc<dyn Fn(&K, &V) -> u32 + Send + Sync + 'static>;

/// A [`moka::Expiry`] that evicts entries once they have been expired for longer than `max_stale`.
///
/// Without a `max_stale`, entries are only evicted when the capacity is exceeded.
struct StaleRetention {
    max_stale: Option<Duration>,
}

impl StaleRetention {
    fn retain_for<V>(&self, entry: &CacheEntry<V>) -> Option<Duration> {
        let max_stale = self.max_stale?;
        let fresh_for = entry
            .expires_at()
            .saturating_duration_since(Instant::now());
        Some(fresh_for.saturating_add(max_stale))
    }
}

impl<K, V> moka::Expiry<K, CacheEntry<V>> for StaleRetention {
    fn expire_after_create(
        &self,
        _key: &K,
        value: &CacheEntry<V>,
        _current_time: StdInstant,
    ) -> Option<Duration> {
        self.retain_for(value)
    }

    fn expire_after_update(
        &self,
        _key: &K,
        value: &CacheEntry<V>,
        _current_time: StdInstant,
        _current_duration: Option<Duration>,
    ) -> Option<Duration> {
        self.retain_for(value)
    }
}

/// An in-memory [`CacheStore`] backed by a [`moka`] cache.
///
/// Expired entries are kept around so they can be served as stale values. They are evicted when
/// the store runs over capacity, or once they have been expired for longer than the configured
/// `max_stale`.
pub struct MemoryStore<K, V> {
    cache: moka::future::Cache<K, CacheEntry<V>>,
}

impl<K, V> Clone for MemoryStore<K, V> {
    fn clone(&self) -> Self {
        Self {
            cache: self.cache.clone(),
        }
    }
}

impl<K, V> fmt::Debug for MemoryStore<K, V>
where
    K: Hash + Eq + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryStore")
            .field("entries", &self.cache.entry_count())
            .field("weighted_size", &self.cache.weighted_size())
            .finish()
    }
}

impl<K, V> MemoryStore<K, V>
where
    K: Hash + Eq + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Creates a store holding up to `capacity` entries, which never evicts stale entries by age.
    pub fn new(capacity: u64) -> Self {
        Self::builder(capacity).build()
    }

    pub fn builder(capacity: u64) -> MemoryStoreBuilder<K, V> {
        MemoryStoreBuilder {
            capacity,
            max_stale: None,
            weigher: None,
        }
    }

    /// Creates a store from the `cache` section of the [`Config`](crate::Config).
    pub fn from_config(config: &CacheConfig) -> Self {
        let mut builder = Self::builder(config.in_memory_capacity);
        builder.max_stale = config.max_stale;
        builder.build()
    }

    /// The number of entries currently held, including stale ones.
    ///
    /// This is an approximation, as moka applies writes and evictions asynchronously.
    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }

    /// Applies all pending writes and evictions.
    pub async fn run_pending_tasks(&self) {
        self.cache.run_pending_tasks().await
    }
}

/// Configures a [`MemoryStore`].
pub struct MemoryStoreBuilder<K, V> {
    capacity: u64,
    max_stale: Option<Duration>,
    weigher: Option<Weigher<K, V>>,
}

impl<K, V> MemoryStoreBuilder<K, V>
where
    K: Hash + Eq + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Evicts entries which have been expired for longer than `max_stale`.
    pub fn max_stale(mut self, max_stale: Duration) -> Self {
        self.max_stale = Some(max_stale);
        self
    }

    /// Gives entries a relative weight, in which case the capacity is measured in that unit.
    pub fn weigher(mut self, weigher: impl Fn(&K, &V) -> u32 + Send + Sync + 'static) -> Self {
        self.weigher = Some(Arc::new(weigher));
        self
    }

    pub fn build(self) -> MemoryStore<K, V> {
        let mut builder = moka::future::Cache::builder()
            .max_capacity(self.capacity)
            .expire_after(StaleRetention {
                max_stale: self.max_stale,
            });
        if let Some(weigher) = self.weigher {
            builder = builder.weigher(move |k: &K, entry: &CacheEntry<V>| weigher(k, entry.value()));
        }

        MemoryStore {
            cache: builder.build(),
        }
    }
}

#[async_trait]
impl<K, V> CacheStore<K, V> for MemoryStore<K, V>
where
    K: Hash + Eq + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    async fn get(&self, key: &K) -> Result<Option<CacheEntry<V>>, StoreError> {
        Ok(self.cache.get(key).await)
    }

    async fn put(&self, key: K, value: V, ttl: Duration) -> Result<(), StoreError> {
        self.cache.insert(key, CacheEntry::new(value, ttl)).await;
        Ok(())
    }

    async fn remove(&self, key: &K) -> Result<(), StoreError> {
        self.cache.invalidate(key).await;
        Ok(())
    }
}
