//! Helpers for testing caches.
//!
//! When writing tests, keep the following points in mind:
//!
//!  - In every test, call [`setup`]. This will set up the logger so that all console output
//!    is captured by the test runner.
//!
//!  - The [`TestStore`] and [`CountingLoader`] count every call made to them. Clone them before
//!    handing them to a cache to be able to inspect those counts afterwards, as clones share their
//!    state.
//!
//!  - Background refreshes are spawned on the runtime, so give them a chance to run using
//!    [`settle`] before asserting on their effects.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use stale_cache::{CacheEntry, CacheStore, SelfLoadingCache, StoreError};
use tokio::time::Instant;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::fmt;

/// Setup the test environment.
///
///  - Initializes logs: The logger only captures logs from the `stale_cache` crate and mutes all
///    other logs.
pub fn setup() {
    fmt()
        .with_env_filter(EnvFilter::new("stale_cache=trace"))
        .with_target(false)
        .pretty()
        .with_test_writer()
        .try_init()
        .ok();
}

/// Waits until `cache` has no more loads or refreshes running.
pub async fn settle<K, V>(cache: &SelfLoadingCache<K, V>)
where
    K: stale_cache::CacheKey,
    V: Clone + Send + Sync + 'static,
{
    while cache.loads_in_flight() > 0 {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
}

#[derive(Debug, Default)]
struct Counters {
    gets: AtomicUsize,
    puts: AtomicUsize,
    removes: AtomicUsize,
    fail_gets: AtomicBool,
    fail_puts: AtomicBool,
    fail_removes: AtomicBool,
}

/// An in-memory [`CacheStore`] that counts its calls and can be told to fail them.
#[derive(Debug)]
pub struct TestStore<K, V> {
    entries: Arc<Mutex<HashMap<K, CacheEntry<V>>>>,
    counters: Arc<Counters>,
}

impl<K, V> Clone for TestStore<K, V> {
    fn clone(&self) -> Self {
        Self {
            entries: Arc::clone(&self.entries),
            counters: Arc::clone(&self.counters),
        }
    }
}

impl<K, V> Default for TestStore<K, V> {
    fn default() -> Self {
        Self {
            entries: Default::default(),
            counters: Default::default(),
        }
    }
}

impl<K, V> TestStore<K, V>
where
    K: Hash + Eq,
    V: Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts an entry which is fresh for `ttl`, without counting it as a `put`.
    pub fn seed(&self, key: K, value: V, ttl: Duration) {
        self.seed_entry(key, CacheEntry::new(value, ttl));
    }

    /// Inserts an entry which is already expired, without counting it as a `put`.
    pub fn seed_expired(&self, key: K, value: V) {
        self.seed_entry(key, CacheEntry::with_expiration(value, Instant::now()));
    }

    fn seed_entry(&self, key: K, entry: CacheEntry<V>) {
        self.entries.lock().unwrap().insert(key, entry);
    }

    /// Looks at an entry, without counting it as a `get`.
    pub fn peek(&self, key: &K) -> Option<CacheEntry<V>> {
        self.entries.lock().unwrap().get(key).cloned()
    }

    pub fn gets(&self) -> usize {
        self.counters.gets.load(Ordering::SeqCst)
    }

    pub fn puts(&self) -> usize {
        self.counters.puts.load(Ordering::SeqCst)
    }

    pub fn removes(&self) -> usize {
        self.counters.removes.load(Ordering::SeqCst)
    }

    pub fn fail_gets(&self, fail: bool) {
        self.counters.fail_gets.store(fail, Ordering::SeqCst);
    }

    pub fn fail_puts(&self, fail: bool) {
        self.counters.fail_puts.store(fail, Ordering::SeqCst);
    }

    pub fn fail_removes(&self, fail: bool) {
        self.counters.fail_removes.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl<K, V> CacheStore<K, V> for TestStore<K, V>
where
    K: Hash + Eq + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    async fn get(&self, key: &K) -> Result<Option<CacheEntry<V>>, StoreError> {
        self.counters.gets.fetch_add(1, Ordering::SeqCst);
        if self.counters.fail_gets.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("get refused by test store".into()));
        }
        Ok(self.entries.lock().unwrap().get(key).cloned())
    }

    async fn put(&self, key: K, value: V, ttl: Duration) -> Result<(), StoreError> {
        self.counters.puts.fetch_add(1, Ordering::SeqCst);
        if self.counters.fail_puts.load(Ordering::SeqCst) {
            return Err(StoreError::Rejected("put refused by test store".into()));
        }
        self.entries
            .lock()
            .unwrap()
            .insert(key, CacheEntry::new(value, ttl));
        Ok(())
    }

    async fn remove(&self, key: &K) -> Result<(), StoreError> {
        self.counters.removes.fetch_add(1, Ordering::SeqCst);
        if self.counters.fail_removes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("remove refused by test store".into()));
        }
        self.entries.lock().unwrap().remove(key);
        Ok(())
    }
}

/// The error returned by loaders created through [`CountingLoader::failing`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("load failed: {0}")]
pub struct LoadError(pub String);

pub type LoadFuture<V> = Pin<Box<dyn Future<Output = Result<V, LoadError>> + Send>>;

/// Creates loaders which count how often any of them was invoked.
#[derive(Clone, Debug, Default)]
pub struct CountingLoader {
    calls: Arc<AtomicUsize>,
}

impl CountingLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// The number of times any of the loaders created from this one has been invoked.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// A loader which immediately returns `value`.
    pub fn returning<K, V>(&self, value: V) -> impl FnOnce(K) -> LoadFuture<V> + Send + 'static
    where
        K: Send + 'static,
        V: Send + 'static,
    {
        self.delayed(value, Duration::ZERO)
    }

    /// A loader which returns `value` after `delay`.
    pub fn delayed<K, V>(
        &self,
        value: V,
        delay: Duration,
    ) -> impl FnOnce(K) -> LoadFuture<V> + Send + 'static
    where
        K: Send + 'static,
        V: Send + 'static,
    {
        let calls = Arc::clone(&self.calls);
        move |_key| {
            calls.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                Ok(value)
            })
        }
    }

    /// A loader which fails with a [`LoadError`] carrying `message`.
    pub fn failing<K, V>(&self, message: &str) -> impl FnOnce(K) -> LoadFuture<V> + Send + 'static
    where
        K: Send + 'static,
        V: Send + 'static,
    {
        let calls = Arc::clone(&self.calls);
        let message = message.to_owned();
        move |_key| {
            calls.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move { Err(LoadError(message)) })
        }
    }
}
