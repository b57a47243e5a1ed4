use std::fmt;
use std::future::Future;
use std::sync::Arc;

use crate::builder::{CacheBuilder, FacadeConfig};
use crate::coordinator::LoadCoordinator;
use crate::guard::GuardedStore;
use crate::store::{CacheKey, CacheStore};

/// A cache that loads missing values on demand and refreshes expired ones in the background.
///
/// Each lookup goes through [`get`](Self::get), which is handed the key and a loader for it:
///
/// - A fresh entry in the store is returned as-is, and the loader is not called.
/// - A missing entry is loaded by calling the loader on the current task. The result is written to
///   the store and returned. Concurrent lookups of the same missing key wait for that single load.
/// - An expired entry is returned right away as a stale value. The loader is spawned in the
///   background and overwrites the entry once it completes. Only one refresh per key runs at a
///   time.
///
/// Failures of the underlying [`CacheStore`] never reach the caller, they are reported to the
/// [`ErrorHandler`](crate::ErrorHandler) and treated as a miss or a dropped write. Errors of the
/// loader are only returned when there is no value to fall back to.
///
/// Cloning the cache is cheap, and all clones share the same store and in-flight loads.
pub struct SelfLoadingCache<K: CacheKey, V> {
    inner: Arc<Inner<K, V>>,
}

struct Inner<K: CacheKey, V> {
    config: FacadeConfig,
    store: Arc<GuardedStore<K, V>>,
    coordinator: LoadCoordinator<K>,
}

impl<K: CacheKey, V> Clone for SelfLoadingCache<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K: CacheKey, V> fmt::Debug for SelfLoadingCache<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SelfLoadingCache")
            .field("config", &self.inner.config)
            .field("loads in flight", &self.inner.coordinator.in_flight())
            .finish()
    }
}

impl<K, V> SelfLoadingCache<K, V>
where
    K: CacheKey,
    V: Clone + Send + Sync + 'static,
{
    /// Starts building a cache on top of `store`.
    pub fn builder(store: Arc<dyn CacheStore<K, V>>) -> CacheBuilder<K, V> {
        CacheBuilder::new(store)
    }

    pub(crate) fn new(store: Arc<dyn CacheStore<K, V>>, config: FacadeConfig) -> Self {
        let store = GuardedStore::new(config.shared_name(), store, config.error_handler());
        let coordinator = LoadCoordinator::new(
            config.shared_name(),
            config.runtime(),
            config.max_lazy_refreshes(),
        );

        Self {
            inner: Arc::new(Inner {
                config,
                store: Arc::new(store),
                coordinator,
            }),
        }
    }

    pub fn name(&self) -> &str {
        self.inner.store.name()
    }

    pub fn config(&self) -> &FacadeConfig {
        &self.inner.config
    }

    /// Whether this cache is a pass-through that calls the loader for every lookup.
    pub fn is_disabled(&self) -> bool {
        self.inner.config.is_disabled()
    }

    /// Returns the value for `key`, calling `loader` if it is missing or expired.
    ///
    /// See the [type level docs](Self) for how the different cases are handled. The loader may
    /// fail with any error that converts into an [`anyhow::Error`], which includes `anyhow::Error`
    /// itself and every `std::error::Error + Send + Sync + 'static`.
    ///
    /// # Errors
    ///
    /// Returns the error of `loader` if `key` had to be loaded on the current task, as there is
    /// no cached value to fall back to in that case. Errors of background refreshes are reported
    /// to the error handler instead.
    pub async fn get<F, Fut, E>(&self, key: K, loader: F) -> Result<V, E>
    where
        F: FnOnce(K) -> Fut + Send + 'static,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
        E: Into<anyhow::Error> + Send + 'static,
    {
        let name = self.name();
        metric!(counter("caches.access") += 1, "cache" => name);

        if self.is_disabled() {
            metric!(counter("caches.disabled") += 1, "cache" => name);
            return loader(key).await;
        }

        let Inner {
            config,
            store,
            coordinator,
        } = &*self.inner;

        match store.get(&key).await {
            Some(entry) if !entry.is_expired() => {
                metric!(counter("caches.hit") += 1, "cache" => name);
                Ok(entry.into_value())
            }
            Some(entry) => {
                metric!(counter("caches.stale") += 1, "cache" => name);
                tracing::trace!("Serving stale {} entry for {:?}", name, key);
                coordinator.schedule_async(Arc::clone(store), key, config.ttl(), loader);
                Ok(entry.into_value())
            }
            None => {
                metric!(counter("caches.miss") += 1, "cache" => name);
                coordinator.run_sync(store, key, config.ttl(), loader).await
            }
        }
    }

    /// Returns the value for `key` if the store has one, even if it is expired.
    ///
    /// This never loads anything. A disabled cache always returns `None`.
    pub async fn get_if_present(&self, key: &K) -> Option<V> {
        if self.is_disabled() {
            return None;
        }
        let entry = self.inner.store.get(key).await?;
        Some(entry.into_value())
    }

    /// Refreshes `key` in the background, regardless of whether it is expired.
    ///
    /// Returns `true` if a refresh was spawned. Returns `false` if one is already running for
    /// `key`, if too many refreshes are running, if there is no runtime to spawn on, or if the
    /// cache is disabled.
    pub fn refresh<F, Fut, E>(&self, key: K, loader: F) -> bool
    where
        F: FnOnce(K) -> Fut + Send + 'static,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
        E: Into<anyhow::Error> + Send + 'static,
    {
        if self.is_disabled() {
            return false;
        }
        let Inner {
            config,
            store,
            coordinator,
        } = &*self.inner;
        coordinator.schedule_async(Arc::clone(store), key, config.ttl(), loader)
    }

    /// Removes the entry for `key` from the store.
    ///
    /// A refresh that is already running for `key` will still write its result afterwards.
    pub async fn invalidate(&self, key: &K) {
        if self.is_disabled() {
            return;
        }
        tracing::trace!("Invalidating {} entry for {:?}", self.name(), key);
        self.inner.store.remove(key).await;
    }

    /// Whether a load or refresh of `key` is currently running.
    pub fn is_loading(&self, key: &K) -> bool {
        self.inner.coordinator.is_loading(key)
    }

    /// The number of loads and refreshes currently running.
    pub fn loads_in_flight(&self) -> usize {
        self.inner.coordinator.in_flight()
    }
}
