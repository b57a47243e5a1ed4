use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{ErrorHandler, Fault, StoreError, StoreOp};
use crate::store::{CacheEntry, CacheStore};

/// Wraps a [`CacheStore`] so that none of its errors escape.
///
/// Every failed operation is reported to the [`ErrorHandler`] and then treated as if it had not
/// happened: a failed `get` is a miss, a failed `put` is a dropped write, and a failed `remove`
/// leaves the entry in place.
pub(crate) struct GuardedStore<K, V> {
    name: Arc<str>,
    store: Arc<dyn CacheStore<K, V>>,
    on_fault: ErrorHandler,
}

impl<K, V> GuardedStore<K, V>
where
    K: fmt::Debug,
{
    pub fn new(name: Arc<str>, store: Arc<dyn CacheStore<K, V>>, on_fault: ErrorHandler) -> Self {
        Self {
            name,
            store,
            on_fault,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn get(&self, key: &K) -> Option<CacheEntry<V>> {
        match self.store.get(key).await {
            Ok(entry) => entry,
            Err(error) => {
                self.store_fault(StoreOp::Get, key, &error);
                None
            }
        }
    }

    /// Returns `true` if the write was accepted by the store.
    pub async fn put(&self, key: K, value: V, ttl: Duration) -> bool {
        // the store consumes the key, so keep a rendering of it around for error reporting
        let key_repr = format!("{key:?}");
        match self.store.put(key, value, ttl).await {
            Ok(()) => true,
            Err(error) => {
                self.store_fault(StoreOp::Put, &DebugStr(&key_repr), &error);
                false
            }
        }
    }

    pub async fn remove(&self, key: &K) -> bool {
        match self.store.remove(key).await {
            Ok(()) => true,
            Err(error) => {
                self.store_fault(StoreOp::Remove, key, &error);
                false
            }
        }
    }

    /// Reports a loader error that happened during a background refresh.
    pub fn refresh_fault(&self, key: &K, error: &(dyn StdError + Send + Sync + 'static)) {
        (self.on_fault)(&Fault::Refresh {
            cache: &self.name,
            key,
            error,
        });
    }

    fn store_fault(&self, op: StoreOp, key: &dyn fmt::Debug, error: &StoreError) {
        metric!(
            counter("caches.store.error") += 1,
            "cache" => &self.name,
            "op" => op.as_ref(),
        );
        (self.on_fault)(&Fault::Store {
            cache: &self.name,
            op,
            key,
            error,
        });
    }
}

/// Prints a pre-rendered `Debug` representation verbatim.
struct DebugStr<'a>(&'a str);

impl fmt::Debug for DebugStr<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}
