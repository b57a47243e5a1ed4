//! Deduplication of concurrent loads.
//!
//! The [`LoadCoordinator`] keeps a registry of the keys that currently have a load running. An
//! entry is claimed with an atomic insert-if-absent on a sharded [`DashMap`], so claims for
//! unrelated keys never contend on a single lock. The claim is held by a [`LoadTicket`], which
//! releases it on drop. Dropping the ticket also wakes up everyone who is waiting for that load, no
//! matter whether it completed, failed, panicked or was cancelled.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicIsize, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use sentry::{Hub, SentryFutureExt};
use tokio::runtime::Handle;
use tokio::sync::watch;

use crate::guard::GuardedStore;
use crate::store::CacheKey;
use crate::utils::CallOnDrop;

type Registry<K> = DashMap<K, watch::Receiver<()>>;

/// The result of trying to claim the load for a key.
enum Claim<K: CacheKey> {
    /// Nobody else is loading this key, and we are now responsible for it.
    Acquired(LoadTicket<K>),
    /// A load is already running. The receiver resolves once it is done.
    Pending(watch::Receiver<()>),
}

/// Proof that a load for `key` is in flight.
///
/// The `watch` channel is never written to. Waiters only observe the sender being dropped.
pub(crate) struct LoadTicket<K: CacheKey> {
    key: K,
    registry: Arc<Registry<K>>,
    _done: watch::Sender<()>,
}

impl<K: CacheKey> Drop for LoadTicket<K> {
    fn drop(&mut self) {
        // The registry entry has to be gone before `_done` is dropped, otherwise a woken up waiter
        // could observe the stale entry and wait on an already closed channel in a loop.
        self.registry.remove(&self.key);
    }
}

/// Ensures that at most one load per key runs at any time.
pub(crate) struct LoadCoordinator<K: CacheKey> {
    name: Arc<str>,
    in_flight: Arc<Registry<K>>,
    /// Where background refreshes are spawned, defaults to the current runtime.
    runtime: Option<Handle>,
    /// Counts down towards zero, one for each running lazy refresh.
    lazy_refreshes: Arc<AtomicIsize>,
}

impl<K: CacheKey> LoadCoordinator<K> {
    pub fn new(name: Arc<str>, runtime: Option<Handle>, max_lazy_refreshes: isize) -> Self {
        Self {
            name,
            in_flight: Default::default(),
            runtime,
            lazy_refreshes: Arc::new(AtomicIsize::new(max_lazy_refreshes)),
        }
    }

    /// Whether a load for `key` is currently running.
    pub fn is_loading(&self, key: &K) -> bool {
        self.in_flight.contains_key(key)
    }

    /// The number of loads currently running, synchronous and background ones combined.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    fn claim(&self, key: &K) -> Claim<K> {
        let claim = match self.in_flight.entry(key.clone()) {
            Entry::Occupied(entry) => return Claim::Pending(entry.get().clone()),
            Entry::Vacant(entry) => {
                let (done, waiters) = watch::channel(());
                entry.insert(waiters);
                Claim::Acquired(LoadTicket {
                    key: key.clone(),
                    registry: Arc::clone(&self.in_flight),
                    _done: done,
                })
            }
        };

        metric!(
            gauge("caches.loads_in_flight") = self.in_flight.len() as u64,
            "cache" => &self.name,
        );
        claim
    }

    /// Takes one of the lazy refresh slots, which is handed back when the guard is dropped.
    fn lazy_refresh_permit(&self) -> Option<CallOnDrop> {
        let remaining = Arc::clone(&self.lazy_refreshes);

        // We count down towards zero, and if we reach or surpass it, we will stop here.
        if remaining.fetch_sub(1, Ordering::Relaxed) <= 0 {
            remaining.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        Some(CallOnDrop::new(move || {
            remaining.fetch_add(1, Ordering::Relaxed);
        }))
    }

    /// Loads `key` on the current task and writes the result to the store.
    ///
    /// If another load for `key` is already running, this waits for it and returns whatever it
    /// left in the store. Should the store still not have an entry afterwards, because that load
    /// failed or the write was dropped, this tries to claim the load again.
    ///
    /// Errors of the `loader` are returned unchanged.
    pub async fn run_sync<V, F, Fut, E>(
        &self,
        store: &GuardedStore<K, V>,
        key: K,
        ttl: Duration,
        loader: F,
    ) -> Result<V, E>
    where
        V: Clone,
        F: FnOnce(K) -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        let ticket = loop {
            match self.claim(&key) {
                Claim::Acquired(ticket) => break ticket,
                Claim::Pending(mut done) => {
                    metric!(counter("caches.coalesced") += 1, "cache" => &self.name);
                    tracing::trace!("Waiting for running {} load of {:?}", self.name, key);

                    // Nothing is ever sent, so this only returns once the sender is gone.
                    let _ = done.changed().await;

                    if let Some(entry) = store.get(&key).await {
                        return Ok(entry.into_value());
                    }
                }
            }
        };

        metric!(
            counter("caches.computation") += 1,
            "cache" => &self.name,
            "is_refresh" => "false",
        );
        let value = loader(key.clone()).await?;
        store.put(key, value.clone(), ttl).await;

        drop(ticket);
        Ok(value)
    }

    /// Spawns a background task that loads `key` and overwrites the store entry.
    ///
    /// Returns `false` without doing anything if a load for `key` is already running, if the
    /// maximum number of concurrent lazy refreshes has been reached, or if there is no runtime to
    /// spawn on.
    ///
    /// Errors of the `loader` are reported to the store's error handler, and the existing entry is
    /// left untouched.
    pub fn schedule_async<V, F, Fut, E>(
        &self,
        store: Arc<GuardedStore<K, V>>,
        key: K,
        ttl: Duration,
        loader: F,
    ) -> bool
    where
        V: Send + Sync + 'static,
        F: FnOnce(K) -> Fut + Send + 'static,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
        E: Into<anyhow::Error> + Send + 'static,
    {
        // Without a configured runtime, we can only spawn when called from within one.
        let Some(runtime) = self.runtime.clone().or_else(|| Handle::try_current().ok()) else {
            metric!(counter("caches.no_runtime") += 1, "cache" => &self.name);
            tracing::debug!("Skipping refresh of {:?} in {}, no runtime", key, self.name);
            return false;
        };

        let ticket = match self.claim(&key) {
            Claim::Acquired(ticket) => ticket,
            Claim::Pending(_) => {
                tracing::trace!("Refresh of {:?} in {} is already running", key, self.name);
                return false;
            }
        };

        let Some(permit) = self.lazy_refresh_permit() else {
            metric!(counter("caches.lazy_limit_hit") += 1, "cache" => &self.name);
            tracing::debug!("Skipping refresh of {:?} in {}, too many running", key, self.name);
            return false;
        };

        tracing::trace!("Spawning deduplicated {} refresh of {:?}", self.name, key);

        let name = Arc::clone(&self.name);
        let task = async move {
            // move into the future, both are released when it completes or is dropped
            let _ticket = ticket;
            let _permit = permit;

            let span = sentry::configure_scope(|scope| scope.get_span());
            let ctx = sentry::TransactionContext::continue_from_span(
                "Lazy Cache Refresh",
                "spawn_refresh",
                span,
            );
            let transaction = sentry::start_transaction(ctx);
            sentry::configure_scope(|scope| scope.set_span(Some(transaction.clone().into())));

            metric!(
                counter("caches.computation") += 1,
                "cache" => &name,
                "is_refresh" => "true",
            );
            let status = match loader(key.clone()).await {
                Ok(value) => {
                    store.put(key, value, ttl).await;
                    "ok"
                }
                Err(error) => {
                    let error: anyhow::Error = error.into();
                    store.refresh_fault(&key, &*error);
                    "error"
                }
            };
            metric!(counter("caches.refresh") += 1, "cache" => &name, "status" => status);

            transaction.finish();
        };
        let task = task.bind_hub(Hub::new_from_top(Hub::current()));

        runtime.spawn(task);
        true
    }
}
