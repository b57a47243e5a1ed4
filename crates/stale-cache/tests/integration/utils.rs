use std::sync::{Arc, Mutex};
use std::time::Duration;

use stale_cache::{CacheBuilder, Fault, SelfLoadingCache};
use stale_cache_test as test;

pub use test::{CountingLoader, LoadError, TestStore, settle};

pub type Store = TestStore<&'static str, String>;
pub type Cache = SelfLoadingCache<&'static str, String>;

pub const TTL: Duration = Duration::from_secs(10);

/// Setup tests and create a cache on top of a fresh [`TestStore`].
///
/// Returns the cache along with a handle to its store, which shares all state and counters with
/// the one used by the cache. The `update_builder` closure can modify the default settings before
/// the cache is built.
pub fn setup_cache(
    update_builder: impl FnOnce(CacheBuilder<&'static str, String>) -> CacheBuilder<&'static str, String>,
) -> (Cache, Store) {
    test::setup();

    let store = Store::new();
    let builder = SelfLoadingCache::builder(Arc::new(store.clone()))
        .name("test")
        .ttl(TTL);
    let cache = update_builder(builder).build();

    (cache, store)
}

/// Creates an error handler that records every fault it receives, rendered as a string.
pub fn fault_recorder() -> (
    impl Fn(&Fault<'_>) + Send + Sync + 'static,
    Arc<Mutex<Vec<String>>>,
) {
    let faults = Arc::new(Mutex::new(Vec::new()));
    let handler = {
        let faults = Arc::clone(&faults);
        move |fault: &Fault<'_>| faults.lock().unwrap().push(fault.to_string())
    };
    (handler, faults)
}
