use std::time::Duration;

use futures::future::join_all;

use crate::{CountingLoader, LoadError, settle, setup_cache};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_misses_load_once() {
    let (cache, store) = setup_cache(|builder| builder);
    let loader = CountingLoader::new();

    let tasks: Vec<_> = (0..10)
        .map(|_| {
            let cache = cache.clone();
            let load = loader.delayed("v1".to_owned(), Duration::from_millis(100));
            tokio::spawn(async move { cache.get("A", load).await })
        })
        .collect();

    for result in join_all(tasks).await {
        assert_eq!(result.unwrap().unwrap(), "v1");
    }
    assert_eq!(loader.calls(), 1);
    assert_eq!(store.puts(), 1);
    assert_eq!(cache.loads_in_flight(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_unrelated_keys_do_not_wait() {
    let (cache, _store) = setup_cache(|builder| builder);
    let loader = CountingLoader::new();

    let loads = ["A", "B", "C"].map(|key| {
        let load = loader.delayed(key.to_lowercase(), Duration::from_secs(1));
        cache.get(key, load)
    });
    let start = tokio::time::Instant::now();
    let results = join_all(loads).await;

    assert!(start.elapsed() < Duration::from_secs(2));
    assert_eq!(loader.calls(), 3);
    let values: Vec<_> = results.into_iter().map(Result::unwrap).collect();
    assert_eq!(values, ["a", "b", "c"]);
}

#[tokio::test(start_paused = true)]
async fn test_waiter_loads_after_failed_load() {
    let (cache, store) = setup_cache(|builder| builder);
    let loader = CountingLoader::new();

    let failing = cache.get("A", |_| async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        Err::<String, _>(LoadError("B".into()))
    });
    let waiting = cache.get("A", loader.returning("v1".to_owned()));

    let (failed, waited) = futures::join!(failing, waiting);

    assert_eq!(failed.unwrap_err(), LoadError("B".into()));
    assert_eq!(waited.unwrap(), "v1");
    assert_eq!(loader.calls(), 1);
    assert_eq!(store.peek(&"A").unwrap().value(), "v1");
}

#[tokio::test(start_paused = true)]
async fn test_waiters_load_one_after_another_without_store() {
    let (cache, store) = setup_cache(|builder| builder);
    let loader = CountingLoader::new();
    store.fail_puts(true);

    let loads = (0..3).map(|_| {
        let load = loader.delayed("v1".to_owned(), Duration::from_secs(1));
        cache.get("A", load)
    });
    let start = tokio::time::Instant::now();
    let results = join_all(loads).await;

    // every waiter finds the store empty and takes its turn, never overlapping
    assert!(results.into_iter().all(|value| value.unwrap() == "v1"));
    assert_eq!(loader.calls(), 3);
    assert!(start.elapsed() >= Duration::from_secs(3));
}

#[tokio::test(start_paused = true)]
async fn test_stale_reads_spawn_a_single_refresh() {
    let (cache, store) = setup_cache(|builder| builder);
    let loader = CountingLoader::new();
    store.seed_expired("A", "v1".to_owned());

    for _ in 0..5 {
        let refresh = loader.delayed("v2".to_owned(), Duration::from_millis(100));
        assert_eq!(cache.get("A", refresh).await.unwrap(), "v1");
    }
    assert_eq!(cache.loads_in_flight(), 1);

    settle(&cache).await;
    assert_eq!(loader.calls(), 1);
    assert_eq!(store.puts(), 1);
    assert_eq!(cache.get_if_present(&"A").await.as_deref(), Some("v2"));
}

#[tokio::test(start_paused = true)]
async fn test_miss_waits_for_running_refresh() {
    let (cache, store) = setup_cache(|builder| builder);
    let loader = CountingLoader::new();
    store.seed_expired("A", "v1".to_owned());

    let refresh = loader.delayed("v2".to_owned(), Duration::from_millis(100));
    assert_eq!(cache.get("A", refresh).await.unwrap(), "v1");

    // the entry disappears while the refresh is running
    cache.invalidate(&"A").await;
    let value = cache.get("A", loader.returning("v3".to_owned())).await;

    assert_eq!(value.unwrap(), "v2");
    assert_eq!(loader.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_lazy_refresh_limit() {
    let (cache, store) = setup_cache(|builder| builder.max_lazy_refreshes(1));
    let loader = CountingLoader::new();
    store.seed_expired("A", "a1".to_owned());
    store.seed_expired("B", "b1".to_owned());

    let refresh = loader.delayed("a2".to_owned(), Duration::from_millis(100));
    assert_eq!(cache.get("A", refresh).await.unwrap(), "a1");
    let refresh = loader.returning("b2".to_owned());
    assert_eq!(cache.get("B", refresh).await.unwrap(), "b1");
    assert!(!cache.is_loading(&"B"));

    settle(&cache).await;
    assert_eq!(loader.calls(), 1);

    // once the first refresh is done, there is room for the next one
    let refresh = loader.returning("b2".to_owned());
    assert_eq!(cache.get("B", refresh).await.unwrap(), "b1");
    settle(&cache).await;
    assert_eq!(store.peek(&"B").unwrap().value(), "b2");
}
