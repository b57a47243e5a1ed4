use std::time::Duration;

use crate::{CountingLoader, LoadError, TTL, fault_recorder, settle, setup_cache};

#[tokio::test(start_paused = true)]
async fn test_cold_load() {
    let (cache, store) = setup_cache(|builder| builder);
    let loader = CountingLoader::new();

    let value = cache.get("A", loader.returning("v1".to_owned())).await;

    assert_eq!(value.unwrap(), "v1");
    assert_eq!(loader.calls(), 1);
    assert_eq!(store.puts(), 1);

    let entry = store.peek(&"A").unwrap();
    assert!(!entry.is_expired());
    assert_eq!(entry.value(), "v1");
}

#[tokio::test(start_paused = true)]
async fn test_fresh_entry_skips_loader() {
    let (cache, store) = setup_cache(|builder| builder);
    let loader = CountingLoader::new();
    store.seed("A", "v1".to_owned(), TTL);

    let value = cache.get("A", loader.returning("v2".to_owned())).await;

    assert_eq!(value.unwrap(), "v1");
    assert_eq!(loader.calls(), 0);
    assert_eq!(store.puts(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_entries_expire_after_ttl() {
    let (cache, store) = setup_cache(|builder| builder);
    let loader = CountingLoader::new();

    cache
        .get("A", loader.returning("v1".to_owned()))
        .await
        .unwrap();
    tokio::time::advance(TTL - Duration::from_millis(1)).await;
    assert!(!store.peek(&"A").unwrap().is_expired());

    tokio::time::advance(Duration::from_millis(1)).await;
    assert!(store.peek(&"A").unwrap().is_expired());

    let value = cache.get("A", loader.returning("v2".to_owned())).await;
    assert_eq!(value.unwrap(), "v1");

    settle(&cache).await;
    assert_eq!(loader.calls(), 2);
    assert_eq!(store.peek(&"A").unwrap().value(), "v2");
}

#[tokio::test(start_paused = true)]
async fn test_stale_entry_refreshed_in_background() {
    let (cache, store) = setup_cache(|builder| builder);
    let loader = CountingLoader::new();
    store.seed_expired("A", "v1".to_owned());

    let refresh = loader.delayed("v2".to_owned(), Duration::from_millis(100));
    let value = cache.get("A", refresh).await;

    // the stale value is returned without waiting for the loader
    assert_eq!(value.unwrap(), "v1");
    assert!(cache.is_loading(&"A"));
    assert_eq!(store.peek(&"A").unwrap().value(), "v1");

    settle(&cache).await;
    assert_eq!(loader.calls(), 1);
    assert_eq!(store.puts(), 1);

    let entry = store.peek(&"A").unwrap();
    assert!(!entry.is_expired());
    assert_eq!(entry.value(), "v2");

    let value = cache.get("A", loader.returning("v3".to_owned())).await;
    assert_eq!(value.unwrap(), "v2");
    assert_eq!(loader.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_cold_loader_error_surfaces() {
    let (cache, store) = setup_cache(|builder| builder);
    let loader = CountingLoader::new();

    let result = cache.get("A", loader.failing("B")).await;

    assert_eq!(result.unwrap_err(), LoadError("B".into()));
    assert_eq!(store.puts(), 0);
    assert!(store.peek(&"A").is_none());
    assert!(!cache.is_loading(&"A"));

    // nothing was cached, so the next lookup loads again
    let value = cache.get("A", loader.returning("v1".to_owned())).await;
    assert_eq!(value.unwrap(), "v1");
    assert_eq!(loader.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_failed_refresh_keeps_stale_value() {
    let (handler, faults) = fault_recorder();
    let (cache, store) = setup_cache(|builder| builder.error_handler(handler));
    let loader = CountingLoader::new();
    store.seed_expired("A", "v1".to_owned());

    let value = cache.get("A", loader.failing("B")).await;
    assert_eq!(value.unwrap(), "v1");

    settle(&cache).await;
    assert_eq!(
        *faults.lock().unwrap(),
        [r#"cache `test`: refresh failed for key "A""#]
    );
    let entry = store.peek(&"A").unwrap();
    assert!(entry.is_expired());
    assert_eq!(entry.value(), "v1");

    // the next expired read tries again
    let value = cache.get("A", loader.returning("v2".to_owned())).await;
    assert_eq!(value.unwrap(), "v1");

    settle(&cache).await;
    assert_eq!(loader.calls(), 2);
    assert_eq!(store.peek(&"A").unwrap().value(), "v2");
    assert_eq!(faults.lock().unwrap().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_get_if_present_never_loads() {
    let (cache, store) = setup_cache(|builder| builder);

    assert_eq!(cache.get_if_present(&"A").await, None);

    store.seed_expired("A", "v1".to_owned());
    assert_eq!(cache.get_if_present(&"A").await.as_deref(), Some("v1"));
    assert!(!cache.is_loading(&"A"));
    assert_eq!(store.puts(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_invalidate() {
    let (cache, store) = setup_cache(|builder| builder);
    let loader = CountingLoader::new();
    store.seed("A", "v1".to_owned(), TTL);

    cache.invalidate(&"A").await;
    assert_eq!(store.removes(), 1);
    assert!(store.peek(&"A").is_none());

    let value = cache.get("A", loader.returning("v2".to_owned())).await;
    assert_eq!(value.unwrap(), "v2");
    assert_eq!(loader.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_explicit_refresh_of_fresh_entry() {
    let (cache, store) = setup_cache(|builder| builder);
    let loader = CountingLoader::new();
    store.seed("A", "v1".to_owned(), TTL);

    assert!(cache.refresh("A", loader.delayed("v2".to_owned(), Duration::from_millis(10))));
    assert!(!cache.refresh("A", loader.returning("v3".to_owned())));

    settle(&cache).await;
    assert_eq!(loader.calls(), 1);
    assert_eq!(store.peek(&"A").unwrap().value(), "v2");
}

#[tokio::test(start_paused = true)]
async fn test_anyhow_loader_errors() {
    let (handler, faults) = fault_recorder();
    let (cache, store) = setup_cache(|builder| builder.error_handler(handler));

    let result = cache
        .get("A", |_| async { Err::<String, _>(anyhow::anyhow!("B")) })
        .await;
    assert_eq!(result.unwrap_err().to_string(), "B");

    store.seed_expired("A", "v1".to_owned());
    let value = cache
        .get("A", |_| async { Err::<String, _>(anyhow::anyhow!("C")) })
        .await;
    assert_eq!(value.unwrap(), "v1");

    settle(&cache).await;
    assert_eq!(
        *faults.lock().unwrap(),
        [r#"cache `test`: refresh failed for key "A""#]
    );
}

#[test]
fn test_stale_entry_outside_runtime() {
    let (cache, store) = setup_cache(|builder| builder);
    let loader = CountingLoader::new();
    store.seed_expired("A", "v1".to_owned());

    // without a runtime to refresh on, the stale value is still served
    let value = futures::executor::block_on(cache.get("A", loader.returning("v2".to_owned())));
    assert_eq!(value.unwrap(), "v1");
    assert!(!cache.is_loading(&"A"));
    assert_eq!(loader.calls(), 0);
    assert_eq!(store.peek(&"A").unwrap().value(), "v1");

    let value = futures::executor::block_on(cache.get("B", loader.returning("v3".to_owned())));
    assert_eq!(value.unwrap(), "v3");
    assert_eq!(loader.calls(), 1);
}
