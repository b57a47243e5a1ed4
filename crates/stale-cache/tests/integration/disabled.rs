use stale_cache::{Config, GlobalSwitch};

use crate::{CountingLoader, LoadError, TTL, setup_cache};

#[tokio::test]
async fn test_disabled_cache_never_touches_store() {
    let (cache, store) = setup_cache(|builder| builder.disabled(true));
    let loader = CountingLoader::new();
    store.seed("A", "v0".to_owned(), TTL);

    assert!(cache.is_disabled());
    assert_eq!(cache.get("A", loader.returning("v1".to_owned())).await.unwrap(), "v1");
    assert_eq!(cache.get("A", loader.returning("v2".to_owned())).await.unwrap(), "v2");
    assert_eq!(loader.calls(), 2);

    assert_eq!(cache.get_if_present(&"A").await, None);
    assert!(!cache.refresh("A", loader.returning("v3".to_owned())));
    cache.invalidate(&"A").await;

    assert_eq!((store.gets(), store.puts(), store.removes()), (0, 0, 0));
    assert_eq!(store.peek(&"A").unwrap().value(), "v0");
}

#[tokio::test]
async fn test_disabled_cache_surfaces_loader_errors() {
    let (cache, _store) = setup_cache(|builder| builder.disabled(true));
    let loader = CountingLoader::new();

    let result = cache.get("A", loader.failing("B")).await;
    assert_eq!(result.unwrap_err(), LoadError("B".into()));
}

#[tokio::test]
async fn test_global_switch() {
    let (cache, store) = setup_cache(|builder| builder.global_switch(GlobalSwitch::disabled()));
    let loader = CountingLoader::new();

    assert!(cache.is_disabled());
    cache.get("A", loader.returning("v1".to_owned())).await.unwrap();
    cache.get("A", loader.returning("v1".to_owned())).await.unwrap();

    assert_eq!(loader.calls(), 2);
    assert_eq!((store.gets(), store.puts()), (0, 0));
}

#[tokio::test]
async fn test_global_switch_from_config() {
    let config = Config::from_reader("caches_disabled: true".as_bytes()).unwrap();
    let (cache, store) = setup_cache(|builder| builder.with_config(&config));
    let loader = CountingLoader::new();

    cache.get("A", loader.returning("v1".to_owned())).await.unwrap();
    assert_eq!(store.gets(), 0);

    let config = Config::from_reader("caches_disabled: false".as_bytes()).unwrap();
    let (cache, store) = setup_cache(|builder| builder.with_config(&config));

    cache.get("A", loader.returning("v1".to_owned())).await.unwrap();
    assert_eq!(store.gets(), 1);
    assert_eq!(store.puts(), 1);
}
