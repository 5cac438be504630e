//! Degraded mode and error policy tests
//!
//! Covers the three ways a facade ends up not talking to its backend (no
//! backend, failed connect, host override), store outages after a successful
//! connect, and how lenient and strict modes surface the resulting errors.

use ouroboros_cache::{
    CacheConfig, CacheError, CacheRegistry, DisableReason, ErrorSink, HealthStatus, KeyTags,
    MemoryConnector, MemoryStore, StoreOp, TaggedCache,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio_test::{assert_err, assert_ok};

/// Sink remembering every (context, error) it was handed
#[derive(Default)]
struct RecordingSink {
    reports: Mutex<Vec<(String, CacheError)>>,
}

impl RecordingSink {
    fn contexts(&self) -> Vec<String> {
        self.reports
            .lock()
            .unwrap()
            .iter()
            .map(|(context, _)| context.clone())
            .collect()
    }

    fn errors(&self) -> Vec<CacheError> {
        self.reports
            .lock()
            .unwrap()
            .iter()
            .map(|(_, error)| error.clone())
            .collect()
    }
}

impl ErrorSink for RecordingSink {
    fn report(&self, error: &CacheError, context: &str) {
        self.reports
            .lock()
            .unwrap()
            .push((context.to_string(), error.clone()));
    }
}

async fn cache_over(store: Arc<MemoryStore>, config: CacheConfig) -> (TaggedCache, Arc<RecordingSink>) {
    let sink = Arc::new(RecordingSink::default());
    let cache = TaggedCache::builder(config)
        .store(store)
        .error_sink(sink.clone())
        .connect()
        .await
        .unwrap();
    (cache, sink)
}

#[tokio::test]
async fn test_disabled_cache_is_pass_through() {
    let cache = TaggedCache::builder(CacheConfig::default())
        .connect()
        .await
        .unwrap();

    assert!(!cache.save("k", &1, None, &["t"]).await.unwrap());
    assert!(!cache.has("k").await.unwrap());

    let value: Option<String> = cache
        .load_with("k", |_, _| async { Ok::<_, anyhow::Error>("from callback".to_string()) })
        .await
        .unwrap();
    assert_eq!(value.as_deref(), Some("from callback"));

    let plain: Option<u32> = cache.load("k").await.unwrap();
    assert!(plain.is_none());
}

#[tokio::test]
async fn test_disabled_cache_failure_values() {
    let cache = TaggedCache::builder(CacheConfig::development())
        .connect()
        .await
        .unwrap();

    // unavailable backends degrade silently, even in strict mode
    assert!(!assert_ok!(cache.save_multiple([("a", 1)], None, &[]).await));
    assert!(!assert_ok!(cache.delete("a").await));
    assert_eq!(assert_ok!(cache.delete_multiple("a", &KeyTags::new()).await), 0);
    assert_eq!(assert_ok!(cache.delete_by_tags("t").await), 0);
    assert_eq!(assert_ok!(cache.has_multiple(["a", "b"]).await), 0);
    assert!(!assert_ok!(cache.clear().await));
    assert!(assert_ok!(cache.process_transaction(vec![StoreOp::FlushNamespace]).await).is_empty());

    let values: Vec<Option<u32>> = assert_ok!(cache.load_multiple(["a", "b", "c"]).await);
    assert_eq!(values, vec![None, None, None]);
}

#[tokio::test]
async fn test_disabled_load_multiple_recovers_every_key() {
    let cache = TaggedCache::builder(CacheConfig::default())
        .connect()
        .await
        .unwrap();

    let values: Vec<Option<usize>> = cache
        .load_multiple_with(vec!["a", "bb", "ccc"], |_, key| async move {
            Ok::<_, anyhow::Error>(key.len())
        })
        .await
        .unwrap();
    assert_eq!(values, vec![Some(1), Some(2), Some(3)]);
    assert_eq!(cache.stats().recoveries, 3);
}

#[tokio::test]
async fn test_connect_failure_lenient_disables() {
    let connector = Arc::new(MemoryConnector::new());
    connector.set_refusing(true);
    let sink = Arc::new(RecordingSink::default());

    let cache = TaggedCache::builder(CacheConfig::default())
        .connector(connector)
        .error_sink(sink.clone())
        .connect()
        .await
        .unwrap();

    assert!(!cache.is_enabled());
    assert!(!cache.is_connected());
    assert_eq!(cache.disable_reason(), Some(DisableReason::ConnectFailed));
    assert_eq!(sink.contexts(), vec!["connect".to_string()]);
    assert!(sink.errors()[0].is_degradation());

    // a facade that never connected cannot be switched on
    assert!(!cache.set_enabled(true));
    assert!(!cache.save("k", &1, None, &[]).await.unwrap());
}

#[tokio::test]
async fn test_connect_failure_strict_returns_error() {
    let connector = Arc::new(MemoryConnector::new());
    connector.set_refusing(true);
    let sink = Arc::new(RecordingSink::default());

    let result = TaggedCache::builder(CacheConfig::development())
        .connector(connector)
        .error_sink(sink.clone())
        .connect()
        .await;

    assert!(matches!(result, Err(CacheError::ConnectFailure(_))));
    assert_eq!(sink.contexts(), vec!["connect".to_string()]);
}

#[tokio::test]
async fn test_handshake_failure_on_injected_store() {
    let store = Arc::new(MemoryStore::new("down"));
    store.set_available(false);

    let (cache, sink) = cache_over(store, CacheConfig::default()).await;
    assert!(!cache.is_enabled());
    assert_eq!(sink.errors().len(), 1);

    let health = cache.health_check().await;
    assert_eq!(health.status, HealthStatus::Unhealthy);
    assert_eq!(health.backend.as_deref(), Some("memory"));
}

#[tokio::test]
async fn test_outage_lenient_returns_failure_values() {
    let store = Arc::new(MemoryStore::new("outage"));
    let (cache, sink) = cache_over(store.clone(), CacheConfig::default()).await;
    cache.save("k", &1, None, &["t"]).await.unwrap();

    store.set_available(false);

    assert!(!cache.save("k", &2, None, &[]).await.unwrap());
    assert!(!cache.has("k").await.unwrap());
    assert!(!cache.delete("k").await.unwrap());
    assert_eq!(cache.delete_by_tags("t").await.unwrap(), 0);
    assert!(!cache.clear().await.unwrap());

    let loaded: Option<u32> = cache.load("k").await.unwrap();
    assert!(loaded.is_none());

    // the gate stays open: the outage is handled per call
    assert!(cache.is_enabled());
    assert_eq!(
        sink.contexts(),
        vec!["save", "has", "delete", "delete_by_tags", "clear", "load"]
    );
    assert!(sink
        .errors()
        .iter()
        .all(|e| matches!(e, CacheError::Operation(_))));

    store.set_available(true);
    assert_eq!(cache.load::<u32>("k").await.unwrap(), Some(1));
}

#[tokio::test]
async fn test_outage_load_falls_through_to_callback() {
    let store = Arc::new(MemoryStore::new("outage"));
    let (cache, _) = cache_over(store.clone(), CacheConfig::default()).await;
    store.set_available(false);

    let value: Option<u32> = cache
        .load_with("k", |_, _| async { Ok::<_, anyhow::Error>(5) })
        .await
        .unwrap();
    assert_eq!(value, Some(5));

    let values: Vec<Option<u32>> = cache
        .load_multiple_with(["a", "b"], |_, _| async { Ok::<_, anyhow::Error>(0) })
        .await
        .unwrap();
    assert_eq!(values, vec![Some(0), Some(0)]);
}

#[tokio::test]
async fn test_outage_strict_propagates() {
    let store = Arc::new(MemoryStore::new("outage"));
    let (cache, sink) = cache_over(store.clone(), CacheConfig::development()).await;
    store.set_available(false);

    assert_err!(cache.save("k", &1, None, &[]).await);
    assert_err!(cache.has_multiple(["a"]).await);
    assert_err!(cache.load::<u32>("k").await);

    let err = cache.delete("k").await.unwrap_err();
    assert!(matches!(err, CacheError::Operation(_)));
    assert!(!err.is_degradation());

    // strict mode still reports before returning
    assert_eq!(sink.contexts().len(), 4);
}

#[tokio::test]
async fn test_callback_failure_is_isolated_per_key() {
    let store = Arc::new(MemoryStore::new("cb"));
    let (cache, sink) = cache_over(store, CacheConfig::default()).await;
    cache.save("ok", &"cached", None, &[]).await.unwrap();

    let values: Vec<Option<String>> = cache
        .load_multiple_with(vec!["bad", "ok", "good"], |_, key| async move {
            if key == "bad" {
                anyhow::bail!("upstream refused {}", key);
            }
            Ok(format!("fresh:{}", key))
        })
        .await
        .unwrap();

    assert_eq!(
        values,
        vec![None, Some("cached".to_string()), Some("fresh:good".to_string())]
    );
    match &sink.errors()[..] {
        [CacheError::Callback { key, message }] => {
            assert_eq!(key, "bad");
            assert!(message.contains("upstream refused"));
        }
        other => panic!("unexpected reports: {:?}", other),
    }
}

#[tokio::test]
async fn test_callback_failure_strict_propagates() {
    let store = Arc::new(MemoryStore::new("cb"));
    let (cache, _) = cache_over(store, CacheConfig::development()).await;

    let result: ouroboros_cache::Result<Option<u32>> = cache
        .load_with("k", |_, _| async { Err::<u32, _>(anyhow::anyhow!("no source")) })
        .await;

    match result {
        Err(CacheError::Callback { key, .. }) => assert_eq!(key, "k"),
        other => panic!("expected callback failure, got {:?}", other),
    }
}

#[tokio::test]
async fn test_strict_load_multiple_stops_at_first_callback_failure() {
    let store = Arc::new(MemoryStore::new("cb"));
    let (cache, sink) = cache_over(store, CacheConfig::development()).await;
    let calls = AtomicUsize::new(0);

    let result: ouroboros_cache::Result<Vec<Option<u32>>> = cache
        .load_multiple_with(vec!["a", "bad", "c"], |_, key| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if key == "bad" {
                    Err(anyhow::anyhow!("no source for {}", key))
                } else {
                    Ok::<_, anyhow::Error>(1)
                }
            }
        })
        .await;

    match result {
        Err(CacheError::Callback { key, .. }) => assert_eq!(key, "bad"),
        other => panic!("expected callback failure, got {:?}", other),
    }
    // "c" is never recovered
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(sink.contexts(), vec!["load"]);
}

#[tokio::test]
async fn test_host_can_force_disable_and_reenable() {
    let store = Arc::new(MemoryStore::new("toggle"));
    let (cache, _) = cache_over(store.clone(), CacheConfig::default()).await;
    cache.save("k", &1, None, &[]).await.unwrap();

    assert!(!cache.set_enabled(false));
    assert_eq!(cache.disable_reason(), Some(DisableReason::Forced));
    assert!(!cache.has("k").await.unwrap());
    assert!(!cache.save("other", &2, None, &[]).await.unwrap());
    assert_eq!(store.len().await, 1);

    let health = cache.health_check().await;
    assert_eq!(health.status, HealthStatus::Unhealthy);
    assert!(!health.enabled);

    assert!(cache.set_enabled(true));
    assert!(cache.has("k").await.unwrap());
    assert!(cache.health_check().await.status.is_operational());
}

#[tokio::test]
async fn test_registry_retry_after_failed_connect() {
    let connector = Arc::new(MemoryConnector::new());
    connector.set_refusing(true);
    let registry = CacheRegistry::new(Some(connector.clone()));

    // strict: the failure is returned and nothing is kept
    let strict = CacheRegistry::new(Some(connector.clone()))
        .with_config(CacheConfig::development());
    assert_err!(strict.get("default").await);
    assert!(strict.names().await.is_empty());

    // lenient: a disabled instance is kept until removed
    let cache = registry.get("main").await.unwrap();
    assert!(!cache.is_enabled());

    connector.set_refusing(false);
    assert!(!registry.get("main").await.unwrap().is_enabled());

    registry.remove("main").await;
    assert!(registry.get("main").await.unwrap().is_enabled());
}
