//! Degraded Mode Demo
//!
//! Shows the facade staying usable when the backend is missing, refuses the
//! connection, or goes down after connecting.
//!
//! Usage:
//!   RUST_LOG=debug cargo run --example degraded_mode_demo

use ouroboros_cache::{
    CacheConfig, CacheError, MemoryConnector, MemoryStore, TaggedCache,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

async fn expensive_lookup(key: &str) -> anyhow::Result<String> {
    tokio::time::sleep(Duration::from_millis(20)).await;
    Ok(format!("computed value for {}", key))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("=== Degraded Mode Demo ===");

    info!("\n--- 1. No backend installed ---");
    let cache = TaggedCache::builder(CacheConfig::default()).connect().await?;
    info!("enabled: {}, reason: {:?}", cache.is_enabled(), cache.disable_reason());
    info!("save -> {}", cache.save("k", "v", None, &["t"]).await?);
    let value = cache
        .load_with("k", |_, key| async move { expensive_lookup(&key).await })
        .await?;
    info!("load_with -> {:?}", value);

    info!("\n--- 2. Connection refused ---");
    let connector = Arc::new(MemoryConnector::new());
    connector.set_refusing(true);
    let lenient = TaggedCache::builder(CacheConfig::production())
        .connector(connector.clone())
        .connect()
        .await?;
    info!("lenient facade enabled: {}", lenient.is_enabled());

    match TaggedCache::builder(CacheConfig::development())
        .connector(connector)
        .connect()
        .await
    {
        Ok(_) => warn!("strict facade unexpectedly connected"),
        Err(e) => info!("strict facade refused to start: {}", e),
    }

    info!("\n--- 3. Outage after connect ---");
    let store = Arc::new(MemoryStore::new("demo"));
    let cache = TaggedCache::builder(CacheConfig::default())
        .store(store.clone())
        .error_sink(Arc::new(|err: &CacheError, context: &str| {
            warn!("[{}] swallowed: {}", context, err);
        }))
        .connect()
        .await?;
    cache.save("greeting", "hello", None, &[]).await?;

    store.set_available(false);
    info!("has during outage -> {}", cache.has("greeting").await?);
    let value = cache
        .load_with("greeting", |_, key| async move { expensive_lookup(&key).await })
        .await?;
    info!("load_with during outage -> {:?}", value);
    info!("health: {:?}", cache.health_check().await.status);

    store.set_available(true);
    let value: Option<String> = cache.load("greeting").await?;
    info!("after recovery -> {:?}", value);

    info!("\n--- 4. Host override ---");
    cache.set_enabled(false);
    info!("has while forced off -> {}", cache.has("greeting").await?);
    cache.set_enabled(true);
    info!("has after re-enable -> {}", cache.has("greeting").await?);

    info!("\n{}", cache.stats());
    info!("\n=== Demo Complete ===");
    Ok(())
}
