//! Named cache instances
//!
//! One [`TaggedCache`] per connection name, built and connected on first use.
//! The registry is an ordinary value owned by the host application; there is
//! no global lookup.
//!
//! Each name owns a slot that serializes its own construction. The map lock is
//! only held to find or create a slot, so a slow connect on one name never
//! delays lookups of another.

use crate::cache::config::CacheConfig;
use crate::cache::facade::TaggedCache;
use crate::cache::sink::ErrorSink;
use crate::connection::Connector;
use crate::error::Result;
use crate::store::{Codec, JsonCodec};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{OnceCell, RwLock};
use tracing::{debug, info};

/// Name used by [`CacheRegistry::get_default`]
pub const DEFAULT_NAME: &str = "default";

/// Lazily constructed facade instances keyed by connection name
pub struct CacheRegistry<C: Codec + Clone = JsonCodec> {
    connector: Option<Arc<dyn Connector>>,
    configs: HashMap<String, CacheConfig>,
    codec: C,
    sink: Option<Arc<dyn ErrorSink>>,
    instances: RwLock<HashMap<String, Arc<Slot<C>>>>,
}

/// Per-name construction slot
type Slot<C> = OnceCell<Arc<TaggedCache<C>>>;

impl CacheRegistry<JsonCodec> {
    /// Registry connecting through `connector`; `None` yields disabled facades
    pub fn new(connector: Option<Arc<dyn Connector>>) -> Self {
        Self {
            connector,
            configs: HashMap::new(),
            codec: JsonCodec,
            sink: None,
            instances: RwLock::new(HashMap::new()),
        }
    }
}

impl<C: Codec + Clone> CacheRegistry<C> {
    /// Register the configuration used for `config.name`
    pub fn with_config(mut self, config: CacheConfig) -> Self {
        self.configs.insert(config.name.clone(), config);
        self
    }

    pub fn with_codec<D: Codec + Clone>(self, codec: D) -> CacheRegistry<D> {
        CacheRegistry {
            connector: self.connector,
            configs: self.configs,
            codec,
            sink: self.sink,
            instances: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_error_sink(mut self, sink: Arc<dyn ErrorSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Instance for `name`, connecting it on first use
    ///
    /// Without a registered configuration the default one is used, renamed to
    /// `name`. A strict-mode connect failure is returned and nothing is cached,
    /// so the next call tries again.
    pub async fn get(&self, name: &str) -> Result<Arc<TaggedCache<C>>> {
        let slot = self.slot(name).await;
        let cache = slot.get_or_try_init(|| self.construct(name)).await?;
        Ok(cache.clone())
    }

    async fn slot(&self, name: &str) -> Arc<Slot<C>> {
        if let Some(slot) = self.instances.read().await.get(name) {
            return slot.clone();
        }
        self.instances
            .write()
            .await
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone()
    }

    async fn construct(&self, name: &str) -> Result<Arc<TaggedCache<C>>> {
        debug!("Constructing cache instance '{}'", name);
        let config = self.configs.get(name).cloned().unwrap_or_else(|| CacheConfig {
            name: name.to_string(),
            ..CacheConfig::default()
        });

        let mut builder = TaggedCache::builder(config).codec(self.codec.clone());
        if let Some(connector) = &self.connector {
            builder = builder.connector(connector.clone());
        }
        if let Some(sink) = &self.sink {
            builder = builder.error_sink(sink.clone());
        }

        Ok(Arc::new(builder.connect().await?))
    }

    pub async fn get_default(&self) -> Result<Arc<TaggedCache<C>>> {
        self.get(DEFAULT_NAME).await
    }

    /// Names of the instances constructed so far, sorted
    pub async fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .instances
            .read()
            .await
            .iter()
            .filter(|(_, slot)| slot.initialized())
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    /// Drop the instance for `name`; the next `get` connects afresh
    pub async fn remove(&self, name: &str) -> Option<Arc<TaggedCache<C>>> {
        let removed = self
            .instances
            .write()
            .await
            .remove(name)
            .and_then(|slot| slot.get().cloned());
        if removed.is_some() {
            info!("Removed cache instance '{}'", name);
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryConnector, Store};
    use async_trait::async_trait;
    use std::time::{Duration, Instant};

    /// Connector that stalls for the instance named "slow"
    struct SlowConnector {
        inner: MemoryConnector,
        delay: Duration,
    }

    #[async_trait]
    impl Connector for SlowConnector {
        async fn connect(&self, config: &CacheConfig) -> Result<Arc<dyn Store>> {
            if config.name == "slow" {
                tokio::time::sleep(self.delay).await;
            }
            self.inner.connect(config).await
        }
    }

    #[tokio::test]
    async fn test_one_instance_per_name() {
        let registry = CacheRegistry::new(Some(Arc::new(MemoryConnector::new())));

        let first = registry.get("sessions").await.unwrap();
        let second = registry.get("sessions").await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.config().name, "sessions");

        registry.get_default().await.unwrap();
        assert_eq!(registry.names().await, vec!["default", "sessions"]);
    }

    #[tokio::test]
    async fn test_registered_config_is_used() {
        let config = CacheConfig::builder().name("pages").database("web").build();
        let registry = CacheRegistry::new(Some(Arc::new(MemoryConnector::new()))).with_config(config);

        let cache = registry.get("pages").await.unwrap();
        assert_eq!(cache.config().database, "web");
    }

    #[tokio::test]
    async fn test_remove_allows_reconnect() {
        let connector = Arc::new(MemoryConnector::new());
        connector.set_refusing(true);
        let registry = CacheRegistry::new(Some(connector.clone()));

        let down = registry.get("main").await.unwrap();
        assert!(!down.is_enabled());

        connector.set_refusing(false);
        assert!(registry.remove("main").await.is_some());
        let up = registry.get("main").await.unwrap();
        assert!(up.is_enabled());
    }

    #[tokio::test]
    async fn test_without_connector_instances_are_disabled() {
        let registry = CacheRegistry::new(None);
        let cache = registry.get_default().await.unwrap();
        assert!(!cache.is_connected());
    }

    #[tokio::test]
    async fn test_slow_connect_does_not_block_other_names() {
        let connector = SlowConnector {
            inner: MemoryConnector::new(),
            delay: Duration::from_millis(300),
        };
        let slow_config = CacheConfig::builder()
            .name("slow")
            .timeout(Duration::from_secs(2))
            .build();
        let registry = CacheRegistry::new(Some(Arc::new(connector))).with_config(slow_config);
        let fast = registry.get("fast").await.unwrap();

        let (slow, waited) = tokio::join!(registry.get("slow"), async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            let start = Instant::now();
            let again = registry.get("fast").await.unwrap();
            assert!(Arc::ptr_eq(&fast, &again));
            start.elapsed()
        });

        assert!(slow.unwrap().is_enabled());
        assert!(waited < Duration::from_millis(100), "waited {:?}", waited);
    }

    #[tokio::test]
    async fn test_concurrent_gets_connect_once() {
        let registry = CacheRegistry::new(Some(Arc::new(MemoryConnector::new())));
        let (a, b) = tokio::join!(registry.get("shared"), registry.get("shared"));
        assert!(Arc::ptr_eq(&a.unwrap(), &b.unwrap()));
        assert_eq!(registry.names().await, vec!["shared"]);
    }
}
