//! Tagged cache facade
//!
//! Every public operation first consults the [`DegradationGate`]. A closed gate
//! turns writes into no-ops reporting failure, existence checks into
//! "absent", and loads into misses that fall through to miss recovery. Store
//! failures on an open gate go through the error policy of the configured
//! [`ErrorMode`](crate::cache::config::ErrorMode): reported to the sink, then
//! either swallowed (lenient) or returned (strict).

use crate::cache::config::CacheConfig;
use crate::cache::gate::{DegradationGate, DisableReason};
use crate::cache::recovery;
use crate::cache::sink::{ErrorSink, TracingSink};
use crate::cache::tags::TagIndex;
use crate::cache::types::{CacheStats, KeyTags, Keys, StatsRecorder, Tag};
use crate::connection::{self, Connector, HealthCheckResult};
use crate::error::{CacheError, Result};
use crate::store::{Codec, JsonCodec, Reply, Store, StoreOp};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Cache facade with tag-based invalidation and degraded mode
pub struct TaggedCache<C: Codec = JsonCodec> {
    config: CacheConfig,
    store: Option<Arc<dyn Store>>,
    gate: DegradationGate,
    codec: C,
    sink: Arc<dyn ErrorSink>,
    tags: TagIndex,
    stats: StatsRecorder,
}

impl<C: Codec> std::fmt::Debug for TaggedCache<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaggedCache")
            .field("config", &self.config)
            .field("gate", &self.gate)
            .finish_non_exhaustive()
    }
}

/// Builder for [`TaggedCache`]
///
/// Without a connector or store the facade starts disabled and behaves as a
/// pure pass-through to miss recovery.
pub struct TaggedCacheBuilder<C: Codec = JsonCodec> {
    config: CacheConfig,
    codec: C,
    sink: Option<Arc<dyn ErrorSink>>,
    connector: Option<Arc<dyn Connector>>,
    store: Option<Arc<dyn Store>>,
    tags: TagIndex,
}

impl TaggedCache<JsonCodec> {
    pub fn builder(config: CacheConfig) -> TaggedCacheBuilder<JsonCodec> {
        TaggedCacheBuilder {
            config,
            codec: JsonCodec,
            sink: None,
            connector: None,
            store: None,
            tags: TagIndex::new(),
        }
    }
}

impl<C: Codec> TaggedCacheBuilder<C> {
    /// Replace the value codec
    pub fn codec<D: Codec>(self, codec: D) -> TaggedCacheBuilder<D> {
        TaggedCacheBuilder {
            config: self.config,
            codec,
            sink: self.sink,
            connector: self.connector,
            store: self.store,
            tags: self.tags,
        }
    }

    pub fn error_sink(mut self, sink: Arc<dyn ErrorSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Connect through `connector` at [`connect`](Self::connect) time
    pub fn connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Use an existing store handle; it still has to answer the handshake
    pub fn store(mut self, store: Arc<dyn Store>) -> Self {
        self.store = Some(store);
        self
    }

    /// Custom tag set key prefix
    pub fn tag_index(mut self, tags: TagIndex) -> Self {
        self.tags = tags;
        self
    }

    /// Build the facade, connecting to the backend once
    ///
    /// A failed connect is reported to the error sink. Lenient mode yields a
    /// disabled facade; strict mode returns the error.
    pub async fn connect(self) -> Result<TaggedCache<C>> {
        self.config.validate()?;

        let sink = self.sink.unwrap_or_else(|| Arc::new(TracingSink));
        let stats = StatsRecorder::default();

        let outcome = match (self.store, self.connector) {
            (Some(store), _) => match connection::handshake(store.as_ref(), &self.config).await {
                Ok(()) => Ok(store),
                Err(e) => Err((e, Some(store))),
            },
            (None, Some(connector)) => connection::establish(connector.as_ref(), &self.config)
                .await
                .map_err(|e| (e, None)),
            (None, None) => {
                warn!("Cache '{}' has no backend installed", self.config.name);
                return Ok(TaggedCache {
                    config: self.config,
                    store: None,
                    gate: DegradationGate::disabled(DisableReason::NotInstalled),
                    codec: self.codec,
                    sink,
                    tags: self.tags,
                    stats,
                });
            }
        };

        let (store, gate) = match outcome {
            Ok(store) => (Some(store), DegradationGate::connected()),
            Err((e, store)) => {
                stats.error();
                sink.report(&e, "connect");
                if self.config.is_strict() {
                    return Err(e);
                }
                (store, DegradationGate::disabled(DisableReason::ConnectFailed))
            }
        };

        info!(
            "Cache '{}' ready (enabled: {})",
            self.config.name,
            gate.is_enabled()
        );

        Ok(TaggedCache {
            config: self.config,
            store,
            gate,
            codec: self.codec,
            sink,
            tags: self.tags,
            stats,
        })
    }
}

impl<C: Codec> TaggedCache<C> {
    pub fn is_enabled(&self) -> bool {
        self.gate.is_enabled()
    }

    pub fn is_connected(&self) -> bool {
        self.gate.is_connected()
    }

    /// Host override of the enabled flag; returns the resulting state
    pub fn set_enabled(&self, enabled: bool) -> bool {
        self.gate.set_enabled(enabled)
    }

    pub fn disable_reason(&self) -> Option<DisableReason> {
        self.gate.disable_reason()
    }

    /// Raw store handle, for operations outside the facade vocabulary
    pub fn store(&self) -> Option<Arc<dyn Store>> {
        self.store.clone()
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn tag_index(&self) -> &TagIndex {
        &self.tags
    }

    pub fn stats(&self) -> CacheStats {
        self.stats.snapshot()
    }

    /// Store handle when the gate is open
    fn active_store(&self) -> Option<&dyn Store> {
        if self.gate.is_enabled() {
            self.store.as_deref()
        } else {
            None
        }
    }

    /// Report `err`, then hand back `fallback` (lenient) or the error (strict)
    fn absorb<T>(&self, err: CacheError, context: &str, fallback: T) -> Result<T> {
        self.stats.error();
        self.sink.report(&err, context);
        if self.config.is_strict() {
            Err(err)
        } else {
            Ok(fallback)
        }
    }

    /// Save one value, associating it with every tag
    ///
    /// `ttl` is in seconds, `None` means no expiration. Returns `false` when
    /// disabled or when the write failed.
    pub async fn save<V>(&self, key: &str, value: &V, ttl: Option<u64>, tags: &[&str]) -> Result<bool>
    where
        V: Serialize + ?Sized,
    {
        let Some(store) = self.active_store() else {
            debug!("Cache disabled, skipping save of {}", key);
            return Ok(false);
        };

        match self.write_one(store, key, value, ttl, tags).await {
            Ok(()) => {
                self.stats.write();
                debug!("Saved {} (ttl: {:?}, tags: {:?})", key, ttl, tags);
                Ok(true)
            }
            Err(e) => self.absorb(e, "save", false),
        }
    }

    async fn write_one<V>(
        &self,
        store: &dyn Store,
        key: &str,
        value: &V,
        ttl: Option<u64>,
        tags: &[&str],
    ) -> Result<()>
    where
        V: Serialize + ?Sized,
    {
        if key.is_empty() {
            return Err(CacheError::InvalidArgument("cache key must not be empty".into()));
        }

        let bytes = self.codec.encode(value)?;
        match ttl {
            Some(seconds) => store.set_with_ttl(key, bytes, seconds).await?,
            None => store.set(key, bytes).await?,
        }

        self.tags
            .associate(store, &[key.to_string()], &owned_tags(tags))
            .await
    }

    /// Save several values; every key gets every tag
    ///
    /// Not atomic across keys: a failure part way leaves the earlier writes in
    /// place. Use [`process_transaction`](Self::process_transaction) for
    /// all-or-nothing batches.
    pub async fn save_multiple<K, V, I>(&self, items: I, ttl: Option<u64>, tags: &[&str]) -> Result<bool>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Serialize,
    {
        let Some(store) = self.active_store() else {
            debug!("Cache disabled, skipping save_multiple");
            return Ok(false);
        };

        let mut entries = Vec::new();
        for (key, value) in items {
            let key = key.into();
            match self.codec.encode(&value) {
                Ok(bytes) => entries.push((key, bytes)),
                Err(e) => return self.absorb(e, "save_multiple", false),
            }
        }
        if entries.is_empty() {
            return Ok(true);
        }

        match self.write_many(store, entries, ttl, tags).await {
            Ok(count) => {
                self.stats.write();
                debug!("Saved {} entries (ttl: {:?}, tags: {:?})", count, ttl, tags);
                Ok(true)
            }
            Err(e) => self.absorb(e, "save_multiple", false),
        }
    }

    async fn write_many(
        &self,
        store: &dyn Store,
        entries: Vec<(String, Vec<u8>)>,
        ttl: Option<u64>,
        tags: &[&str],
    ) -> Result<usize> {
        if entries.iter().any(|(key, _)| key.is_empty()) {
            return Err(CacheError::InvalidArgument("cache key must not be empty".into()));
        }

        let keys: Vec<String> = entries.iter().map(|(key, _)| key.clone()).collect();
        match ttl {
            None => store.multi_set(entries).await?,
            Some(seconds) => {
                for (key, bytes) in entries {
                    store.set_with_ttl(&key, bytes, seconds).await?;
                }
            }
        }

        self.tags.associate(store, &keys, &owned_tags(tags)).await?;
        Ok(keys.len())
    }

    /// Look up one value; `None` on a miss or when disabled
    pub async fn load<V: DeserializeOwned>(&self, key: &str) -> Result<Option<V>> {
        self.lookup(key).await
    }

    /// Look up one value, computing it with `on_miss` when absent
    ///
    /// The callback's value is returned as is and not saved. A failing
    /// callback yields `None` in lenient mode.
    pub async fn load_with<'s, V, F, Fut>(&'s self, key: &str, on_miss: F) -> Result<Option<V>>
    where
        V: DeserializeOwned,
        F: FnOnce(&'s Self, String) -> Fut,
        Fut: Future<Output = anyhow::Result<V>> + 's,
    {
        if let Some(value) = self.lookup(key).await? {
            return Ok(Some(value));
        }
        self.recover(key, on_miss(self, key.to_string())).await
    }

    async fn lookup<V: DeserializeOwned>(&self, key: &str) -> Result<Option<V>> {
        let Some(store) = self.active_store() else {
            self.stats.miss();
            return Ok(None);
        };

        let outcome = match store.get(key).await {
            Ok(Some(bytes)) => self.codec.decode::<V>(&bytes).map(Some),
            Ok(None) => Ok(None),
            Err(e) => Err(e),
        };

        match outcome {
            Ok(Some(value)) => {
                self.stats.hit();
                debug!("Cache hit: {}", key);
                Ok(Some(value))
            }
            Ok(None) => {
                self.stats.miss();
                debug!("Cache miss: {}", key);
                Ok(None)
            }
            Err(e) => {
                self.stats.miss();
                self.absorb(e, "load", None)
            }
        }
    }

    async fn recover<V, Fut>(&self, key: &str, pending: Fut) -> Result<Option<V>>
    where
        Fut: Future<Output = anyhow::Result<V>>,
    {
        match recovery::recover(&self.stats, key, pending).await {
            Ok(value) => Ok(Some(value)),
            Err(e) => self.absorb(e, "load", None),
        }
    }

    /// Look up several values, aligned to the input order
    pub async fn load_multiple<V: DeserializeOwned>(&self, keys: impl Into<Keys>) -> Result<Vec<Option<V>>> {
        let keys = keys.into().into_vec();
        self.lookup_many(&keys).await
    }

    /// Like [`load_multiple`](Self::load_multiple), calling `on_miss` once per
    /// missing key in input order
    ///
    /// In lenient mode a failing callback only blanks its own key.
    pub async fn load_multiple_with<'s, V, F, Fut>(
        &'s self,
        keys: impl Into<Keys>,
        mut on_miss: F,
    ) -> Result<Vec<Option<V>>>
    where
        V: DeserializeOwned,
        F: FnMut(&'s Self, String) -> Fut,
        Fut: Future<Output = anyhow::Result<V>> + 's,
    {
        let keys = keys.into().into_vec();
        let found = self.lookup_many::<V>(&keys).await?;

        let mut results = Vec::with_capacity(keys.len());
        for (key, value) in keys.into_iter().zip(found) {
            match value {
                Some(value) => results.push(Some(value)),
                None => {
                    let recovered = self.recover(&key, on_miss(self, key.clone())).await?;
                    results.push(recovered);
                }
            }
        }
        Ok(results)
    }

    async fn lookup_many<V: DeserializeOwned>(&self, keys: &[String]) -> Result<Vec<Option<V>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let Some(store) = self.active_store() else {
            keys.iter().for_each(|_| self.stats.miss());
            return Ok(absent(keys.len()));
        };

        let raw = match store.multi_get(keys).await {
            Ok(raw) if raw.len() == keys.len() => raw,
            Ok(raw) => {
                let e = CacheError::Operation(format!(
                    "multi_get returned {} values for {} keys",
                    raw.len(),
                    keys.len()
                ));
                keys.iter().for_each(|_| self.stats.miss());
                return self.absorb(e, "load_multiple", absent(keys.len()));
            }
            Err(e) => {
                keys.iter().for_each(|_| self.stats.miss());
                return self.absorb(e, "load_multiple", absent(keys.len()));
            }
        };

        let mut values = Vec::with_capacity(keys.len());
        for (key, bytes) in keys.iter().zip(raw) {
            let Some(bytes) = bytes else {
                self.stats.miss();
                values.push(None);
                continue;
            };
            match self.codec.decode::<V>(&bytes) {
                Ok(value) => {
                    self.stats.hit();
                    values.push(Some(value));
                }
                Err(e) => {
                    self.stats.miss();
                    debug!("Undecodable value under {}", key);
                    values.push(self.absorb(e, "load_multiple", None)?);
                }
            }
        }

        debug!(
            "Loaded {} keys, {} found",
            keys.len(),
            values.iter().filter(|v| v.is_some()).count()
        );
        Ok(values)
    }

    /// Delete one entry; `true` iff exactly one entry was removed
    ///
    /// Tag memberships of the key are left in place.
    pub async fn delete(&self, key: &str) -> Result<bool> {
        let Some(store) = self.active_store() else {
            return Ok(false);
        };

        match store.delete(&[key.to_string()]).await {
            Ok(count) => {
                self.stats.deleted(count);
                debug!("Deleted {}: {}", key, count == 1);
                Ok(count == 1)
            }
            Err(e) => self.absorb(e, "delete", false),
        }
    }

    /// Delete entries and remove the (key, tag) memberships listed in `key_tags`
    ///
    /// Returns the number of entries removed. Memberships not listed in
    /// `key_tags` stay in their tag sets until a `delete_by_tags` on that tag.
    pub async fn delete_multiple(&self, keys: impl Into<Keys>, key_tags: &KeyTags) -> Result<u64> {
        let Some(store) = self.active_store() else {
            return Ok(0);
        };

        let keys = keys.into().into_vec();
        match self.remove_many(store, &keys, key_tags).await {
            Ok(count) => {
                self.stats.deleted(count);
                Ok(count)
            }
            Err(e) => self.absorb(e, "delete_multiple", 0),
        }
    }

    async fn remove_many(&self, store: &dyn Store, keys: &[String], key_tags: &KeyTags) -> Result<u64> {
        let deleted = if keys.is_empty() {
            0
        } else {
            store.delete(keys).await?
        };

        let unlinked = self.tags.disassociate(store, key_tags).await?;
        debug!(
            "Deleted {} of {} keys, removed {} tag memberships",
            deleted,
            keys.len(),
            unlinked
        );
        Ok(deleted)
    }

    /// Delete every key tagged with any of `tags`, plus the tag sets
    ///
    /// Returns the number of tagged entries removed. Keys tagged while this
    /// call runs may survive it.
    pub async fn delete_by_tags(&self, tags: impl Into<Keys>) -> Result<u64> {
        let Some(store) = self.active_store() else {
            return Ok(0);
        };

        let tags: Vec<Tag> = tags.into().into_vec();
        match self.tags.delete_by_tags(store, &tags).await {
            Ok(count) => {
                self.stats.deleted(count);
                Ok(count)
            }
            Err(e) => self.absorb(e, "delete_by_tags", 0),
        }
    }

    pub async fn has(&self, key: &str) -> Result<bool> {
        let Some(store) = self.active_store() else {
            return Ok(false);
        };

        match store.exists(&[key.to_string()]).await {
            Ok(count) => Ok(count > 0),
            Err(e) => self.absorb(e, "has", false),
        }
    }

    /// Count how many of `keys` exist; duplicated keys count each time
    pub async fn has_multiple(&self, keys: impl Into<Keys>) -> Result<u64> {
        let Some(store) = self.active_store() else {
            return Ok(0);
        };

        let keys = keys.into().into_vec();
        if keys.is_empty() {
            return Ok(0);
        }
        match store.exists(&keys).await {
            Ok(count) => Ok(count),
            Err(e) => self.absorb(e, "has_multiple", 0),
        }
    }

    /// Remove every entry of the namespace, tag sets included
    pub async fn clear(&self) -> Result<bool> {
        let Some(store) = self.active_store() else {
            return Ok(false);
        };

        match store.flush_namespace().await {
            Ok(flushed) => {
                info!("Cleared cache '{}'", self.config.name);
                Ok(flushed)
            }
            Err(e) => self.absorb(e, "clear", false),
        }
    }

    /// Apply raw store ops atomically, returning one reply per op
    ///
    /// No tag bookkeeping is added; include the tag set ops yourself, e.g.
    /// from [`TagIndex::association_ops`].
    pub async fn process_transaction(&self, ops: Vec<StoreOp>) -> Result<Vec<Reply>> {
        let Some(store) = self.active_store() else {
            return Ok(Vec::new());
        };
        if ops.is_empty() {
            return Ok(Vec::new());
        }

        let names: Vec<&'static str> = ops.iter().map(StoreOp::name).collect();
        match store.exec(ops).await {
            Ok(replies) => {
                debug!("Committed transaction {:?}", names);
                Ok(replies)
            }
            Err(e) => self.absorb(e, "process_transaction", Vec::new()),
        }
    }

    /// Ping the backend; never changes the enabled state
    pub async fn health_check(&self) -> HealthCheckResult {
        connection::check_health(self.store.as_deref(), self.is_enabled(), &self.config).await
    }
}

fn owned_tags(tags: &[&str]) -> Vec<Tag> {
    tags.iter().map(|tag| tag.to_string()).collect()
}

fn absent<V>(len: usize) -> Vec<Option<V>> {
    (0..len).map(|_| None).collect()
}
