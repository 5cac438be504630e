//! In-process store backend
//!
//! `MemoryStore` behaves like one Redis database: byte values and member sets
//! share a keyspace, keys expire lazily against a [`Clock`], and `exec` is
//! all-or-nothing. It backs the tests and demos, and any host that wants the
//! facade without a network backend.

use crate::cache::config::CacheConfig;
use crate::connection::Connector;
use crate::error::{CacheError, Result};
use crate::store::{Reply, Store, StoreOp};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

/// Longest TTL honoured; larger values are clamped (about 100 years)
const MAX_TTL_SECONDS: u64 = 100 * 365 * 24 * 3600;

/// Time source for expiry decisions
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually advanced clock for expiry tests
#[derive(Debug)]
pub struct ManualClock {
    base: DateTime<Utc>,
    offset_ms: AtomicI64,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::starting_at(Utc::now())
    }

    pub fn starting_at(base: DateTime<Utc>) -> Self {
        Self {
            base,
            offset_ms: AtomicI64::new(0),
        }
    }

    /// Move the clock forward
    pub fn advance(&self, by: std::time::Duration) {
        let ms = i64::try_from(by.as_millis()).unwrap_or(i64::MAX);
        self.offset_ms.fetch_add(ms, Ordering::SeqCst);
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        self.base + chrono::Duration::milliseconds(self.offset_ms.load(Ordering::SeqCst))
    }
}

#[derive(Debug, Clone)]
enum SlotData {
    Bytes(Vec<u8>),
    Members(BTreeSet<String>),
}

#[derive(Debug, Clone)]
struct Slot {
    data: SlotData,
    expires_at: Option<DateTime<Utc>>,
}

impl Slot {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(false, |at| at <= now)
    }
}

fn wrong_type(key: &str) -> CacheError {
    CacheError::Operation(format!(
        "WRONGTYPE operation against key '{}' holding the wrong kind of value",
        key
    ))
}

fn expiry(now: DateTime<Utc>, seconds: u64) -> Option<DateTime<Utc>> {
    let secs = seconds.min(MAX_TTL_SECONDS) as i64;
    now.checked_add_signed(chrono::Duration::seconds(secs))
}

/// Prior state of the keys one transaction op overwrites
#[derive(Debug)]
enum Undo {
    Keys(Vec<(String, Option<Slot>)>),
    All(HashMap<String, Slot>),
}

/// Keyspace of one namespace
#[derive(Debug, Default)]
struct Keyspace {
    entries: HashMap<String, Slot>,
}

impl Keyspace {
    fn purge(&mut self, key: &str, now: DateTime<Utc>) {
        if self.entries.get(key).map_or(false, |slot| slot.is_expired(now)) {
            self.entries.remove(key);
        }
    }

    fn live(&mut self, key: &str, now: DateTime<Utc>) -> Option<&mut Slot> {
        self.purge(key, now);
        self.entries.get_mut(key)
    }

    fn get(&mut self, key: &str, now: DateTime<Utc>) -> Result<Option<Vec<u8>>> {
        match self.live(key, now) {
            None => Ok(None),
            Some(Slot {
                data: SlotData::Bytes(bytes),
                ..
            }) => Ok(Some(bytes.clone())),
            Some(_) => Err(wrong_type(key)),
        }
    }

    fn multi_get(&mut self, keys: &[String], now: DateTime<Utc>) -> Vec<Option<Vec<u8>>> {
        // MGET reports non-string keys as absent rather than failing
        keys.iter()
            .map(|key| self.get(key, now).ok().flatten())
            .collect()
    }

    fn set(&mut self, key: &str, value: Vec<u8>, expires_at: Option<DateTime<Utc>>) {
        self.entries.insert(
            key.to_string(),
            Slot {
                data: SlotData::Bytes(value),
                expires_at,
            },
        );
    }

    fn delete(&mut self, keys: &[String], now: DateTime<Utc>) -> u64 {
        let mut removed = 0;
        for key in keys {
            self.purge(key, now);
            if self.entries.remove(key).is_some() {
                removed += 1;
            }
        }
        removed
    }

    fn exists(&mut self, keys: &[String], now: DateTime<Utc>) -> u64 {
        keys.iter()
            .filter(|key| self.live(key, now).is_some())
            .count() as u64
    }

    fn set_add(&mut self, set_key: &str, members: &[String], now: DateTime<Utc>) -> Result<u64> {
        self.purge(set_key, now);
        if members.is_empty() {
            return match self.entries.get(set_key) {
                Some(Slot {
                    data: SlotData::Bytes(_),
                    ..
                }) => Err(wrong_type(set_key)),
                _ => Ok(0),
            };
        }
        let slot = self
            .entries
            .entry(set_key.to_string())
            .or_insert_with(|| Slot {
                data: SlotData::Members(BTreeSet::new()),
                expires_at: None,
            });
        match &mut slot.data {
            SlotData::Members(set) => Ok(members
                .iter()
                .filter(|member| set.insert((*member).clone()))
                .count() as u64),
            SlotData::Bytes(_) => Err(wrong_type(set_key)),
        }
    }

    fn set_remove(&mut self, set_key: &str, members: &[String], now: DateTime<Utc>) -> Result<u64> {
        let (removed, emptied) = match self.live(set_key, now) {
            None => return Ok(0),
            Some(Slot {
                data: SlotData::Members(set),
                ..
            }) => {
                let removed = members.iter().filter(|member| set.remove(*member)).count();
                (removed as u64, set.is_empty())
            }
            Some(_) => return Err(wrong_type(set_key)),
        };
        if emptied {
            self.entries.remove(set_key);
        }
        Ok(removed)
    }

    fn set_members(&mut self, set_key: &str, now: DateTime<Utc>) -> Result<BTreeSet<String>> {
        match self.live(set_key, now) {
            None => Ok(BTreeSet::new()),
            Some(Slot {
                data: SlotData::Members(set),
                ..
            }) => Ok(set.clone()),
            Some(_) => Err(wrong_type(set_key)),
        }
    }

    /// Snapshot of what `op` may overwrite, `None` for read-only ops
    fn undo_step(&self, op: &StoreOp) -> Option<Undo> {
        let keys: Vec<&String> = match op {
            StoreOp::Get { .. }
            | StoreOp::MultiGet { .. }
            | StoreOp::Exists { .. }
            | StoreOp::SetMembers { .. } => return None,
            StoreOp::FlushNamespace => return Some(Undo::All(self.entries.clone())),
            StoreOp::Set { key, .. } | StoreOp::SetWithTtl { key, .. } => vec![key],
            StoreOp::MultiSet { entries } => entries.iter().map(|(key, _)| key).collect(),
            StoreOp::Delete { keys } => keys.iter().collect(),
            StoreOp::SetAdd { set_key, .. } | StoreOp::SetRemove { set_key, .. } => vec![set_key],
        };
        Some(Undo::Keys(
            keys.into_iter()
                .map(|key| (key.clone(), self.entries.get(key).cloned()))
                .collect(),
        ))
    }

    /// Restore the snapshots in reverse order of recording
    fn rollback(&mut self, undo: Vec<Undo>) {
        for step in undo.into_iter().rev() {
            match step {
                Undo::All(entries) => self.entries = entries,
                Undo::Keys(previous) => {
                    for (key, slot) in previous.into_iter().rev() {
                        match slot {
                            Some(slot) => self.entries.insert(key, slot),
                            None => self.entries.remove(&key),
                        };
                    }
                }
            }
        }
    }

    fn apply(&mut self, op: StoreOp, now: DateTime<Utc>) -> Result<Reply> {
        let reply = match op {
            StoreOp::Get { key } => Reply::Value(self.get(&key, now)?),
            StoreOp::MultiGet { keys } => Reply::Values(self.multi_get(&keys, now)),
            StoreOp::Set { key, value } => {
                self.set(&key, value, None);
                Reply::Ok
            }
            StoreOp::SetWithTtl {
                key,
                value,
                seconds,
            } => {
                self.set(&key, value, expiry(now, seconds));
                Reply::Ok
            }
            StoreOp::MultiSet { entries } => {
                for (key, value) in entries {
                    self.set(&key, value, None);
                }
                Reply::Ok
            }
            StoreOp::Delete { keys } => Reply::Count(self.delete(&keys, now)),
            StoreOp::Exists { keys } => Reply::Count(self.exists(&keys, now)),
            StoreOp::SetAdd { set_key, members } => {
                Reply::Count(self.set_add(&set_key, &members, now)?)
            }
            StoreOp::SetRemove { set_key, members } => {
                Reply::Count(self.set_remove(&set_key, &members, now)?)
            }
            StoreOp::SetMembers { set_key } => Reply::Members(self.set_members(&set_key, now)?),
            StoreOp::FlushNamespace => {
                self.entries.clear();
                Reply::Bool(true)
            }
        };
        Ok(reply)
    }
}

/// In-memory store for a single namespace
pub struct MemoryStore {
    namespace: String,
    keyspace: RwLock<Keyspace>,
    clock: Arc<dyn Clock>,
    available: AtomicBool,
}

impl MemoryStore {
    /// Create a store on the wall clock
    pub fn new(namespace: impl Into<String>) -> Self {
        Self::with_clock(namespace, Arc::new(SystemClock))
    }

    /// Create a store with a custom time source
    pub fn with_clock(namespace: impl Into<String>, clock: Arc<dyn Clock>) -> Self {
        Self {
            namespace: namespace.into(),
            keyspace: RwLock::new(Keyspace::default()),
            clock,
            available: AtomicBool::new(true),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Simulate the backend going down (`false`) or coming back (`true`)
    pub fn set_available(&self, available: bool) {
        info!(
            "Memory store '{}' is now {}",
            self.namespace,
            if available { "available" } else { "unavailable" }
        );
        self.available.store(available, Ordering::SeqCst);
    }

    /// Number of live keys, tag sets included
    pub async fn len(&self) -> usize {
        let now = self.clock.now();
        let keyspace = self.keyspace.read().await;
        keyspace
            .entries
            .values()
            .filter(|slot| !slot.is_expired(now))
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    fn ensure_available(&self) -> Result<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(CacheError::Operation(format!(
                "connection refused: store '{}' is unreachable",
                self.namespace
            )))
        }
    }
}

#[async_trait]
impl Store for MemoryStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn ping(&self) -> Result<()> {
        self.ensure_available()
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.ensure_available()?;
        let now = self.clock.now();
        self.keyspace.write().await.get(key, now)
    }

    async fn multi_get(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>> {
        self.ensure_available()?;
        let now = self.clock.now();
        Ok(self.keyspace.write().await.multi_get(keys, now))
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<()> {
        self.ensure_available()?;
        self.keyspace.write().await.set(key, value, None);
        Ok(())
    }

    async fn set_with_ttl(&self, key: &str, value: Vec<u8>, seconds: u64) -> Result<()> {
        self.ensure_available()?;
        let expires_at = expiry(self.clock.now(), seconds);
        self.keyspace.write().await.set(key, value, expires_at);
        Ok(())
    }

    async fn multi_set(&self, entries: Vec<(String, Vec<u8>)>) -> Result<()> {
        self.ensure_available()?;
        let mut keyspace = self.keyspace.write().await;
        for (key, value) in entries {
            keyspace.set(&key, value, None);
        }
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> Result<u64> {
        self.ensure_available()?;
        let now = self.clock.now();
        Ok(self.keyspace.write().await.delete(keys, now))
    }

    async fn exists(&self, keys: &[String]) -> Result<u64> {
        self.ensure_available()?;
        let now = self.clock.now();
        Ok(self.keyspace.write().await.exists(keys, now))
    }

    async fn set_add(&self, set_key: &str, members: &[String]) -> Result<u64> {
        self.ensure_available()?;
        let now = self.clock.now();
        self.keyspace.write().await.set_add(set_key, members, now)
    }

    async fn set_remove(&self, set_key: &str, members: &[String]) -> Result<u64> {
        self.ensure_available()?;
        let now = self.clock.now();
        self.keyspace.write().await.set_remove(set_key, members, now)
    }

    async fn set_members(&self, set_key: &str) -> Result<BTreeSet<String>> {
        self.ensure_available()?;
        let now = self.clock.now();
        self.keyspace.write().await.set_members(set_key, now)
    }

    async fn flush_namespace(&self) -> Result<bool> {
        self.ensure_available()?;
        let mut keyspace = self.keyspace.write().await;
        let count = keyspace.entries.len();
        keyspace.entries.clear();
        info!("Flushed {} keys from namespace '{}'", count, self.namespace);
        Ok(true)
    }

    async fn exec(&self, ops: Vec<StoreOp>) -> Result<Vec<Reply>> {
        self.ensure_available()?;
        let now = self.clock.now();
        let mut keyspace = self.keyspace.write().await;

        // Applied in place; a failing op rolls back the ones before it
        let mut undo = Vec::new();
        let mut replies = Vec::with_capacity(ops.len());
        for op in ops {
            let name = op.name();
            if let Some(step) = keyspace.undo_step(&op) {
                undo.push(step);
            }
            match keyspace.apply(op, now) {
                Ok(reply) => replies.push(reply),
                Err(e) => {
                    debug!("Transaction aborted at '{}': {}", name, e);
                    keyspace.rollback(undo);
                    return Err(e);
                }
            }
        }

        debug!("Committed transaction with {} ops", replies.len());
        Ok(replies)
    }
}

/// Connector handing out one shared [`MemoryStore`] per database name
pub struct MemoryConnector {
    databases: Mutex<HashMap<String, Arc<MemoryStore>>>,
    clock: Arc<dyn Clock>,
    refusing: AtomicBool,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Stores created by this connector use `clock`
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            databases: Mutex::new(HashMap::new()),
            clock,
            refusing: AtomicBool::new(false),
        }
    }

    /// Make subsequent connect attempts fail
    pub fn set_refusing(&self, refusing: bool) {
        self.refusing.store(refusing, Ordering::SeqCst);
    }

    /// Store backing `database`, created on first use
    pub async fn database(&self, database: &str) -> Arc<MemoryStore> {
        let mut databases = self.databases.lock().await;
        databases
            .entry(database.to_string())
            .or_insert_with(|| Arc::new(MemoryStore::with_clock(database, self.clock.clone())))
            .clone()
    }
}

impl Default for MemoryConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, config: &CacheConfig) -> Result<Arc<dyn Store>> {
        if self.refusing.load(Ordering::SeqCst) {
            return Err(CacheError::ConnectFailure(format!(
                "{}:{} refused the connection",
                config.host, config.port
            )));
        }
        let store: Arc<dyn Store> = self.database(&config.database).await;
        Ok(store)
    }
}
