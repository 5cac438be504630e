//! # Store Capability
//!
//! The key-value backend the cache facade is layered on. The facade never
//! speaks a wire protocol itself; it drives any type implementing [`Store`].
//!
//! Byte values and member sets share one keyspace, as they do in Redis. Tag
//! sets are ordinary set keys.
//!
//! ## Transactions
//!
//! [`Store::exec`] applies an ordered batch of [`StoreOp`]s atomically. The
//! [`Transaction`] handle returned by [`Store::begin_transaction`] offers the
//! same verbs as the store itself and collects them until `commit`.
//!
//! ```rust
//! use ouroboros_cache::store::{MemoryStore, Reply, Store};
//!
//! # async fn example() -> ouroboros_cache::Result<()> {
//! let store = MemoryStore::new("app");
//!
//! let mut tx = store.begin_transaction();
//! tx.set("user:1", b"alice".to_vec())
//!     .set_add("tag:users", vec!["user:1".to_string()])
//!     .exists(vec!["user:1".to_string()]);
//! let replies = tx.commit().await?;
//!
//! assert_eq!(replies[2], Reply::Count(1));
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod memory;

pub use codec::{Codec, JsonCodec};
pub use memory::{Clock, ManualClock, MemoryConnector, MemoryStore, SystemClock};

use crate::error::Result;
use async_trait::async_trait;
use std::collections::BTreeSet;

/// A single store verb with its arguments, used inside transactions
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOp {
    Get { key: String },
    MultiGet { keys: Vec<String> },
    Set { key: String, value: Vec<u8> },
    SetWithTtl { key: String, value: Vec<u8>, seconds: u64 },
    MultiSet { entries: Vec<(String, Vec<u8>)> },
    Delete { keys: Vec<String> },
    Exists { keys: Vec<String> },
    SetAdd { set_key: String, members: Vec<String> },
    SetRemove { set_key: String, members: Vec<String> },
    SetMembers { set_key: String },
    FlushNamespace,
}

impl StoreOp {
    /// Verb name, used in logs
    pub fn name(&self) -> &'static str {
        match self {
            StoreOp::Get { .. } => "get",
            StoreOp::MultiGet { .. } => "multi_get",
            StoreOp::Set { .. } => "set",
            StoreOp::SetWithTtl { .. } => "set_with_ttl",
            StoreOp::MultiSet { .. } => "multi_set",
            StoreOp::Delete { .. } => "delete",
            StoreOp::Exists { .. } => "exists",
            StoreOp::SetAdd { .. } => "set_add",
            StoreOp::SetRemove { .. } => "set_remove",
            StoreOp::SetMembers { .. } => "set_members",
            StoreOp::FlushNamespace => "flush_namespace",
        }
    }
}

/// Result of one [`StoreOp`] inside a committed transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Write acknowledged
    Ok,
    /// Single value lookup
    Value(Option<Vec<u8>>),
    /// Multi-value lookup aligned to the requested keys
    Values(Vec<Option<Vec<u8>>>),
    /// Counting verbs (delete, exists, set_add, set_remove)
    Count(u64),
    /// Set membership
    Members(BTreeSet<String>),
    /// Flush outcome
    Bool(bool),
}

/// Key-value backend capability
///
/// Implementations must be safe to share across tasks. The facade adds no
/// locking of its own around a store handle.
#[async_trait]
pub trait Store: Send + Sync {
    /// Backend name for logs
    fn name(&self) -> &'static str;

    /// Connection handshake and liveness check
    async fn ping(&self) -> Result<()>;

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Values aligned to `keys`, `None` for absent keys
    async fn multi_get(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>>;

    /// Store a value without expiration, clearing any previous TTL
    async fn set(&self, key: &str, value: Vec<u8>) -> Result<()>;

    /// Store a value that expires after `seconds`
    async fn set_with_ttl(&self, key: &str, value: Vec<u8>, seconds: u64) -> Result<()>;

    async fn multi_set(&self, entries: Vec<(String, Vec<u8>)>) -> Result<()>;

    /// Remove keys, returning how many existed
    async fn delete(&self, keys: &[String]) -> Result<u64>;

    /// Count how many of `keys` exist (duplicates count repeatedly)
    async fn exists(&self, keys: &[String]) -> Result<u64>;

    /// Add members to a set, returning how many were new
    async fn set_add(&self, set_key: &str, members: &[String]) -> Result<u64>;

    /// Remove members from a set, returning how many were present
    async fn set_remove(&self, set_key: &str, members: &[String]) -> Result<u64>;

    async fn set_members(&self, set_key: &str) -> Result<BTreeSet<String>>;

    /// Remove every key of this store's namespace
    async fn flush_namespace(&self) -> Result<bool>;

    /// Apply `ops` atomically, returning one reply per op in order
    async fn exec(&self, ops: Vec<StoreOp>) -> Result<Vec<Reply>>;

    /// Open a transaction collecting ops until [`Transaction::commit`]
    fn begin_transaction(&self) -> Transaction<'_>
    where
        Self: Sized,
    {
        Transaction::new(self)
    }
}

/// Transaction handle collecting ops for one atomic [`Store::exec`]
pub struct Transaction<'s> {
    store: &'s dyn Store,
    ops: Vec<StoreOp>,
}

impl<'s> Transaction<'s> {
    /// Open a transaction on any store handle, including trait objects
    pub fn new(store: &'s dyn Store) -> Self {
        Self {
            store,
            ops: Vec::new(),
        }
    }

    pub fn push(&mut self, op: StoreOp) -> &mut Self {
        self.ops.push(op);
        self
    }

    pub fn get(&mut self, key: impl Into<String>) -> &mut Self {
        self.push(StoreOp::Get { key: key.into() })
    }

    pub fn multi_get(&mut self, keys: Vec<String>) -> &mut Self {
        self.push(StoreOp::MultiGet { keys })
    }

    pub fn set(&mut self, key: impl Into<String>, value: Vec<u8>) -> &mut Self {
        self.push(StoreOp::Set {
            key: key.into(),
            value,
        })
    }

    pub fn set_with_ttl(&mut self, key: impl Into<String>, value: Vec<u8>, seconds: u64) -> &mut Self {
        self.push(StoreOp::SetWithTtl {
            key: key.into(),
            value,
            seconds,
        })
    }

    pub fn multi_set(&mut self, entries: Vec<(String, Vec<u8>)>) -> &mut Self {
        self.push(StoreOp::MultiSet { entries })
    }

    pub fn delete(&mut self, keys: Vec<String>) -> &mut Self {
        self.push(StoreOp::Delete { keys })
    }

    pub fn exists(&mut self, keys: Vec<String>) -> &mut Self {
        self.push(StoreOp::Exists { keys })
    }

    pub fn set_add(&mut self, set_key: impl Into<String>, members: Vec<String>) -> &mut Self {
        self.push(StoreOp::SetAdd {
            set_key: set_key.into(),
            members,
        })
    }

    pub fn set_remove(&mut self, set_key: impl Into<String>, members: Vec<String>) -> &mut Self {
        self.push(StoreOp::SetRemove {
            set_key: set_key.into(),
            members,
        })
    }

    pub fn set_members(&mut self, set_key: impl Into<String>) -> &mut Self {
        self.push(StoreOp::SetMembers {
            set_key: set_key.into(),
        })
    }

    pub fn flush_namespace(&mut self) -> &mut Self {
        self.push(StoreOp::FlushNamespace)
    }

    /// Number of queued ops
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Apply all queued ops atomically
    pub async fn commit(self) -> Result<Vec<Reply>> {
        self.store.exec(self.ops).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_op_names() {
        assert_eq!(StoreOp::FlushNamespace.name(), "flush_namespace");
        assert_eq!(
            StoreOp::SetAdd {
                set_key: "tag:a".into(),
                members: vec![]
            }
            .name(),
            "set_add"
        );
    }

    #[tokio::test]
    async fn test_transaction_collects_ops_in_order() {
        let store = MemoryStore::new("tx");
        let mut tx = store.begin_transaction();
        tx.set("a", b"1".to_vec())
            .get("a")
            .delete(vec!["a".to_string()])
            .get("a");
        assert_eq!(tx.len(), 4);

        let replies = tx.commit().await.unwrap();
        assert_eq!(
            replies,
            vec![
                Reply::Ok,
                Reply::Value(Some(b"1".to_vec())),
                Reply::Count(1),
                Reply::Value(None),
            ]
        );
    }

    #[tokio::test]
    async fn test_transaction_on_trait_object() {
        let store: std::sync::Arc<dyn Store> = std::sync::Arc::new(MemoryStore::new("tx"));
        let mut tx = Transaction::new(store.as_ref());
        tx.set_add("tag:t", vec!["k".to_string()]).set_members("tag:t");
        let replies = tx.commit().await.unwrap();
        assert_eq!(replies[0], Reply::Count(1));
        assert_eq!(
            replies[1],
            Reply::Members(["k".to_string()].into_iter().collect())
        );
    }
}
