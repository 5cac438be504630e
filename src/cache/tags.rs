//! Tag index for bulk invalidation
//!
//! Each tag is backed by one set key in the store (its *tag set*) listing the
//! cache keys saved with that tag. There is no reverse index from key to tags:
//! removing a key's memberships needs the caller's own record of the tags it
//! saved the key with. Memberships that are never removed stay until a
//! `delete_by_tags` on that tag sweeps them, together with the tag set itself.
//!
//! Reading a tag set and deleting its members are two round-trips. A key
//! tagged between the two is not removed by that sweep; invalidation is
//! eventual, not linearizable.

use crate::cache::types::{CacheKey, KeyTags, Tag};
use crate::error::Result;
use crate::store::{Reply, Store, StoreOp};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use tracing::{debug, info};

/// Default prefix of tag set keys
pub const TAG_PREFIX: &str = "tag:";

/// Maintains and queries the tag → keys sets
#[derive(Debug, Clone)]
pub struct TagIndex {
    prefix: String,
}

impl Default for TagIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl TagIndex {
    pub fn new() -> Self {
        Self::with_prefix(TAG_PREFIX)
    }

    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Store key of the set backing `tag`
    pub fn set_key(&self, tag: &str) -> String {
        format!("{}{}", self.prefix, tag)
    }

    /// Add every key to every tag's set, one `set_add` per tag
    pub async fn associate(&self, store: &dyn Store, keys: &[CacheKey], tags: &[Tag]) -> Result<()> {
        if keys.is_empty() {
            return Ok(());
        }
        for tag in tags {
            let added = store.set_add(&self.set_key(tag), keys).await?;
            debug!("Tagged {} key(s) with '{}' ({} new)", keys.len(), tag, added);
        }
        Ok(())
    }

    /// Ops equivalent to [`TagIndex::associate`], for callers building a transaction
    pub fn association_ops(&self, keys: &[CacheKey], tags: &[Tag]) -> Vec<StoreOp> {
        if keys.is_empty() {
            return Vec::new();
        }
        tags.iter()
            .map(|tag| StoreOp::SetAdd {
                set_key: self.set_key(tag),
                members: keys.to_vec(),
            })
            .collect()
    }

    /// Full membership of each tag, in input order
    pub async fn resolve_members(
        &self,
        store: &dyn Store,
        tags: &[Tag],
    ) -> Result<Vec<(Tag, BTreeSet<CacheKey>)>> {
        let mut resolved = Vec::with_capacity(tags.len());
        for tag in tags {
            let members = store.set_members(&self.set_key(tag)).await?;
            resolved.push((tag.clone(), members));
        }
        Ok(resolved)
    }

    /// Deduplicated union of the tag set keys and all their members
    pub fn invalidation_targets(&self, resolved: &[(Tag, BTreeSet<CacheKey>)]) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut targets = Vec::new();
        for (tag, members) in resolved {
            for key in std::iter::once(self.set_key(tag)).chain(members.iter().cloned()) {
                if seen.insert(key.clone()) {
                    targets.push(key);
                }
            }
        }
        targets
    }

    /// Remove the listed (key, tag) memberships, grouped into one `set_remove` per tag
    ///
    /// Returns how many memberships the store actually removed.
    pub async fn disassociate(&self, store: &dyn Store, key_tags: &KeyTags) -> Result<u64> {
        let mut per_set: BTreeMap<String, Vec<CacheKey>> = BTreeMap::new();
        for (key, tags) in key_tags {
            for tag in tags {
                per_set.entry(self.set_key(tag)).or_default().push(key.clone());
            }
        }

        let mut removed = 0;
        for (set_key, keys) in per_set {
            removed += store.set_remove(&set_key, &keys).await?;
        }
        Ok(removed)
    }

    /// Delete every key listed under any of `tags`, plus the tag sets themselves
    ///
    /// The union is removed in one atomic batch: one delete for the tagged
    /// keys, one for the tag sets. Returns how many tagged keys the store
    /// actually deleted, which is lower than the membership size when some
    /// had already expired or been deleted. Tag sets are not counted.
    pub async fn delete_by_tags(&self, store: &dyn Store, tags: &[Tag]) -> Result<u64> {
        if tags.is_empty() {
            return Ok(0);
        }

        let resolved = self.resolve_members(store, tags).await?;
        let set_keys: HashSet<String> = tags.iter().map(|tag| self.set_key(tag)).collect();
        let (sets, members): (Vec<String>, Vec<String>) = self
            .invalidation_targets(&resolved)
            .into_iter()
            .partition(|key| set_keys.contains(key));
        let targets = members.len();

        let replies = store
            .exec(vec![
                StoreOp::Delete { keys: members },
                StoreOp::Delete { keys: sets },
            ])
            .await?;
        let deleted = match replies.first() {
            Some(Reply::Count(count)) => *count,
            _ => 0,
        };

        info!(
            "Invalidated tags {:?}: {} of {} tagged key(s) deleted",
            tags, deleted, targets
        );
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_set_key() {
        assert_eq!(TagIndex::new().set_key("users"), "tag:users");
        assert_eq!(TagIndex::with_prefix("t/").set_key("users"), "t/users");
    }

    #[test]
    fn test_invalidation_targets_dedupe() {
        let index = TagIndex::new();
        let resolved = vec![
            ("a".to_string(), strings(&["k1", "k2"]).into_iter().collect()),
            ("b".to_string(), strings(&["k2", "k3"]).into_iter().collect()),
        ];

        let targets = index.invalidation_targets(&resolved);
        assert_eq!(targets, strings(&["tag:a", "k1", "k2", "tag:b", "k3"]));
    }

    #[test]
    fn test_association_ops() {
        let index = TagIndex::new();
        let ops = index.association_ops(&strings(&["k"]), &strings(&["a", "b"]));
        assert_eq!(ops.len(), 2);
        assert!(index.association_ops(&[], &strings(&["a"])).is_empty());
    }

    #[tokio::test]
    async fn test_associate_and_resolve() {
        let store = MemoryStore::new("tags");
        let index = TagIndex::new();

        index
            .associate(&store, &strings(&["k1", "k2"]), &strings(&["a", "b"]))
            .await
            .unwrap();

        let resolved = index.resolve_members(&store, &strings(&["b", "none"])).await.unwrap();
        assert_eq!(resolved[0].0, "b");
        assert_eq!(resolved[0].1.len(), 2);
        assert!(resolved[1].1.is_empty());
    }

    #[tokio::test]
    async fn test_disassociate_groups_per_tag() {
        let store = MemoryStore::new("tags");
        let index = TagIndex::new();
        index
            .associate(&store, &strings(&["k1", "k2"]), &strings(&["a"]))
            .await
            .unwrap();

        let mut key_tags = KeyTags::new();
        key_tags.insert("k1".to_string(), strings(&["a", "never-used"]));
        key_tags.insert("k2".to_string(), strings(&["a"]));

        assert_eq!(index.disassociate(&store, &key_tags).await.unwrap(), 2);
        assert!(store.set_members("tag:a").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_by_tags_counts_only_existing() {
        let store = MemoryStore::new("tags");
        let index = TagIndex::new();
        store.set("k1", b"1".to_vec()).await.unwrap();
        // k2 is listed in the tag set but was never written (stale membership)
        index
            .associate(&store, &strings(&["k1", "k2"]), &strings(&["a"]))
            .await
            .unwrap();

        assert_eq!(index.delete_by_tags(&store, &strings(&["a"])).await.unwrap(), 1);
        assert_eq!(store.exists(&strings(&["k1", "tag:a"])).await.unwrap(), 0);
        assert_eq!(index.delete_by_tags(&store, &strings(&["a"])).await.unwrap(), 0);
    }
}
