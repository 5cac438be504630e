//! # Tagged Caching Layer
//!
//! A cache facade over a key-value [`Store`](crate::store::Store) that groups
//! keys under tags for bulk invalidation and keeps working when the backend
//! does not.
//!
//! ## Features
//!
//! - **Tag Invalidation**: every save can attach tags; `delete_by_tags` drops
//!   all keys ever saved under them
//! - **Degraded Mode**: with no backend, a failed connect, or a host override
//!   the facade serves misses and no-ops instead of errors
//! - **Miss Recovery**: loads accept a callback computing the value for absent keys
//! - **Error Modes**: lenient (report and return a failure value) or strict
//!   (report and return the error)
//! - **Transactions**: raw store ops applied atomically
//!
//! ## Example
//!
//! ```rust
//! use ouroboros_cache::cache::{CacheConfig, TaggedCache};
//! use ouroboros_cache::store::MemoryConnector;
//! use std::sync::Arc;
//!
//! # async fn example() -> ouroboros_cache::Result<()> {
//! let cache = TaggedCache::builder(CacheConfig::default())
//!     .connector(Arc::new(MemoryConnector::new()))
//!     .connect()
//!     .await?;
//!
//! cache.save("article:1", "draft", Some(3600), &["articles", "author:7"]).await?;
//! cache.save("article:2", "final", None, &["articles"]).await?;
//!
//! let draft: Option<String> = cache.load("article:1").await?;
//! assert_eq!(draft.as_deref(), Some("draft"));
//!
//! assert_eq!(cache.delete_by_tags("articles").await?, 2);
//! assert!(!cache.has("article:2").await?);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod facade;
pub mod gate;
pub mod recovery;
pub mod sink;
pub mod tags;
pub mod types;

pub use config::{CacheConfig, CacheConfigBuilder, ErrorMode};
pub use facade::{TaggedCache, TaggedCacheBuilder};
pub use gate::{DegradationGate, DisableReason};
pub use sink::{ErrorSink, TracingSink};
pub use tags::{TagIndex, TAG_PREFIX};
pub use types::{CacheKey, CacheStats, KeyTags, Keys, Tag};
