//! # Ouroboros Cache (ouroboros-cache)
//!
//! A tag-indexed cache facade for Rust with a degraded mode for unreachable
//! backends.
//!
//! ## Features
//!
//! - Tag sets for bulk invalidation of related keys
//! - Pass-through degraded mode: a missing or failing backend turns into misses
//! - Miss-recovery callbacks on single and multi-key loads
//! - Lenient and strict error modes with a pluggable error sink
//! - Atomic batches of raw store operations
//! - Async-first design using tokio
//! - Named-instance registry, one connection per name
//!
//! ## Quick Start
//!
//! ```rust
//! use ouroboros_cache::{CacheConfig, CacheRegistry, MemoryConnector};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> ouroboros_cache::Result<()> {
//!     let registry = CacheRegistry::new(Some(Arc::new(MemoryConnector::new())))
//!         .with_config(CacheConfig::builder().name("pages").database("web").build());
//!
//!     let pages = registry.get("pages").await?;
//!     pages.save("page:/", "<html>home</html>", Some(60), &["pages"]).await?;
//!
//!     let html: Option<String> = pages.load("page:/").await?;
//!     println!("Cached: {:?}", html);
//!
//!     pages.delete_by_tags("pages").await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Degraded Mode
//!
//! A facade built without a backend, or whose connect fails in lenient mode,
//! stays usable. Writes report `false`, existence checks report absent and
//! loads go straight to the miss callback.
//!
//! ```rust
//! use ouroboros_cache::{CacheConfig, TaggedCache};
//!
//! #[tokio::main]
//! async fn main() -> ouroboros_cache::Result<()> {
//!     let cache = TaggedCache::builder(CacheConfig::default()).connect().await?;
//!     assert!(!cache.is_enabled());
//!
//!     let value = cache
//!         .load_with("answer", |_, _| async { Ok::<_, anyhow::Error>(42u32) })
//!         .await?;
//!     assert_eq!(value, Some(42));
//!     Ok(())
//! }
//! ```
//!
//! ## Health Check
//!
//! ```rust
//! use ouroboros_cache::{CacheConfig, MemoryConnector, TaggedCache};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> ouroboros_cache::Result<()> {
//!     let cache = TaggedCache::builder(CacheConfig::default())
//!         .connector(Arc::new(MemoryConnector::new()))
//!         .connect()
//!         .await?;
//!
//!     let result = cache.health_check().await;
//!     println!("Status: {:?}", result.status);
//!     println!("Response time: {}ms", result.response_time_ms);
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod connection;
pub mod error;
pub mod registry;
pub mod store;

// Re-export main types for convenience
pub use cache::{
    CacheConfig, CacheConfigBuilder, CacheKey, CacheStats, DisableReason, ErrorMode, ErrorSink,
    KeyTags, Keys, Tag, TagIndex, TaggedCache, TaggedCacheBuilder, TracingSink,
};
pub use connection::{Connector, HealthCheckResult, HealthStatus};
pub use error::{CacheError, Result};
pub use registry::CacheRegistry;
pub use store::{
    Codec, JsonCodec, ManualClock, MemoryConnector, MemoryStore, Reply, Store, StoreOp,
    Transaction,
};
