//! Miss recovery
//!
//! A miss callback receives the facade and the missing key and returns the
//! replacement value. It is never saved automatically: a callback that wants
//! the value cached calls `save` on the facade it was handed.
//!
//! ```rust
//! use ouroboros_cache::{CacheConfig, MemoryConnector, TaggedCache};
//! use std::sync::Arc;
//!
//! # async fn example() -> ouroboros_cache::Result<()> {
//! let cache = TaggedCache::builder(CacheConfig::default())
//!     .connector(Arc::new(MemoryConnector::new()))
//!     .connect()
//!     .await?;
//!
//! let profile: Option<String> = cache
//!     .load_with("profile:7", |cache, key| async move {
//!         let fresh = format!("computed for {}", key);
//!         cache.save(&key, &fresh, Some(300), &["profiles"]).await?;
//!         Ok::<_, anyhow::Error>(fresh)
//!     })
//!     .await?;
//!
//! assert_eq!(profile.as_deref(), Some("computed for profile:7"));
//! # Ok(())
//! # }
//! ```

use crate::cache::types::StatsRecorder;
use crate::error::{CacheError, Result};
use std::future::Future;
use tracing::{debug, warn};

/// Await one callback invocation for `key`, mapping its failure to [`CacheError::Callback`]
pub(crate) async fn recover<V, Fut>(stats: &StatsRecorder, key: &str, pending: Fut) -> Result<V>
where
    Fut: Future<Output = anyhow::Result<V>>,
{
    stats.recovery();
    debug!("Recovering miss for key: {}", key);

    pending.await.map_err(|e| {
        warn!("Miss callback failed for key '{}': {:#}", key, e);
        callback_failure(key, &e)
    })
}

fn callback_failure(key: &str, error: &anyhow::Error) -> CacheError {
    CacheError::Callback {
        key: key.to_string(),
        message: format!("{:#}", error),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{anyhow, Context};

    #[tokio::test]
    async fn test_recover_passes_value_through() {
        let stats = StatsRecorder::default();
        let value = recover(&stats, "k", async { Ok::<_, anyhow::Error>(42) })
            .await
            .unwrap();

        assert_eq!(value, 42);
        assert_eq!(stats.snapshot().recoveries, 1);
    }

    #[tokio::test]
    async fn test_recover_wraps_failure_with_key() {
        let stats = StatsRecorder::default();
        let result: Result<u32> = recover(&stats, "user:9", async {
            Err(anyhow!("db down")).context("loading user")
        })
        .await;

        match result {
            Err(CacheError::Callback { key, message }) => {
                assert_eq!(key, "user:9");
                assert_eq!(message, "loading user: db down");
            }
            other => panic!("expected callback failure, got {:?}", other),
        }
    }
}
