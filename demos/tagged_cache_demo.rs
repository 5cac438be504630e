//! Tagged Cache Demo Application
//!
//! Saves a few articles under tags, loads them back with miss recovery and
//! invalidates a whole group by tag.
//!
//! Usage:
//!   cargo run --example tagged_cache_demo
//!
//! Environment variables (all optional, `.env` is honoured):
//!   OUROBOROS_CACHE_NAME     - instance name (default: default)
//!   OUROBOROS_CACHE_DATABASE - namespace (default: default)
//!   OUROBOROS_CACHE_MODE     - strict | lenient (default: lenient)
//!   RUST_LOG                 - log filter (default: info)

use ouroboros_cache::{CacheConfig, CacheRegistry, KeyTags, MemoryConnector, StoreOp};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Article {
    id: u32,
    title: String,
    author: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("=== Tagged Cache Demo ===");

    let config = CacheConfig::from_env()?;
    let name = config.name.clone();
    let registry = CacheRegistry::new(Some(Arc::new(MemoryConnector::new()))).with_config(config);
    let cache = registry.get(&name).await?;

    info!("\n--- Save with tags ---");
    let articles = [
        Article { id: 1, title: "Ownership".into(), author: "ana".into() },
        Article { id: 2, title: "Lifetimes".into(), author: "ana".into() },
        Article { id: 3, title: "Async".into(), author: "bo".into() },
    ];
    for article in &articles {
        let author_tag = format!("author:{}", article.author);
        cache
            .save(
                &format!("article:{}", article.id),
                article,
                Some(3600),
                &["articles", author_tag.as_str()],
            )
            .await?;
    }
    info!("Saved {} articles", articles.len());

    info!("\n--- Load with miss recovery ---");
    let loaded: Vec<Option<Article>> = cache
        .load_multiple_with(vec!["article:1", "article:3", "article:4"], |cache, key| async move {
            info!("Miss for {}, rebuilding", key);
            let rebuilt = Article {
                id: 4,
                title: "Traits".into(),
                author: "bo".into(),
            };
            cache.save(&key, &rebuilt, Some(3600), &["articles", "author:bo"]).await?;
            Ok::<_, anyhow::Error>(rebuilt)
        })
        .await?;
    for article in loaded.iter().flatten() {
        info!("  #{} {} by {}", article.id, article.title, article.author);
    }

    info!("\n--- Invalidate by tag ---");
    let removed = cache.delete_by_tags("author:ana").await?;
    info!("author:ana removed {} article(s)", removed);
    info!(
        "article:1 present: {}, article:3 present: {}",
        cache.has("article:1").await?,
        cache.has("article:3").await?
    );

    info!("\n--- Delete with explicit tag cleanup ---");
    let mut key_tags = KeyTags::new();
    key_tags.insert(
        "article:3".to_string(),
        vec!["articles".to_string(), "author:bo".to_string()],
    );
    let deleted = cache.delete_multiple("article:3", &key_tags).await?;
    info!("Deleted {} entry, memberships cleaned", deleted);

    info!("\n--- Atomic batch ---");
    let keys = vec!["article:5".to_string()];
    let mut ops = vec![StoreOp::SetWithTtl {
        key: "article:5".to_string(),
        value: serde_json::to_vec(&Article {
            id: 5,
            title: "Macros".into(),
            author: "cy".into(),
        })?,
        seconds: 3600,
    }];
    ops.extend(cache.tag_index().association_ops(&keys, &["articles".to_string()]));
    let replies = cache.process_transaction(ops).await?;
    info!("Transaction replies: {:?}", replies);

    info!("\n--- Statistics ---");
    info!("{}", cache.stats());

    let health = cache.health_check().await;
    info!("Health: {:?} ({}ms)", health.status, health.response_time_ms);

    info!("\n=== Demo Complete ===");
    Ok(())
}
