//! Basic usage of the cache-aside store with the CMS collections.

use cms_cache::{
    backend::InMemoryBackend,
    error::Result,
    health,
    observability::{CacheMetrics, TtlPolicy},
    repository::{collections, DocumentStore, InMemoryDocumentStore, Query},
    CacheAsideStore, CacheStrategy, CachedCollection,
};
use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Counts outcomes so the demo can show what the cache did.
#[derive(Clone, Default)]
struct Counters {
    hits: Arc<AtomicU64>,
    misses: Arc<AtomicU64>,
}

impl CacheMetrics for Counters {
    fn record_hit(&self, _key: &str, _duration: Duration) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    fn record_miss(&self, _key: &str, _duration: Duration) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .try_init()
        .ok();

    println!("=== cms-cache: basic usage ===\n");

    let counters = Counters::default();
    let cache = CacheAsideStore::new(InMemoryBackend::new())
        .with_metrics(Box::new(counters.clone()))
        .with_ttl_policy(TtlPolicy::per_prefix(
            [
                (collections::POSTS, Duration::from_secs(300)),
                (collections::MEDIA, Duration::from_secs(86_400)),
            ],
            Duration::from_secs(3600),
        ));

    // Seed the backing store
    let docs = InMemoryDocumentStore::new();
    docs.create(
        collections::CATEGORIES,
        json!({"id": "engineering", "name": "Engineering"}),
    )
    .await?;

    let posts = CachedCollection::new(collections::POSTS, docs.clone(), cache.clone())?;

    println!("1. Creating posts (writes go to the store, then the cache)");
    let first = posts
        .create(json!({"title": "Hello, cache", "status": "published", "category": "engineering"}))
        .await?;
    posts
        .create(json!({"title": "Work in progress", "status": "draft"}))
        .await?;
    let id = first["id"].as_str().unwrap_or_default().to_string();
    println!("   created post {}\n", id);

    println!("2. Reading the same post twice");
    posts.find_by_id(&id).await?;
    posts.find_by_id(&id).await?;
    println!(
        "   hits: {}, misses: {}\n",
        counters.hits.load(Ordering::Relaxed),
        counters.misses.load(Ordering::Relaxed)
    );

    println!("3. Querying published posts (cached under posts:list:<hash>)");
    let published = Query::new()
        .where_equals("status", "published")
        .sort_by("-createdAt");
    let found = posts.find(&published).await?;
    println!("   {} published post(s)\n", found.len());

    println!("4. Publishing the draft invalidates cached lists");
    let drafts = posts.find(&Query::new().where_equals("status", "draft")).await?;
    if let Some(draft_id) = drafts.first().and_then(|d| d["id"].as_str()) {
        posts
            .update(draft_id, json!({"status": "published"}))
            .await?;
    }
    let found = posts.find(&published).await?;
    println!("   {} published post(s) now\n", found.len());

    println!("5. Plain key-value access");
    cache
        .set_with_ttl("session:demo", &json!({"user": "users:1"}), Duration::from_secs(60))
        .await;
    let session: Option<serde_json::Value> = cache.get("session:demo").await;
    println!("   session: {:?}\n", session);

    println!("6. Strategies");
    let fresh = posts.find_by_id_with(&id, CacheStrategy::Fresh).await?;
    println!("   fresh (cache only): {}", fresh.is_some());
    posts.find_by_id_with(&id, CacheStrategy::Invalidate).await?;
    println!("   invalidate: reloaded from store\n");

    println!("7. Cache outage: reads fall back to the store");
    cache.backend().simulate_outage(true);
    let still_there = posts.find_by_id(&id).await?;
    println!("   post readable during outage: {}", still_there.is_some());
    let report = health::check(&cache, &docs).await;
    println!(
        "   health: {} {}",
        report.status_code(),
        serde_json::to_string(&report).unwrap_or_default()
    );
    cache.backend().simulate_outage(false);

    cache.shutdown().await;
    println!("\n=== done ===");
    Ok(())
}
