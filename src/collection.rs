//! Cache-aside reads and write-then-invalidate for one collection.
//!
//! The store itself cannot regenerate a missing value; this is the caller
//! side of the pattern, wiring a [`DocumentStore`] to a [`CacheAsideStore`]
//! under the crate's key scheme:
//!
//! ```text
//! find_by_id   cache(<c>:<id>)        → miss → store → populate
//! find(query)  cache(<c>:list:<hash>) → miss → store → populate
//! create       store → invalidate <c>:list:* → populate <c>:<id>
//! update       store → delete <c>:<id> → invalidate <c>:list:*
//! delete       store → delete <c>:<id> → invalidate <c>:list:*
//! ```
//!
//! Backing-store errors propagate. Cache errors never do.

use crate::backend::CacheBackend;
use crate::error::Result;
use crate::repository::{Document, DocumentStore, Query};
use crate::store::CacheAsideStore;
use crate::strategy::CacheStrategy;

/// A named collection read through the cache.
///
/// # Example
///
/// ```no_run
/// use cms_cache::backend::InMemoryBackend;
/// use cms_cache::repository::{collections, InMemoryDocumentStore, Query};
/// use cms_cache::{CacheAsideStore, CachedCollection};
///
/// # async fn example() -> cms_cache::Result<()> {
/// let cache = CacheAsideStore::new(InMemoryBackend::new());
/// let posts = CachedCollection::new(collections::POSTS, InMemoryDocumentStore::new(), cache)?;
///
/// let post = posts.find_by_id("42").await?;
/// let published = posts
///     .find(&Query::new().where_equals("status", "published"))
///     .await?;
/// # Ok(())
/// # }
/// ```
pub struct CachedCollection<S: DocumentStore, B: CacheBackend> {
    name: String,
    docs: S,
    cache: CacheAsideStore<B>,
}

impl<S: DocumentStore, B: CacheBackend> Clone for CachedCollection<S, B> {
    fn clone(&self) -> Self {
        CachedCollection {
            name: self.name.clone(),
            docs: self.docs.clone(),
            cache: self.cache.clone(),
        }
    }
}

impl<S: DocumentStore, B: CacheBackend> CachedCollection<S, B> {
    /// # Errors
    /// `Error::ValidationError` if `name` cannot be used as a key segment.
    pub fn new(name: impl Into<String>, docs: S, cache: CacheAsideStore<B>) -> Result<Self> {
        let name = name.into();
        cache.keys().collection_pattern(&name)?;
        Ok(CachedCollection { name, docs, cache })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn cache(&self) -> &CacheAsideStore<B> {
        &self.cache
    }

    pub fn documents(&self) -> &S {
        &self.docs
    }

    /// Cache key for one document of this collection.
    pub fn key_for(&self, id: &str) -> Result<String> {
        self.cache.keys().entity_key(&self.name, id)
    }

    /// Read one document with [`CacheStrategy::Refresh`].
    pub async fn find_by_id(&self, id: &str) -> Result<Option<Document>> {
        self.find_by_id_with(id, CacheStrategy::Refresh).await
    }

    /// Read one document with an explicit strategy.
    ///
    /// # Errors
    /// - `Error::ValidationError`: empty id
    /// - `Error::RepositoryError`: backing store failure
    pub async fn find_by_id_with(
        &self,
        id: &str,
        strategy: CacheStrategy,
    ) -> Result<Option<Document>> {
        let key = self.key_for(id)?;
        debug!("» {} (strategy: {})", key, strategy);

        match strategy {
            CacheStrategy::Fresh => Ok(self.cache.get(&key).await),
            CacheStrategy::Refresh => {
                if let Some(doc) = self.cache.get(&key).await {
                    return Ok(Some(doc));
                }
                debug!("Cache miss for {}, falling back to store", key);
                self.load_one(&key, id).await
            }
            CacheStrategy::Invalidate => {
                self.cache.del(&key).await;
                self.load_one(&key, id).await
            }
            CacheStrategy::Bypass => self.load_one(&key, id).await,
        }
    }

    /// Run a query, caching the result list under its query hash.
    pub async fn find(&self, query: &Query) -> Result<Vec<Document>> {
        let key = self.cache.keys().list_key(&self.name, query)?;
        if let Some(docs) = self.cache.get::<Vec<Document>>(&key).await {
            return Ok(docs);
        }

        let docs = self.docs.find(&self.name, query).await?;
        self.cache.set(&key, &docs).await;
        Ok(docs)
    }

    /// Insert into the backing store, then refresh the cache.
    pub async fn create(&self, doc: Document) -> Result<Document> {
        let created = self.docs.create(&self.name, doc).await?;
        self.invalidate_lists().await;

        if let Some(id) = document_id(&created) {
            match self.key_for(&id) {
                Ok(key) => self.cache.set(&key, &created).await,
                Err(e) => warn!("Not caching {} document {}: {}", self.name, id, e),
            }
        }
        Ok(created)
    }

    /// Patch in the backing store, then drop the stale entry and lists.
    ///
    /// The entry is deleted rather than overwritten, so two racing updates
    /// cannot leave the older document cached. It is deleted even when the
    /// document is gone, in case it was removed behind the cache's back.
    pub async fn update(&self, id: &str, patch: Document) -> Result<Option<Document>> {
        let key = self.key_for(id)?;
        let updated = self.docs.update(&self.name, id, patch).await?;
        self.cache.del(&key).await;
        if updated.is_some() {
            self.invalidate_lists().await;
        }
        Ok(updated)
    }

    /// Delete from the backing store, then from the cache.
    pub async fn delete(&self, id: &str) -> Result<bool> {
        let key = self.key_for(id)?;
        let existed = self.docs.delete(&self.name, id).await?;
        self.cache.del(&key).await;
        if existed {
            self.invalidate_lists().await;
        }
        Ok(existed)
    }

    /// Drop every cached query result of this collection.
    pub async fn invalidate_lists(&self) {
        match self.cache.keys().list_pattern(&self.name) {
            Ok(pattern) => self.cache.invalidate_pattern(&pattern).await,
            Err(e) => warn!("Cannot build list pattern for {}: {}", self.name, e),
        }
    }

    /// Drop everything cached for this collection.
    pub async fn invalidate_all(&self) {
        match self.cache.keys().collection_pattern(&self.name) {
            Ok(pattern) => self.cache.invalidate_pattern(&pattern).await,
            Err(e) => warn!("Cannot build pattern for {}: {}", self.name, e),
        }
    }

    async fn load_one(&self, key: &str, id: &str) -> Result<Option<Document>> {
        match self.docs.find_by_id(&self.name, id).await? {
            Some(doc) => {
                self.cache.set(key, &doc).await;
                Ok(Some(doc))
            }
            None => Ok(None),
        }
    }
}

fn document_id(doc: &Document) -> Option<String> {
    match doc.get("id")? {
        serde_json::Value::String(id) => Some(id.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(all(test, feature = "inmemory"))]
mod tests {
    use super::*;
    use crate::backend::InMemoryBackend;
    use crate::repository::collections::POSTS;
    use crate::repository::InMemoryDocumentStore;
    use crate::store::{Lookup, RetryPolicy};
    use serde_json::json;
    use std::time::Duration;

    fn posts() -> (
        CachedCollection<InMemoryDocumentStore, InMemoryBackend>,
        InMemoryDocumentStore,
        InMemoryBackend,
    ) {
        let docs = InMemoryDocumentStore::new();
        let backend = InMemoryBackend::new();
        let cache = CacheAsideStore::new(backend.clone())
            .with_retry_policy(RetryPolicy::no_retry(Duration::from_millis(100)));
        let collection =
            CachedCollection::new(POSTS, docs.clone(), cache).expect("valid collection");
        (collection, docs, backend)
    }

    #[test]
    fn test_rejects_bad_collection_name() {
        let cache = CacheAsideStore::new(InMemoryBackend::new());
        assert!(CachedCollection::new("po:sts", InMemoryDocumentStore::new(), cache).is_err());
    }

    #[tokio::test]
    async fn test_find_by_id_populates_cache() {
        let (posts, docs, _) = posts();
        docs.create(POSTS, json!({"id": "1", "title": "Hello"}))
            .await
            .expect("Failed to create");

        let key = posts.key_for("1").expect("valid key");
        assert_eq!(posts.cache().lookup::<Document>(&key).await, Lookup::Miss);

        let doc = posts
            .find_by_id("1")
            .await
            .expect("Failed to find")
            .expect("Document not found");
        assert_eq!(doc["title"], "Hello");
        assert!(posts.cache().lookup::<Document>(&key).await.is_hit());
    }

    #[tokio::test]
    async fn test_cached_value_served_without_store() {
        let (posts, docs, _) = posts();
        docs.create(POSTS, json!({"id": "1", "title": "Hello"}))
            .await
            .expect("Failed to create");
        posts.find_by_id("1").await.expect("Failed to find");

        docs.simulate_outage(true);

        let doc = posts
            .find_by_id("1")
            .await
            .expect("Cached read should not touch the store")
            .expect("Document not found");
        assert_eq!(doc["title"], "Hello");
    }

    #[tokio::test]
    async fn test_missing_document_is_not_cached() {
        let (posts, _, backend) = posts();
        assert!(posts.find_by_id("404").await.expect("Failed").is_none());
        assert!(backend.is_empty().await);
    }

    #[tokio::test]
    async fn test_fresh_strategy_never_reads_store() {
        let (posts, docs, _) = posts();
        docs.create(POSTS, json!({"id": "1"}))
            .await
            .expect("Failed to create");

        let doc = posts
            .find_by_id_with("1", CacheStrategy::Fresh)
            .await
            .expect("Failed");
        assert!(doc.is_none());
    }

    #[tokio::test]
    async fn test_invalidate_and_bypass_strategies_read_store() {
        let (posts, docs, _) = posts();
        docs.create(POSTS, json!({"id": "1", "title": "v1"}))
            .await
            .expect("Failed to create");
        posts.find_by_id("1").await.expect("Failed");

        // Change the store behind the cache's back
        docs.update(POSTS, "1", json!({"title": "v2"}))
            .await
            .expect("Failed to update");
        let stale = posts.find_by_id("1").await.expect("Failed").expect("doc");
        assert_eq!(stale["title"], "v1");

        let fresh = posts
            .find_by_id_with("1", CacheStrategy::Invalidate)
            .await
            .expect("Failed")
            .expect("doc");
        assert_eq!(fresh["title"], "v2");

        docs.update(POSTS, "1", json!({"title": "v3"}))
            .await
            .expect("Failed to update");
        let bypassed = posts
            .find_by_id_with("1", CacheStrategy::Bypass)
            .await
            .expect("Failed")
            .expect("doc");
        assert_eq!(bypassed["title"], "v3");

        // Bypass repopulated the cache
        let cached = posts
            .find_by_id_with("1", CacheStrategy::Fresh)
            .await
            .expect("Failed")
            .expect("doc");
        assert_eq!(cached["title"], "v3");
    }

    #[tokio::test]
    async fn test_update_invalidates_entity_and_lists() {
        let (posts, _, _) = posts();
        posts
            .create(json!({"id": "1", "title": "Draft", "status": "draft"}))
            .await
            .expect("Failed to create");

        let drafts = Query::new().where_equals("status", "draft");
        assert_eq!(posts.find(&drafts).await.expect("Failed").len(), 1);
        posts.find_by_id("1").await.expect("Failed");

        posts
            .update("1", json!({"status": "published"}))
            .await
            .expect("Failed to update")
            .expect("doc");

        assert!(posts.find(&drafts).await.expect("Failed").is_empty());
        let doc = posts.find_by_id("1").await.expect("Failed").expect("doc");
        assert_eq!(doc["status"], "published");
    }

    #[tokio::test]
    async fn test_create_invalidates_lists_and_caches_document() {
        let (posts, docs, _) = posts();
        let all = Query::new();
        assert!(posts.find(&all).await.expect("Failed").is_empty());

        let created = posts
            .create(json!({"title": "First"}))
            .await
            .expect("Failed to create");
        let id = created["id"].as_str().expect("string id").to_string();

        assert_eq!(posts.find(&all).await.expect("Failed").len(), 1);

        // Served from cache even if the store goes away
        docs.simulate_outage(true);
        let doc = posts.find_by_id(&id).await.expect("Failed").expect("doc");
        assert_eq!(doc["title"], "First");
    }

    #[tokio::test]
    async fn test_delete_removes_cached_document() {
        let (posts, _, _) = posts();
        posts
            .create(json!({"id": "1"}))
            .await
            .expect("Failed to create");
        posts.find_by_id("1").await.expect("Failed");

        assert!(posts.delete("1").await.expect("Failed to delete"));
        assert!(posts.find_by_id("1").await.expect("Failed").is_none());
        assert!(!posts.delete("1").await.expect("Failed to delete"));
    }

    #[tokio::test]
    async fn test_cache_outage_falls_back_to_store() {
        let (posts, docs, backend) = posts();
        docs.create(POSTS, json!({"id": "1", "title": "Hello"}))
            .await
            .expect("Failed to create");
        backend.simulate_outage(true);

        let doc = posts.find_by_id("1").await.expect("Failed").expect("doc");
        assert_eq!(doc["title"], "Hello");

        let updated = posts
            .update("1", json!({"title": "Still works"}))
            .await
            .expect("Writes succeed without cache");
        assert!(updated.is_some());
        assert_eq!(posts.find(&Query::new()).await.expect("Failed").len(), 1);
    }

    #[tokio::test]
    async fn test_update_of_vanished_document_drops_cache_entry() {
        let (posts, docs, _) = posts();
        posts
            .create(json!({"id": "1", "title": "Hello"}))
            .await
            .expect("Failed to create");
        let key = posts.key_for("1").expect("valid key");
        assert!(posts.cache().lookup::<Document>(&key).await.is_hit());

        // Removed behind the cache's back
        assert!(docs.delete(POSTS, "1").await.expect("Failed to delete"));

        let updated = posts
            .update("1", json!({"title": "Gone"}))
            .await
            .expect("Failed to update");
        assert!(updated.is_none());
        assert_eq!(posts.cache().lookup::<Document>(&key).await, Lookup::Miss);
        assert!(posts.find_by_id("1").await.expect("Failed").is_none());
    }

    #[tokio::test]
    async fn test_list_keys_are_not_readable_as_documents() {
        let (posts, _, _) = posts();
        posts
            .create(json!({"id": "1"}))
            .await
            .expect("Failed to create");
        let all = Query::new();
        assert_eq!(posts.find(&all).await.expect("Failed").len(), 1);

        let hash = crate::key::query_hash(&all).expect("hash");
        let aliased = format!("list:{}", hash);
        assert!(matches!(
            posts.find_by_id(&aliased).await,
            Err(crate::error::Error::ValidationError(_))
        ));

        // The cached list survives untouched
        let list_key = posts.cache().keys().list_key(POSTS, &all).expect("key");
        assert!(posts.cache().lookup::<Vec<Document>>(&list_key).await.is_hit());
    }

    #[tokio::test]
    async fn test_store_errors_propagate() {
        let (posts, docs, _) = posts();
        docs.simulate_outage(true);
        assert!(posts.find_by_id("1").await.is_err());
        assert!(posts.create(json!({"title": "x"})).await.is_err());
    }

    #[tokio::test]
    async fn test_invalidate_all_leaves_other_collections() {
        let docs = InMemoryDocumentStore::new();
        let backend = InMemoryBackend::new();
        let cache = CacheAsideStore::new(backend.clone());
        let posts = CachedCollection::new(POSTS, docs.clone(), cache.clone()).expect("valid");
        let media = CachedCollection::new("media", docs, cache).expect("valid");

        posts.create(json!({"id": "1"})).await.expect("create");
        media.create(json!({"id": "1"})).await.expect("create");

        posts.invalidate_all().await;

        assert!(backend.exists("media:1").await.expect("exists"));
        assert!(!backend.exists("posts:1").await.expect("exists"));
    }
}
