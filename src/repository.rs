//! Backing store abstraction.
//!
//! The authoritative system of record. The cache mirrors what this returns
//! and never originates data of its own.

use crate::error::{Error, Result};
use chrono::{SecondsFormat, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::cmp::Ordering as CmpOrdering;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// An opaque document. Always a JSON object carrying a string `id`.
pub type Document = Value;

/// Collection names used by the CMS.
pub mod collections {
    pub const USERS: &str = "users";
    pub const POSTS: &str = "posts";
    pub const MEDIA: &str = "media";
    pub const CATEGORIES: &str = "categories";

    pub const ALL: [&str; 4] = [USERS, POSTS, MEDIA, CATEGORIES];
}

/// Filter, sort and limit for [`DocumentStore::find`].
///
/// `filter` is an equality predicate per field. `sort` names a field,
/// prefixed with `-` for descending order (`"-createdAt"`).
///
/// Field order in `filter` is canonical (`BTreeMap`), so equal queries
/// always produce the same list cache key.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Query {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub filter: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    /// Require `field == value`.
    pub fn where_equals(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter.insert(field.into(), value.into());
        self
    }

    pub fn sort_by(mut self, field: impl Into<String>) -> Self {
        self.sort = Some(field.into());
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Whether `doc` satisfies every filter term.
    pub fn matches(&self, doc: &Document) -> bool {
        self.filter
            .iter()
            .all(|(field, expected)| doc.get(field) == Some(expected))
    }
}

/// Authoritative document API: CRUD by collection name and filter.
///
/// Mirrors the surface of the CMS's local API. Implementations own schema,
/// access control and persistence; callers treat documents as opaque.
pub trait DocumentStore: Clone + Send + Sync + 'static {
    fn find_by_id(
        &self,
        collection: &str,
        id: &str,
    ) -> impl Future<Output = Result<Option<Document>>> + Send;

    fn find(
        &self,
        collection: &str,
        query: &Query,
    ) -> impl Future<Output = Result<Vec<Document>>> + Send;

    /// Insert a document and return it as stored (with its `id`).
    fn create(
        &self,
        collection: &str,
        doc: Document,
    ) -> impl Future<Output = Result<Document>> + Send;

    /// Merge `patch` into an existing document. `Ok(None)` if it does not exist.
    fn update(
        &self,
        collection: &str,
        id: &str,
        patch: Document,
    ) -> impl Future<Output = Result<Option<Document>>> + Send;

    /// Remove a document. Returns whether it existed.
    fn delete(&self, collection: &str, id: &str) -> impl Future<Output = Result<bool>> + Send;

    /// Liveness probe.
    fn ping(&self) -> impl Future<Output = Result<()>> + Send;
}

/// In-memory [`DocumentStore`].
///
/// Assigns sequential string ids when a document has none and stamps
/// `createdAt` / `updatedAt` the way the CMS does.
#[derive(Clone, Default)]
pub struct InMemoryDocumentStore {
    collections: Arc<DashMap<String, BTreeMap<String, Document>>>,
    next_id: Arc<AtomicU64>,
    outage: Arc<AtomicBool>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every operation fail, as if the database were down.
    pub fn simulate_outage(&self, down: bool) {
        self.outage.store(down, Ordering::SeqCst);
    }

    /// Number of documents in `collection`.
    pub fn count(&self, collection: &str) -> usize {
        self.collections
            .get(collection)
            .map(|docs| docs.len())
            .unwrap_or(0)
    }

    fn check_available(&self) -> Result<()> {
        if self.outage.load(Ordering::SeqCst) {
            return Err(Error::RepositoryError(
                "Document store unavailable".to_string(),
            ));
        }
        Ok(())
    }

    fn allocate_id(&self) -> String {
        (self.next_id.fetch_add(1, Ordering::SeqCst) + 1).to_string()
    }
}

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn into_object(doc: Document) -> Result<Map<String, Value>> {
    match doc {
        Value::Object(map) => Ok(map),
        other => Err(Error::ValidationError(format!(
            "Document must be a JSON object, got {}",
            other
        ))),
    }
}

/// Ordering for sort keys: nulls/missing first, then numbers, strings, bools.
fn compare_values(a: Option<&Value>, b: Option<&Value>) -> CmpOrdering {
    match (a, b) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(CmpOrdering::Equal),
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (None | Some(Value::Null), None | Some(Value::Null)) => CmpOrdering::Equal,
        (None | Some(Value::Null), _) => CmpOrdering::Less,
        (_, None | Some(Value::Null)) => CmpOrdering::Greater,
        (Some(x), Some(y)) => x.to_string().cmp(&y.to_string()),
    }
}

impl DocumentStore for InMemoryDocumentStore {
    async fn find_by_id(&self, collection: &str, id: &str) -> Result<Option<Document>> {
        self.check_available()?;
        let doc = self
            .collections
            .get(collection)
            .and_then(|docs| docs.get(id).cloned());
        debug!(
            "[store] {}:{} -> {}",
            collection,
            id,
            if doc.is_some() { "found" } else { "not found" }
        );
        Ok(doc)
    }

    async fn find(&self, collection: &str, query: &Query) -> Result<Vec<Document>> {
        self.check_available()?;
        let mut docs: Vec<Document> = self
            .collections
            .get(collection)
            .map(|docs| docs.values().filter(|d| query.matches(d)).cloned().collect())
            .unwrap_or_default();

        if let Some(sort) = &query.sort {
            let (field, descending) = match sort.strip_prefix('-') {
                Some(field) => (field, true),
                None => (sort.as_str(), false),
            };
            docs.sort_by(|a, b| {
                let ord = compare_values(a.get(field), b.get(field));
                if descending {
                    ord.reverse()
                } else {
                    ord
                }
            });
        }
        if let Some(limit) = query.limit {
            docs.truncate(limit);
        }

        debug!("[store] find {} -> {} documents", collection, docs.len());
        Ok(docs)
    }

    async fn create(&self, collection: &str, doc: Document) -> Result<Document> {
        self.check_available()?;
        let mut map = into_object(doc)?;

        let id = match map.get("id") {
            Some(Value::String(id)) if !id.is_empty() => id.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => self.allocate_id(),
        };
        let now = now_rfc3339();
        map.insert("id".to_string(), Value::String(id.clone()));
        map.insert("createdAt".to_string(), Value::String(now.clone()));
        map.insert("updatedAt".to_string(), Value::String(now));
        let doc = Value::Object(map);

        let mut docs = self.collections.entry(collection.to_string()).or_default();
        if docs.contains_key(&id) {
            return Err(Error::RepositoryError(format!(
                "Duplicate id {} in {}",
                id, collection
            )));
        }
        docs.insert(id.clone(), doc.clone());

        debug!("[store] created {}:{}", collection, id);
        Ok(doc)
    }

    async fn update(&self, collection: &str, id: &str, patch: Document) -> Result<Option<Document>> {
        self.check_available()?;
        let patch = into_object(patch)?;

        let mut docs = match self.collections.get_mut(collection) {
            Some(docs) => docs,
            None => return Ok(None),
        };
        let Some(Value::Object(existing)) = docs.get_mut(id) else {
            return Ok(None);
        };

        for (field, value) in patch {
            // id and createdAt are owned by the store
            if field == "id" || field == "createdAt" {
                continue;
            }
            existing.insert(field, value);
        }
        existing.insert("updatedAt".to_string(), Value::String(now_rfc3339()));
        let updated = Value::Object(existing.clone());

        debug!("[store] updated {}:{}", collection, id);
        Ok(Some(updated))
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<bool> {
        self.check_available()?;
        let existed = self
            .collections
            .get_mut(collection)
            .map(|mut docs| docs.remove(id).is_some())
            .unwrap_or(false);
        debug!("[store] delete {}:{} -> {}", collection, id, existed);
        Ok(existed)
    }

    async fn ping(&self) -> Result<()> {
        self.check_available()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::collections::{CATEGORIES, POSTS};
    use serde_json::json;

    #[tokio::test]
    async fn test_create_assigns_id_and_timestamps() {
        let store = InMemoryDocumentStore::new();
        let doc = store
            .create(POSTS, json!({"title": "Hello"}))
            .await
            .expect("Failed to create");

        assert_eq!(doc["id"], "1");
        assert_eq!(doc["title"], "Hello");
        assert!(doc["createdAt"].is_string());
        assert_eq!(doc["createdAt"], doc["updatedAt"]);

        let fetched = store
            .find_by_id(POSTS, "1")
            .await
            .expect("Failed to fetch")
            .expect("Document not found");
        assert_eq!(fetched, doc);
    }

    #[tokio::test]
    async fn test_create_keeps_explicit_id_and_rejects_duplicates() {
        let store = InMemoryDocumentStore::new();
        store
            .create(CATEGORIES, json!({"id": "news", "name": "News"}))
            .await
            .expect("Failed to create");

        let err = store
            .create(CATEGORIES, json!({"id": "news", "name": "Other"}))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::RepositoryError(_)));
    }

    #[tokio::test]
    async fn test_create_rejects_non_objects() {
        let store = InMemoryDocumentStore::new();
        let err = store.create(POSTS, json!([1, 2])).await.unwrap_err();
        assert!(matches!(err, Error::ValidationError(_)));
    }

    #[tokio::test]
    async fn test_update_merges_and_protects_id() {
        let store = InMemoryDocumentStore::new();
        store
            .create(POSTS, json!({"id": "p1", "title": "Draft", "status": "draft"}))
            .await
            .expect("Failed to create");

        let updated = store
            .update(POSTS, "p1", json!({"status": "published", "id": "hijack"}))
            .await
            .expect("Failed to update")
            .expect("Document not found");

        assert_eq!(updated["id"], "p1");
        assert_eq!(updated["title"], "Draft");
        assert_eq!(updated["status"], "published");

        let missing = store
            .update(POSTS, "nope", json!({"status": "x"}))
            .await
            .expect("Failed to update");
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_find_filters_sorts_and_limits() {
        let store = InMemoryDocumentStore::new();
        for (id, status, rank) in [("a", "published", 3), ("b", "draft", 1), ("c", "published", 2)] {
            store
                .create(POSTS, json!({"id": id, "status": status, "rank": rank}))
                .await
                .expect("Failed to create");
        }

        let query = Query::new()
            .where_equals("status", "published")
            .sort_by("rank");
        let ids: Vec<Value> = store
            .find(POSTS, &query)
            .await
            .expect("Failed to find")
            .into_iter()
            .map(|d| d["id"].clone())
            .collect();
        assert_eq!(ids, vec![json!("c"), json!("a")]);

        let top = store
            .find(POSTS, &Query::new().sort_by("-rank").limit(1))
            .await
            .expect("Failed to find");
        assert_eq!(top.len(), 1);
        assert_eq!(top[0]["id"], "a");

        let none = store
            .find("media", &Query::new())
            .await
            .expect("Failed to find");
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_delete() {
        let store = InMemoryDocumentStore::new();
        store
            .create(POSTS, json!({"id": "p1"}))
            .await
            .expect("Failed to create");

        assert!(store.delete(POSTS, "p1").await.expect("Failed to delete"));
        assert!(!store.delete(POSTS, "p1").await.expect("Failed to delete"));
        assert_eq!(store.count(POSTS), 0);
    }

    #[tokio::test]
    async fn test_outage() {
        let store = InMemoryDocumentStore::new();
        store.simulate_outage(true);
        assert!(store.ping().await.is_err());
        assert!(matches!(
            store.find_by_id(POSTS, "1").await,
            Err(Error::RepositoryError(_))
        ));
    }

    #[test]
    fn test_query_serialization_is_canonical() {
        let a = Query::new().where_equals("b", 1).where_equals("a", 2);
        let b = Query::new().where_equals("a", 2).where_equals("b", 1);
        assert_eq!(
            serde_json::to_string(&a).expect("serialize"),
            serde_json::to_string(&b).expect("serialize")
        );
    }
}
