//! Cache key naming scheme.
//!
//! Invalidation is only as correct as the key space is disciplined, so every
//! key the crate writes goes through [`CacheKeyBuilder`]:
//!
//! ```text
//! [namespace:]<collection>:<id>                 single document
//! [namespace:]<collection>:list:<query-hash>    query result
//! ```
//!
//! Writes to a collection invalidate `<collection>:<id>` and
//! `<collection>:list:*`, which covers every key whose data could change.

use crate::error::{Error, Result};
use crate::pattern::{escape_glob, has_glob_chars};
use serde::Serialize;
use sha2::{Digest, Sha256};

/// Segment separating list keys from entity keys.
pub const LIST_SEGMENT: &str = "list";

/// Number of hex characters kept from the query digest.
const QUERY_HASH_LEN: usize = 16;

/// Builds keys and invalidation patterns for one optional namespace.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CacheKeyBuilder {
    namespace: Option<String>,
}

impl CacheKeyBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Prefix every key with `namespace:`. An empty namespace is ignored.
    pub fn with_namespace(namespace: impl Into<String>) -> Self {
        let namespace = namespace.into();
        CacheKeyBuilder {
            namespace: (!namespace.is_empty()).then_some(namespace),
        }
    }

    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    /// Key for a single document: `<collection>:<id>`.
    ///
    /// Ids starting with `list:` would land in the query-result key space,
    /// so they are rejected.
    ///
    /// # Errors
    /// `Error::ValidationError` if the collection name is unusable, `id` is
    /// empty, or `id` starts with `list:`.
    pub fn entity_key(&self, collection: &str, id: &str) -> Result<String> {
        validate_collection(collection)?;
        if id.is_empty() {
            return Err(Error::ValidationError(format!(
                "Empty document id for collection '{}'",
                collection
            )));
        }
        if is_reserved_id(id) {
            return Err(Error::ValidationError(format!(
                "Document id '{}' is reserved for query results in '{}'",
                id, collection
            )));
        }
        Ok(self.join(&[collection, id]))
    }

    /// Key for a query result: `<collection>:list:<query-hash>`.
    pub fn list_key<Q: Serialize + ?Sized>(&self, collection: &str, query: &Q) -> Result<String> {
        validate_collection(collection)?;
        let hash = query_hash(query)?;
        Ok(self.join(&[collection, LIST_SEGMENT, &hash]))
    }

    /// Pattern matching every key of a collection: `<collection>:*`.
    pub fn collection_pattern(&self, collection: &str) -> Result<String> {
        validate_collection(collection)?;
        Ok(format!("{}*", self.escaped_prefix(&[collection])))
    }

    /// Pattern matching every cached query of a collection: `<collection>:list:*`.
    pub fn list_pattern(&self, collection: &str) -> Result<String> {
        validate_collection(collection)?;
        Ok(format!(
            "{}*",
            self.escaped_prefix(&[collection, LIST_SEGMENT])
        ))
    }

    /// Leading segment of a key once the namespace is stripped.
    ///
    /// `"posts:42"` → `Some("posts")`, `"ns:posts:42"` → `Some("posts")`.
    pub fn resource_of<'k>(&self, key: &'k str) -> Option<&'k str> {
        let rest = match &self.namespace {
            Some(ns) => key.strip_prefix(ns.as_str())?.strip_prefix(':')?,
            None => key,
        };
        rest.split(':').next().filter(|s| !s.is_empty())
    }

    fn join(&self, segments: &[&str]) -> String {
        let mut key = String::new();
        if let Some(ns) = &self.namespace {
            key.push_str(ns);
            key.push(':');
        }
        key.push_str(&segments.join(":"));
        key
    }

    fn escaped_prefix(&self, segments: &[&str]) -> String {
        let mut prefix = String::new();
        if let Some(ns) = &self.namespace {
            prefix.push_str(&escape_glob(ns));
            prefix.push(':');
        }
        for segment in segments {
            prefix.push_str(&escape_glob(segment));
            prefix.push(':');
        }
        prefix
    }
}

/// Stable short digest of a query, used as the last segment of list keys.
///
/// Hashes the canonical JSON encoding, so queries built from ordered maps
/// (`BTreeMap`, structs) hash identically across processes.
pub fn query_hash<Q: Serialize + ?Sized>(query: &Q) -> Result<String> {
    let canonical = serde_json::to_vec(query)?;
    let mut hasher = Sha256::new();
    hasher.update(&canonical);
    let mut digest = hex::encode(hasher.finalize());
    digest.truncate(QUERY_HASH_LEN);
    Ok(digest)
}

fn is_reserved_id(id: &str) -> bool {
    id.strip_prefix(LIST_SEGMENT)
        .is_some_and(|rest| rest.starts_with(':'))
}

fn validate_collection(collection: &str) -> Result<()> {
    if collection.is_empty() {
        return Err(Error::ValidationError("Empty collection name".to_string()));
    }
    if collection.contains(':') || has_glob_chars(collection) {
        return Err(Error::ValidationError(format!(
            "Collection name '{}' may not contain ':' or glob characters",
            collection
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pattern::glob_match;
    use std::collections::BTreeMap;

    #[test]
    fn test_entity_key() {
        let keys = CacheKeyBuilder::new();
        assert_eq!(keys.entity_key("posts", "42").unwrap(), "posts:42");
        assert_eq!(
            keys.entity_key("posts", "a:b").unwrap(),
            "posts:a:b",
            "ids may contain the separator"
        );
    }

    #[test]
    fn test_namespaced_keys() {
        let keys = CacheKeyBuilder::with_namespace("cms");
        assert_eq!(keys.entity_key("users", "1").unwrap(), "cms:users:1");
        assert_eq!(keys.collection_pattern("users").unwrap(), "cms:users:*");
        assert_eq!(keys.resource_of("cms:users:1"), Some("users"));
        assert_eq!(keys.resource_of("other:users:1"), None);
    }

    #[test]
    fn test_empty_namespace_is_ignored() {
        let keys = CacheKeyBuilder::with_namespace("");
        assert_eq!(keys.namespace(), None);
        assert_eq!(keys.entity_key("media", "9").unwrap(), "media:9");
    }

    #[test]
    fn test_invalid_collection_names() {
        let keys = CacheKeyBuilder::new();
        assert!(keys.entity_key("", "1").is_err());
        assert!(keys.entity_key("po:sts", "1").is_err());
        assert!(keys.collection_pattern("posts*").is_err());
        assert!(keys.entity_key("posts", "").is_err());
    }

    #[test]
    fn test_list_key_is_covered_by_list_pattern() {
        let keys = CacheKeyBuilder::new();
        let mut filter = BTreeMap::new();
        filter.insert("status", "published");
        let list = keys.list_key("posts", &filter).unwrap();
        let pattern = keys.list_pattern("posts").unwrap();

        assert!(list.starts_with("posts:list:"));
        assert!(glob_match(&pattern, &list));
        assert!(!glob_match(&pattern, "posts:42"));
        assert!(glob_match(&keys.collection_pattern("posts").unwrap(), &list));
    }

    #[test]
    fn test_ids_cannot_alias_list_keys() {
        let keys = CacheKeyBuilder::with_namespace("cms");
        let query: BTreeMap<&str, &str> = BTreeMap::new();
        let list = keys.list_key("posts", &query).unwrap();
        let hash = query_hash(&query).unwrap();

        let err = keys
            .entity_key("posts", &format!("list:{}", hash))
            .unwrap_err();
        assert!(matches!(err, Error::ValidationError(_)));
        assert!(keys.entity_key("posts", "list:").is_err());

        // Only the exact `list:` prefix is reserved
        assert_eq!(keys.entity_key("posts", "list").unwrap(), "cms:posts:list");
        assert_eq!(keys.entity_key("posts", "listing:1").unwrap(), "cms:posts:listing:1");
        assert!(!glob_match(&keys.list_pattern("posts").unwrap(), "cms:posts:list"));
        assert!(list.ends_with(&hash));
    }

    #[test]
    fn test_query_hash_is_stable_and_discriminating() {
        let mut a = BTreeMap::new();
        a.insert("author", "1");
        a.insert("status", "draft");
        let mut b = BTreeMap::new();
        b.insert("status", "draft");
        b.insert("author", "1");
        let mut c = BTreeMap::new();
        c.insert("status", "published");

        let ha = query_hash(&a).unwrap();
        assert_eq!(ha.len(), QUERY_HASH_LEN);
        assert_eq!(ha, query_hash(&b).unwrap());
        assert_ne!(ha, query_hash(&c).unwrap());
    }

    #[test]
    fn test_resource_of() {
        let keys = CacheKeyBuilder::new();
        assert_eq!(keys.resource_of("posts:1"), Some("posts"));
        assert_eq!(keys.resource_of("session"), Some("session"));
        assert_eq!(keys.resource_of(":x"), None);
    }
}
