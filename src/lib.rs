//! # cms-cache
//!
//! Fail-open cache-aside data access for a Postgres-backed CMS.
//!
//! ## Features
//!
//! - **Fail-Open:** Cache errors, timeouts and corrupt entries become misses or no-ops, never caller errors
//! - **Backend Agnostic:** Redis (pooled, `SCAN`-based invalidation) and in-memory backends
//! - **Pattern Invalidation:** Glob patterns with Redis semantics (`posts:*`)
//! - **Bounded Latency:** Per-attempt timeouts and a small retry budget for transient failures
//! - **Key Discipline:** One key scheme for documents and query results
//!
//! ## Quick Start
//!
//! ```ignore
//! use cms_cache::{
//!     backend::RedisBackend,
//!     config::CacheConfig,
//!     repository::{collections, InMemoryDocumentStore, Query},
//!     CacheAsideStore, CachedCollection,
//! };
//!
//! // 1. Load configuration (REDIS_URL is required)
//! let config = CacheConfig::from_env()?;
//!
//! // 2. One backend handle for the whole process
//! let backend = RedisBackend::from_config(&config)?;
//! let cache = CacheAsideStore::from_config(backend, &config);
//!
//! // 3. Plain key-value use
//! cache.set("session:abc", &user).await;
//! let user: Option<User> = cache.get("session:abc").await;
//! cache.invalidate_pattern("session:*").await;
//!
//! // 4. Or read a collection through the cache
//! let posts = CachedCollection::new(collections::POSTS, document_store, cache.clone())?;
//! let post = posts.find_by_id("42").await?;
//! let drafts = posts.find(&Query::new().where_equals("status", "draft")).await?;
//!
//! // 5. Drain connections on exit
//! cache.shutdown().await;
//! ```

#[macro_use]
extern crate log;

pub mod backend;
pub mod collection;
pub mod config;
pub mod error;
pub mod health;
pub mod key;
pub mod observability;
pub mod pattern;
pub mod repository;
pub mod serialization;
pub mod store;
pub mod strategy;

// Re-exports for convenience
pub use backend::CacheBackend;
pub use collection::CachedCollection;
pub use config::CacheConfig;
pub use error::{Error, Result};
pub use key::CacheKeyBuilder;
pub use repository::{Document, DocumentStore, Query};
pub use store::{CacheAsideStore, Lookup, RetryPolicy};
pub use strategy::CacheStrategy;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
