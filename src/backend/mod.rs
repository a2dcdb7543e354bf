//! Cache backend abstraction and implementations.
//!
//! A backend is a dumb byte store: it knows nothing about envelopes, TTL
//! policy, retries or fail-open semantics. Those live in
//! [`CacheAsideStore`](crate::CacheAsideStore).

use crate::error::Result;
use std::future::Future;
use std::time::Duration;

#[cfg(feature = "inmemory")]
pub mod inmemory;
#[cfg(feature = "redis")]
pub mod redis;

#[cfg(feature = "inmemory")]
pub use self::inmemory::InMemoryBackend;
#[cfg(feature = "redis")]
pub use self::redis::{RedisBackend, RedisConfig};

/// Key-value engine the store accelerates reads with.
///
/// Implementations are cheap to clone and share one underlying client, so a
/// clone is a new handle to the same cache, never a copy of it.
pub trait CacheBackend: Clone + Send + Sync + 'static {
    /// Fetch raw bytes. `Ok(None)` on miss or expiry.
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<Vec<u8>>>> + Send;

    /// Store raw bytes. `ttl: None` keeps the value until deleted.
    fn set(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Remove one key. Deleting an absent key succeeds.
    fn delete(&self, key: &str) -> impl Future<Output = Result<()>> + Send;

    /// Remove many keys in one round trip. Returns how many existed.
    fn mdelete(&self, keys: &[&str]) -> impl Future<Output = Result<u64>> + Send;

    /// Enumerate keys matching a glob pattern (see [`crate::pattern`]).
    ///
    /// Not a snapshot: keys written concurrently may or may not appear.
    fn keys_matching(&self, pattern: &str) -> impl Future<Output = Result<Vec<String>>> + Send;

    fn exists(&self, key: &str) -> impl Future<Output = Result<bool>> + Send;

    /// Liveness probe. `Ok(false)` or `Err` both mean unhealthy.
    fn health_check(&self) -> impl Future<Output = Result<bool>> + Send;

    /// Release connections. Later operations fail with a backend error.
    fn close(&self) -> impl Future<Output = ()> + Send {
        async {}
    }

    /// Short name for logs.
    fn name(&self) -> &'static str;
}
