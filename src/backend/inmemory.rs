//! In-process cache backend.
//!
//! Emulates the Redis subset the store relies on (expiry, glob key matching,
//! multi-key delete) so the whole crate can be exercised without a server.

use super::CacheBackend;
use crate::error::{Error, Result};
use crate::pattern::glob_match;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Clone, Debug)]
struct StoredValue {
    bytes: Vec<u8>,
    expires_at: Option<Instant>,
}

impl StoredValue {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

/// Thread-safe in-memory backend.
///
/// Expiry is lazy: a stale entry is dropped when it is next touched, or in
/// bulk by [`purge_expired`](Self::purge_expired). Deadlines use the tokio
/// clock, so paused-time tests can advance past a TTL deterministically.
///
/// # Example
///
/// ```no_run
/// # use cms_cache::backend::{CacheBackend, InMemoryBackend};
/// # async fn example() -> cms_cache::Result<()> {
/// let backend = InMemoryBackend::new();
/// backend.set("posts:1", b"payload".to_vec(), None).await?;
/// assert!(backend.exists("posts:1").await?);
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Default)]
pub struct InMemoryBackend {
    entries: Arc<DashMap<String, StoredValue>>,
    outage: Arc<AtomicBool>,
    closed: Arc<AtomicBool>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every operation fail as if the server were unreachable.
    ///
    /// Lets callers rehearse a cache outage without tearing down a real one.
    pub fn simulate_outage(&self, down: bool) {
        self.outage.store(down, Ordering::SeqCst);
        if down {
            warn!("⚠ In-memory cache outage simulation enabled");
        }
    }

    /// Number of live (non-expired) entries.
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .iter()
            .filter(|entry| !entry.value().is_expired(now))
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Drop expired entries. Returns how many were removed.
    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, value| !value.is_expired(now));
        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            debug!("✓ InMemory purged {} expired entries", removed);
        }
        removed
    }

    pub async fn clear_all(&self) {
        self.entries.clear();
        warn!("⚠ InMemory cache cleared");
    }

    fn check_available(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::CommandError("In-memory backend is closed".to_string()));
        }
        if self.outage.load(Ordering::SeqCst) {
            return Err(Error::BackendError(
                "In-memory backend unavailable (simulated outage)".to_string(),
            ));
        }
        Ok(())
    }

    /// Remove `key` if it holds an expired value. Returns whether a live value remains.
    fn evict_if_expired(&self, key: &str, now: Instant) -> bool {
        self.entries.remove_if(key, |_, value| value.is_expired(now));
        self.entries.contains_key(key)
    }
}

impl CacheBackend for InMemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.check_available()?;
        let now = Instant::now();
        if !self.evict_if_expired(key, now) {
            debug!("✓ InMemory GET {} -> MISS", key);
            return Ok(None);
        }
        let value = self.entries.get(key).map(|entry| entry.bytes.clone());
        debug!(
            "✓ InMemory GET {} -> {}",
            key,
            if value.is_some() { "HIT" } else { "MISS" }
        );
        Ok(value)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()> {
        self.check_available()?;
        let expires_at = ttl.map(|d| Instant::now() + d);
        self.entries.insert(
            key.to_string(),
            StoredValue {
                bytes: value,
                expires_at,
            },
        );
        debug!("✓ InMemory SET {} (TTL: {:?})", key, ttl);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.check_available()?;
        self.entries.remove(key);
        debug!("✓ InMemory DELETE {}", key);
        Ok(())
    }

    async fn mdelete(&self, keys: &[&str]) -> Result<u64> {
        self.check_available()?;
        let now = Instant::now();
        let mut removed = 0u64;
        for key in keys {
            if let Some((_, value)) = self.entries.remove(*key) {
                if !value.is_expired(now) {
                    removed += 1;
                }
            }
        }
        debug!("✓ InMemory MDELETE {} keys ({} existed)", keys.len(), removed);
        Ok(removed)
    }

    async fn keys_matching(&self, pattern: &str) -> Result<Vec<String>> {
        self.check_available()?;
        let now = Instant::now();
        let keys: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| !entry.value().is_expired(now) && glob_match(pattern, entry.key()))
            .map(|entry| entry.key().clone())
            .collect();
        debug!("✓ InMemory KEYS {} -> {} matches", pattern, keys.len());
        Ok(keys)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        self.check_available()?;
        Ok(self.evict_if_expired(key, Instant::now()))
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(self.check_available().is_ok())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        info!("✓ InMemory backend closed");
    }

    fn name(&self) -> &'static str {
        "inmemory"
    }
}
