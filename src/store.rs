//! Cache-aside store - fail-open facade over a cache backend.

use crate::backend::CacheBackend;
use crate::config::{CacheConfig, MAX_RETRIES_LIMIT, MAX_RETRY_DELAY};
use crate::error::{Error, Result};
use crate::key::CacheKeyBuilder;
use crate::observability::{CacheMetrics, NoOpMetrics, TtlPolicy};
use crate::serialization::{deserialize_from_cache, serialize_for_cache};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Outcome of a cache read, as seen inside the store.
///
/// Callers of [`CacheAsideStore::get`] only observe value-or-absent; this
/// type keeps a miss distinguishable from an unreachable backend for code
/// that cares (tests, health reporting, metrics).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup<T> {
    /// Value present and decoded.
    Hit(T),
    /// Key absent, expired, or holding bytes that do not decode.
    Miss,
    /// Backend failed after the retry budget was spent.
    Unavailable,
}

impl<T> Lookup<T> {
    pub fn into_option(self) -> Option<T> {
        match self {
            Lookup::Hit(value) => Some(value),
            Lookup::Miss | Lookup::Unavailable => None,
        }
    }

    pub fn is_hit(&self) -> bool {
        matches!(self, Lookup::Hit(_))
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, Lookup::Unavailable)
    }
}

/// Timeout and retry budget applied to every backend call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Budget for a single attempt.
    pub operation_timeout: Duration,
    /// Retries after the first attempt, transient errors only. Values above
    /// [`MAX_RETRIES_LIMIT`] are treated as the limit.
    pub max_retries: u32,
    /// Attempt `n` (1-based) is followed by `backoff * 2^(n-1)`, capped at
    /// [`MAX_RETRY_DELAY`].
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            operation_timeout: Duration::from_millis(500),
            max_retries: crate::config::DEFAULT_MAX_RETRIES,
            backoff: Duration::from_millis(50),
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no delay. Useful when the caller already degrades gracefully.
    pub fn no_retry(operation_timeout: Duration) -> Self {
        RetryPolicy {
            operation_timeout,
            max_retries: 0,
            backoff: Duration::ZERO,
        }
    }

    fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.backoff.saturating_mul(factor).min(MAX_RETRY_DELAY)
    }

    fn max_attempts(&self) -> u32 {
        self.max_retries.min(MAX_RETRIES_LIMIT).saturating_add(1)
    }
}

impl From<&CacheConfig> for RetryPolicy {
    fn from(config: &CacheConfig) -> Self {
        RetryPolicy {
            operation_timeout: config.operation_timeout,
            max_retries: config.max_retries,
            backoff: config.retry_backoff,
        }
    }
}

/// Read-through cache facade with explicit invalidation.
///
/// Every operation is fail-open: backend errors, timeouts and undecodable
/// payloads are logged and reported to [`CacheMetrics`], then surface as an
/// absent value or a silent no-op. Cache health changes latency, never
/// results.
///
/// The store is `Clone`; clones share the backend handle, metrics and
/// policies through an `Arc`, so one instance can be created at startup and
/// handed to every request handler.
///
/// # Example
///
/// ```no_run
/// use cms_cache::{backend::InMemoryBackend, CacheAsideStore};
/// use std::time::Duration;
///
/// # async fn example() {
/// let store = CacheAsideStore::new(InMemoryBackend::new());
///
/// store.set("posts:1", &"hello").await;
/// let cached: Option<String> = store.get("posts:1").await;
///
/// store.set_with_ttl("session:abc", &42u32, Duration::from_secs(60)).await;
/// store.invalidate_pattern("posts:*").await;
/// # }
/// ```
pub struct CacheAsideStore<B: CacheBackend> {
    inner: Arc<StoreInner<B>>,
}

struct StoreInner<B> {
    backend: B,
    metrics: Box<dyn CacheMetrics>,
    ttl_policy: TtlPolicy,
    retry: RetryPolicy,
    keys: CacheKeyBuilder,
}

impl<B: CacheBackend> Clone for CacheAsideStore<B> {
    fn clone(&self) -> Self {
        CacheAsideStore {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<B: CacheBackend> CacheAsideStore<B> {
    /// Create a store with default TTL (1h), retry policy and no metrics.
    pub fn new(backend: B) -> Self {
        CacheAsideStore {
            inner: Arc::new(StoreInner {
                backend,
                metrics: Box::new(NoOpMetrics),
                ttl_policy: TtlPolicy::default(),
                retry: RetryPolicy::default(),
                keys: CacheKeyBuilder::new(),
            }),
        }
    }

    /// Create a store whose TTL, retry budget and key namespace come from `config`.
    pub fn from_config(backend: B, config: &CacheConfig) -> Self {
        let keys = config
            .key_prefix
            .as_deref()
            .map(|ns| CacheKeyBuilder::with_namespace(ns))
            .unwrap_or_default();
        Self::new(backend)
            .with_ttl_policy(TtlPolicy::Fixed(config.default_ttl))
            .with_retry_policy(RetryPolicy::from(config))
            .with_key_builder(keys)
    }

    /// Set custom metrics handler.
    pub fn with_metrics(self, metrics: Box<dyn CacheMetrics>) -> Self {
        self.rebuild(|inner| inner.metrics = metrics)
    }

    /// Set custom TTL policy.
    pub fn with_ttl_policy(self, policy: TtlPolicy) -> Self {
        self.rebuild(|inner| inner.ttl_policy = policy)
    }

    pub fn with_retry_policy(self, retry: RetryPolicy) -> Self {
        self.rebuild(|inner| inner.retry = retry)
    }

    pub fn with_key_builder(self, keys: CacheKeyBuilder) -> Self {
        self.rebuild(|inner| inner.keys = keys)
    }

    /// Apply a configuration change. Only valid before the store is shared.
    fn rebuild(self, apply: impl FnOnce(&mut StoreInner<B>)) -> Self {
        match Arc::try_unwrap(self.inner) {
            Ok(mut inner) => {
                apply(&mut inner);
                CacheAsideStore {
                    inner: Arc::new(inner),
                }
            }
            Err(shared) => {
                warn!("Store already shared; configuration change ignored");
                CacheAsideStore { inner: shared }
            }
        }
    }

    /// Key builder for this store's namespace.
    pub fn keys(&self) -> &CacheKeyBuilder {
        &self.inner.keys
    }

    /// Get backend reference (for advanced use).
    pub fn backend(&self) -> &B {
        &self.inner.backend
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.inner.retry
    }

    /// TTL a plain [`set`](Self::set) would apply to `key`.
    pub fn ttl_for(&self, key: &str) -> Duration {
        let resource = self.inner.keys.resource_of(key);
        self.inner.ttl_policy.get_ttl(resource)
    }

    /// Look up `key`, keeping the miss / unavailable distinction.
    pub async fn lookup<T: DeserializeOwned>(&self, key: &str) -> Lookup<T> {
        let timer = Instant::now();
        let metrics = &self.inner.metrics;

        let bytes = match self.run("GET", key, || self.inner.backend.get(key)).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                metrics.record_miss(key, timer.elapsed());
                return Lookup::Miss;
            }
            Err(e) => {
                warn!("Cache get failed for {}, treating as miss: {}", key, e);
                metrics.record_error(key, &e.to_string());
                metrics.record_unavailable(key, timer.elapsed());
                return Lookup::Unavailable;
            }
        };

        match deserialize_from_cache::<T>(&bytes) {
            Ok(value) => {
                debug!("✓ Cache hit for {} in {:?}", key, timer.elapsed());
                metrics.record_hit(key, timer.elapsed());
                Lookup::Hit(value)
            }
            Err(e) => {
                warn!("Undecodable cache entry {}, treating as miss: {}", key, e);
                metrics.record_error(key, &e.to_string());
                metrics.record_miss(key, timer.elapsed());
                Lookup::Miss
            }
        }
    }

    /// Cached value for `key`, or `None` on miss or any cache failure.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.lookup(key).await.into_option()
    }

    /// Write `value` with the TTL the store's policy assigns to `key`.
    pub async fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T) {
        let ttl = self.ttl_for(key);
        self.set_with_ttl(key, value, ttl).await;
    }

    /// Write `value` expiring after `ttl`.
    ///
    /// A zero TTL means the value is already expired: any existing entry is
    /// deleted and nothing is written.
    pub async fn set_with_ttl<T: Serialize + ?Sized>(&self, key: &str, value: &T, ttl: Duration) {
        if ttl.is_zero() {
            debug!("Zero TTL for {}, deleting instead of writing", key);
            self.del(key).await;
            return;
        }

        let timer = Instant::now();
        let bytes = match serialize_for_cache(value) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Cache set skipped for {}, value not serializable: {}", key, e);
                self.inner.metrics.record_error(key, &e.to_string());
                return;
            }
        };

        let result = self
            .run("SET", key, || {
                self.inner.backend.set(key, bytes.clone(), Some(ttl))
            })
            .await;
        self.finish_write("set", key, timer, result);
    }

    /// Remove one entry. Absent keys are a no-op.
    pub async fn del(&self, key: &str) {
        let timer = Instant::now();
        let result = self.run("DEL", key, || self.inner.backend.delete(key)).await;
        self.finish_write("del", key, timer, result);
    }

    /// Delete every key matching the glob `pattern`.
    ///
    /// Scan-then-delete is not atomic: a key matching `pattern` written
    /// between the two steps may survive. Zero matches is a no-op.
    pub async fn invalidate_pattern(&self, pattern: &str) {
        let timer = Instant::now();
        let result = self.delete_matching(pattern).await;
        if let Ok(n) = &result {
            debug!("✓ Invalidated {} keys matching {}", n, pattern);
        }
        self.finish_write("invalidate", pattern, timer, result.map(|_| ()));
    }

    async fn delete_matching(&self, pattern: &str) -> Result<u64> {
        let keys = self
            .run("SCAN", pattern, || self.inner.backend.keys_matching(pattern))
            .await?;
        if keys.is_empty() {
            return Ok(0);
        }
        let refs: Vec<&str> = keys.iter().map(String::as_str).collect();
        self.run("MDEL", pattern, || self.inner.backend.mdelete(&refs))
            .await
    }

    /// Ping the backend. Never errors; `false` means unhealthy.
    pub async fn ping(&self) -> bool {
        match self
            .run("PING", "-", || self.inner.backend.health_check())
            .await
        {
            Ok(healthy) => healthy,
            Err(e) => {
                warn!("Cache health check failed: {}", e);
                false
            }
        }
    }

    /// Release the backend's connections. Later operations resolve fail-open.
    pub async fn shutdown(&self) {
        info!("Shutting down {} cache backend", self.inner.backend.name());
        self.inner.backend.close().await;
    }

    fn finish_write(&self, op: &str, key: &str, timer: Instant, result: Result<()>) {
        match result {
            Ok(()) => self.inner.metrics.record_write(key, timer.elapsed()),
            Err(e) => {
                warn!("Cache {} failed for {}, ignoring: {}", op, key, e);
                self.inner.metrics.record_error(key, &e.to_string());
            }
        }
    }

    /// Run one backend call under the timeout and retry budget.
    async fn run<R, F, Fut>(&self, op: &str, key: &str, mut call: F) -> Result<R>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<R>>,
    {
        let policy = self.inner.retry;
        let max_attempts = policy.max_attempts();
        let mut attempts = 0;

        loop {
            attempts += 1;

            let outcome = match tokio::time::timeout(policy.operation_timeout, call()).await {
                Ok(result) => result,
                Err(_) => Err(Error::Timeout(format!(
                    "{} {} exceeded {:?}",
                    op, key, policy.operation_timeout
                ))),
            };

            match outcome {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempts < max_attempts => {
                    debug!(
                        "Cache {} {} failed (attempt {}/{}), retrying: {}",
                        op, key, attempts, max_attempts, e
                    );
                    let delay = policy.delay_after(attempts);
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }
}
