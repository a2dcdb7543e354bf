//! Redis cache backend implementation.

use super::CacheBackend;
use crate::config::{CacheConfig, DEFAULT_POOL_SIZE};
use crate::error::{Error, Result};
use deadpool_redis::redis::{cmd, RedisError};
use deadpool_redis::{Config, Connection, Pool, PoolConfig, PoolError, Runtime, Timeouts};
use std::time::Duration;

/// Keys requested per `SCAN` step. A hint to the server, not a limit.
const SCAN_COUNT: usize = 500;

/// Keys per `DEL` command when bulk deleting.
const DELETE_CHUNK: usize = 1000;

/// Configuration for the Redis backend.
#[derive(Clone, Debug)]
pub struct RedisConfig {
    pub url: String, // e.g., "redis://localhost:6379/0"
    pub pool_size: usize,
    /// Bound on waiting for, creating, and recycling a pooled connection.
    pub connection_timeout: Duration,
}

impl Default for RedisConfig {
    fn default() -> Self {
        RedisConfig {
            url: "redis://localhost:6379".to_string(),
            pool_size: DEFAULT_POOL_SIZE,
            connection_timeout: Duration::from_secs(5),
        }
    }
}

impl From<&CacheConfig> for RedisConfig {
    fn from(config: &CacheConfig) -> Self {
        RedisConfig {
            url: config.url.clone(),
            pool_size: config.pool_size,
            connection_timeout: config.operation_timeout,
        }
    }
}

/// Redis backend over a `deadpool-redis` connection pool.
///
/// Building the backend does no I/O: the first connection is opened by the
/// first operation, and reused afterwards. Every clone shares the same pool.
///
/// # Example
///
/// ```no_run
/// # use cms_cache::backend::{CacheBackend, RedisBackend, RedisConfig};
/// # async fn example() -> cms_cache::Result<()> {
/// let backend = RedisBackend::new(RedisConfig {
///     url: "redis://localhost:6379".to_string(),
///     ..Default::default()
/// })?;
/// backend.set("posts:1", b"value".to_vec(), None).await?;
/// let value = backend.get("posts:1").await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct RedisBackend {
    pool: Pool,
}

impl RedisBackend {
    /// Create the pool. No connection is attempted yet.
    ///
    /// # Errors
    /// `Error::ConfigError` if the URL is malformed or the pool cannot be built.
    pub fn new(config: RedisConfig) -> Result<Self> {
        if config.url.trim().is_empty() {
            return Err(Error::ConfigError("Redis URL is empty".to_string()));
        }

        let mut timeouts = Timeouts::default();
        timeouts.wait = Some(config.connection_timeout);
        timeouts.create = Some(config.connection_timeout);
        timeouts.recycle = Some(config.connection_timeout);

        let mut pool_config = PoolConfig::new(config.pool_size.max(1));
        pool_config.timeouts = timeouts;

        let mut cfg = Config::from_url(config.url.clone());
        cfg.pool = Some(pool_config);

        let pool = cfg
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| Error::ConfigError(format!("Failed to create Redis pool: {}", e)))?;

        info!(
            "✓ Redis backend initialized for {} (pool size: {})",
            redact_url(&config.url),
            config.pool_size
        );

        Ok(RedisBackend { pool })
    }

    /// Create from the crate-wide [`CacheConfig`].
    pub fn from_config(config: &CacheConfig) -> Result<Self> {
        Self::new(RedisConfig::from(config))
    }

    async fn connection(&self) -> Result<Connection> {
        self.pool.get().await.map_err(|e| match e {
            PoolError::Timeout(kind) => {
                Error::Timeout(format!("Redis connection pool timed out ({:?})", kind))
            }
            PoolError::Backend(e) => command_error("CONNECT", "-", e),
            PoolError::Closed => Error::CommandError("Redis pool is closed".to_string()),
            other => Error::BackendError(format!("Failed to get Redis connection: {}", other)),
        })
    }
}

/// Only connection-level failures are worth retrying.
fn command_error(op: &str, key: &str, e: RedisError) -> Error {
    if e.is_timeout() {
        Error::Timeout(format!("Redis {} timed out for key {}: {}", op, key, e))
    } else if e.is_io_error() || e.is_connection_refusal() || e.is_connection_dropped() {
        Error::BackendError(format!("Redis {} failed for key {}: {}", op, key, e))
    } else {
        Error::CommandError(format!("Redis {} rejected for key {}: {}", op, key, e))
    }
}

/// Hide credentials before logging a connection URL.
fn redact_url(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme_end), Some(at)) if at > scheme_end => {
            format!("{}://***@{}", &url[..scheme_end], &url[at + 1..])
        }
        _ => url.to_string(),
    }
}

impl CacheBackend for RedisBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut conn = self.connection().await?;
        let value: Option<Vec<u8>> = cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| command_error("GET", key, e))?;

        debug!(
            "✓ Redis GET {} -> {}",
            key,
            if value.is_some() { "HIT" } else { "MISS" }
        );
        Ok(value)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()> {
        let mut conn = self.connection().await?;
        let mut command = cmd("SET");
        command.arg(key).arg(value);
        if let Some(d) = ttl {
            // PX rejects 0, sub-millisecond TTLs round up
            let millis = d.as_millis().clamp(1, u64::MAX as u128) as u64;
            command.arg("PX").arg(millis);
        }

        let _: () = command
            .query_async(&mut conn)
            .await
            .map_err(|e| command_error("SET", key, e))?;

        debug!("✓ Redis SET {} (TTL: {:?})", key, ttl);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.connection().await?;
        let _: u64 = cmd("DEL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| command_error("DEL", key, e))?;

        debug!("✓ Redis DELETE {}", key);
        Ok(())
    }

    async fn mdelete(&self, keys: &[&str]) -> Result<u64> {
        if keys.is_empty() {
            return Ok(0);
        }

        let mut conn = self.connection().await?;
        let mut removed = 0u64;
        for chunk in keys.chunks(DELETE_CHUNK) {
            let n: u64 = cmd("DEL")
                .arg(chunk)
                .query_async(&mut conn)
                .await
                .map_err(|e| command_error("DEL", chunk[0], e))?;
            removed += n;
        }

        debug!("✓ Redis MDELETE {} keys ({} existed)", keys.len(), removed);
        Ok(removed)
    }

    async fn keys_matching(&self, pattern: &str) -> Result<Vec<String>> {
        // SCAN, never KEYS: KEYS blocks the server for the whole keyspace walk
        let mut conn = self.connection().await?;
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();

        loop {
            let (next, batch): (u64, Vec<String>) = cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(SCAN_COUNT)
                .query_async(&mut conn)
                .await
                .map_err(|e| command_error("SCAN", pattern, e))?;

            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }

        // SCAN may return a key more than once
        keys.sort_unstable();
        keys.dedup();

        debug!("✓ Redis SCAN {} -> {} matches", pattern, keys.len());
        Ok(keys)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let mut conn = self.connection().await?;
        let n: u64 = cmd("EXISTS")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| command_error("EXISTS", key, e))?;
        Ok(n > 0)
    }

    async fn health_check(&self) -> Result<bool> {
        match self.connection().await {
            Ok(mut conn) => {
                let pong: std::result::Result<String, RedisError> =
                    cmd("PING").query_async(&mut conn).await;
                Ok(matches!(pong.as_deref(), Ok("PONG")))
            }
            Err(_) => Ok(false),
        }
    }

    async fn close(&self) {
        self.pool.close();
        info!("✓ Redis connection pool closed");
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}
