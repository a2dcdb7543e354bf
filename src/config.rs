//! Cache configuration loaded from the environment.

use crate::error::{Error, Result};
use std::env;
use std::time::Duration;

/// Default connection pool size.
/// Formula: (CPU cores × 2) + 1, rounded to 16 for 8-core hosts.
pub const DEFAULT_POOL_SIZE: usize = 16;

/// Default number of retries after the first failed attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Upper bound on retries; larger budgets turn a cache outage into a stall.
pub const MAX_RETRIES_LIMIT: u32 = 10;

/// Longest single backoff sleep between attempts.
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(2);

/// Runtime settings for the cache client.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CacheConfig {
    /// Single endpoint, e.g. `redis://localhost:6379/0`.
    pub url: String,
    pub default_ttl: Duration,
    /// Budget for one attempt of one operation.
    pub operation_timeout: Duration,
    pub max_retries: u32,
    /// Base delay; attempt `n` waits `retry_backoff * 2^(n-1)`.
    pub retry_backoff: Duration,
    pub pool_size: usize,
    pub key_prefix: Option<String>,
}

impl CacheConfig {
    /// Config for `url` with every other field at its default.
    pub fn new(url: impl Into<String>) -> Self {
        CacheConfig {
            url: url.into(),
            default_ttl: crate::observability::DEFAULT_TTL,
            operation_timeout: Duration::from_millis(500),
            max_retries: DEFAULT_MAX_RETRIES,
            retry_backoff: Duration::from_millis(50),
            pool_size: DEFAULT_POOL_SIZE,
            key_prefix: None,
        }
    }

    /// Load from process environment.
    ///
    /// # Environment Variables
    /// - `REDIS_URL` - cache endpoint (required)
    /// - `CACHE_DEFAULT_TTL_SECS` - default expiry (default: 3600)
    /// - `CACHE_OPERATION_TIMEOUT_MS` - per-attempt timeout (default: 500)
    /// - `CACHE_MAX_RETRIES` - retries for transient errors (default: 3)
    /// - `CACHE_RETRY_BACKOFF_MS` - base retry delay (default: 50)
    /// - `REDIS_POOL_SIZE` - connection pool size (default: 16)
    /// - `CACHE_KEY_PREFIX` - namespace for all keys (default: none)
    ///
    /// # Errors
    /// `Error::ConfigError` if `REDIS_URL` is missing, any numeric value is
    /// malformed, or `CACHE_MAX_RETRIES` exceeds [`MAX_RETRIES_LIMIT`].
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an injectable variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let url = lookup("REDIS_URL")
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .ok_or_else(|| Error::ConfigError("REDIS_URL is not defined".to_string()))?;

        let mut config = CacheConfig::new(url);

        if let Some(secs) = parse_var::<u64>(&lookup, "CACHE_DEFAULT_TTL_SECS")? {
            if secs == 0 {
                return Err(Error::ConfigError(
                    "CACHE_DEFAULT_TTL_SECS must be positive".to_string(),
                ));
            }
            config.default_ttl = Duration::from_secs(secs);
        }
        if let Some(ms) = parse_var::<u64>(&lookup, "CACHE_OPERATION_TIMEOUT_MS")? {
            config.operation_timeout = Duration::from_millis(ms.max(1));
        }
        if let Some(n) = parse_var::<u32>(&lookup, "CACHE_MAX_RETRIES")? {
            if n > MAX_RETRIES_LIMIT {
                return Err(Error::ConfigError(format!(
                    "CACHE_MAX_RETRIES must be at most {}, got {}",
                    MAX_RETRIES_LIMIT, n
                )));
            }
            config.max_retries = n;
        }
        if let Some(ms) = parse_var::<u64>(&lookup, "CACHE_RETRY_BACKOFF_MS")? {
            config.retry_backoff = Duration::from_millis(ms);
        }
        if let Some(size) = parse_var::<usize>(&lookup, "REDIS_POOL_SIZE")? {
            config.pool_size = size.max(1);
        }
        config.key_prefix = lookup("CACHE_KEY_PREFIX").filter(|v| !v.is_empty());

        Ok(config)
    }
}

fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
) -> Result<Option<T>> {
    match lookup(name) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| Error::ConfigError(format!("{} has an invalid value: {:?}", name, raw))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_missing_url_is_fatal() {
        let err = CacheConfig::from_lookup(lookup_from(&[])).unwrap_err();
        assert_eq!(err, Error::ConfigError("REDIS_URL is not defined".into()));

        let err = CacheConfig::from_lookup(lookup_from(&[("REDIS_URL", "  ")])).unwrap_err();
        assert!(matches!(err, Error::ConfigError(_)));
    }

    #[test]
    fn test_defaults() {
        let config =
            CacheConfig::from_lookup(lookup_from(&[("REDIS_URL", "redis://localhost:6379")]))
                .unwrap();
        assert_eq!(config.url, "redis://localhost:6379");
        assert_eq!(config.default_ttl, Duration::from_secs(3600));
        assert_eq!(config.operation_timeout, Duration::from_millis(500));
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.retry_backoff, Duration::from_millis(50));
        assert_eq!(config.pool_size, DEFAULT_POOL_SIZE);
        assert_eq!(config.key_prefix, None);
    }

    #[test]
    fn test_overrides() {
        let config = CacheConfig::from_lookup(lookup_from(&[
            ("REDIS_URL", "redis://cache:6379/2"),
            ("CACHE_DEFAULT_TTL_SECS", "120"),
            ("CACHE_OPERATION_TIMEOUT_MS", "250"),
            ("CACHE_MAX_RETRIES", "0"),
            ("CACHE_RETRY_BACKOFF_MS", "10"),
            ("REDIS_POOL_SIZE", "4"),
            ("CACHE_KEY_PREFIX", "cms"),
        ]))
        .unwrap();
        assert_eq!(config.default_ttl, Duration::from_secs(120));
        assert_eq!(config.operation_timeout, Duration::from_millis(250));
        assert_eq!(config.max_retries, 0);
        assert_eq!(config.retry_backoff, Duration::from_millis(10));
        assert_eq!(config.pool_size, 4);
        assert_eq!(config.key_prefix.as_deref(), Some("cms"));
    }

    #[test]
    fn test_malformed_numbers_are_config_errors() {
        let err = CacheConfig::from_lookup(lookup_from(&[
            ("REDIS_URL", "redis://localhost"),
            ("CACHE_MAX_RETRIES", "three"),
        ]))
        .unwrap_err();
        assert!(matches!(err, Error::ConfigError(msg) if msg.contains("CACHE_MAX_RETRIES")));

        let err = CacheConfig::from_lookup(lookup_from(&[
            ("REDIS_URL", "redis://localhost"),
            ("CACHE_DEFAULT_TTL_SECS", "0"),
        ]))
        .unwrap_err();
        assert!(matches!(err, Error::ConfigError(_)));
    }

    #[test]
    fn test_retry_budget_is_bounded() {
        let config = CacheConfig::from_lookup(lookup_from(&[
            ("REDIS_URL", "redis://localhost"),
            ("CACHE_MAX_RETRIES", "10"),
        ]))
        .unwrap();
        assert_eq!(config.max_retries, MAX_RETRIES_LIMIT);

        for too_many in ["11", "40", "4294967295"] {
            let err = CacheConfig::from_lookup(lookup_from(&[
                ("REDIS_URL", "redis://localhost"),
                ("CACHE_MAX_RETRIES", too_many),
            ]))
            .unwrap_err();
            assert!(matches!(err, Error::ConfigError(msg) if msg.contains("at most 10")));
        }
    }
}
