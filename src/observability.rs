//! Metrics hooks and TTL policy.

use std::collections::HashMap;
use std::time::Duration;

/// Default expiry for cached values: one hour.
pub const DEFAULT_TTL: Duration = Duration::from_secs(3600);

/// Hook for recording cache outcomes.
///
/// The store never reports failures to its callers, so this is the only
/// channel through which a degraded backend becomes visible besides the log.
/// All methods default to no-ops.
pub trait CacheMetrics: Send + Sync {
    /// Value found and decoded.
    fn record_hit(&self, _key: &str, _duration: Duration) {}

    /// Key absent, expired, or holding an undecodable value.
    fn record_miss(&self, _key: &str, _duration: Duration) {}

    /// Read abandoned because the backend was unreachable.
    fn record_unavailable(&self, _key: &str, _duration: Duration) {}

    /// Write (set, delete, invalidate) acknowledged by the backend.
    fn record_write(&self, _key: &str, _duration: Duration) {}

    /// Any swallowed failure, reads included.
    fn record_error(&self, _key: &str, _error: &str) {}
}

/// Discards everything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoOpMetrics;

impl CacheMetrics for NoOpMetrics {}

/// How long a written value lives when the caller does not say.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum TtlPolicy {
    /// [`DEFAULT_TTL`] for everything.
    #[default]
    Default,

    /// Same TTL for all keys.
    Fixed(Duration),

    /// TTL by resource (the leading key segment), with a fallback.
    PerPrefix {
        ttls: HashMap<String, Duration>,
        fallback: Duration,
    },
}

impl TtlPolicy {
    /// Resolve the TTL for a resource such as `"posts"`.
    pub fn get_ttl(&self, resource: Option<&str>) -> Duration {
        match self {
            TtlPolicy::Default => DEFAULT_TTL,
            TtlPolicy::Fixed(ttl) => *ttl,
            TtlPolicy::PerPrefix { ttls, fallback } => resource
                .and_then(|r| ttls.get(r))
                .copied()
                .unwrap_or(*fallback),
        }
    }

    /// Convenience builder for [`TtlPolicy::PerPrefix`].
    pub fn per_prefix<I, S>(entries: I, fallback: Duration) -> Self
    where
        I: IntoIterator<Item = (S, Duration)>,
        S: Into<String>,
    {
        TtlPolicy::PerPrefix {
            ttls: entries.into_iter().map(|(k, v)| (k.into(), v)).collect(),
            fallback,
        }
    }
}
