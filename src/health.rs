//! Liveness report for the cache and the backing store.

use crate::backend::CacheBackend;
use crate::repository::DocumentStore;
use crate::store::CacheAsideStore;
use chrono::{SecondsFormat, Utc};
use serde::Serialize;

/// State of one dependency.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ComponentStatus {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ComponentStatus {
    pub fn healthy(result: impl Into<String>) -> Self {
        ComponentStatus {
            ok: true,
            result: Some(result.into()),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        ComponentStatus {
            ok: false,
            result: None,
            error: Some(error.into()),
        }
    }
}

/// Combined health of the cache and the backing store.
///
/// Serializes as `{"ok", "ts", "cache", "store"}`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    pub ok: bool,
    pub ts: String,
    pub cache: ComponentStatus,
    pub store: ComponentStatus,
}

impl HealthReport {
    /// HTTP status to answer a health probe with: 200 or 503.
    pub fn status_code(&self) -> u16 {
        if self.ok {
            200
        } else {
            503
        }
    }
}

/// Ping both dependencies. Never errors; failures are reported in the body.
pub async fn check<B, S>(cache: &CacheAsideStore<B>, docs: &S) -> HealthReport
where
    B: CacheBackend,
    S: DocumentStore,
{
    let cache_status = if cache.ping().await {
        ComponentStatus::healthy("PONG")
    } else {
        ComponentStatus::failed(format!(
            "{} cache did not answer ping",
            cache.backend().name()
        ))
    };

    let store_status = match docs.ping().await {
        Ok(()) => ComponentStatus::healthy("ok"),
        Err(e) => ComponentStatus::failed(e.to_string()),
    };

    let ok = cache_status.ok && store_status.ok;
    if !ok {
        warn!(
            "Health check degraded (cache ok: {}, store ok: {})",
            cache_status.ok, store_status.ok
        );
    }

    HealthReport {
        ok,
        ts: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        cache: cache_status,
        store: store_status,
    }
}
