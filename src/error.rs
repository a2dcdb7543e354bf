//! Error types for cache and backing-store operations.

use thiserror::Error;

/// Crate-wide error type.
///
/// Only [`Error::ConfigError`] is ever meant to reach application code
/// unchanged. Everything raised by a cache operation is absorbed by
/// [`CacheAsideStore`](crate::CacheAsideStore) and turned into a miss or a
/// silent no-op.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Missing or malformed configuration. Fatal at startup, never retried.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Cache backend unreachable or returned an error.
    #[error("Backend error: {0}")]
    BackendError(String),

    /// Backend answered but refused the command (wrong type, closed pool).
    #[error("Command rejected: {0}")]
    CommandError(String),

    /// A single cache round trip exceeded its time budget.
    #[error("Operation timed out: {0}")]
    Timeout(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Deserialization error: {0}")]
    DeserializationError(String),

    /// Stored bytes are not a cache envelope (bad magic or truncated header).
    #[error("Invalid cache entry: {0}")]
    InvalidCacheEntry(String),

    /// Envelope was written by a different schema version.
    #[error("Cache schema version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },

    /// Backing (authoritative) store failure.
    #[error("Repository error: {0}")]
    RepositoryError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

impl Error {
    /// Whether retrying the same operation may succeed.
    ///
    /// Connection failures and timeouts are transient. Rejected commands,
    /// serialization and configuration problems fail identically on every
    /// attempt.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::BackendError(_) | Error::Timeout(_))
    }

}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::SerializationError(e.to_string())
    }
}

/// Convenience result alias.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(Error::BackendError("refused".into()).is_transient());
        assert!(Error::Timeout("get".into()).is_transient());
        assert!(!Error::ConfigError("REDIS_URL".into()).is_transient());
        assert!(!Error::DeserializationError("eof".into()).is_transient());
        assert!(!Error::CommandError("WRONGTYPE".into()).is_transient());
    }

    #[test]
    fn test_version_mismatch_display() {
        let err = Error::VersionMismatch {
            expected: 1,
            found: 7,
        };
        assert_eq!(
            err.to_string(),
            "Cache schema version mismatch: expected 1, found 7"
        );
    }
}
