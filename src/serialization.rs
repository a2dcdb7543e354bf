//! Versioned cache envelope.
//!
//! Every value the store writes is wrapped as:
//!
//! ```text
//! [MAGIC: 4 bytes "CMSC"] [VERSION: u32 little-endian] [JSON PAYLOAD]
//! ```
//!
//! JSON keeps arbitrary `serde` payloads (including `serde_json::Value`
//! documents) lossless. The header lets a reader reject foreign or
//! old-schema bytes up front; the store treats any rejection as a miss.

use crate::error::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Envelope magic.
pub const CACHE_MAGIC: [u8; 4] = *b"CMSC";

/// Bump when the payload layout of cached values changes incompatibly.
pub const CURRENT_SCHEMA_VERSION: u32 = 1;

const HEADER_LEN: usize = 8;

/// Serialize `value` into an envelope.
pub fn serialize_for_cache<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
    let payload = serde_json::to_vec(value)?;
    let mut bytes = Vec::with_capacity(HEADER_LEN + payload.len());
    bytes.extend_from_slice(&CACHE_MAGIC);
    bytes.extend_from_slice(&CURRENT_SCHEMA_VERSION.to_le_bytes());
    bytes.extend_from_slice(&payload);
    Ok(bytes)
}

/// Validate the envelope header and decode the payload.
///
/// # Errors
///
/// - `Error::InvalidCacheEntry`: truncated header or bad magic
/// - `Error::VersionMismatch`: written by another schema version
/// - `Error::DeserializationError`: payload does not decode as `T`
pub fn deserialize_from_cache<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    if bytes.len() < HEADER_LEN {
        return Err(Error::InvalidCacheEntry(format!(
            "Entry too short: {} bytes",
            bytes.len()
        )));
    }

    let (magic, rest) = bytes.split_at(4);
    if magic != CACHE_MAGIC {
        return Err(Error::InvalidCacheEntry(format!(
            "Bad magic: {:?}",
            magic
        )));
    }

    let (version, payload) = rest.split_at(4);
    let mut version_bytes = [0u8; 4];
    version_bytes.copy_from_slice(version);
    let found = u32::from_le_bytes(version_bytes);
    if found != CURRENT_SCHEMA_VERSION {
        return Err(Error::VersionMismatch {
            expected: CURRENT_SCHEMA_VERSION,
            found,
        });
    }

    serde_json::from_slice(payload).map_err(|e| Error::DeserializationError(e.to_string()))
}
