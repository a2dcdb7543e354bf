//! Read strategies for [`CachedCollection`](crate::CachedCollection).

use std::fmt;

/// How a read combines the cache and the backing store.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum CacheStrategy {
    /// Cache only. A miss is `None`; the backing store is never consulted.
    Fresh,

    /// Cache first, backing store on miss, then repopulate. The default.
    #[default]
    Refresh,

    /// Drop the cached entry, then read through as `Refresh` would.
    Invalidate,

    /// Skip the cache read and go straight to the backing store.
    /// The result still repopulates the cache for other readers.
    Bypass,
}

impl fmt::Display for CacheStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CacheStrategy::Fresh => "fresh",
            CacheStrategy::Refresh => "refresh",
            CacheStrategy::Invalidate => "invalidate",
            CacheStrategy::Bypass => "bypass",
        };
        f.write_str(name)
    }
}
