//! Cache configuration

use std::time::Duration;

/// Configuration for the fetch cache
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Serve Fresh entries without re-running the producer.
    ///
    /// When false, every query takes the forced-refresh path: the producer
    /// runs again even if a Fresh entry exists, but concurrent callers for
    /// the same key are still coalesced into one execution.
    pub use_cache: bool,
    /// Optional freshness bound for cached entries.
    ///
    /// `None` means Fresh entries never expire on their own; they are only
    /// replaced by a refetch or removed by invalidation.
    pub fresh_ttl: Option<Duration>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            use_cache: true,
            fresh_ttl: None,
        }
    }
}
