//! Cache tier traits and the cacheable artifact marker.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use swatchbook_core::{ComputedTheme, Swatch, SwatchbookResult};

/// Marker trait for artifacts that can live in the disk tier.
///
/// `kind()` names the LMDB database the artifact is stored in and tags log
/// lines, so it must be stable across releases.
pub trait Cacheable: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    fn kind() -> &'static str;
}

/// Key/value cache tier.
///
/// Implementations must be internally synchronized: concurrent `get`/`set`
/// from many tasks on the same key must never corrupt the store.
#[async_trait]
pub trait Cache<T>: Send + Sync
where
    T: Clone + Send + Sync + 'static,
{
    /// Get a value, or `None` on miss.
    async fn get(&self, key: &str) -> SwatchbookResult<Option<T>>;

    /// Insert or overwrite a value.
    async fn set(&self, key: &str, value: T) -> SwatchbookResult<()>;

    async fn contains_key(&self, key: &str) -> SwatchbookResult<bool>;

    /// Insert many entries at once.
    async fn put_all(&self, entries: Vec<(String, T)>) -> SwatchbookResult<()>;
}

/// Durable cache tier.
///
/// A value once `set` must be observable after a process restart.
#[async_trait]
pub trait DiskCache<T>: Cache<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Every stored entry, used for cold-start hydration of the memory tier.
    async fn select_all(&self) -> SwatchbookResult<Vec<(String, T)>>;

    /// Delete entries written more than `max_age` ago. Returns the number
    /// of entries removed.
    async fn remove_older_than(&self, max_age: Duration) -> SwatchbookResult<u64>;
}

/// Which tier satisfied a lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheTier {
    Memory,
    Disk,
}

impl fmt::Display for CacheTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheTier::Memory => write!(f, "memory"),
            CacheTier::Disk => write!(f, "disk"),
        }
    }
}

/// Statistics about cache usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses.
    pub misses: u64,
    /// Number of entries currently in cache.
    pub entry_count: u64,
    /// Number of evictions due to capacity.
    pub evictions: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

// ============================================================================
// IMPLEMENTATIONS FOR SWATCHBOOK ARTIFACTS
// ============================================================================

impl Cacheable for Swatch {
    fn kind() -> &'static str {
        "swatches"
    }
}

impl Cacheable for ComputedTheme {
    fn kind() -> &'static str {
        "themes"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_stats_hit_rate() {
        let stats = CacheStats {
            hits: 80,
            misses: 20,
            ..Default::default()
        };
        assert!((stats.hit_rate() - 0.8).abs() < 0.001);

        let empty_stats = CacheStats::default();
        assert!((empty_stats.hit_rate() - 0.0).abs() < 0.001);
    }

    #[test]
    fn test_cacheable_kinds_are_distinct() {
        assert_eq!(Swatch::kind(), "swatches");
        assert_eq!(ComputedTheme::kind(), "themes");
    }
}
