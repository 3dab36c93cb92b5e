//! SWATCHBOOK Storage
//!
//! Cache tiers for the two artifacts the theme pipeline produces: swatches
//! (keyed by base key) and computed themes (keyed by encoded composite key).
//! A fast in-memory tier sits in front of a durable LMDB tier; the
//! [`TieredCache`] composition owns promotion and hydration so that both
//! artifact kinds share one implementation.

pub mod cache;

pub use cache::{
    Cache, CacheStats, CacheTier, Cacheable, DiskCache, EvictionPolicy, InMemoryDiskCache,
    LmdbCacheError, LmdbDiskCache, LmdbStore, MemoryCache, TieredCache,
};
