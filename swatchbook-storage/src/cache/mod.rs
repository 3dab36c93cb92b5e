//! Cache layer: traits, tiers and the tiered composition.
//!
//! # Tiers
//!
//! - [`MemoryCache`]: `moka` LRU cache with an explicit [`EvictionPolicy`].
//! - [`LmdbDiskCache`]: one named LMDB database per artifact kind inside a
//!   shared [`LmdbStore`] environment. Crash-durable.
//! - [`InMemoryDiskCache`]: volatile stand-in for the disk tier with failure
//!   injection, used by tests and ephemeral runs.
//!
//! # Failure Policy
//!
//! [`TieredCache`] never surfaces disk errors. Read failures are logged and
//! reported as misses; write failures are logged and dropped. Memory is
//! always consulted before disk, and a disk hit is promoted into memory.

pub mod lmdb_backend;
pub mod memory;
pub mod mock;
pub mod tiered;
pub mod traits;

pub use lmdb_backend::{LmdbCacheError, LmdbDiskCache, LmdbStore};
pub use memory::{EvictionPolicy, MemoryCache};
pub use mock::InMemoryDiskCache;
pub use tiered::TieredCache;
pub use traits::{Cache, CacheStats, CacheTier, Cacheable, DiskCache};
