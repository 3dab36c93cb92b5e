//! Memory-over-disk composition shared by the swatch and theme caches.

use std::sync::Arc;
use std::time::Duration;

use swatchbook_core::SwatchbookResult;

use super::memory::MemoryCache;
use super::traits::{CacheStats, CacheTier, DiskCache};

/// Two-tier cache: memory is always consulted first, and a disk hit is
/// copied into memory before it is returned.
pub struct TieredCache<T> {
    name: &'static str,
    memory: MemoryCache<T>,
    disk: Arc<dyn DiskCache<T>>,
}

impl<T> TieredCache<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// `name` only tags log lines (`"swatch"`, `"theme"`).
    pub fn new(name: &'static str, memory: MemoryCache<T>, disk: Arc<dyn DiskCache<T>>) -> Self {
        Self { name, memory, disk }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn memory(&self) -> &MemoryCache<T> {
        &self.memory
    }

    pub fn get_memory(&self, key: &str) -> Option<T> {
        self.memory.get(key)
    }

    pub fn contains_memory(&self, key: &str) -> bool {
        self.memory.contains(key)
    }

    /// Disk lookup. Errors are logged and treated as a miss.
    pub async fn get_disk(&self, key: &str) -> Option<T> {
        match self.disk.get(key).await {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(cache = self.name, key, error = %e, "disk read failed, treating as miss");
                None
            }
        }
    }

    /// Disk existence check. Errors are logged and treated as absent.
    pub async fn contains_disk(&self, key: &str) -> bool {
        match self.disk.contains_key(key).await {
            Ok(found) => found,
            Err(e) => {
                tracing::warn!(cache = self.name, key, error = %e, "disk read failed, treating as miss");
                false
            }
        }
    }

    /// Disk lookup that copies a hit into memory.
    pub async fn promote_from_disk(&self, key: &str) -> Option<T> {
        let value = self.get_disk(key).await?;
        self.memory.insert(key, value.clone());
        tracing::debug!(cache = self.name, key, "promoted disk entry to memory");
        Some(value)
    }

    /// Memory, then disk with promotion.
    pub async fn lookup(&self, key: &str) -> Option<(T, CacheTier)> {
        if let Some(value) = self.memory.get(key) {
            return Some((value, CacheTier::Memory));
        }
        self.promote_from_disk(key)
            .await
            .map(|value| (value, CacheTier::Disk))
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.memory.contains(key) || self.contains_disk(key).await
    }

    /// Write to memory, then disk.
    ///
    /// The memory write always lands; a failed disk write is logged and the
    /// entry stays memory-only for this process lifetime.
    pub async fn put(&self, key: &str, value: T) {
        self.memory.insert(key, value.clone());
        if let Err(e) = self.disk.set(key, value).await {
            tracing::warn!(cache = self.name, key, error = %e, "disk write failed, entry is memory-only");
        }
    }

    /// Load every disk entry into memory. Entries already in memory were
    /// written after startup and are kept. Returns the number loaded.
    pub async fn hydrate(&self) -> SwatchbookResult<usize> {
        let entries = self.disk.select_all().await?;
        let mut count = 0;
        for (key, value) in entries {
            if self.memory.insert_if_absent(key, value) {
                count += 1;
            }
        }
        tracing::info!(cache = self.name, count, "hydrated memory tier from disk");
        Ok(count)
    }

    /// Drop disk entries older than `max_age`. Memory is left alone.
    pub async fn prune_disk(&self, max_age: Duration) -> SwatchbookResult<u64> {
        let removed = self.disk.remove_older_than(max_age).await?;
        if removed > 0 {
            tracing::info!(cache = self.name, removed, "pruned stale disk entries");
        }
        Ok(removed)
    }

    pub fn stats(&self) -> CacheStats {
        self.memory.stats()
    }
}
