//! Volatile disk tier with failure injection.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use swatchbook_core::{StorageError, SwatchbookResult};

use super::traits::{Cache, DiskCache};

/// HashMap-backed stand-in for the LMDB tier.
///
/// Cloning shares the underlying map, so a test can keep a handle while the
/// manager owns another. `fail_reads`/`fail_writes` make every subsequent
/// call return `StorageError::Unavailable`.
pub struct InMemoryDiskCache<T> {
    entries: Arc<RwLock<HashMap<String, (T, DateTime<Utc>)>>>,
    fail_reads: Arc<AtomicBool>,
    fail_writes: Arc<AtomicBool>,
    reads: Arc<AtomicU64>,
}

impl<T> Clone for InMemoryDiskCache<T> {
    fn clone(&self) -> Self {
        Self {
            entries: Arc::clone(&self.entries),
            fail_reads: Arc::clone(&self.fail_reads),
            fail_writes: Arc::clone(&self.fail_writes),
            reads: Arc::clone(&self.reads),
        }
    }
}

impl<T> Default for InMemoryDiskCache<T> {
    fn default() -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            fail_reads: Arc::new(AtomicBool::new(false)),
            fail_writes: Arc::new(AtomicBool::new(false)),
            reads: Arc::new(AtomicU64::new(0)),
        }
    }
}

impl<T: Clone> InMemoryDiskCache<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populated tier, as if a previous process had written `entries`.
    pub fn with_entries(entries: impl IntoIterator<Item = (String, T)>) -> Self {
        let cache = Self::new();
        if let Ok(mut map) = cache.entries.write() {
            let now = Utc::now();
            map.extend(entries.into_iter().map(|(k, v)| (k, (v, now))));
        }
        cache
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of `get`/`contains_key`/`select_all` calls served.
    pub fn read_count(&self) -> u64 {
        self.reads.load(Ordering::SeqCst)
    }

    /// Synchronous peek that bypasses failure injection and read counting.
    pub fn peek(&self, key: &str) -> Option<T> {
        self.entries
            .read()
            .ok()
            .and_then(|map| map.get(key).map(|(v, _)| v.clone()))
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|map| map.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Backdate an entry's write time.
    pub fn age_entry(&self, key: &str, by: Duration) {
        if let Ok(mut map) = self.entries.write() {
            if let Some((_, written_at)) = map.get_mut(key) {
                if let Ok(by) = chrono::Duration::from_std(by) {
                    *written_at -= by;
                }
            }
        }
    }

    fn check_read(&self) -> SwatchbookResult<()> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable {
                reason: "injected read failure".to_string(),
            }
            .into());
        }
        Ok(())
    }

    fn check_write(&self) -> SwatchbookResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable {
                reason: "injected write failure".to_string(),
            }
            .into());
        }
        Ok(())
    }
}

#[async_trait]
impl<T> Cache<T> for InMemoryDiskCache<T>
where
    T: Clone + Send + Sync + 'static,
{
    async fn get(&self, key: &str) -> SwatchbookResult<Option<T>> {
        self.check_read()?;
        let map = self.entries.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(map.get(key).map(|(v, _)| v.clone()))
    }

    async fn set(&self, key: &str, value: T) -> SwatchbookResult<()> {
        self.check_write()?;
        let mut map = self
            .entries
            .write()
            .map_err(|_| StorageError::LockPoisoned)?;
        map.insert(key.to_string(), (value, Utc::now()));
        Ok(())
    }

    async fn contains_key(&self, key: &str) -> SwatchbookResult<bool> {
        self.check_read()?;
        let map = self.entries.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(map.contains_key(key))
    }

    async fn put_all(&self, entries: Vec<(String, T)>) -> SwatchbookResult<()> {
        self.check_write()?;
        let mut map = self
            .entries
            .write()
            .map_err(|_| StorageError::LockPoisoned)?;
        let now = Utc::now();
        map.extend(entries.into_iter().map(|(k, v)| (k, (v, now))));
        Ok(())
    }
}

#[async_trait]
impl<T> DiskCache<T> for InMemoryDiskCache<T>
where
    T: Clone + Send + Sync + 'static,
{
    async fn select_all(&self) -> SwatchbookResult<Vec<(String, T)>> {
        self.check_read()?;
        let map = self.entries.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(map
            .iter()
            .map(|(k, (v, _))| (k.clone(), v.clone()))
            .collect())
    }

    async fn remove_older_than(&self, max_age: Duration) -> SwatchbookResult<u64> {
        self.check_write()?;
        let max_age = chrono::Duration::from_std(max_age).map_err(|e| {
            StorageError::TransactionFailed {
                reason: format!("invalid max age: {}", e),
            }
        })?;
        let cutoff = Utc::now() - max_age;

        let mut map = self
            .entries
            .write()
            .map_err(|_| StorageError::LockPoisoned)?;
        let before = map.len();
        map.retain(|_, (_, written_at)| *written_at >= cutoff);
        Ok((before - map.len()) as u64)
    }
}
