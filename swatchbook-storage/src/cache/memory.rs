//! In-memory cache tier with LRU eviction, backed by `moka`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use moka::notification::RemovalCause;
use swatchbook_core::SwatchbookResult;

use super::traits::{Cache, CacheStats};

/// Capacity policy for a [`MemoryCache`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EvictionPolicy {
    /// Maximum number of entries; `None` means unbounded.
    pub max_entries: Option<usize>,
}

impl EvictionPolicy {
    pub fn unbounded() -> Self {
        Self { max_entries: None }
    }

    /// Keep at most `max_entries` entries, evicting the least recently used.
    pub fn bounded(max_entries: usize) -> Self {
        Self {
            max_entries: Some(max_entries.max(1)),
        }
    }
}

/// Fast volatile cache tier.
///
/// Lookups and inserts are O(1). A bounded cache settles its eviction
/// bookkeeping on every insert, so it never holds more than the policy
/// allows once `insert` returns.
pub struct MemoryCache<T> {
    entries: moka::sync::Cache<String, T>,
    policy: EvictionPolicy,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: Arc<AtomicU64>,
}

impl<T> MemoryCache<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(policy: EvictionPolicy) -> Self {
        let evictions = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&evictions);

        let mut builder = moka::sync::Cache::builder()
            .eviction_policy(moka::policy::EvictionPolicy::lru())
            .eviction_listener(move |_key, _value, cause| {
                if matches!(cause, RemovalCause::Size) {
                    counter.fetch_add(1, Ordering::Relaxed);
                }
            });
        if let Some(max) = policy.max_entries {
            builder = builder.max_capacity(max as u64);
        }

        Self {
            entries: builder.build(),
            policy,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions,
        }
    }

    pub fn unbounded() -> Self {
        Self::new(EvictionPolicy::unbounded())
    }

    pub fn policy(&self) -> EvictionPolicy {
        self.policy
    }

    fn settle(&self) {
        if self.policy.max_entries.is_some() {
            self.entries.run_pending_tasks();
        }
    }

    /// Get a value and mark it most recently used.
    pub fn get(&self, key: &str) -> Option<T> {
        let value = self.entries.get(key);
        let counter = if value.is_some() {
            &self.hits
        } else {
            &self.misses
        };
        counter.fetch_add(1, Ordering::Relaxed);
        value
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Insert or overwrite, evicting the least recently used entry when the
    /// policy's capacity would be exceeded.
    pub fn insert(&self, key: impl Into<String>, value: T) {
        self.entries.insert(key.into(), value);
        self.settle();
    }

    /// Insert only when `key` is not already cached. Returns whether the
    /// value was inserted. Recency of an existing entry is left untouched.
    pub fn insert_if_absent(&self, key: impl Into<String>, value: T) -> bool {
        let fresh = self
            .entries
            .entry(key.into())
            .or_insert_with(|| value)
            .is_fresh();
        if fresh {
            self.settle();
        }
        fresh
    }

    pub fn insert_all(&self, entries: impl IntoIterator<Item = (String, T)>) {
        for (key, value) in entries {
            self.insert(key, value);
        }
    }

    pub fn remove(&self, key: &str) -> Option<T> {
        self.entries.remove(key)
    }

    pub fn len(&self) -> usize {
        self.entries.run_pending_tasks();
        self.entries.entry_count() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let keys: Vec<Arc<String>> = self.entries.iter().map(|(key, _)| key).collect();
        for key in keys {
            self.entries.invalidate(key.as_str());
        }
        self.entries.run_pending_tasks();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            entry_count: self.len() as u64,
        }
    }
}

impl<T> Default for MemoryCache<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::unbounded()
    }
}

#[async_trait]
impl<T> Cache<T> for MemoryCache<T>
where
    T: Clone + Send + Sync + 'static,
{
    async fn get(&self, key: &str) -> SwatchbookResult<Option<T>> {
        Ok(MemoryCache::get(self, key))
    }

    async fn set(&self, key: &str, value: T) -> SwatchbookResult<()> {
        self.insert(key, value);
        Ok(())
    }

    async fn contains_key(&self, key: &str) -> SwatchbookResult<bool> {
        Ok(self.contains(key))
    }

    async fn put_all(&self, entries: Vec<(String, T)>) -> SwatchbookResult<()> {
        self.insert_all(entries);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_get() {
        let cache = MemoryCache::unbounded();
        cache.insert("a", 1);
        assert_eq!(cache.get("a"), Some(1));
        assert_eq!(cache.get("b"), None);
        assert!(cache.contains("a"));

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entry_count, 1);
    }

    #[test]
    fn test_overwrite_does_not_evict() {
        let cache = MemoryCache::new(EvictionPolicy::bounded(1));
        cache.insert("a", 1);
        cache.insert("a", 2);
        assert_eq!(cache.get("a"), Some(2));
        assert_eq!(cache.stats().evictions, 0);
    }

    #[test]
    fn test_evicts_least_recently_used() {
        let cache = MemoryCache::new(EvictionPolicy::bounded(2));
        cache.insert("a", 1);
        cache.insert("b", 2);

        // Touch "a" so "b" becomes the eviction candidate.
        assert_eq!(cache.get("a"), Some(1));
        cache.insert("c", 3);

        assert!(cache.contains("a"));
        assert!(!cache.contains("b"));
        assert!(cache.contains("c"));
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_unbounded_never_evicts() {
        let cache = MemoryCache::unbounded();
        for i in 0..1000 {
            cache.insert(format!("k{i}"), i);
        }
        assert_eq!(cache.len(), 1000);
        assert_eq!(cache.stats().evictions, 0);
    }

    #[test]
    fn test_bounded_zero_is_clamped_to_one() {
        let cache = MemoryCache::new(EvictionPolicy::bounded(0));
        cache.insert("a", 1);
        assert_eq!(cache.get("a"), Some(1));
        cache.insert("b", 2);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("b"), Some(2));
    }

    #[test]
    fn test_insert_all_respects_capacity() {
        let cache = MemoryCache::new(EvictionPolicy::bounded(3));
        cache.insert_all((0..5).map(|i| (format!("k{i}"), i)));
        assert_eq!(cache.len(), 3);
        assert!(cache.contains("k4"));
        assert!(!cache.contains("k0"));
    }

    #[test]
    fn test_large_bounded_cache_stays_within_capacity() {
        let cache = MemoryCache::new(EvictionPolicy::bounded(1000));
        for i in 0..20_000 {
            cache.insert(format!("k{i}"), i);
        }
        assert_eq!(cache.len(), 1000);
        assert_eq!(cache.stats().evictions, 19_000);
        assert!(cache.contains("k19999"));
        assert!(!cache.contains("k0"));
    }

    #[test]
    fn test_insert_if_absent_keeps_existing() {
        let cache = MemoryCache::unbounded();
        assert!(cache.insert_if_absent("a", 1));
        assert!(!cache.insert_if_absent("a", 2));
        assert_eq!(cache.get("a"), Some(1));
    }

    #[test]
    fn test_remove_and_clear() {
        let cache = MemoryCache::unbounded();
        cache.insert("a", 1);
        cache.insert("b", 2);
        assert_eq!(cache.remove("a"), Some(1));
        assert_eq!(cache.remove("a"), None);
        cache.clear();
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_cache_trait_delegates() {
        let cache: MemoryCache<u32> = MemoryCache::unbounded();
        let tier: &dyn Cache<u32> = &cache;
        tier.set("a", 7).await.unwrap();
        tier.put_all(vec![("b".to_string(), 8)]).await.unwrap();
        assert_eq!(tier.get("a").await.unwrap(), Some(7));
        assert!(tier.contains_key("b").await.unwrap());
        assert!(!tier.contains_key("c").await.unwrap());
    }

    #[test]
    fn test_concurrent_access_is_safe() {
        let cache = std::sync::Arc::new(MemoryCache::new(EvictionPolicy::bounded(16)));
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let cache = cache.clone();
                std::thread::spawn(move || {
                    for i in 0..500 {
                        let key = format!("k{}", (t * 7 + i) % 32);
                        if cache.contains(&key) {
                            let _ = cache.get(&key);
                        }
                        cache.insert(key, i);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert!(cache.len() <= 16);
    }
}
