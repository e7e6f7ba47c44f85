//! TTL + LRU read cache.
//!
//! Entries expire lazily: an expired entry is only removed when a read
//! touches it. The store is bounded and evicts the least recently used key
//! when a new key is inserted at capacity. Overwriting an existing key never
//! evicts.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use lru::LruCache;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Instant;

use lumagate_core::CacheConfig;

/// Cached value with its timing metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry<V> {
    pub value: V,
    /// When the value was stored.
    pub cached_at: Instant,
    /// `cached_at + ttl`. The entry is valid while `now <= expires_at`.
    pub expires_at: Instant,
}

impl<V> CacheEntry<V> {
    fn is_expired_at(&self, now: Instant) -> bool {
        now > self.expires_at
    }

    /// Time since the value was stored.
    pub fn age(&self) -> Duration {
        Instant::now().saturating_duration_since(self.cached_at)
    }

    pub fn age_ms(&self) -> u64 {
        self.age().as_millis() as u64
    }

    /// Age in whole seconds, floored.
    pub fn age_secs(&self) -> u64 {
        self.age().as_secs()
    }
}

/// Cache statistics.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    /// Physically stored entries, expired ones included
    pub entries: usize,
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
}

/// Bounded key-value cache with per-entry TTL.
pub struct ReadCache<V> {
    entries: Mutex<LruCache<String, CacheEntry<V>>>,
    default_ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<V> std::fmt::Debug for ReadCache<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadCache")
            .field("default_ttl", &self.default_ttl)
            .field("capacity", &self.capacity())
            .finish()
    }
}

impl<V> ReadCache<V> {
    /// Create a cache holding at most `max_size` entries. A size of zero is
    /// treated as one.
    pub fn new(max_size: usize, default_ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(max_size).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            default_ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(config.max_size, config.ttl())
    }

    pub fn capacity(&self) -> usize {
        self.entries.lock().cap().get()
    }

    /// Store `value` under the default TTL.
    pub fn set(&self, key: impl Into<String>, value: V) {
        self.set_with_ttl(key, value, self.default_ttl);
    }

    /// Store `value` for `ttl`. Replaces any existing entry and marks it most
    /// recently used.
    pub fn set_with_ttl(&self, key: impl Into<String>, value: V, ttl: Duration) {
        let cached_at = Instant::now();
        let entry = CacheEntry {
            value,
            cached_at,
            expires_at: cached_at + ttl,
        };
        self.entries.lock().put(key.into(), entry);
    }

    /// Remove `key`. Returns whether an entry was present.
    pub fn delete(&self, key: &str) -> bool {
        self.entries.lock().pop(key).is_some()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// Whether a live entry exists for `key`. Behaves like a `get` hit for
    /// recency, so the key becomes most recently used; an expired entry is
    /// removed. Hit and miss counters are left alone.
    pub fn has(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        match entries.peek(key).map(|entry| entry.is_expired_at(now)) {
            Some(false) => {
                entries.promote(key);
                true
            }
            Some(true) => {
                entries.pop(key);
                false
            }
            None => false,
        }
    }

    /// Physically stored entries, including expired ones not yet read.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let entries = self.entries.lock();
        CacheStats {
            entries: entries.len(),
            capacity: entries.cap().get(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

impl<V: Clone> ReadCache<V> {
    /// Look up `key`. A hit marks the key most recently used; an expired entry
    /// is removed and reported as a miss.
    pub fn get(&self, key: &str) -> Option<CacheEntry<V>> {
        let now = Instant::now();
        let mut entries = self.entries.lock();

        let expired = match entries.peek(key) {
            Some(entry) => entry.is_expired_at(now),
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        };

        if expired {
            entries.pop(key);
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        self.hits.fetch_add(1, Ordering::Relaxed);
        entries.get(key).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_millis(1000);

    #[tokio::test(start_paused = true)]
    async fn test_set_then_get() {
        let cache = ReadCache::new(10, TTL);
        let before = Instant::now();
        cache.set("lamp", 42);

        let entry = cache.get("lamp").unwrap();
        assert_eq!(entry.value, 42);
        assert_eq!(entry.cached_at, before);
        assert_eq!(entry.expires_at, before + TTL);
        assert_eq!(entry.age(), Duration::ZERO);
        assert_eq!(entry.age_secs(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry_boundary() {
        let cache = ReadCache::new(10, TTL);
        cache.set("lamp", 1);

        tokio::time::advance(TTL).await;
        assert!(cache.has("lamp"));
        assert_eq!(cache.get("lamp").map(|e| e.value), Some(1));

        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(cache.get("lamp").is_none());
        assert_eq!(cache.len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entries_linger_until_read() {
        let cache = ReadCache::new(10, TTL);
        cache.set("a", 1);
        cache.set("b", 2);

        tokio::time::advance(TTL * 2).await;
        assert_eq!(cache.len(), 2);
        assert!(!cache.has("a"));
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_age_is_floored() {
        let cache = ReadCache::new(10, Duration::from_secs(10));
        cache.set("lamp", ());

        tokio::time::advance(Duration::from_millis(2999)).await;
        let entry = cache.get("lamp").unwrap();
        assert_eq!(entry.age_ms(), 2999);
        assert_eq!(entry.age_secs(), 2);
    }

    #[test]
    fn test_zero_capacity_clamped() {
        let cache = ReadCache::<u8>::new(0, TTL);
        assert_eq!(cache.capacity(), 1);
    }

    #[tokio::test]
    async fn test_delete_and_clear() {
        let cache = ReadCache::new(10, TTL);
        cache.set("a", 1);
        cache.set("b", 2);

        assert!(cache.delete("a"));
        assert!(!cache.delete("a"));
        assert_eq!(cache.len(), 1);

        cache.clear();
        assert!(cache.is_empty());
    }

    #[derive(Debug)]
    struct Handle(#[allow(dead_code)] u32);

    #[tokio::test]
    async fn test_non_clone_values_debug_and_bookkeeping() {
        let cache: ReadCache<Handle> = ReadCache::new(2, TTL);
        cache.set("a", Handle(1));
        cache.set("b", Handle(2));

        assert!(cache.has("a"));
        cache.set("c", Handle(3));
        assert!(cache.has("a"));
        assert!(!cache.has("b"));
        assert!(cache.delete("c"));

        let debug = format!("{:?}", cache);
        assert!(debug.contains("ReadCache"));
        assert!(debug.contains("capacity: 2"));
    }

    #[tokio::test]
    async fn test_has_leaves_counters_alone() {
        let cache = ReadCache::new(4, TTL);
        cache.set("a", 1);
        assert!(cache.has("a"));
        assert!(!cache.has("b"));

        let stats = cache.stats();
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.misses, 0);
    }

    #[tokio::test]
    async fn test_stats_count_hits_and_misses() {
        let cache = ReadCache::new(4, TTL);
        cache.set("a", 1);
        let _ = cache.get("a");
        let _ = cache.get("b");

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.capacity, 4);
    }
}
