//! A bounded LRU cache whose entries also expire after a fixed time-to-live.

use lru::LruCache;
use parking_lot::Mutex;
use std::{
    hash::Hash,
    num::NonZeroUsize,
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};
use tokio::time::Instant;

#[derive(Debug)]
pub struct TtlCache<K: Hash + Eq, V> {
    entries: Mutex<LruCache<K, Entry<V>>>,
    ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
}

#[derive(Debug)]
struct Entry<V> {
    value: V,
    expires_at: Instant,
}

// === impl TtlCache ===

impl<K: Hash + Eq, V: Clone> TtlCache<K, V> {
    /// Creates a cache holding at most `capacity` entries (at least one), each living for `ttl`.
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Returns a clone of the live value for `key`, promoting it to most-recently used.
    ///
    /// An expired entry is removed and reported as a miss.
    pub fn get(&self, key: &K) -> Option<V> {
        let mut entries = self.entries.lock();
        let expired = match entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Some(entry.value.clone());
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            entries.pop(key);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Inserts or replaces `key`, resetting its expiry. The least-recently used entry is evicted
    /// when the cache is full.
    pub fn set(&self, key: K, value: V) {
        let expires_at = Instant::now() + self.ttl;
        self.entries.lock().put(key, Entry { value, expires_at });
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        self.entries.lock().pop(key).map(|e| e.value)
    }

    /// The number of stored entries, including any that have expired but not yet been observed.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn entries_expire() {
        let cache = TtlCache::new(4, Duration::from_secs(10));
        cache.set("a", 1);
        assert_eq!(cache.get(&"a"), Some(1));

        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(cache.get(&"a"), None);
        assert!(cache.is_empty(), "expired entries are removed on access");
        assert_eq!((cache.hits(), cache.misses()), (1, 1));
    }

    #[tokio::test(start_paused = true)]
    async fn set_refreshes_expiry() {
        let cache = TtlCache::new(4, Duration::from_secs(10));
        cache.set("a", 1);
        tokio::time::advance(Duration::from_secs(8)).await;
        cache.set("a", 2);
        tokio::time::advance(Duration::from_secs(8)).await;
        assert_eq!(cache.get(&"a"), Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn evicts_least_recently_used() {
        let cache = TtlCache::new(2, Duration::from_secs(60));
        cache.set("a", 1);
        cache.set("b", 2);
        // Touch `a` so that `b` becomes the eviction candidate.
        assert_eq!(cache.get(&"a"), Some(1));
        cache.set("c", 3);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&"b"), None);
        assert_eq!(cache.get(&"a"), Some(1));
        assert_eq!(cache.get(&"c"), Some(3));
    }

    #[tokio::test(start_paused = true)]
    async fn zero_capacity_holds_one_entry() {
        let cache = TtlCache::new(0, Duration::from_secs(60));
        cache.set(1, "a");
        cache.set(2, "b");
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.remove(&2), Some("b"));
        cache.set(3, "c");
        cache.clear();
        assert!(cache.is_empty());
    }
}
