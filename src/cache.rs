//! Bounded, time-expiring result cache
//!
//! Each resolution operation gets its own `ResultCache` instance. Entries
//! expire `ttl` after insertion; a full cache evicts the oldest-inserted
//! entry (FIFO by insertion, not by access) before accepting a new key.

use dashmap::DashMap;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::config::CacheConfig;

/// Cache entry with insertion metadata
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub value: V,
    pub inserted_at: Instant,
    /// Monotonic insertion sequence, used for FIFO eviction
    seq: u64,
}

impl<V> CacheEntry<V> {
    fn new(value: V, seq: u64) -> Self {
        Self {
            value,
            inserted_at: Instant::now(),
            seq,
        }
    }

    pub fn is_expired(&self, ttl: Duration) -> bool {
        self.inserted_at.elapsed() >= ttl
    }
}

/// Build a cache key from an operation name and its parameters.
///
/// Parameters are serialized as JSON; struct fields serialize in
/// declaration order, so the same parameters always yield the same key.
pub fn make_key<P: Serialize>(operation: &str, params: &P) -> String {
    let params = serde_json::to_string(params).unwrap_or_default();
    format!("{}:{}", operation, params)
}

/// Bounded TTL cache keyed by `operation:params`
pub struct ResultCache<V> {
    name: &'static str,
    entries: DashMap<String, CacheEntry<V>>,
    next_seq: AtomicU64,
    capacity: usize,
    ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<V: Clone> ResultCache<V> {
    /// Create a new cache
    pub fn new(name: &'static str, config: &CacheConfig) -> Self {
        Self::with_ttl(name, config.capacity, config.ttl())
    }

    pub fn with_ttl(name: &'static str, capacity: usize, ttl: Duration) -> Self {
        Self {
            name,
            entries: DashMap::new(),
            next_seq: AtomicU64::new(0),
            capacity: capacity.max(1),
            ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Look up a live entry. Expired entries read as absent but are left
    /// in place for the next sweep.
    pub fn get(&self, key: &str) -> Option<V> {
        let found = self
            .entries
            .get(key)
            .filter(|entry| !entry.value().is_expired(self.ttl))
            .map(|entry| entry.value().value.clone());

        match found {
            Some(value) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(cache = self.name, key, "cache hit");
                Some(value)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Insert a value, evicting the oldest-inserted entry when full.
    /// Racing puts on the same key are last-write-wins.
    pub fn put(&self, key: String, value: V) {
        if !self.entries.contains_key(&key) {
            while self.entries.len() >= self.capacity {
                if !self.evict_oldest() {
                    break;
                }
            }
        }
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        self.entries.insert(key, CacheEntry::new(value, seq));
    }

    /// Remove the entry with the lowest insertion sequence
    fn evict_oldest(&self) -> bool {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|entry| entry.value().seq)
            .map(|entry| entry.key().clone());

        match oldest {
            Some(key) => {
                tracing::debug!(cache = self.name, key = %key, "evicting oldest entry");
                self.entries.remove(&key).is_some()
            }
            None => false,
        }
    }

    /// Remove all expired entries, read or not. Returns the number removed.
    pub fn sweep(&self) -> usize {
        let before = self.entries.len();
        let ttl = self.ttl;
        self.entries.retain(|_, entry| !entry.is_expired(ttl));
        before.saturating_sub(self.entries.len())
    }

    /// Drop every entry and reset counters
    pub fn clear(&self) {
        self.entries.clear();
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
    }

    /// Get the number of stored entries, expired ones included
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if cache is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Get cache statistics
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            name: self.name,
            entry_count: self.entries.len(),
            capacity: self.capacity,
            ttl_secs: self.ttl.as_secs(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

/// Cache statistics
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub name: &'static str,
    pub entry_count: usize,
    pub capacity: usize,
    pub ttl_secs: u64,
    pub hits: u64,
    pub misses: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache(capacity: usize, ttl: Duration) -> ResultCache<u32> {
        ResultCache::with_ttl("test", capacity, ttl)
    }

    #[test]
    fn test_cache_insert_get() {
        let cache = cache(10, Duration::from_secs(60));
        cache.put("search:a".to_string(), 1);

        assert_eq!(cache.get("search:a"), Some(1));
        assert_eq!(cache.get("search:b"), None);
        assert_eq!(cache.stats().hits, 1);
        assert_eq!(cache.stats().misses, 1);
    }

    #[test]
    fn test_expired_entry_reads_absent_without_sweep() {
        let cache = cache(10, Duration::from_millis(40));
        cache.put("k".to_string(), 7);

        std::thread::sleep(Duration::from_millis(60));

        assert_eq!(cache.get("k"), None);
        // Still stored until a sweep runs
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_sweep_removes_unread_expired_entries() {
        let cache = cache(10, Duration::from_millis(40));
        cache.put("old1".to_string(), 1);
        cache.put("old2".to_string(), 2);

        std::thread::sleep(Duration::from_millis(60));
        cache.put("fresh".to_string(), 3);

        assert_eq!(cache.sweep(), 2);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("fresh"), Some(3));
    }

    #[test]
    fn test_full_cache_evicts_oldest_inserted() {
        let cache = cache(3, Duration::from_secs(60));
        cache.put("a".to_string(), 1);
        cache.put("b".to_string(), 2);
        cache.put("c".to_string(), 3);

        // Reading "a" does not protect it: eviction is by insertion order
        assert_eq!(cache.get("a"), Some(1));

        cache.put("d".to_string(), 4);

        assert_eq!(cache.len(), 3);
        assert_eq!(cache.get("a"), None);
        assert_eq!(cache.get("b"), Some(2));
        assert_eq!(cache.get("c"), Some(3));
        assert_eq!(cache.get("d"), Some(4));

        cache.put("e".to_string(), 5);
        assert_eq!(cache.get("b"), None);
        assert_eq!(cache.get("c"), Some(3));
    }

    #[test]
    fn test_replacing_key_does_not_evict() {
        let cache = cache(2, Duration::from_secs(60));
        cache.put("a".to_string(), 1);
        cache.put("b".to_string(), 2);
        cache.put("b".to_string(), 20);

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("a"), Some(1));
        assert_eq!(cache.get("b"), Some(20));
    }

    #[test]
    fn test_make_key_is_stable() {
        #[derive(Serialize)]
        struct Params<'a> {
            query: &'a str,
            count: usize,
        }

        let a = make_key("search", &Params { query: "cats", count: 11 });
        let b = make_key("search", &Params { query: "cats", count: 11 });
        let c = make_key("search", &Params { query: "cats", count: 21 });

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a, r#"search:{"query":"cats","count":11}"#);
    }

    #[test]
    fn test_clear() {
        let cache = cache(10, Duration::from_secs(60));
        cache.put("a".to_string(), 1);
        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.stats().hits, 0);
    }
}
