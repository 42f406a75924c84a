//! TTL-bounded in-memory caches.
//!
//! [`TtlCache`] backs both the embedding cache (TTL plus a maximum entry
//! count, evicting in insertion order) and the intent-detection cache
//! (TTL only). Entries older than the TTL are treated as absent. Caches
//! are explicit objects constructed at service start and injected where
//! needed; [`TtlCache::clear`] resets state between tests.
//!
//! Concurrent writes to the same key are benign: values for a given key
//! are idempotent, and the interior mutex makes the last write win.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

struct Entry<V> {
    value: V,
    stored_at: Instant,
}

struct Inner<V> {
    map: HashMap<String, Entry<V>>,
    order: VecDeque<String>,
}

pub struct TtlCache<V> {
    inner: Mutex<Inner<V>>,
    ttl: Duration,
    capacity: Option<usize>,
}

impl<V: Clone> TtlCache<V> {
    /// Create a cache with the given TTL and, optionally, a maximum entry
    /// count enforced by insertion-order eviction.
    pub fn new(ttl: Duration, capacity: Option<usize>) -> Self {
        TtlCache {
            inner: Mutex::new(Inner {
                map: HashMap::new(),
                order: VecDeque::new(),
            }),
            ttl,
            capacity,
        }
    }

    pub fn get(&self, key: &str) -> Option<V> {
        self.get_at(key, Instant::now())
    }

    /// Lookup with an explicit clock, for deterministic tests. Expired
    /// entries are removed on access.
    pub fn get_at(&self, key: &str, now: Instant) -> Option<V> {
        let mut inner = self.inner.lock().expect("cache lock");
        let expired = match inner.map.get(key) {
            Some(entry) => now.duration_since(entry.stored_at) >= self.ttl,
            None => return None,
        };
        if expired {
            inner.map.remove(key);
            inner.order.retain(|k| k.as_str() != key);
            return None;
        }
        inner.map.get(key).map(|e| e.value.clone())
    }

    pub fn insert(&self, key: String, value: V) {
        self.insert_at(key, value, Instant::now());
    }

    pub fn insert_at(&self, key: String, value: V, now: Instant) {
        let mut inner = self.inner.lock().expect("cache lock");

        if inner.map.contains_key(&key) {
            // Refresh in place; the key keeps its original eviction slot.
            inner.map.insert(
                key,
                Entry {
                    value,
                    stored_at: now,
                },
            );
            return;
        }

        if let Some(cap) = self.capacity {
            while inner.map.len() >= cap {
                match inner.order.pop_front() {
                    Some(oldest) => {
                        inner.map.remove(&oldest);
                    }
                    None => break,
                }
            }
        }

        inner.order.push_back(key.clone());
        inner.map.insert(
            key,
            Entry {
                value,
                stored_at: now,
            },
        );
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("cache lock").map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock().expect("cache lock");
        inner.map.clear();
        inner.order.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_within_ttl() {
        let cache = TtlCache::new(Duration::from_secs(60), None);
        let t0 = Instant::now();
        cache.insert_at("k".into(), 42, t0);
        assert_eq!(cache.get_at("k", t0 + Duration::from_secs(59)), Some(42));
    }

    #[test]
    fn test_expired_entry_is_absent() {
        let cache = TtlCache::new(Duration::from_secs(60), None);
        let t0 = Instant::now();
        cache.insert_at("k".into(), 42, t0);
        assert_eq!(cache.get_at("k", t0 + Duration::from_secs(60)), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_capacity_evicts_in_insertion_order() {
        let cache = TtlCache::new(Duration::from_secs(60), Some(2));
        let t0 = Instant::now();
        cache.insert_at("a".into(), 1, t0);
        cache.insert_at("b".into(), 2, t0);
        cache.insert_at("c".into(), 3, t0);
        assert_eq!(cache.get_at("a", t0), None);
        assert_eq!(cache.get_at("b", t0), Some(2));
        assert_eq!(cache.get_at("c", t0), Some(3));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_reinsert_keeps_eviction_slot() {
        let cache = TtlCache::new(Duration::from_secs(60), Some(2));
        let t0 = Instant::now();
        cache.insert_at("a".into(), 1, t0);
        cache.insert_at("b".into(), 2, t0);
        cache.insert_at("a".into(), 10, t0);
        cache.insert_at("c".into(), 3, t0);
        // "a" is still the oldest slot, so it is the one evicted.
        assert_eq!(cache.get_at("a", t0), None);
        assert_eq!(cache.get_at("b", t0), Some(2));
        assert_eq!(cache.get_at("c", t0), Some(3));
    }

    #[test]
    fn test_clear() {
        let cache = TtlCache::new(Duration::from_secs(60), Some(8));
        cache.insert("a".into(), 1);
        cache.insert("b".into(), 2);
        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.get("a"), None);
    }
}
