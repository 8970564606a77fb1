//! Bounded in-process TTL cache.
//!
//! Advisory only: entries may be stale for up to their TTL, so nothing that
//! decides money or seats reads through this.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

/// Decides how long a value stays fresh.
pub trait TtlPolicy<V>: Send + Sync {
    fn ttl_for(&self, value: &V) -> Duration;
}

/// Same TTL for every entry.
#[derive(Debug, Clone, Copy)]
pub struct FixedTtl(pub Duration);

impl<V> TtlPolicy<V> for FixedTtl {
    fn ttl_for(&self, _value: &V) -> Duration {
        self.0
    }
}

impl<V, F> TtlPolicy<V> for F
where
    F: Fn(&V) -> Duration + Send + Sync,
{
    fn ttl_for(&self, value: &V) -> Duration {
        self(value)
    }
}

struct CacheEntry<V> {
    value: V,
    expires_at: Instant,
}

impl<V> CacheEntry<V> {
    fn is_fresh(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

pub struct TtlCache<K, V> {
    entries: RwLock<HashMap<K, CacheEntry<V>>>,
    capacity: usize,
    policy: Box<dyn TtlPolicy<V>>,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self::with_policy(capacity, FixedTtl(ttl))
    }

    pub fn with_policy(capacity: usize, policy: impl TtlPolicy<V> + 'static) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
            policy: Box::new(policy),
        }
    }

    // A panic while holding the lock leaves a map that is still structurally
    // valid; keep serving it.
    fn read(&self) -> RwLockReadGuard<'_, HashMap<K, CacheEntry<V>>> {
        self.entries.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<K, CacheEntry<V>>> {
        self.entries.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Fresh value for `key`, if any.
    pub fn get(&self, key: &K) -> Option<V> {
        let now = Instant::now();
        self.read()
            .get(key)
            .filter(|entry| entry.is_fresh(now))
            .map(|entry| entry.value.clone())
    }

    pub fn insert(&self, key: K, value: V) {
        let ttl = self.policy.ttl_for(&value);
        let now = Instant::now();
        let mut entries = self.write();

        if !entries.contains_key(&key) && entries.len() >= self.capacity {
            entries.retain(|_, entry| entry.is_fresh(now));
            if entries.len() >= self.capacity {
                // Still full: drop whatever expires soonest.
                if let Some(victim) = entries
                    .iter()
                    .min_by_key(|(_, entry)| entry.expires_at)
                    .map(|(k, _)| k.clone())
                {
                    entries.remove(&victim);
                }
            }
        }

        entries.insert(
            key,
            CacheEntry {
                value,
                expires_at: now + ttl,
            },
        );
    }

    pub fn invalidate(&self, key: &K) {
        self.write().remove(key);
    }

    /// Drop every entry whose value matches.
    pub fn invalidate_where(&self, mut pred: impl FnMut(&V) -> bool) {
        self.write().retain(|_, entry| !pred(&entry.value));
    }

    pub fn clear(&self) {
        self.write().clear();
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_returns_fresh_value() {
        let cache = TtlCache::new(4, Duration::from_secs(60));
        cache.insert("a", 1);
        assert_eq!(cache.get(&"a"), Some(1));
        assert_eq!(cache.get(&"b"), None);
    }

    #[test]
    fn test_expired_entries_are_not_served() {
        let cache = TtlCache::new(4, Duration::ZERO);
        cache.insert("a", 1);
        assert_eq!(cache.get(&"a"), None);
    }

    #[test]
    fn test_capacity_is_bounded() {
        let cache = TtlCache::new(2, Duration::from_secs(60));
        cache.insert(1, "one");
        cache.insert(2, "two");
        cache.insert(3, "three");
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&3), Some("three"));
    }

    #[test]
    fn test_full_cache_evicts_expired_first() {
        let policy = |v: &i32| {
            if *v < 0 {
                Duration::ZERO
            } else {
                Duration::from_secs(60)
            }
        };
        let cache = TtlCache::with_policy(2, policy);
        cache.insert("stale", -1);
        cache.insert("keep", 1);
        cache.insert("new", 2);
        assert_eq!(cache.get(&"keep"), Some(1));
        assert_eq!(cache.get(&"new"), Some(2));
    }

    #[test]
    fn test_invalidate() {
        let cache = TtlCache::new(4, Duration::from_secs(60));
        cache.insert("a", 1);
        cache.insert("b", 2);
        cache.invalidate(&"a");
        assert_eq!(cache.get(&"a"), None);

        cache.invalidate_where(|v| *v == 2);
        assert!(cache.is_empty());
    }
}
