//! Keyed in-memory cache with per-entry expiry.
//!
//! Reads never return an expired entry. Expired entries are dropped on the
//! next read of the same key, and every [`PURGE_EVERY_INSERTS`] inserts the
//! whole map is swept so keys that are never read again do not accumulate.

use dashmap::DashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

pub const PURGE_EVERY_INSERTS: usize = 64;

#[derive(Debug, Clone)]
struct Entry<V> {
    value: V,
    expires_at: Instant,
}

#[derive(Debug)]
pub struct TtlCache<K, V>
where
    K: Eq + Hash,
{
    entries: DashMap<K, Entry<V>>,
    ttl: Duration,
    inserts: AtomicUsize,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            inserts: AtomicUsize::new(0),
        }
    }

    pub fn get(&self, key: &K) -> Option<V> {
        self.get_at(key, Instant::now())
    }

    fn get_at(&self, key: &K, now: Instant) -> Option<V> {
        let lookup = self
            .entries
            .get(key)
            .map(|entry| (entry.expires_at > now).then(|| entry.value.clone()));
        match lookup {
            Some(Some(value)) => Some(value),
            Some(None) => {
                self.entries.remove_if(key, |_, e| e.expires_at <= now);
                None
            }
            None => None,
        }
    }

    pub fn insert(&self, key: K, value: V) {
        self.insert_at(key, value, Instant::now());
    }

    fn insert_at(&self, key: K, value: V, now: Instant) {
        self.entries.insert(
            key,
            Entry {
                value,
                expires_at: now + self.ttl,
            },
        );
        let count = self.inserts.fetch_add(1, Ordering::Relaxed) + 1;
        if count % PURGE_EVERY_INSERTS == 0 {
            self.purge_expired_at(now);
        }
    }

    fn purge_expired_at(&self, now: Instant) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, e| e.expires_at > now);
        before.saturating_sub(self.entries.len())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_after_insert() {
        let cache: TtlCache<String, f64> = TtlCache::new(Duration::from_secs(120));
        assert_eq!(cache.get(&"a".to_string()), None);
        cache.insert("a".to_string(), 1.5);
        assert_eq!(cache.get(&"a".to_string()), Some(1.5));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_expired_entries_are_not_returned() {
        let cache: TtlCache<&'static str, u32> = TtlCache::new(Duration::from_secs(60));
        let t0 = Instant::now();
        cache.insert_at("k", 7, t0);
        assert_eq!(cache.get_at(&"k", t0 + Duration::from_secs(59)), Some(7));
        assert_eq!(cache.get_at(&"k", t0 + Duration::from_secs(60)), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_purge_expired() {
        let cache: TtlCache<u8, u8> = TtlCache::new(Duration::from_secs(10));
        let t0 = Instant::now();
        cache.insert_at(1, 1, t0);
        cache.insert_at(2, 2, t0);
        assert_eq!(cache.purge_expired_at(t0 + Duration::from_secs(5)), 0);
        assert_eq!(cache.purge_expired_at(t0 + Duration::from_secs(10)), 2);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_inserts_sweep_expired_keys_without_reads() {
        let cache: TtlCache<usize, u8> = TtlCache::new(Duration::from_secs(60));
        let t0 = Instant::now();
        cache.insert_at(0, 0, t0);

        let later = t0 + Duration::from_secs(61);
        for key in 1..PURGE_EVERY_INSERTS {
            cache.insert_at(key, 0, later);
        }
        assert_eq!(cache.len(), PURGE_EVERY_INSERTS - 1);
        assert!(!cache.entries.contains_key(&0));
    }
}
