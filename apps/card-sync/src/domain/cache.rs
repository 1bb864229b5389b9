//! Bounded LRU Cache
//!
//! Fixed-capacity key/value store used for card view models, revalidation
//! tokens, message-id tracking and pending-refresh handles. Reads and writes
//! move an entry to most-recently-used; inserting beyond capacity evicts the
//! least-recently-used entry and hands it back to the caller so owned
//! resources (cancellation tokens) can be released.

use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;

#[derive(Debug)]
struct Slot<V> {
    value: V,
    tick: u64,
}

/// Bounded least-recently-used map.
#[derive(Debug)]
pub struct LruCache<K, V> {
    capacity: usize,
    entries: HashMap<K, Slot<V>>,
    order: BTreeMap<u64, K>,
    next_tick: u64,
}

impl<K, V> LruCache<K, V>
where
    K: Eq + Hash + Clone,
{
    /// Create a cache holding at most `capacity` entries (minimum 1).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: HashMap::with_capacity(capacity),
            order: BTreeMap::new(),
            next_tick: 0,
        }
    }

    /// Maximum number of entries.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of live entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether `key` is present. Does not refresh recency.
    #[must_use]
    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    /// Look up `key` and mark it most-recently-used.
    pub fn get(&mut self, key: &K) -> Option<&V> {
        let tick = self.bump();
        let slot = self.entries.get_mut(key)?;
        self.order.remove(&slot.tick);
        slot.tick = tick;
        self.order.insert(tick, key.clone());
        Some(&slot.value)
    }

    /// Look up `key` without touching recency.
    #[must_use]
    pub fn peek(&self, key: &K) -> Option<&V> {
        self.entries.get(key).map(|slot| &slot.value)
    }

    /// Insert or replace `key`.
    ///
    /// Returns the evicted least-recently-used entry, if capacity was exceeded.
    /// Replacing an existing key never evicts.
    pub fn insert(&mut self, key: K, value: V) -> Option<(K, V)> {
        let tick = self.bump();

        if let Some(previous) = self.entries.insert(key.clone(), Slot { value, tick }) {
            self.order.remove(&previous.tick);
            self.order.insert(tick, key);
            return None;
        }
        self.order.insert(tick, key);

        if self.entries.len() > self.capacity {
            return self.pop_lru();
        }
        None
    }

    /// Remove `key`, returning its value.
    pub fn remove(&mut self, key: &K) -> Option<V> {
        let slot = self.entries.remove(key)?;
        self.order.remove(&slot.tick);
        Some(slot.value)
    }

    /// Remove and return the least-recently-used entry.
    pub fn pop_lru(&mut self) -> Option<(K, V)> {
        let (_, key) = self.order.pop_first()?;
        let slot = self.entries.remove(&key)?;
        Some((key, slot.value))
    }

    /// Remove every entry matching `predicate`, returning them.
    pub fn drain_where(&mut self, mut predicate: impl FnMut(&K, &V) -> bool) -> Vec<(K, V)> {
        let doomed: Vec<K> = self
            .entries
            .iter()
            .filter(|(key, slot)| predicate(key, &slot.value))
            .map(|(key, _)| key.clone())
            .collect();

        doomed
            .into_iter()
            .filter_map(|key| self.remove(&key).map(|value| (key, value)))
            .collect()
    }

    /// Remove all entries, returning them.
    pub fn drain(&mut self) -> Vec<(K, V)> {
        self.order.clear();
        self.entries
            .drain()
            .map(|(key, slot)| (key, slot.value))
            .collect()
    }

    /// Remove all entries.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }

    const fn bump(&mut self) -> u64 {
        self.next_tick += 1;
        self.next_tick
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicts_least_recently_used() {
        let mut cache = LruCache::new(2);
        assert!(cache.insert("a", 1).is_none());
        assert!(cache.insert("b", 2).is_none());

        let evicted = cache.insert("c", 3);
        assert_eq!(evicted, Some(("a", 1)));
        assert_eq!(cache.len(), 2);
        assert!(!cache.contains(&"a"));
    }

    #[test]
    fn get_refreshes_recency() {
        let mut cache = LruCache::new(2);
        cache.insert("a", 1);
        cache.insert("b", 2);

        assert_eq!(cache.get(&"a"), Some(&1));
        let evicted = cache.insert("c", 3);
        assert_eq!(evicted, Some(("b", 2)));
        assert!(cache.contains(&"a"));
    }

    #[test]
    fn peek_does_not_refresh_recency() {
        let mut cache = LruCache::new(2);
        cache.insert("a", 1);
        cache.insert("b", 2);

        assert_eq!(cache.peek(&"a"), Some(&1));
        let evicted = cache.insert("c", 3);
        assert_eq!(evicted, Some(("a", 1)));
    }

    #[test]
    fn replace_moves_to_front_without_eviction() {
        let mut cache = LruCache::new(2);
        cache.insert("a", 1);
        cache.insert("b", 2);

        assert!(cache.insert("a", 10).is_none());
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.peek(&"a"), Some(&10));
        assert_eq!(cache.insert("c", 3), Some(("b", 2)));
    }

    #[test]
    fn zero_capacity_is_clamped_to_one() {
        let mut cache = LruCache::new(0);
        assert_eq!(cache.capacity(), 1);
        cache.insert(1, "x");
        assert_eq!(cache.insert(2, "y"), Some((1, "x")));
    }

    #[test]
    fn remove_and_drain_where() {
        let mut cache = LruCache::new(8);
        for i in 0..6 {
            cache.insert(i, i * 10);
        }
        assert_eq!(cache.remove(&0), Some(0));
        assert_eq!(cache.remove(&0), None);

        let mut drained = cache.drain_where(|k, _| k % 2 == 1);
        drained.sort_unstable();
        assert_eq!(drained, vec![(1, 10), (3, 30), (5, 50)]);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.pop_lru(), Some((2, 20)));
    }

    #[test]
    fn clear_empties_everything() {
        let mut cache = LruCache::new(4);
        cache.insert("a", 1);
        cache.insert("b", 2);
        assert_eq!(cache.drain().len(), 2);
        cache.insert("c", 3);
        cache.clear();
        assert!(cache.is_empty());
        assert!(cache.pop_lru().is_none());
    }

    #[test]
    fn never_exceeds_capacity() {
        let mut cache = LruCache::new(16);
        for i in 0..1_000 {
            cache.insert(i, i);
            assert!(cache.len() <= 16);
        }
        assert_eq!(cache.pop_lru(), Some((984, 984)));
    }
}
