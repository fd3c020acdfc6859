//! Generic bounded recency cache.
//!
//! A fixed-capacity key/value store with least-recently-used eviction, used to
//! wrap any expensive-to-produce resource (decoded thumbnails, source logos).
//! Every operation is guarded by one internal lock; eviction callbacks are
//! collected during the mutation and invoked after the lock is released, so a
//! callback may safely call back into the cache.

use std::hash::Hash;
use std::sync::{Mutex, PoisonError};

use indexmap::IndexMap;

type EvictionCallback<K, V> = Box<dyn Fn(&K, V) + Send + Sync>;

struct Inner<K, V> {
    // Front is least recently used, back is most recently used.
    entries: IndexMap<K, V>,
    capacity: usize,
}

impl<K: Eq + Hash, V> Inner<K, V> {
    fn promote(&mut self, index: usize) {
        let last = self.entries.len() - 1;
        self.entries.move_index(index, last);
    }

    fn shrink_to_capacity(&mut self) -> Vec<(K, V)> {
        let mut evicted = Vec::new();
        while self.entries.len() > self.capacity {
            if let Some((key, value)) = self.entries.shift_remove_index(0) {
                evicted.push((key, value));
            }
        }
        evicted
    }
}

pub struct LruCache<K, V> {
    inner: Mutex<Inner<K, V>>,
    on_evict: Option<EvictionCallback<K, V>>,
}

impl<K: Eq + Hash, V> LruCache<K, V> {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: IndexMap::new(),
                capacity,
            }),
            on_evict: None,
        }
    }

    /// Like [`LruCache::new`], but `callback` is invoked with every entry the
    /// cache lets go of, whether through capacity pressure, [`remove`],
    /// [`clear`], or [`set_capacity`]. Overwriting a key via [`insert`] does
    /// not count as an eviction.
    ///
    /// [`remove`]: LruCache::remove
    /// [`clear`]: LruCache::clear
    /// [`set_capacity`]: LruCache::set_capacity
    /// [`insert`]: LruCache::insert
    pub fn with_eviction_callback<F>(capacity: usize, callback: F) -> Self
    where
        F: Fn(&K, V) + Send + Sync + 'static,
    {
        Self {
            on_evict: Some(Box::new(callback)),
            ..Self::new(capacity)
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner<K, V>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify_evicted(&self, evicted: Vec<(K, V)>) {
        if let Some(callback) = &self.on_evict {
            for (key, value) in evicted {
                callback(&key, value);
            }
        }
    }

    /// Look up `key`, promoting it to most recently used on a hit.
    pub fn get(&self, key: &K) -> Option<V>
    where
        V: Clone,
    {
        let mut inner = self.lock();
        let index = inner.entries.get_index_of(key)?;
        inner.promote(index);
        inner.entries.get(key).cloned()
    }

    /// Insert or update `key`, promoting it; evicts least-recently-used
    /// entries while the cache is over capacity.
    pub fn insert(&self, key: K, value: V) {
        let evicted = {
            let mut inner = self.lock();
            let (index, _previous) = inner.entries.insert_full(key, value);
            inner.promote(index);
            inner.shrink_to_capacity()
        };
        self.notify_evicted(evicted);
    }

    /// Explicitly evict `key`, invoking the eviction callback if present.
    pub fn remove(&self, key: &K) {
        let evicted = {
            let mut inner = self.lock();
            inner.entries.shift_remove_entry(key)
        };
        if let Some((key, value)) = evicted {
            self.notify_evicted(vec![(key, value)]);
        }
    }

    /// Evict everything, invoking the eviction callback once per entry.
    pub fn clear(&self) {
        let evicted = {
            let mut inner = self.lock();
            inner.entries.drain(..).collect::<Vec<_>>()
        };
        self.notify_evicted(evicted);
    }

    /// Change the capacity, immediately evicting as many of the oldest
    /// entries as needed to fit.
    pub fn set_capacity(&self, capacity: usize) {
        let evicted = {
            let mut inner = self.lock();
            inner.capacity = capacity;
            inner.shrink_to_capacity()
        };
        self.notify_evicted(evicted);
    }

    pub fn capacity(&self) -> usize {
        self.lock().capacity
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, OnceLock};

    fn recording_cache(capacity: usize) -> (LruCache<String, i32>, Arc<Mutex<Vec<(String, i32)>>>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let log_clone = log.clone();
        let cache = LruCache::with_eviction_callback(capacity, move |key: &String, value| {
            log_clone.lock().unwrap().push((key.clone(), value));
        });
        (cache, log)
    }

    #[test]
    fn test_insert_then_get_returns_value() {
        let cache = LruCache::new(4);
        cache.insert("a".to_string(), 1);
        assert_eq!(cache.get(&"a".to_string()), Some(1));
    }

    #[test]
    fn test_get_missing_returns_none() {
        let cache: LruCache<String, i32> = LruCache::new(4);
        assert_eq!(cache.get(&"absent".to_string()), None);
    }

    #[test]
    fn test_capacity_two_evicts_oldest() {
        let (cache, log) = recording_cache(2);
        cache.insert("a".to_string(), 1);
        cache.insert("b".to_string(), 2);
        cache.insert("c".to_string(), 3);

        assert_eq!(cache.get(&"a".to_string()), None);
        assert_eq!(cache.get(&"b".to_string()), Some(2));
        assert_eq!(cache.get(&"c".to_string()), Some(3));
        assert_eq!(log.lock().unwrap().as_slice(), &[("a".to_string(), 1)]);
    }

    #[test]
    fn test_size_never_exceeds_capacity() {
        let (cache, log) = recording_cache(3);
        for i in 0..20 {
            cache.insert(format!("key-{i}"), i);
            assert!(cache.len() <= 3);
        }
        // One callback per capacity eviction.
        assert_eq!(log.lock().unwrap().len(), 17);
    }

    #[test]
    fn test_get_promotes_entry() {
        let cache = LruCache::new(2);
        cache.insert("a".to_string(), 1);
        cache.insert("b".to_string(), 2);

        // Touch "a" so "b" becomes the eviction candidate.
        assert_eq!(cache.get(&"a".to_string()), Some(1));
        cache.insert("c".to_string(), 3);

        assert_eq!(cache.get(&"a".to_string()), Some(1));
        assert_eq!(cache.get(&"b".to_string()), None);
    }

    #[test]
    fn test_update_existing_key_does_not_evict() {
        let (cache, log) = recording_cache(2);
        cache.insert("a".to_string(), 1);
        cache.insert("b".to_string(), 2);
        cache.insert("a".to_string(), 10);

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&"a".to_string()), Some(10));
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn test_update_promotes_key() {
        let cache = LruCache::new(2);
        cache.insert("a".to_string(), 1);
        cache.insert("b".to_string(), 2);
        cache.insert("a".to_string(), 10);
        cache.insert("c".to_string(), 3);

        // "b" was the least recently touched.
        assert_eq!(cache.get(&"b".to_string()), None);
        assert_eq!(cache.get(&"a".to_string()), Some(10));
    }

    #[test]
    fn test_remove_invokes_callback() {
        let (cache, log) = recording_cache(4);
        cache.insert("a".to_string(), 1);
        cache.remove(&"a".to_string());

        assert!(cache.is_empty());
        assert_eq!(log.lock().unwrap().as_slice(), &[("a".to_string(), 1)]);
    }

    #[test]
    fn test_remove_missing_is_silent() {
        let (cache, log) = recording_cache(4);
        cache.remove(&"nope".to_string());
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn test_clear_invokes_callback_per_entry() {
        let (cache, log) = recording_cache(4);
        cache.insert("a".to_string(), 1);
        cache.insert("b".to_string(), 2);
        cache.clear();

        assert!(cache.is_empty());
        let mut evicted = log.lock().unwrap().clone();
        evicted.sort();
        assert_eq!(evicted, vec![("a".to_string(), 1), ("b".to_string(), 2)]);
    }

    #[test]
    fn test_set_capacity_shrinks_immediately() {
        let (cache, log) = recording_cache(4);
        for i in 0..4 {
            cache.insert(format!("key-{i}"), i);
        }

        cache.set_capacity(1);

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.capacity(), 1);
        // Oldest three go, newest stays.
        assert_eq!(cache.get(&"key-3".to_string()), Some(3));
        assert_eq!(
            log.lock().unwrap().as_slice(),
            &[
                ("key-0".to_string(), 0),
                ("key-1".to_string(), 1),
                ("key-2".to_string(), 2)
            ]
        );
    }

    #[test]
    fn test_callback_may_reenter_the_cache() {
        // The callback runs outside the internal lock, so calling back into
        // the cache must not deadlock.
        static SLOT: OnceLock<Arc<LruCache<String, i32>>> = OnceLock::new();
        static SEEN_LEN: OnceLock<usize> = OnceLock::new();

        let cache = Arc::new(LruCache::with_eviction_callback(
            1,
            |_key: &String, _value| {
                if let Some(cache) = SLOT.get() {
                    let _ = SEEN_LEN.set(cache.len());
                }
            },
        ));
        SLOT.set(cache.clone()).ok();

        cache.insert("a".to_string(), 1);
        cache.insert("b".to_string(), 2);

        assert_eq!(SEEN_LEN.get().copied(), Some(1));
    }
}
