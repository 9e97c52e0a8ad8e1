//! Bounded least-recently-used map with string keys.
//!
//! Thin typed wrapper over [`LinkedHashMap`]: the front of the map is the
//! least recently used entry, the back the most recent. Lookups through
//! [`get`](BoundedCache::get) and
//! [`get_or_insert_with`](BoundedCache::get_or_insert_with) move an entry to
//! the back; inserting past capacity pops the front.
//!
//! The cache does no locking of its own.

use std::num::NonZeroUsize;

use linked_hash_map::LinkedHashMap;

/// Result of [`BoundedCache::get_or_insert_with`].
#[derive(Debug, Clone, PartialEq)]
pub struct Lookup<V> {
    /// The cached (or freshly created) value.
    pub value: V,
    /// Whether the value was created by this lookup.
    pub created: bool,
    /// Key pushed out to make room, if any.
    pub evicted: Option<String>,
}

/// A string-keyed map holding at most `capacity` entries.
#[derive(Debug)]
pub struct BoundedCache<V> {
    map: LinkedHashMap<String, V>,
    capacity: NonZeroUsize,
}

impl<V: Clone> BoundedCache<V> {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            map: LinkedHashMap::new(),
            capacity,
        }
    }

    /// Return the value for `key`, creating it with `make` on a miss.
    ///
    /// Either way the entry becomes the most recently used.
    pub fn get_or_insert_with<F>(&mut self, key: &str, make: F) -> Lookup<V>
    where
        F: FnOnce() -> V,
    {
        if let Some(value) = self.map.get_refresh(key) {
            return Lookup {
                value: value.clone(),
                created: false,
                evicted: None,
            };
        }

        let value = make();
        self.map.insert(key.to_string(), value.clone());

        let evicted = if self.map.len() > self.capacity.get() {
            self.map.pop_front().map(|(key, _)| key)
        } else {
            None
        };

        Lookup {
            value,
            created: true,
            evicted,
        }
    }

    /// Look up `key`, marking it most recently used.
    pub fn get(&mut self, key: &str) -> Option<V> {
        self.map.get_refresh(key).map(|value| value.clone())
    }

    /// Whether `key` is present. Does not touch recency.
    pub fn contains_key(&self, key: &str) -> bool {
        self.map.contains_key(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<V> {
        self.map.remove(key)
    }

    pub fn clear(&mut self) {
        self.map.clear();
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn capacity(&self) -> NonZeroUsize {
        self.capacity
    }

    /// Keys from least to most recently used.
    pub fn keys_lru_order(&self) -> Vec<String> {
        self.map.keys().cloned().collect()
    }
}
