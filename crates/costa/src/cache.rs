//! Fixed-capacity least-recently-used cache.
//!
//! Keys are opaque strings. The recency order is kept most-recent-first in a
//! `VecDeque`, so a hit costs a linear scan of at most `capacity` keys.

use std::collections::{HashMap, VecDeque};

/// A bounded LRU cache.
///
/// Not internally synchronized: wrap it in a mutex when shared.
#[derive(Debug, Clone)]
pub struct BoundedCache<V> {
    capacity: usize,
    order: VecDeque<String>,
    store: HashMap<String, V>,
}

impl<V> BoundedCache<V> {
    /// Create a cache holding at most `capacity` entries.
    ///
    /// A capacity of zero is clamped to one.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            order: VecDeque::with_capacity(capacity),
            store: HashMap::with_capacity(capacity),
        }
    }

    /// Look up `key`, promoting it to most-recently-used on a hit.
    pub fn get(&mut self, key: &str) -> Option<&V> {
        if !self.store.contains_key(key) {
            return None;
        }
        self.promote(key);
        self.store.get(key)
    }

    /// Insert or update `key`, promoting it and evicting the least recently
    /// used entry when the cache is full.
    pub fn put(&mut self, key: impl Into<String>, value: V) {
        let key = key.into();
        if self.store.insert(key.clone(), value).is_some() {
            self.promote(&key);
            return;
        }

        self.order.push_front(key);
        while self.order.len() > self.capacity {
            if let Some(evicted) = self.order.pop_back() {
                self.store.remove(&evicted);
                tracing::trace!(key = %evicted, "evicted cache entry");
            }
        }
    }

    /// Check for `key` without touching the recency order.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.store.contains_key(key)
    }

    /// Number of entries currently held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.store.len()
    }

    /// Whether the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// Maximum number of entries.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn promote(&mut self, key: &str) {
        if let Some(pos) = self.order.iter().position(|k| k == key)
            && let Some(k) = self.order.remove(pos)
        {
            self.order.push_front(k);
        }
    }
}
