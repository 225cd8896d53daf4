//! Single-threaded reference cache
//!
//! An ordered map that keeps insertion order (FIFO) or access order (LRU)
//! and drops its oldest entry once full. State sits in a `RefCell`, so the
//! cache is `!Sync` and cannot be shared across threads.

use std::cell::RefCell;
use std::collections::HashMap;
use std::hash::Hash;

use ahash::RandomState;
use tracing::debug;

use crate::cache::{Cache, Policy};
use crate::error::{Error, Result};
use crate::generator::Generator;
use crate::node::Links;
use crate::stats::CacheStats;

/// Capacity-bounded map ordered by insertion or access.
///
/// Entries sit in a slot vector and share the engine's sentinel-anchored
/// [`Links`] list for ordering; freed slots are reused.
pub(crate) struct OrderedMap<K, V> {
    map: HashMap<K, usize, RandomState>,
    entries: Vec<Option<(K, V)>>,
    order: Links,
    free_list: Vec<usize>,
    capacity: usize,
    access_order: bool,
}

impl<K, V> OrderedMap<K, V>
where
    K: Hash + Eq + Clone,
{
    /// `access_order` moves entries to the front on every `get`
    pub(crate) fn new(capacity: usize, access_order: bool) -> Self {
        assert!(capacity > 0, "Capacity must be greater than 0");

        Self {
            map: HashMap::with_hasher(RandomState::new()),
            entries: Vec::new(),
            order: Links::new(),
            free_list: Vec::new(),
            capacity,
            access_order,
        }
    }

    /// Get a value, refreshing its position under access order
    pub(crate) fn get(&mut self, key: &K) -> Option<&V> {
        let idx = *self.map.get(key)?;
        if self.access_order {
            self.order.move_to_front(idx);
        }
        self.entries[idx].as_ref().map(|(_, value)| value)
    }

    /// Get a value without touching the order
    pub(crate) fn peek(&self, key: &K) -> Option<&V> {
        let idx = *self.map.get(key)?;
        self.entries[idx].as_ref().map(|(_, value)| value)
    }

    /// Insert a new key, evicting the oldest entry when full.
    ///
    /// Returns `true` if an entry was evicted.
    pub(crate) fn insert(&mut self, key: K, value: V) -> bool {
        debug_assert!(!self.map.contains_key(&key));

        let evicted = self.map.len() >= self.capacity;
        if evicted {
            self.evict();
        }

        let idx = match self.free_list.pop() {
            Some(idx) => idx,
            None => {
                self.entries.push(None);
                self.entries.len() - 1
            }
        };
        self.entries[idx] = Some((key.clone(), value));
        self.order.push_front(idx);

        self.map.insert(key, idx);
        evicted
    }

    /// Number of entries
    pub(crate) fn len(&self) -> usize {
        self.map.len()
    }

    /// Keys from newest to oldest
    pub(crate) fn keys(&self) -> Vec<K> {
        self.order
            .iter()
            .filter_map(|idx| self.entries[idx].as_ref().map(|(key, _)| key.clone()))
            .collect()
    }

    fn evict(&mut self) {
        if let Some(idx) = self.order.back() {
            self.order.unlink(idx);
            if let Some((key, _)) = self.entries[idx].take() {
                self.map.remove(&key);
            }
            self.free_list.push(idx);
        }
    }
}

/// Reference cache validating [`CustomCache`](crate::CustomCache) behaviour
pub struct BaselineCache<K, V> {
    inner: RefCell<OrderedMap<K, V>>,
    generator: Generator<K, V>,
    policy: Policy,
    capacity: usize,
    stats: CacheStats,
}

impl<K, V> BaselineCache<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    /// Create a new baseline cache
    ///
    /// # Errors
    /// Negative or zero capacity.
    pub fn new(generator: Generator<K, V>, capacity: i64, policy: Policy) -> Result<Self> {
        if capacity < 0 {
            return Err(Error::NegativeCapacity(capacity));
        }
        if capacity == 0 {
            return Err(Error::ZeroCapacity);
        }
        let capacity =
            usize::try_from(capacity).map_err(|_| Error::CapacityTooLarge(capacity))?;
        debug!(capacity, ?policy, "creating baseline cache");

        Ok(Self {
            inner: RefCell::new(OrderedMap::new(capacity, policy == Policy::Lru)),
            generator,
            policy,
            capacity,
            stats: CacheStats::new(),
        })
    }

    /// Keys from most recently inserted/used to eviction candidate
    pub fn keys(&self) -> Vec<K> {
        self.inner.borrow().keys()
    }
}

impl<K, V> Cache<K, V> for BaselineCache<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    fn read(&self, key: &K) -> Result<V> {
        if let Some(value) = self.inner.borrow_mut().get(key) {
            self.stats.record_hit();
            return Ok(value.clone());
        }

        self.stats.record_miss();
        let value = self.generator.generate(key).inspect_err(|_| {
            self.stats.record_generator_failure();
        })?;

        if self.inner.borrow_mut().insert(key.clone(), value.clone()) {
            self.stats.record_eviction();
        }
        self.stats.record_insert();

        Ok(value)
    }

    fn get(&self, key: &K) -> Option<V> {
        self.inner.borrow().peek(key).cloned()
    }

    fn usage(&self) -> usize {
        self.inner.borrow().len()
    }

    fn capacity(&self) -> usize {
        self.capacity
    }

    fn policy(&self) -> Policy {
        self.policy
    }

    fn stats(&self) -> &CacheStats {
        &self.stats
    }
}
