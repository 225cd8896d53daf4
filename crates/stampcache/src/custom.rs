//! Concurrent FIFO/LRU cache engine
//!
//! Lookups under FIFO first try an optimistic, lock-free walk validated by a
//! [`SeqLock`]; on failure they retry under the shared lock and only take
//! the exclusive lock to insert. LRU must reorder on every hit, so it always
//! takes the exclusive lock.
//!
//! The generator runs while the exclusive lock is held. That serializes all
//! misses, including unrelated ones, and is what guarantees a key is never
//! generated twice while absent. A generator must not read from the cache
//! it feeds.

use std::collections::HashSet;
use std::fmt;
use std::hash::Hash;
use std::sync::atomic::{AtomicUsize, Ordering};

use ahash::RandomState;
use parking_lot::RwLock;
use tracing::{debug, trace, warn};

use crate::cache::{Cache, Policy};
use crate::error::{Error, InvariantError, Result};
use crate::generator::Generator;
use crate::node::{Entry, Links, Table, NIL};
use crate::seqlock::SeqLock;
use crate::sizing::round_up_to_power_of_two;
use crate::stats::CacheStats;

/// Maximum number of entries a cache may hold
///
/// Storage is allocated as entries arrive, but the chunk directories for
/// buckets and slots are sized to this bound at construction.
pub const MAX_CAPACITY: i64 = 1 << 28;

/// Bounded cache with an optimistic read path
pub struct CustomCache<K, V> {
    /// Eviction threshold, as requested (not rounded)
    capacity: usize,

    policy: Policy,

    generator: Generator<K, V>,

    hasher: RandomState,

    /// Bucket heads and reader-visible node state
    table: Table<K, V>,

    /// Shared/exclusive lock over the remaining links
    links: RwLock<Links>,

    /// Bumped around every bucket-chain mutation
    seq: SeqLock,

    /// Live entries; written under the exclusive lock, read anywhere
    used: AtomicUsize,

    stats: CacheStats,
}

impl<K, V> CustomCache<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    /// Create a new cache
    ///
    /// # Arguments
    /// * `generator` - Computes values for missing keys
    /// * `capacity` - Maximum number of live entries
    /// * `policy` - FIFO or LRU eviction order
    ///
    /// # Errors
    /// Negative, zero, or oversized capacity.
    pub fn new(generator: Generator<K, V>, capacity: i64, policy: Policy) -> Result<Self> {
        let bucket_count = round_up_to_power_of_two(capacity)?;
        if capacity == 0 {
            return Err(Error::ZeroCapacity);
        }
        if capacity > MAX_CAPACITY {
            return Err(Error::CapacityTooLarge(capacity));
        }

        let too_large = |_| Error::CapacityTooLarge(capacity);
        let bucket_count = usize::try_from(bucket_count).map_err(too_large)?;
        let capacity = usize::try_from(capacity).map_err(too_large)?;
        debug!(capacity, bucket_count, ?policy, "creating custom cache");

        Ok(Self {
            capacity,
            policy,
            generator,
            hasher: RandomState::new(),
            table: Table::new(bucket_count, capacity),
            links: RwLock::new(Links::new()),
            seq: SeqLock::new(),
            used: AtomicUsize::new(0),
            stats: CacheStats::new(),
        })
    }

    /// Number of buckets (the capacity rounded up to a power of two)
    pub fn bucket_count(&self) -> usize {
        self.table.bucket_count()
    }

    /// Keys from most recently inserted/used to eviction candidate
    pub fn keys(&self) -> Vec<K> {
        let links = self.links.read();
        links
            .iter()
            .filter_map(|idx| self.table.entry(idx).map(|entry| entry.key.clone()))
            .collect()
    }

    fn hash(&self, key: &K) -> u64 {
        self.hasher.hash_one(key)
    }

    fn read_fifo(&self, key: &K, hash: u64) -> Result<V> {
        if let Some(stamp) = self.seq.try_optimistic_read() {
            let found = self.table.find(hash, key);
            if self.seq.validate(stamp) {
                if let Some((_, entry)) = found {
                    self.stats.record_optimistic_hit();
                    return Ok(entry.value.clone());
                }
            }
        }

        {
            let _shared = self.links.read();
            if let Some((_, entry)) = self.table.find(hash, key) {
                // Entries never move under FIFO, no write access needed
                self.stats.record_hit();
                return Ok(entry.value.clone());
            }
        }

        // Upgrade by release-then-acquire; the shared guard is gone
        let mut links = self.links.write();
        if let Some((_, entry)) = self.table.find(hash, key) {
            // Inserted by another writer while we waited
            self.stats.record_hit();
            return Ok(entry.value.clone());
        }

        self.insert(&mut links, key, hash)
    }

    fn read_lru(&self, key: &K, hash: u64) -> Result<V> {
        let mut links = self.links.write();

        if let Some((idx, entry)) = self.table.find(hash, key) {
            links.move_to_front(idx);
            self.stats.record_hit();
            return Ok(entry.value.clone());
        }

        self.insert(&mut links, key, hash)
    }

    /// Generate and link a new entry. Caller holds the exclusive lock.
    fn insert(&self, links: &mut Links, key: &K, hash: u64) -> Result<V> {
        self.stats.record_miss();

        // Nothing is touched until the value exists
        let value = match self.generator.generate(key) {
            Ok(value) => value,
            Err(e) => {
                self.stats.record_generator_failure();
                warn!(error = %e, "generator failed, cache left unchanged");
                return Err(e);
            }
        };

        let _write = self.seq.write();
        let used = self.used.load(Ordering::Relaxed);

        let idx = if used >= self.capacity {
            let victim = self.evict(links);
            self.stats.record_eviction();
            victim
        } else {
            self.used.store(used + 1, Ordering::Release);
            used
        };

        self.table.publish(
            idx,
            Entry {
                key: key.clone(),
                value: value.clone(),
                hash,
            },
        );
        self.table.link_front(links, idx, self.table.bucket_of(hash));
        links.push_front(idx);
        self.stats.record_insert();

        Ok(value)
    }

    /// Detach the eviction candidate from both lists and return its slot
    fn evict(&self, links: &mut Links) -> usize {
        // A full cache always has a tail: capacity > 0
        let victim = match links.back() {
            Some(idx) => idx,
            None => unreachable!("full cache with an empty ordering list"),
        };

        links.unlink(victim);
        if let Some(entry) = self.table.entry(victim) {
            self.table
                .unlink(links, victim, self.table.bucket_of(entry.hash));
        }
        trace!(slot = victim, "evicted entry");

        victim
    }

    /// Verify that bucket chains and the ordering list agree.
    ///
    /// Takes the shared lock, so it is safe to call at any time.
    pub fn check_invariants(&self) -> std::result::Result<(), InvariantError> {
        let links = self.links.read();
        let used = self.used.load(Ordering::Acquire);

        if used > self.capacity {
            return Err(InvariantError::new(format!(
                "used {} exceeds capacity {}",
                used, self.capacity
            )));
        }

        let mut in_list = HashSet::with_capacity(used);
        for idx in links.iter() {
            if !links.list_linked_consistently(idx) {
                return Err(InvariantError::new(format!(
                    "ordering list links of slot {idx} are not symmetric"
                )));
            }
            if !in_list.insert(idx) {
                return Err(InvariantError::new(format!(
                    "slot {idx} appears twice in the ordering list"
                )));
            }
        }
        if in_list.len() != used {
            return Err(InvariantError::new(format!(
                "ordering list holds {} nodes, used is {}",
                in_list.len(),
                used
            )));
        }

        let mut in_buckets = HashSet::with_capacity(used);
        for bucket in 0..self.table.bucket_count() {
            let mut prev = NIL;
            let mut idx = self.table.head(bucket);
            while idx != NIL {
                if !in_buckets.insert(idx) {
                    return Err(InvariantError::new(format!(
                        "slot {idx} reachable twice through bucket chains"
                    )));
                }
                if links.bucket_prev(idx) != prev {
                    return Err(InvariantError::new(format!(
                        "bucket back-pointer of slot {idx} is wrong"
                    )));
                }
                match self.table.entry(idx) {
                    Some(entry) if self.table.bucket_of(entry.hash) == bucket => {}
                    Some(_) => {
                        return Err(InvariantError::new(format!(
                            "slot {idx} is chained in the wrong bucket {bucket}"
                        )))
                    }
                    None => {
                        return Err(InvariantError::new(format!(
                            "empty slot {idx} is chained in bucket {bucket}"
                        )))
                    }
                }
                prev = idx;
                idx = self.table.next_in_bucket(idx);
            }
        }

        if in_buckets != in_list {
            return Err(InvariantError::new(
                "bucket chains and ordering list hold different nodes",
            ));
        }

        Ok(())
    }
}

impl<K, V> Cache<K, V> for CustomCache<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    fn read(&self, key: &K) -> Result<V> {
        let hash = self.hash(key);
        match self.policy {
            Policy::Fifo => self.read_fifo(key, hash),
            Policy::Lru => self.read_lru(key, hash),
        }
    }

    /// Lock-free, unvalidated lookup for tests and diagnostics.
    ///
    /// Walks the key's whole bucket chain and only returns a value whose key
    /// matches, rather than whatever entry heads the bucket. Under
    /// concurrent writers it may still miss a live key or return a value
    /// that is being evicted.
    fn get(&self, key: &K) -> Option<V> {
        self.table
            .find(self.hash(key), key)
            .map(|(_, entry)| entry.value.clone())
    }

    fn usage(&self) -> usize {
        self.used.load(Ordering::Acquire)
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

impl<K, V> fmt::Debug for CustomCache<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustomCache")
            .field("capacity", &self.capacity)
            .field("policy", &self.policy)
            .field("used", &self.used.load(Ordering::Relaxed))
            .field("version", &self.seq.version())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::panic::AssertUnwindSafe;
    use std::sync::atomic::AtomicU32;
    use std::sync::Arc;

    fn to_string_cache(capacity: i64, policy: Policy) -> CustomCache<u32, String> {
        CustomCache::new(Generator::new(|k: &u32| k.to_string()), capacity, policy).unwrap()
    }

    #[test]
    fn test_fifo_scenario() {
        let cache = to_string_cache(3, Policy::Fifo);
        for key in [1, 2, 1, 3, 4] {
            cache.read(&key).unwrap();
        }

        assert_eq!(cache.usage(), 3);
        assert_eq!(cache.get(&1), None);
        assert_eq!(cache.get(&2).as_deref(), Some("2"));
        assert_eq!(cache.get(&3).as_deref(), Some("3"));
        assert_eq!(cache.keys(), vec![4, 3, 2]);
        cache.check_invariants().unwrap();
    }

    #[test]
    fn test_lru_scenario() {
        let cache = to_string_cache(3, Policy::Lru);
        for key in [1, 2, 1, 3, 4] {
            cache.read(&key).unwrap();
        }

        assert_eq!(cache.usage(), 3);
        assert_eq!(cache.get(&2), None);
        assert_eq!(cache.get(&1).as_deref(), Some("1"));
        assert_eq!(cache.get(&3).as_deref(), Some("3"));
        assert_eq!(cache.keys(), vec![4, 3, 1]);
        cache.check_invariants().unwrap();
    }

    #[test]
    fn test_bucket_count_rounds_capacity() {
        assert_eq!(to_string_cache(3, Policy::Fifo).bucket_count(), 4);
        assert_eq!(to_string_cache(16, Policy::Fifo).bucket_count(), 16);
        assert_eq!(to_string_cache(17, Policy::Lru).bucket_count(), 32);
    }

    #[test]
    fn test_capacity_is_not_rounded() {
        // 3 rounds to 4 buckets, but only 3 entries fit
        let cache = to_string_cache(3, Policy::Fifo);
        for key in 0..10 {
            cache.read(&key).unwrap();
            assert!(cache.usage() <= 3);
        }
        assert_eq!(cache.usage(), 3);
        assert_eq!(cache.stats().evictions(), 7);
    }

    #[test]
    fn test_fifo_hits_do_not_reorder() {
        let cache = to_string_cache(2, Policy::Fifo);
        cache.read(&1).unwrap();
        cache.read(&2).unwrap();
        for _ in 0..5 {
            cache.read(&1).unwrap();
        }
        cache.read(&3).unwrap();

        assert_eq!(cache.get(&1), None);
        assert_eq!(cache.keys(), vec![3, 2]);
    }

    #[test]
    fn test_fifo_hits_take_optimistic_path() {
        let cache = to_string_cache(4, Policy::Fifo);
        cache.read(&1).unwrap();
        cache.read(&1).unwrap();
        cache.read(&1).unwrap();

        assert_eq!(cache.stats().misses(), 1);
        assert_eq!(cache.stats().hits(), 2);
        assert_eq!(cache.stats().optimistic_hits(), 2);
    }

    #[test]
    fn test_lru_hit_refreshes() {
        let cache = to_string_cache(2, Policy::Lru);
        cache.read(&1).unwrap();
        cache.read(&2).unwrap();
        cache.read(&1).unwrap();
        cache.read(&3).unwrap();

        assert_eq!(cache.get(&2), None);
        assert_eq!(cache.keys(), vec![3, 1]);
        assert_eq!(cache.stats().optimistic_hits(), 0);
    }

    #[test]
    fn test_generator_called_once_per_live_key() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let cache = CustomCache::new(
            Generator::new(move |k: &u32| {
                counter.fetch_add(1, Ordering::SeqCst);
                k * 10
            }),
            8,
            Policy::Lru,
        )
        .unwrap();

        for _ in 0..100 {
            assert_eq!(cache.read(&5).unwrap(), 50);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_generator_failure_leaves_cache_intact() {
        let cache = CustomCache::new(
            Generator::fallible(|k: &u32| {
                if *k == 13 {
                    Err("unlucky")
                } else {
                    Ok(k.to_string())
                }
            }),
            2,
            Policy::Fifo,
        )
        .unwrap();

        cache.read(&1).unwrap();
        cache.read(&2).unwrap();
        assert!(matches!(cache.read(&13), Err(Error::Generator(_))));

        // No victim was evicted for the failed insert
        assert_eq!(cache.usage(), 2);
        assert_eq!(cache.keys(), vec![2, 1]);
        assert_eq!(cache.stats().generator_failures(), 1);
        cache.check_invariants().unwrap();

        // Lock released, cache still usable
        assert_eq!(cache.read(&3).unwrap(), "3");
        assert_eq!(cache.keys(), vec![3, 2]);
    }

    #[test]
    fn test_rejects_bad_capacity() {
        let make = |capacity| {
            CustomCache::new(Generator::new(|k: &u32| *k), capacity, Policy::Fifo)
        };

        assert!(matches!(make(-1), Err(Error::NegativeCapacity(-1))));
        assert!(matches!(make(0), Err(Error::ZeroCapacity)));
        assert!(matches!(
            make(MAX_CAPACITY + 1),
            Err(Error::CapacityTooLarge(_))
        ));
    }

    #[test]
    fn test_largest_capacity_allocates_lazily() {
        for policy in [Policy::Fifo, Policy::Lru] {
            let cache =
                CustomCache::new(Generator::new(|k: &u32| *k), MAX_CAPACITY, policy).unwrap();
            assert_eq!(cache.capacity(), 1 << 28);
            assert_eq!(cache.table.allocated_chunks(), (0, 0));

            assert_eq!(cache.read(&7).unwrap(), 7);
            assert_eq!(cache.read(&7).unwrap(), 7);
            assert_eq!(cache.usage(), 1);
            assert_eq!(cache.keys(), vec![7]);
            // One bucket chunk and one slot chunk for a single entry
            assert_eq!(cache.table.allocated_chunks(), (1, 1));
        }
    }

    fn flaky_cache(capacity: i64, policy: Policy) -> CustomCache<u32, String> {
        CustomCache::new(
            Generator::fallible(|k: &u32| match *k {
                9 => panic!("generator blew up"),
                13 => Err("unlucky"),
                _ => Ok(k.to_string()),
            }),
            capacity,
            policy,
        )
        .unwrap()
    }

    #[test]
    fn test_generator_failure_before_full() {
        for policy in [Policy::Fifo, Policy::Lru] {
            let cache = flaky_cache(4, policy);
            cache.read(&1).unwrap();
            cache.read(&2).unwrap();

            assert!(matches!(cache.read(&13), Err(Error::Generator(_))));
            assert_eq!(cache.usage(), 2, "{policy}");
            assert_eq!(cache.keys(), vec![2, 1]);
            assert_eq!(cache.get(&13), None);
            cache.check_invariants().unwrap();

            assert_eq!(cache.read(&3).unwrap(), "3");
            assert_eq!(cache.usage(), 3);
            assert_eq!(cache.keys(), vec![3, 2, 1]);
            cache.check_invariants().unwrap();
        }
    }

    #[test]
    fn test_generator_panic_releases_lock() {
        let cases = [
            (4, Policy::Fifo),
            (4, Policy::Lru),
            (2, Policy::Fifo),
            (2, Policy::Lru),
        ];
        for (capacity, policy) in cases {
            let cache = flaky_cache(capacity, policy);
            cache.read(&1).unwrap();
            cache.read(&2).unwrap();

            let result = std::panic::catch_unwind(AssertUnwindSafe(|| cache.read(&9)));
            assert!(result.is_err());

            assert_eq!(cache.usage(), 2, "{policy} capacity {capacity}");
            assert_eq!(cache.keys(), vec![2, 1]);
            cache.check_invariants().unwrap();

            // The exclusive lock was dropped during unwinding
            assert_eq!(cache.read(&2).unwrap(), "2");
            assert_eq!(cache.read(&3).unwrap(), "3");
            cache.check_invariants().unwrap();
        }
    }

    #[test]
    fn test_capacity_one() {
        let cache = to_string_cache(1, Policy::Lru);
        for key in 0..5 {
            assert_eq!(cache.read(&key).unwrap(), key.to_string());
            assert_eq!(cache.usage(), 1);
        }
        assert_eq!(cache.keys(), vec![4]);
        cache.check_invariants().unwrap();
    }

    #[test]
    fn test_invariants_hold_with_collisions() {
        // 64 keys through 8 buckets forces long chains and mid-chain evictions
        for policy in [Policy::Fifo, Policy::Lru] {
            let cache = to_string_cache(8, policy);
            for round in 0..4u32 {
                for key in 0..64u32 {
                    cache.read(&((key * 7 + round) % 64)).unwrap();
                    cache.check_invariants().unwrap();
                }
            }
            assert_eq!(cache.usage(), 8);
        }
    }
}
