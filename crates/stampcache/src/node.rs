//! Arena-backed entry nodes
//!
//! Every node is an index into one arena and sits in two lists at once: the
//! chain of its hash bucket and the ordering list anchored by the sentinel.
//! Bucket heads and `next_in_bucket` are atomics because optimistic readers
//! walk chains without the lock. Everything else is only touched by the
//! exclusive lock holder and lives in [`Links`].
//!
//! Nothing is sized to the full capacity up front: bucket heads and slots
//! are allocated one chunk at a time on first write, and [`Links`] grows as
//! slots are handed out.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use arc_swap::ArcSwapOption;

/// Marker for "no node"
pub(crate) const NIL: usize = usize::MAX;

/// Index of the ordering-list sentinel; never a slot index
pub(crate) const SENTINEL: usize = usize::MAX - 1;

const CHUNK_BITS: u32 = 10;
const CHUNK_LEN: usize = 1 << CHUNK_BITS;

/// Fixed-length array whose storage is allocated one chunk at a time.
///
/// Readers see unallocated chunks as `None`. A chunk is fully initialized
/// before any index inside it can be published to them.
pub(crate) struct ChunkedArray<T> {
    chunks: Box<[OnceLock<Box<[T]>>]>,
    len: usize,
    init: fn() -> T,
}

impl<T> ChunkedArray<T> {
    pub(crate) fn new(len: usize, init: fn() -> T) -> Self {
        Self {
            chunks: (0..len.div_ceil(CHUNK_LEN)).map(|_| OnceLock::new()).collect(),
            len,
            init,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn get(&self, idx: usize) -> Option<&T> {
        let chunk = self.chunks.get(idx >> CHUNK_BITS)?.get()?;
        chunk.get(idx & (CHUNK_LEN - 1))
    }

    /// Element at `idx`, allocating its chunk first if needed
    pub(crate) fn get_or_alloc(&self, idx: usize) -> &T {
        debug_assert!(idx < self.len);
        let chunk = self.chunks[idx >> CHUNK_BITS].get_or_init(|| {
            let start = idx & !(CHUNK_LEN - 1);
            let n = CHUNK_LEN.min(self.len - start);
            (0..n).map(|_| (self.init)()).collect()
        });
        &chunk[idx & (CHUNK_LEN - 1)]
    }

    #[cfg(test)]
    pub(crate) fn allocated_chunks(&self) -> usize {
        self.chunks.iter().filter(|c| c.get().is_some()).count()
    }
}

/// Key/value pair published into a slot; never mutated afterwards
#[derive(Debug)]
pub(crate) struct Entry<K, V> {
    pub(crate) key: K,
    pub(crate) value: V,
    pub(crate) hash: u64,
}

/// Arena slot visible to lock-free readers
pub(crate) struct Slot<K, V> {
    entry: ArcSwapOption<Entry<K, V>>,
    next_in_bucket: AtomicUsize,
}

impl<K, V> Slot<K, V> {
    fn empty() -> Self {
        Self {
            entry: ArcSwapOption::empty(),
            next_in_bucket: AtomicUsize::new(NIL),
        }
    }
}

fn empty_bucket() -> AtomicUsize {
    AtomicUsize::new(NIL)
}

/// Bucket array plus the reader-visible half of the arena
pub(crate) struct Table<K, V> {
    buckets: ChunkedArray<AtomicUsize>,
    slots: ChunkedArray<Slot<K, V>>,
    mask: usize,
}

impl<K, V> Table<K, V>
where
    K: Eq,
{
    /// `bucket_count` must be a power of two
    pub(crate) fn new(bucket_count: usize, slot_count: usize) -> Self {
        debug_assert!(bucket_count.is_power_of_two());
        Self {
            buckets: ChunkedArray::new(bucket_count, empty_bucket),
            slots: ChunkedArray::new(slot_count, Slot::empty),
            mask: bucket_count - 1,
        }
    }

    pub(crate) fn bucket_of(&self, hash: u64) -> usize {
        (hash as usize) & self.mask
    }

    pub(crate) fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    pub(crate) fn head(&self, bucket: usize) -> usize {
        self.buckets
            .get(bucket)
            .map_or(NIL, |head| head.load(Ordering::Acquire))
    }

    pub(crate) fn next_in_bucket(&self, idx: usize) -> usize {
        self.slots
            .get(idx)
            .map_or(NIL, |slot| slot.next_in_bucket.load(Ordering::Acquire))
    }

    pub(crate) fn entry(&self, idx: usize) -> Option<Arc<Entry<K, V>>> {
        self.slots.get(idx)?.entry.load_full()
    }

    /// Walk the chain for `hash` looking for `key`.
    ///
    /// Safe to call without the lock: a concurrent writer can make the walk
    /// miss or wander, so it stops after visiting as many nodes as the arena
    /// holds. Callers that need a trustworthy answer validate afterwards.
    pub(crate) fn find(&self, hash: u64, key: &K) -> Option<(usize, Arc<Entry<K, V>>)> {
        let mut idx = self.head(self.bucket_of(hash));
        let mut steps = 0;

        while steps <= self.slots.len() {
            let slot = self.slots.get(idx)?;
            let guard = slot.entry.load();
            if let Some(entry) = &*guard {
                if entry.hash == hash && entry.key == *key {
                    return Some((idx, Arc::clone(entry)));
                }
            }
            idx = slot.next_in_bucket.load(Ordering::Acquire);
            steps += 1;
        }

        None
    }

    /// Store a fresh entry in `idx`, replacing whatever the slot held
    pub(crate) fn publish(&self, idx: usize, entry: Entry<K, V>) {
        self.slots
            .get_or_alloc(idx)
            .entry
            .store(Some(Arc::new(entry)));
    }

    /// Link `idx` at the head of its bucket chain. Exclusive lock only.
    pub(crate) fn link_front(&self, links: &mut Links, idx: usize, bucket: usize) {
        let head_slot = self.buckets.get_or_alloc(bucket);
        let head = head_slot.load(Ordering::Relaxed);
        self.slots
            .get_or_alloc(idx)
            .next_in_bucket
            .store(head, Ordering::Release);
        links.set_prev_in_bucket(idx, NIL);
        if head != NIL {
            links.set_prev_in_bucket(head, idx);
        }
        head_slot.store(idx, Ordering::Release);
    }

    /// Unlink `idx` from its bucket chain. Exclusive lock only.
    ///
    /// The node keeps its own `next_in_bucket` so a reader standing on it
    /// can still walk forward.
    pub(crate) fn unlink(&self, links: &mut Links, idx: usize, bucket: usize) {
        let prev = links.prev_in_bucket(idx);
        let next = self.next_in_bucket(idx);

        if prev == NIL {
            self.buckets
                .get_or_alloc(bucket)
                .store(next, Ordering::Release);
        } else {
            self.slots
                .get_or_alloc(prev)
                .next_in_bucket
                .store(next, Ordering::Release);
        }
        if next != NIL {
            links.set_prev_in_bucket(next, prev);
        }
        links.set_prev_in_bucket(idx, NIL);
    }

    #[cfg(test)]
    pub(crate) fn allocated_chunks(&self) -> (usize, usize) {
        (self.buckets.allocated_chunks(), self.slots.allocated_chunks())
    }
}

#[derive(Debug, Clone, Copy)]
struct Link {
    prev_in_bucket: usize,
    next_in_list: usize,
    prev_in_list: usize,
}

impl Link {
    const UNLINKED: Link = Link {
        prev_in_bucket: NIL,
        next_in_list: NIL,
        prev_in_list: NIL,
    };
}

/// Lock-protected links: bucket back-pointers and the circular ordering list.
///
/// The sentinel lives outside the node vector at index [`SENTINEL`].
/// `sentinel.next` is the most recently inserted (or used) node,
/// `sentinel.prev` the eviction candidate. The vector grows on first write
/// to an index.
#[derive(Debug)]
pub(crate) struct Links {
    nodes: Vec<Link>,
    sentinel: Link,
}

impl Links {
    pub(crate) fn new() -> Self {
        Self {
            nodes: Vec::new(),
            sentinel: Link {
                prev_in_bucket: NIL,
                next_in_list: SENTINEL,
                prev_in_list: SENTINEL,
            },
        }
    }

    fn link(&self, idx: usize) -> Link {
        if idx == SENTINEL {
            self.sentinel
        } else {
            self.nodes.get(idx).copied().unwrap_or(Link::UNLINKED)
        }
    }

    fn link_mut(&mut self, idx: usize) -> &mut Link {
        if idx == SENTINEL {
            return &mut self.sentinel;
        }
        if idx >= self.nodes.len() {
            self.nodes.resize(idx + 1, Link::UNLINKED);
        }
        &mut self.nodes[idx]
    }

    fn prev_in_bucket(&self, idx: usize) -> usize {
        self.link(idx).prev_in_bucket
    }

    fn set_prev_in_bucket(&mut self, idx: usize, prev: usize) {
        self.link_mut(idx).prev_in_bucket = prev;
    }

    /// Most recently inserted or used node
    pub(crate) fn front(&self) -> Option<usize> {
        let idx = self.sentinel.next_in_list;
        (idx != SENTINEL).then_some(idx)
    }

    /// Eviction candidate
    pub(crate) fn back(&self) -> Option<usize> {
        let idx = self.sentinel.prev_in_list;
        (idx != SENTINEL).then_some(idx)
    }

    /// Insert `idx` right after the sentinel
    pub(crate) fn push_front(&mut self, idx: usize) {
        let old_front = self.sentinel.next_in_list;

        let node = self.link_mut(idx);
        node.prev_in_list = SENTINEL;
        node.next_in_list = old_front;
        self.link_mut(old_front).prev_in_list = idx;
        self.sentinel.next_in_list = idx;
    }

    pub(crate) fn unlink(&mut self, idx: usize) {
        let Link {
            prev_in_list: prev,
            next_in_list: next,
            ..
        } = self.link(idx);
        if prev == NIL || next == NIL {
            return; // Not linked
        }

        self.link_mut(prev).next_in_list = next;
        self.link_mut(next).prev_in_list = prev;
        let node = self.link_mut(idx);
        node.prev_in_list = NIL;
        node.next_in_list = NIL;
    }

    pub(crate) fn move_to_front(&mut self, idx: usize) {
        if self.front() == Some(idx) {
            return; // Already at front
        }

        self.unlink(idx);
        self.push_front(idx);
    }

    /// Node indices from front to back
    pub(crate) fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        let mut idx = self.sentinel.next_in_list;
        let mut remaining = self.nodes.len();

        std::iter::from_fn(move || {
            if idx == SENTINEL || idx == NIL || remaining == 0 {
                return None;
            }
            let current = idx;
            idx = self.link(current).next_in_list;
            remaining -= 1;
            Some(current)
        })
    }

    /// Whether `idx`'s list neighbours point back at it
    pub(crate) fn list_linked_consistently(&self, idx: usize) -> bool {
        let Link {
            prev_in_list: prev,
            next_in_list: next,
            ..
        } = self.link(idx);
        prev != NIL
            && next != NIL
            && self.link(prev).next_in_list == idx
            && self.link(next).prev_in_list == idx
    }

    /// Back-pointer of `idx` within its chain, for invariant checks
    pub(crate) fn bucket_prev(&self, idx: usize) -> usize {
        self.prev_in_bucket(idx)
    }
}
