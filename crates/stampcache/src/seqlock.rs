//! Version counter validating optimistic reads
//!
//! Writers hold the cache's exclusive lock and bump the version to odd
//! before mutating bucket chains, then back to even afterwards. A reader
//! that observed the same even version before and after its lookup saw no
//! concurrent mutation.

use std::sync::atomic::{fence, AtomicU64, Ordering};

/// Sequence counter for optimistic readers
#[derive(Debug, Default)]
pub struct SeqLock {
    version: AtomicU64,
}

/// Version observed at the start of an optimistic read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stamp(u64);

impl SeqLock {
    /// Create a counter at version 0
    pub fn new() -> Self {
        Self::default()
    }

    /// Start an optimistic read. `None` while a writer is active.
    pub fn try_optimistic_read(&self) -> Option<Stamp> {
        let version = self.version.load(Ordering::Acquire);
        if version & 1 == 1 {
            None
        } else {
            Some(Stamp(version))
        }
    }

    /// Whether no write started since `stamp` was taken
    pub fn validate(&self, stamp: Stamp) -> bool {
        // Order the reader's loads before the re-check of the version
        fence(Ordering::Acquire);
        self.version.load(Ordering::Relaxed) == stamp.0
    }

    /// Mark a write in progress until the guard drops.
    ///
    /// Callers must hold the exclusive lock; writers never overlap.
    pub fn write(&self) -> SeqWriteGuard<'_> {
        let version = self.version.load(Ordering::Relaxed);
        debug_assert!(version & 1 == 0, "nested seqlock write");
        self.version.store(version.wrapping_add(1), Ordering::Relaxed);
        // Publish the odd version before any of the writer's stores
        fence(Ordering::Release);
        SeqWriteGuard { lock: self }
    }

    /// Current raw version
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Relaxed)
    }
}

/// Ends a write section on drop
pub struct SeqWriteGuard<'a> {
    lock: &'a SeqLock,
}

impl Drop for SeqWriteGuard<'_> {
    fn drop(&mut self) {
        let version = self.lock.version.load(Ordering::Relaxed);
        self.lock
            .version
            .store(version.wrapping_add(1), Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stamp_valid_without_writes() {
        let lock = SeqLock::new();
        let stamp = lock.try_optimistic_read().unwrap();
        assert!(lock.validate(stamp));
    }

    #[test]
    fn test_write_invalidates() {
        let lock = SeqLock::new();
        let stamp = lock.try_optimistic_read().unwrap();

        {
            let _w = lock.write();
            assert!(lock.try_optimistic_read().is_none());
            assert!(!lock.validate(stamp));
        }

        assert!(!lock.validate(stamp));
        assert_eq!(lock.version(), 2);
        let fresh = lock.try_optimistic_read().unwrap();
        assert!(lock.validate(fresh));
    }
}
