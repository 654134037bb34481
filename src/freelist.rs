//! Free physical-id stacks
//!
//! One stack per tier, shared by every file. The lock is held for a single
//! `pop` or `push` and never across a multi-step allocation decision, so a
//! memory-then-spillover fallback is two independent critical sections.

use parking_lot::Mutex;

/// LIFO allocator of unused tier-local chunk ids
///
/// Implementations serialise each call internally.
pub trait IdAllocator: Send + Sync {
    /// Take the most recently returned id, `None` when exhausted
    fn pop(&self) -> Option<u64>;

    /// Return an id to the stack
    fn push(&self, id: u64);

    /// Number of ids currently available
    fn available(&self) -> usize;

    /// Number of ids the stack was created with
    fn capacity(&self) -> usize;
}

/// Mutex-guarded vector stack
#[derive(Debug)]
pub struct LockedIdStack {
    ids: Mutex<Vec<u64>>,
    capacity: usize,
}

impl LockedIdStack {
    /// Stack holding ids `0..count`, arranged so that the first pop yields 0
    pub fn new(count: u64) -> Self {
        let ids: Vec<u64> = (0..count).rev().collect();
        LockedIdStack {
            capacity: ids.len(),
            ids: Mutex::new(ids),
        }
    }

    /// Empty stack
    pub fn empty() -> Self {
        Self::new(0)
    }
}

impl IdAllocator for LockedIdStack {
    fn pop(&self) -> Option<u64> {
        self.ids.lock().pop()
    }

    fn push(&self, id: u64) {
        self.ids.lock().push(id);
    }

    fn available(&self) -> usize {
        self.ids.lock().len()
    }

    fn capacity(&self) -> usize {
        self.capacity
    }
}
