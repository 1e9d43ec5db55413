//! Global size budget: a counted semaphore shared across every shard buffer.
//!
//! This is the only resource shared across shards (spec §4.1/§5). It is the
//! basis for cross-shard fairness: when it is exhausted, a shard with its
//! own queue non-empty evicts its own head to make room; a shard with an
//! empty queue fails fast.

use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// A non-blocking counted semaphore over the total number of requests any
/// shard buffer may hold in memory at once.
///
/// Deliberately does not offer a blocking `acquire` — buffering is a
/// best-effort holding pattern, not a queue callers should pile up against;
/// a shard that can't get a slot evicts its own oldest entry or fails fast
/// (see [`crate::buffer::ShardBuffer::wait_for_failover_end`]).
#[derive(Clone)]
pub struct GlobalSizeBudget {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

impl GlobalSizeBudget {
    /// Creates a budget with room for `capacity` buffered entries total.
    pub fn new(capacity: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Attempts to reserve one slot. Returns `None` if the budget is
    /// exhausted.
    ///
    /// The returned permit releases its slot when dropped; hand it to the
    /// [`crate::entry::Entry`] that used it and never release it by any
    /// other path, so that eviction-with-slot-reuse (spec §4.4) can move the
    /// permit between entries without a net acquire/release.
    pub fn try_acquire(&self) -> Option<OwnedSemaphorePermit> {
        Arc::clone(&self.semaphore).try_acquire_owned().ok()
    }

    /// Total configured capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of slots currently checked out across every shard.
    pub fn in_use(&self) -> usize {
        self.capacity - self.semaphore.available_permits()
    }
}
