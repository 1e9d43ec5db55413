//! A single buffered request, its waiter-side handle, and the retry-done
//! guard the caller reports back through.

use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{oneshot, OwnedSemaphorePermit};
use tokio::time::Instant;

use crate::error::ShardBufferError;

static NEXT_ENTRY_ID: AtomicU64 = AtomicU64::new(1);

/// Identifies an [`Entry`] for [`crate::ShardBuffer::remove`] without
/// requiring the queue to support equality on the entry itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct EntryId(u64);

/// A request held in a shard buffer's queue, owned by the queue while
/// present (spec §3, §9: "entries, once enqueued, are logically owned by
/// the queue and read-only to the waiter").
pub(crate) struct Entry {
    id: EntryId,
    pub(crate) deadline: Instant,
    done_tx: Option<oneshot::Sender<Result<(), ShardBufferError>>>,
    release_rx: Option<oneshot::Receiver<()>>,
    permit: Option<OwnedSemaphorePermit>,
}

/// Waiter-side handle for a buffered request. Race [`Waiter::recv`] against
/// the caller's own cancellation to implement the "whichever fires first"
/// suspension point from spec §5.
pub(crate) struct Waiter {
    pub(crate) id: EntryId,
    done_rx: oneshot::Receiver<Result<(), ShardBufferError>>,
    release_tx: oneshot::Sender<()>,
}

/// Callback the caller invokes, exactly once, after retrying its RPC and
/// finding out how it went. Corresponds to spec's `retryDone` /
/// `releaseCtx`/`releaseCancel` pair: holding on to this guard is what tells
/// the buffer the waiter is still actively retrying, and reporting it back
/// (or dropping it) is what tells the buffer the waiter has truly departed.
///
/// Dropping the guard without calling [`RetryGuard::report`] has the same
/// effect as calling it — this is a safety net, not the intended usage, so
/// that a caller that panics or forgets never deadlocks an evictor or drain
/// worker waiting on it.
pub struct RetryGuard {
    release_tx: Option<oneshot::Sender<()>>,
}

impl Entry {
    /// Creates a new entry/waiter pair, with the given permit already
    /// reserved from the global size budget.
    pub(crate) fn new(deadline: Instant, permit: OwnedSemaphorePermit) -> (Entry, Waiter) {
        let id = EntryId(NEXT_ENTRY_ID.fetch_add(1, Ordering::Relaxed));
        let (done_tx, done_rx) = oneshot::channel();
        let (release_tx, release_rx) = oneshot::channel();

        (
            Entry {
                id,
                deadline,
                done_tx: Some(done_tx),
                release_rx: Some(release_rx),
                permit: Some(permit),
            },
            Waiter {
                id,
                done_rx,
                release_tx,
            },
        )
    }

    pub(crate) fn id(&self) -> EntryId {
        self.id
    }

    /// Closes the completion signal with the given outcome. A no-op if
    /// already closed (invariant 1: `done` is closed exactly once; a second
    /// call here would be a programming violation elsewhere, not something
    /// this method should panic over).
    pub(crate) fn close(&mut self, result: Result<(), ShardBufferError>) {
        if let Some(tx) = self.done_tx.take() {
            // Waiter may have already dropped its receiver (e.g. raced with
            // its own cancellation); that's fine, nobody is listening.
            let _ = tx.send(result);
        }
    }

    /// Takes the global-budget permit out of this entry, e.g. to hand it to
    /// a replacement entry during eviction-with-reuse (spec §4.4) without a
    /// release/acquire pair.
    pub(crate) fn take_permit(&mut self) -> Option<OwnedSemaphorePermit> {
        self.permit.take()
    }

    /// Waits for the waiter to report (or drop) its [`RetryGuard`],
    /// confirming it has truly departed, then lets `self` (and its permit)
    /// drop. Returns immediately if the entry was never actually handed to
    /// a waiter's `done` signal (`release_rx` already consumed/closed).
    pub(crate) async fn await_release(&mut self) {
        if let Some(rx) = self.release_rx.take() {
            let _ = rx.await;
        }
    }
}

impl Waiter {
    /// Waits for the entry to be released (drained, evicted, or removed),
    /// returning the outcome and a guard to report back through once the
    /// caller has retried.
    pub(crate) async fn recv(self) -> (Result<(), ShardBufferError>, RetryGuard) {
        let guard = RetryGuard {
            release_tx: Some(self.release_tx),
        };
        let result = match self.done_rx.await {
            Ok(result) => result,
            // The entry was dropped without `close` ever running. Shouldn't
            // happen — every removal path calls `close` first — but treat
            // it as a cancellation rather than panicking.
            Err(_) => Err(ShardBufferError::ContextCanceled),
        };
        (result, guard)
    }
}

impl RetryGuard {
    /// Reports that the retried RPC has finished. Consumes the guard so it
    /// can only be reported once.
    pub fn report(mut self) {
        if let Some(tx) = self.release_tx.take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for RetryGuard {
    fn drop(&mut self) {
        if let Some(tx) = self.release_tx.take() {
            let _ = tx.send(());
        }
    }
}
