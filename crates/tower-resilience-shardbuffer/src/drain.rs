//! The one-shot worker that releases a failover's buffered requests once it
//! ends (spec §4.5, C5).

use std::collections::VecDeque;
use std::time::Duration;

use crate::buffer::{BufferState, ShardBuffer};
use crate::entry::Entry;
use crate::timeout_worker::TimeoutWorker;

/// Everything a drain needs, handed off by [`ShardBuffer::stop_buffering`]
/// after the lock is released.
pub(crate) struct DrainHandoff {
    pub(crate) snapshot: VecDeque<Entry>,
    pub(crate) timeout_worker: Option<TimeoutWorker>,
    pub(crate) failover_duration: Duration,
}

/// Spawns the drain as its own task so the caller that triggered it (a
/// health-check notification, a watchdog sleep) never blocks on the release
/// of every buffered request.
///
/// Releases entries in arrival order, one at a time: stop the timeout worker
/// first since it may itself want the lock, then for each entry close its
/// `done` signal with success and wait for the caller's retry-done guard
/// before moving to the next. Serial by design — a per-shard ordering
/// guarantee for drain is cheap to keep and callers shouldn't assume
/// otherwise (spec's Open Question on parallel drain is left as a future
/// tunable, not implemented here).
pub(crate) fn spawn_drain(buffer: ShardBuffer, handoff: DrainHandoff) {
    tokio::spawn(async move {
        if let Some(worker) = handoff.timeout_worker {
            worker.stop().await;
        }

        let mut released = 0usize;
        for mut entry in handoff.snapshot {
            entry.close(Ok(()));
            entry.await_release().await;
            released += 1;
            // `entry` drops here, releasing its global-budget permit.
        }

        {
            let mut inner = buffer.inner().lock();
            if inner.state != BufferState::Draining {
                #[cfg(feature = "tracing")]
                {
                    let state = inner.state;
                    tracing::warn!(
                        shard = %buffer.shard(),
                        ?state,
                        "drain worker woke up with buffer not in Draining state",
                    );
                }
                return;
            }
            inner.state = BufferState::Idle;
        }

        buffer.emit_drain_completed(released, handoff.failover_duration);
    });
}
