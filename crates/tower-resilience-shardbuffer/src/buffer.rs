//! The per-shard state machine: `Idle -> Buffering -> Draining -> Idle`.
//!
//! All state lives behind a single [`parking_lot::Mutex`] and every method
//! that needs to `.await` (waiting on a oneshot, a cancellation, a sleep)
//! does so strictly after releasing the lock — the lock only ever guards
//! plain synchronous bookkeeping, mirroring how `CircuitBreaker` keeps its
//! state transitions synchronous and its callbacks outside the lock.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::budget::GlobalSizeBudget;
use crate::config::ShardBufferConfig;
use crate::drain::{spawn_drain, DrainHandoff};
use crate::entry::{Entry, EntryId};
use crate::error::ShardBufferError;
use crate::events::{EvictionReason, RejectionReason, ShardBufferEvent};
use crate::stats::ShardBufferStats;
use crate::timeout_worker::TimeoutWorker;

/// The three states a shard buffer can be in (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferState {
    /// No failover in progress. Requests pass through untouched.
    Idle,
    /// A failover is believed to be in progress. Requests are queued.
    Buffering,
    /// The failover has ended; queued requests are being released in
    /// arrival order. No new requests are admitted.
    Draining,
}

pub(crate) struct Inner {
    pub(crate) state: BufferState,
    pub(crate) queue: VecDeque<Entry>,
    externally_reparented: i64,
    last_start: Option<Instant>,
    last_end: Option<Instant>,
    generation: u64,
    pub(crate) timeout_worker: Option<TimeoutWorker>,
}

enum Decision {
    PassThrough,
    Buffered(crate::entry::Waiter),
}

/// Holds buffered requests for one `(keyspace, shard)` pair during a primary
/// failover, releasing them once the failover ends instead of failing them
/// immediately.
///
/// Cheap to clone: every clone shares the same underlying state and the same
/// [`GlobalSizeBudget`]. [`crate::ShardBufferRegistry`] is the usual way to
/// obtain one per shard.
#[derive(Clone)]
pub struct ShardBuffer {
    keyspace: Arc<str>,
    shard: Arc<str>,
    config: Arc<ShardBufferConfig>,
    budget: GlobalSizeBudget,
    inner: Arc<Mutex<Inner>>,
    notify: Arc<Notify>,
}

impl ShardBuffer {
    /// Creates a new, `Idle` shard buffer.
    pub fn new(
        keyspace: impl Into<Arc<str>>,
        shard: impl Into<Arc<str>>,
        config: Arc<ShardBufferConfig>,
        budget: GlobalSizeBudget,
    ) -> Self {
        Self {
            keyspace: keyspace.into(),
            shard: shard.into(),
            config,
            budget,
            inner: Arc::new(Mutex::new(Inner {
                state: BufferState::Idle,
                queue: VecDeque::new(),
                externally_reparented: 0,
                last_start: None,
                last_end: None,
                generation: 0,
                timeout_worker: None,
            })),
            notify: Arc::new(Notify::new()),
        }
    }

    /// The keyspace this buffer holds requests for.
    pub fn keyspace(&self) -> &str {
        &self.keyspace
    }

    /// The shard this buffer holds requests for.
    pub fn shard(&self) -> &str {
        &self.shard
    }

    /// Decides whether to buffer a request and, if so, waits until it is
    /// released.
    ///
    /// `observed_failover_error` is the caller's judgment (from its own RPC
    /// error classification, out of scope here) of whether the error that
    /// just happened looks like a primary failover rather than some other
    /// failure. `cancellation` is the caller's own context; if it fires
    /// before the buffer releases the request, the wait is abandoned.
    ///
    /// Returns `Ok(None)` if the request should pass straight through
    /// (nothing to retry). Returns `Ok(Some(guard))` once buffering ends and
    /// the caller should retry its RPC, reporting the outcome back through
    /// the guard. Returns `Err` if the request was rejected outright or the
    /// wait was abandoned.
    pub async fn wait_for_failover_end(
        &self,
        observed_failover_error: bool,
        cancellation: CancellationToken,
    ) -> Result<Option<crate::entry::RetryGuard>, ShardBufferError> {
        let waiter = {
            let mut inner = self.inner.lock();
            match self.decide_and_enqueue(&mut inner, observed_failover_error)? {
                Decision::PassThrough => return Ok(None),
                Decision::Buffered(waiter) => waiter,
            }
        };

        let id = waiter.id;
        tokio::select! {
            biased;

            result = waiter.recv() => {
                let (result, guard) = result;
                match result {
                    Ok(()) => Ok(Some(guard)),
                    Err(err) => {
                        drop(guard);
                        Err(err)
                    }
                }
            }

            _ = cancellation.cancelled() => {
                self.remove(id);
                self.emit_rejected(RejectionReason::ContextCanceled);
                Err(ShardBufferError::ContextCanceled)
            }
        }
    }

    /// Records the timestamp (unix nanos, or any caller-chosen monotonically
    /// comparable value) of the most recent external reparent observation
    /// and ends buffering if a failover is in progress.
    ///
    /// Idempotent and monotonic: a timestamp that is not newer than the one
    /// already recorded is ignored (spec §4.4 — "if not newer, drop it;
    /// don't let an out-of-order health-check notification reopen or extend
    /// a failover that already ended").
    pub fn record_reparent_timestamp(&self, timestamp: i64) {
        let handoff = {
            let mut inner = self.inner.lock();
            if timestamp <= inner.externally_reparented {
                return;
            }
            inner.externally_reparented = timestamp;
            self.stop_buffering(&mut inner)
        };

        if let Some(handoff) = handoff {
            spawn_drain(self.clone(), handoff);
        }
    }

    /// Forces the end of buffering regardless of whether a reparent has been
    /// observed yet. Called automatically once a failover runs longer than
    /// [`ShardBufferConfig::max_failover_duration`], and safe to call
    /// directly from a higher-level watchdog too. A no-op if the buffer is
    /// not currently `Buffering`.
    pub fn stop_for_max_duration(&self) {
        let handoff = {
            let mut inner = self.inner.lock();
            self.stop_buffering(&mut inner)
        };

        if let Some(handoff) = handoff {
            spawn_drain(self.clone(), handoff);
        }
    }

    /// A read-only snapshot of this buffer's current state, for dashboards
    /// and tests.
    pub fn stats(&self) -> ShardBufferStats {
        let inner = self.inner.lock();
        ShardBufferStats {
            state: inner.state,
            queue_len: inner.queue.len(),
            externally_reparented: inner.externally_reparented,
            last_failover_duration: match (inner.last_start, inner.last_end) {
                (Some(start), Some(end)) if end >= start => Some(end.duration_since(start)),
                _ => None,
            },
        }
    }

    fn decide_and_enqueue(
        &self,
        inner: &mut Inner,
        observed_failover_error: bool,
    ) -> Result<Decision, ShardBufferError> {
        match inner.state {
            BufferState::Draining => Ok(Decision::PassThrough),

            BufferState::Buffering => self.enqueue(inner),

            BufferState::Idle => {
                if !observed_failover_error {
                    return Ok(Decision::PassThrough);
                }
                if let Some(last_end) = inner.last_end {
                    if last_end.elapsed() < self.config.min_time_between_failovers() {
                        #[cfg(feature = "tracing")]
                        tracing::debug!(
                            shard = %self.pattern_name(),
                            "failover-looking error ignored, still within min_time_between_failovers"
                        );
                        return Ok(Decision::PassThrough);
                    }
                }
                self.start_buffering(inner);
                self.enqueue(inner)
            }
        }
    }

    fn enqueue(&self, inner: &mut Inner) -> Result<Decision, ShardBufferError> {
        let deadline = Instant::now() + self.config.per_request_window();

        let permit = match self.budget.try_acquire() {
            Some(permit) => permit,
            None => match inner.queue.pop_front() {
                Some(mut evicted) => {
                    let permit = evicted
                        .take_permit()
                        .expect("a queued entry always holds a budget permit");
                    evicted.close(Err(ShardBufferError::EntryEvicted));
                    self.emit_eviction(EvictionReason::Capacity);
                    permit
                }
                None => {
                    self.emit_rejected(RejectionReason::BufferFull);
                    return Err(ShardBufferError::BufferFull {
                        global_size: self.budget.capacity(),
                    });
                }
            },
        };

        let (entry, waiter) = Entry::new(deadline, permit);
        let was_empty = inner.queue.is_empty();
        inner.queue.push_back(entry);
        let queue_depth = inner.queue.len();

        if was_empty {
            self.notify.notify_one();
        }

        self.emit_buffered(queue_depth);
        Ok(Decision::Buffered(waiter))
    }

    fn start_buffering(&self, inner: &mut Inner) {
        let from = inner.state;
        inner.last_start = Some(Instant::now());
        inner.state = BufferState::Buffering;
        inner.generation = inner.generation.wrapping_add(1);
        inner.timeout_worker = Some(TimeoutWorker::spawn(self.clone(), self.notify.clone()));
        self.emit_transition(from, BufferState::Buffering);

        let generation = inner.generation;
        let wake_at = inner.last_start.unwrap() + self.config.max_failover_duration();
        let buffer = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep_until(wake_at).await;
            let handoff = {
                let mut inner = buffer.inner.lock();
                if inner.state == BufferState::Buffering && inner.generation == generation {
                    buffer.stop_buffering(&mut inner)
                } else {
                    None
                }
            };
            if let Some(handoff) = handoff {
                spawn_drain(buffer, handoff);
            }
        });
    }

    /// Moves `Buffering -> Draining`, snapshotting the queue and handing the
    /// timeout worker off to be stopped outside the lock. A no-op (returns
    /// `None`) unless currently `Buffering`.
    fn stop_buffering(&self, inner: &mut Inner) -> Option<DrainHandoff> {
        if inner.state != BufferState::Buffering {
            return None;
        }

        let from = inner.state;
        let now = Instant::now();
        inner.last_end = Some(now);
        let failover_duration = inner
            .last_start
            .map(|start| now.duration_since(start))
            .unwrap_or_default();
        inner.state = BufferState::Draining;
        let snapshot = std::mem::take(&mut inner.queue);
        let timeout_worker = inner.timeout_worker.take();
        self.emit_transition(from, BufferState::Draining);

        Some(DrainHandoff {
            snapshot,
            timeout_worker,
            failover_duration,
        })
    }

    /// Removes a specific entry from the queue and closes it with
    /// [`ShardBufferError::ContextCanceled`]. Called when the waiter's own
    /// cancellation fires first. A no-op if the entry is no longer present
    /// (already drained, evicted, or removed).
    fn remove(&self, id: EntryId) {
        let mut inner = self.inner.lock();
        if let Some(pos) = inner.queue.iter().position(|entry| entry.id() == id) {
            let mut entry = inner
                .queue
                .remove(pos)
                .expect("position was just found in this queue");
            entry.close(Err(ShardBufferError::ContextCanceled));
            if pos == 0 {
                self.notify.notify_one();
            }
        }
    }

    /// Re-checks the head of the queue under the lock and evicts it if its
    /// deadline has actually passed — called by the timeout worker on wake.
    pub(crate) async fn evict_oldest_if_due(&self) {
        let now = Instant::now();
        let id = {
            let inner = self.inner.lock();
            match inner.queue.front() {
                Some(entry) if entry.deadline <= now => Some(entry.id()),
                _ => None,
            }
        };

        if let Some(id) = id {
            self.evict_head(id).await;
        }
    }

    async fn evict_head(&self, id: EntryId) {
        let entry = {
            let mut inner = self.inner.lock();
            match inner.queue.front() {
                Some(entry) if entry.id() == id => {
                    let mut entry = inner
                        .queue
                        .pop_front()
                        .expect("front() just confirmed an entry is present");
                    entry.close(Ok(()));
                    Some(entry)
                }
                _ => None,
            }
        };

        if let Some(mut entry) = entry {
            entry.await_release().await;
            self.notify.notify_one();
            self.emit_eviction(EvictionReason::Timeout);
        }
    }

    pub(crate) fn inner(&self) -> &Mutex<Inner> {
        &self.inner
    }

    fn pattern_name(&self) -> String {
        format!("{}/{}", self.keyspace, self.shard)
    }

    fn emit_buffered(&self, queue_depth: usize) {
        self.config
            .event_listeners
            .emit(&ShardBufferEvent::RequestBuffered {
                pattern_name: self.pattern_name(),
                timestamp: std::time::Instant::now(),
                queue_depth,
            });
    }

    fn emit_rejected(&self, reason: RejectionReason) {
        self.config
            .event_listeners
            .emit(&ShardBufferEvent::RequestRejected {
                pattern_name: self.pattern_name(),
                timestamp: std::time::Instant::now(),
                reason,
            });
    }

    fn emit_transition(&self, from_state: BufferState, to_state: BufferState) {
        #[cfg(feature = "tracing")]
        tracing::debug!(
            shard = %self.pattern_name(),
            ?from_state,
            ?to_state,
            "shard buffer state transition"
        );
        #[cfg(feature = "metrics")]
        {
            let state_label = |state: BufferState| match state {
                BufferState::Idle => "Idle",
                BufferState::Buffering => "Buffering",
                BufferState::Draining => "Draining",
            };
            metrics::counter!(
                "shardbuffer_transitions_total",
                "shard" => self.pattern_name(),
                "from" => state_label(from_state),
                "to" => state_label(to_state)
            )
            .increment(1);
            metrics::gauge!(
                "shardbuffer_state",
                "shard" => self.pattern_name(),
                "state" => state_label(to_state)
            )
            .set(1.0);
        }

        self.config
            .event_listeners
            .emit(&ShardBufferEvent::StateTransition {
                pattern_name: self.pattern_name(),
                timestamp: std::time::Instant::now(),
                from_state,
                to_state,
            });
    }

    fn emit_eviction(&self, reason: EvictionReason) {
        #[cfg(feature = "metrics")]
        {
            let reason_label = match reason {
                EvictionReason::Capacity => "Capacity",
                EvictionReason::Timeout => "Timeout",
            };
            metrics::counter!(
                "shardbuffer_evictions_total",
                "shard" => self.pattern_name(),
                "reason" => reason_label
            )
            .increment(1);
        }

        self.config
            .event_listeners
            .emit(&ShardBufferEvent::EntryEvicted {
                pattern_name: self.pattern_name(),
                timestamp: std::time::Instant::now(),
                reason,
            });
    }

    pub(crate) fn emit_drain_completed(&self, entries_released: usize, failover_duration: Duration) {
        #[cfg(feature = "metrics")]
        metrics::histogram!(
            "shardbuffer_failover_duration_seconds",
            "shard" => self.pattern_name()
        )
        .record(failover_duration.as_secs_f64());

        self.config
            .event_listeners
            .emit(&ShardBufferEvent::DrainCompleted {
                pattern_name: self.pattern_name(),
                timestamp: std::time::Instant::now(),
                entries_released,
                failover_duration,
            });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ShardBufferConfig;
    use std::time::Duration as StdDuration;

    fn buffer_with(config: Arc<ShardBufferConfig>) -> ShardBuffer {
        let budget = GlobalSizeBudget::new(config.global_size());
        ShardBuffer::new("ks", "shard-0", config, budget)
    }

    #[tokio::test]
    async fn non_failover_error_passes_through_when_idle() {
        let buffer = buffer_with(ShardBufferConfig::builder().build());
        let result = buffer
            .wait_for_failover_end(false, CancellationToken::new())
            .await;
        assert!(matches!(result, Ok(None)));
        assert_eq!(buffer.stats().state, BufferState::Idle);
    }

    #[tokio::test]
    async fn draining_passes_everything_through() {
        let buffer = buffer_with(
            ShardBufferConfig::builder()
                .max_failover_duration(StdDuration::from_secs(30))
                .build(),
        );
        {
            let mut inner = buffer.inner.lock();
            inner.state = BufferState::Draining;
        }
        let result = buffer
            .wait_for_failover_end(true, CancellationToken::new())
            .await;
        assert!(matches!(result, Ok(None)));
    }

    #[tokio::test]
    async fn buffer_full_without_a_queue_to_evict_from_is_rejected() {
        let config = ShardBufferConfig::builder().global_size(0).build();
        let buffer = buffer_with(config);
        let result = buffer
            .wait_for_failover_end(true, CancellationToken::new())
            .await;
        assert!(matches!(
            result,
            Err(ShardBufferError::BufferFull { global_size: 0 })
        ));
    }

    #[tokio::test]
    async fn drain_releases_buffered_callers_in_order() {
        let config = ShardBufferConfig::builder()
            .max_failover_duration(StdDuration::from_secs(30))
            .build();
        let buffer = buffer_with(config);

        let b1 = buffer.clone();
        let t1 = tokio::spawn(async move {
            b1.wait_for_failover_end(true, CancellationToken::new())
                .await
        });
        tokio::task::yield_now().await;

        let b2 = buffer.clone();
        let t2 = tokio::spawn(async move {
            b2.wait_for_failover_end(true, CancellationToken::new())
                .await
        });
        tokio::task::yield_now().await;

        assert_eq!(buffer.stats().queue_len, 2);

        buffer.record_reparent_timestamp(1);

        let r1 = t1.await.unwrap();
        let r2 = t2.await.unwrap();
        assert!(matches!(r1, Ok(Some(_))));
        assert!(matches!(r2, Ok(Some(_))));

        // drain runs in its own task; give it a moment to flip back to Idle.
        for _ in 0..50 {
            if buffer.stats().state == BufferState::Idle {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(buffer.stats().state, BufferState::Idle);
    }

    #[tokio::test]
    async fn out_of_order_reparent_timestamp_is_ignored() {
        let buffer = buffer_with(ShardBufferConfig::builder().build());
        buffer.record_reparent_timestamp(100);
        buffer.record_reparent_timestamp(50);
        assert_eq!(buffer.stats().externally_reparented, 100);
    }

    #[tokio::test]
    async fn cancellation_removes_the_waiting_entry() {
        let config = ShardBufferConfig::builder()
            .max_failover_duration(StdDuration::from_secs(30))
            .build();
        let buffer = buffer_with(config);
        let cancel = CancellationToken::new();

        let b = buffer.clone();
        let c = cancel.clone();
        let handle = tokio::spawn(async move { b.wait_for_failover_end(true, c).await });
        tokio::task::yield_now().await;
        assert_eq!(buffer.stats().queue_len, 1);

        cancel.cancel();
        let result = handle.await.unwrap();
        assert!(matches!(result, Err(ShardBufferError::ContextCanceled)));

        tokio::task::yield_now().await;
        assert_eq!(buffer.stats().queue_len, 0);
    }
}
