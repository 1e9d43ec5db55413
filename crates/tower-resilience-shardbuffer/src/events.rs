//! Observability events emitted by the shard buffer.

use std::time::{Duration, Instant};
use tower_resilience_core::events::ResilienceEvent;

use crate::buffer::BufferState;

/// Events emitted by a [`crate::ShardBuffer`] for observability.
///
/// Register listeners via [`crate::ShardBufferConfigBuilder::on_state_transition`],
/// [`crate::ShardBufferConfigBuilder::on_eviction`], and
/// [`crate::ShardBufferConfigBuilder::on_drain_complete`], or attach a custom
/// [`tower_resilience_core::events::EventListener`] directly.
#[derive(Debug, Clone)]
pub enum ShardBufferEvent {
    /// A request was admitted into the queue.
    RequestBuffered {
        /// Name of the shard buffer (`"{keyspace}/{shard}"` by default).
        pattern_name: String,
        /// When the event occurred.
        timestamp: Instant,
        /// Queue depth immediately after admission.
        queue_depth: usize,
    },
    /// A request was rejected without being buffered.
    RequestRejected {
        /// Name of the shard buffer.
        pattern_name: String,
        /// When the event occurred.
        timestamp: Instant,
        /// Why the request was rejected.
        reason: RejectionReason,
    },
    /// The state machine transitioned between states.
    StateTransition {
        /// Name of the shard buffer.
        pattern_name: String,
        /// When the event occurred.
        timestamp: Instant,
        /// State before the transition.
        from_state: BufferState,
        /// State after the transition.
        to_state: BufferState,
    },
    /// An entry was evicted before a normal drain released it.
    EntryEvicted {
        /// Name of the shard buffer.
        pattern_name: String,
        /// When the event occurred.
        timestamp: Instant,
        /// Why the entry was evicted.
        reason: EvictionReason,
    },
    /// A drain finished and the buffer returned to `Idle`.
    DrainCompleted {
        /// Name of the shard buffer.
        pattern_name: String,
        /// When the event occurred.
        timestamp: Instant,
        /// Number of entries released by this drain.
        entries_released: usize,
        /// Wall-clock duration of the failover that just ended.
        failover_duration: Duration,
    },
}

/// Why a request was rejected without being buffered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectionReason {
    /// The global size budget was exhausted and this shard had nothing of
    /// its own to evict.
    BufferFull,
    /// The caller's own cancellation fired first.
    ContextCanceled,
}

/// Why an entry left the queue before a normal drain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionReason {
    /// Evicted to free a slot for a newer request on the same shard.
    Capacity,
    /// Evicted because its per-request window elapsed.
    Timeout,
}

impl ResilienceEvent for ShardBufferEvent {
    fn event_type(&self) -> &'static str {
        match self {
            ShardBufferEvent::RequestBuffered { .. } => "request_buffered",
            ShardBufferEvent::RequestRejected { .. } => "request_rejected",
            ShardBufferEvent::StateTransition { .. } => "state_transition",
            ShardBufferEvent::EntryEvicted { .. } => "entry_evicted",
            ShardBufferEvent::DrainCompleted { .. } => "drain_completed",
        }
    }

    fn timestamp(&self) -> Instant {
        match self {
            ShardBufferEvent::RequestBuffered { timestamp, .. }
            | ShardBufferEvent::RequestRejected { timestamp, .. }
            | ShardBufferEvent::StateTransition { timestamp, .. }
            | ShardBufferEvent::EntryEvicted { timestamp, .. }
            | ShardBufferEvent::DrainCompleted { timestamp, .. } => *timestamp,
        }
    }

    fn pattern_name(&self) -> &str {
        match self {
            ShardBufferEvent::RequestBuffered { pattern_name, .. }
            | ShardBufferEvent::RequestRejected { pattern_name, .. }
            | ShardBufferEvent::StateTransition { pattern_name, .. }
            | ShardBufferEvent::EntryEvicted { pattern_name, .. }
            | ShardBufferEvent::DrainCompleted { pattern_name, .. } => pattern_name,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_type_and_pattern_name() {
        let event = ShardBufferEvent::RequestBuffered {
            pattern_name: "ks/shard-0".to_string(),
            timestamp: Instant::now(),
            queue_depth: 1,
        };
        assert_eq!(event.event_type(), "request_buffered");
        assert_eq!(event.pattern_name(), "ks/shard-0");
    }
}
