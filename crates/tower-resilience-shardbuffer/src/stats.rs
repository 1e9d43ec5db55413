//! Read-only snapshot of a single shard buffer's state.

use std::time::Duration;

use crate::buffer::BufferState;

/// A point-in-time snapshot returned by [`crate::ShardBuffer::stats`].
///
/// Cheap to take (one lock acquisition, no allocation) so it's safe to poll
/// from a dashboard or a test's assertion loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShardBufferStats {
    /// Current state of the buffer.
    pub state: BufferState,
    /// Number of requests currently queued, waiting for the failover to end.
    pub queue_len: usize,
    /// The most recent external reparent timestamp recorded via
    /// [`crate::ShardBuffer::record_reparent_timestamp`].
    pub externally_reparented: i64,
    /// Wall-clock duration of the most recently completed failover, if any.
    pub last_failover_duration: Option<Duration>,
}
