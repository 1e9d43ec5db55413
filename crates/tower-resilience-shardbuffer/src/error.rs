//! Error types for the shard failover buffer.

/// Errors that can be returned to a caller of [`crate::ShardBuffer::wait_for_failover_end`].
///
/// These are the only outcomes a caller needs to branch on; programming
/// violations inside the state machine (see the crate docs' error handling
/// section) are logged and swallowed rather than surfaced here.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ShardBufferError {
    /// The global size budget was exhausted and this shard had no entry of
    /// its own to evict in its place.
    #[error("shard buffer is full: global size budget ({global_size}) exhausted")]
    BufferFull {
        /// The configured global size budget.
        global_size: usize,
    },
    /// This entry was evicted to make room for a newer request on the same
    /// shard while the global budget was exhausted.
    #[error("entry evicted: buffer pressure forced eviction to admit a newer request")]
    EntryEvicted,
    /// The caller's own cancellation fired before the failover ended.
    #[error("context canceled before failover finished")]
    ContextCanceled,
}

/// Result type for shard buffer operations.
pub type Result<T> = std::result::Result<T, ShardBufferError>;
