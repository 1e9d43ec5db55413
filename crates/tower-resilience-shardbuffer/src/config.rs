//! Configuration for the shard failover buffer.

use std::sync::Arc;
use std::time::Duration;

use tower_resilience_core::events::{EventListeners, FnListener};

use crate::events::ShardBufferEvent;

/// Configuration for a single [`crate::ShardBuffer`].
///
/// Shared across shards that are meant to draw from the same
/// [`crate::GlobalSizeBudget`] — construct one `ShardBufferConfig` and reuse
/// it (via `Arc`, which is how [`crate::ShardBuffer::new`] stores it) for
/// every shard in a [`crate::ShardBufferRegistry`].
#[derive(Clone)]
pub struct ShardBufferConfig {
    pub(crate) per_request_window: Duration,
    pub(crate) global_size: usize,
    pub(crate) max_failover_duration: Duration,
    pub(crate) min_time_between_failovers: Duration,
    pub(crate) name: String,
    pub(crate) event_listeners: EventListeners<ShardBufferEvent>,
}

impl ShardBufferConfig {
    /// Creates a new configuration builder.
    pub fn builder() -> ShardBufferConfigBuilder {
        ShardBufferConfigBuilder::new()
    }

    /// The per-request buffering window.
    pub fn per_request_window(&self) -> Duration {
        self.per_request_window
    }

    /// The global size budget shared across all shards.
    pub fn global_size(&self) -> usize {
        self.global_size
    }

    /// The maximum duration a single failover may buffer requests for.
    pub fn max_failover_duration(&self) -> Duration {
        self.max_failover_duration
    }

    /// The minimum gap enforced between the end of one failover and the
    /// start of buffering for the next.
    pub fn min_time_between_failovers(&self) -> Duration {
        self.min_time_between_failovers
    }
}

/// Builder for [`ShardBufferConfig`].
pub struct ShardBufferConfigBuilder {
    per_request_window: Duration,
    global_size: usize,
    max_failover_duration: Duration,
    min_time_between_failovers: Duration,
    name: String,
    event_listeners: EventListeners<ShardBufferEvent>,
}

impl ShardBufferConfigBuilder {
    /// Creates a new builder with conservative defaults.
    pub fn new() -> Self {
        Self {
            per_request_window: Duration::from_secs(10),
            global_size: 1000,
            max_failover_duration: Duration::from_secs(20),
            min_time_between_failovers: Duration::from_secs(1),
            name: "shardbuffer".to_string(),
            event_listeners: EventListeners::new(),
        }
    }

    /// How long a single buffered request may wait before being evicted
    /// with a "timed out" outcome.
    ///
    /// Default: 10 seconds.
    pub fn per_request_window(mut self, duration: Duration) -> Self {
        self.per_request_window = duration;
        self
    }

    /// The total number of requests that may be buffered across all shards
    /// sharing this configuration's [`crate::GlobalSizeBudget`].
    ///
    /// Default: 1000.
    pub fn global_size(mut self, size: usize) -> Self {
        self.global_size = size;
        self
    }

    /// The maximum time a single failover may run before the watchdog
    /// forces a drain via [`crate::ShardBuffer::stop_for_max_duration`].
    ///
    /// Default: 20 seconds.
    pub fn max_failover_duration(mut self, duration: Duration) -> Self {
        self.max_failover_duration = duration;
        self
    }

    /// The minimum gap after a failover ends before a new failover-caused
    /// error is allowed to start buffering again. Protects against a
    /// flapping shard repeatedly re-entering `Buffering`.
    ///
    /// Default: 1 second.
    pub fn min_time_between_failovers(mut self, duration: Duration) -> Self {
        self.min_time_between_failovers = duration;
        self
    }

    /// Sets the name used in events, metrics, and tracing for this buffer
    /// (typically `"{keyspace}/{shard}"`).
    ///
    /// Default: `"shardbuffer"`.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Registers a callback invoked whenever a request is admitted into the
    /// queue.
    pub fn on_request_buffered<F>(mut self, f: F) -> Self
    where
        F: Fn(usize) + Send + Sync + 'static,
    {
        self.event_listeners.add(FnListener::new(move |event| {
            if let ShardBufferEvent::RequestBuffered { queue_depth, .. } = event {
                f(*queue_depth);
            }
        }));
        self
    }

    /// Registers a callback invoked on every `Idle -> Buffering -> Draining
    /// -> Idle` transition.
    pub fn on_state_transition<F>(mut self, f: F) -> Self
    where
        F: Fn(crate::buffer::BufferState, crate::buffer::BufferState) + Send + Sync + 'static,
    {
        self.event_listeners.add(FnListener::new(move |event| {
            if let ShardBufferEvent::StateTransition {
                from_state,
                to_state,
                ..
            } = event
            {
                f(*from_state, *to_state);
            }
        }));
        self
    }

    /// Registers a callback invoked whenever an entry is evicted before a
    /// normal drain (either for capacity pressure or per-request timeout).
    pub fn on_eviction<F>(mut self, f: F) -> Self
    where
        F: Fn(crate::events::EvictionReason) + Send + Sync + 'static,
    {
        self.event_listeners.add(FnListener::new(move |event| {
            if let ShardBufferEvent::EntryEvicted { reason, .. } = event {
                f(*reason);
            }
        }));
        self
    }

    /// Registers a callback invoked when a drain finishes and the buffer
    /// returns to `Idle`.
    pub fn on_drain_complete<F>(mut self, f: F) -> Self
    where
        F: Fn(usize, Duration) + Send + Sync + 'static,
    {
        self.event_listeners.add(FnListener::new(move |event| {
            if let ShardBufferEvent::DrainCompleted {
                entries_released,
                failover_duration,
                ..
            } = event
            {
                f(*entries_released, *failover_duration);
            }
        }));
        self
    }

    /// Builds the configuration.
    pub fn build(self) -> Arc<ShardBufferConfig> {
        Arc::new(ShardBufferConfig {
            per_request_window: self.per_request_window,
            global_size: self.global_size,
            max_failover_duration: self.max_failover_duration,
            min_time_between_failovers: self.min_time_between_failovers,
            name: self.name,
            event_listeners: self.event_listeners,
        })
    }
}

impl Default for ShardBufferConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = ShardBufferConfig::builder().build();
        assert_eq!(config.per_request_window(), Duration::from_secs(10));
        assert_eq!(config.global_size(), 1000);
        assert_eq!(config.max_failover_duration(), Duration::from_secs(20));
        assert_eq!(config.min_time_between_failovers(), Duration::from_secs(1));
    }

    #[test]
    fn builder_overrides_every_field() {
        let config = ShardBufferConfig::builder()
            .per_request_window(Duration::from_secs(5))
            .global_size(2)
            .max_failover_duration(Duration::from_secs(30))
            .min_time_between_failovers(Duration::from_millis(500))
            .name("ks/shard-0")
            .build();

        assert_eq!(config.per_request_window(), Duration::from_secs(5));
        assert_eq!(config.global_size(), 2);
        assert_eq!(config.max_failover_duration(), Duration::from_secs(30));
        assert_eq!(
            config.min_time_between_failovers(),
            Duration::from_millis(500)
        );
        assert_eq!(config.name, "ks/shard-0");
    }
}
