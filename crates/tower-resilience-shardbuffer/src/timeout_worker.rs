//! Per-shard background task that evicts the head of the queue once its
//! per-request deadline elapses (spec §4.3, C3).
//!
//! A single task with a single sleep handles a queue of any depth in O(1)
//! memory and avoids a timer-storm at drain, at the cost of re-reading the
//! head under the lock on every wake to confirm it's still the same entry
//! and still actually expired.

use std::sync::Arc;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::buffer::{BufferState, ShardBuffer};

pub(crate) struct TimeoutWorker {
    handle: JoinHandle<()>,
    stop: CancellationToken,
}

impl TimeoutWorker {
    /// Spawns the worker for one failover. `notify` is signaled whenever
    /// the queue goes empty-to-non-empty or its head is replaced.
    pub(crate) fn spawn(buffer: ShardBuffer, notify: Arc<Notify>) -> Self {
        let stop = CancellationToken::new();
        let stop_signal = stop.clone();

        let handle = tokio::spawn(async move {
            loop {
                let head_deadline = {
                    let inner = buffer.inner().lock();
                    if inner.state != BufferState::Buffering {
                        break;
                    }
                    inner.queue.front().map(|e| e.deadline)
                };

                match head_deadline {
                    None => {
                        tokio::select! {
                            _ = notify.notified() => {}
                            _ = stop_signal.cancelled() => break,
                        }
                    }
                    Some(deadline) => {
                        tokio::select! {
                            _ = tokio::time::sleep_until(deadline) => {
                                buffer.evict_oldest_if_due().await;
                            }
                            _ = notify.notified() => {}
                            _ = stop_signal.cancelled() => break,
                        }
                    }
                }
            }
        });

        Self { handle, stop }
    }

    /// Stops the worker and waits for its task to actually finish. Must
    /// never be called from within the worker's own task (the drain worker
    /// always runs as a distinct task, so this is safe there).
    pub(crate) async fn stop(self) {
        self.stop.cancel();
        let _ = self.handle.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::budget::GlobalSizeBudget;
    use crate::config::ShardBufferConfig;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken as Cancel;

    #[tokio::test(start_paused = true)]
    async fn evicts_head_after_its_window_elapses() {
        let config = ShardBufferConfig::builder()
            .per_request_window(Duration::from_millis(50))
            .global_size(4)
            .build();
        let budget = GlobalSizeBudget::new(config.global_size());
        let buffer = ShardBuffer::new("ks", "shard-0", config, budget);

        let guard = buffer
            .wait_for_failover_end(true, Cancel::new())
            .await
            .expect("first failover-error enters Buffering");
        assert!(guard.is_none());

        let stats = buffer.stats();
        assert_eq!(stats.queue_len, 1);

        tokio::time::advance(Duration::from_millis(60)).await;
        // give the background worker a chance to run after the virtual clock moved
        tokio::task::yield_now().await;
        tokio::time::advance(Duration::from_millis(1)).await;
        tokio::task::yield_now().await;

        let stats = buffer.stats();
        assert_eq!(stats.queue_len, 0);
    }
}
