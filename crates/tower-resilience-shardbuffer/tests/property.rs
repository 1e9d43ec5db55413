//! Property tests for the shard buffer state machine.
//!
//! Invariants tested:
//! - `externally_reparented` is monotonically non-decreasing regardless of
//!   the order timestamps are reported in.
//! - The queue never holds more entries than the global size budget.

use std::sync::Arc;

use proptest::prelude::*;
use tokio::runtime::Runtime;
use tokio_util::sync::CancellationToken;
use tower_resilience_shardbuffer::{ShardBufferConfig, ShardBufferRegistry};

proptest! {
    #![proptest_config(ProptestConfig::with_cases(50))]

    #[test]
    fn externally_reparented_is_monotonic(timestamps in prop::collection::vec(0i64..1_000_000, 1..30)) {
        let rt = Runtime::new().unwrap();
        rt.block_on(async {
            let registry = ShardBufferRegistry::new(ShardBufferConfig::builder().build());
            let buffer = registry.get_or_create("ks", "shard-0");

            let mut expected_max = 0i64;
            for ts in timestamps {
                buffer.record_reparent_timestamp(ts);
                expected_max = expected_max.max(ts);
                prop_assert_eq!(buffer.stats().externally_reparented, expected_max);
            }
            Ok(())
        })?;
    }

    #[test]
    fn queue_never_exceeds_the_global_budget(
        global_size in 1usize..=8,
        num_requests in 1usize..=20,
    ) {
        let rt = Runtime::new().unwrap();
        rt.block_on(async {
            let config = ShardBufferConfig::builder()
                .global_size(global_size)
                .max_failover_duration(std::time::Duration::from_secs(30))
                .build();
            let registry = Arc::new(ShardBufferRegistry::new(config));
            let buffer = registry.get_or_create("ks", "shard-0");

            let mut handles = Vec::new();
            for _ in 0..num_requests {
                let b = buffer.clone();
                handles.push(tokio::spawn(async move {
                    b.wait_for_failover_end(true, CancellationToken::new()).await
                }));
                tokio::task::yield_now().await;
                prop_assert!(buffer.stats().queue_len <= global_size);
            }

            buffer.record_reparent_timestamp(1);
            for handle in handles {
                let _ = handle.await;
            }

            prop_assert_eq!(registry.budget().in_use(), 0);
            Ok(())
        })?;
    }
}
