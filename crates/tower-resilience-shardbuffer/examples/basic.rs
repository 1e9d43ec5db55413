//! Demonstrates buffering requests through a simulated shard failover.
//!
//! Run with: cargo run --example basic

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tower_resilience_shardbuffer::{ShardBufferConfig, ShardBufferRegistry};

#[tokio::main]
async fn main() {
    println!("=== Shard Buffer Basic Example ===\n");

    let config = ShardBufferConfig::builder()
        .global_size(100)
        .per_request_window(Duration::from_secs(5))
        .max_failover_duration(Duration::from_secs(10))
        .on_state_transition(|from, to| println!("  state: {from:?} -> {to:?}"))
        .on_drain_complete(|released, duration| {
            println!("  drain complete: {released} requests released after {duration:?}")
        })
        .build();

    let registry = Arc::new(ShardBufferRegistry::new(config));
    let buffer = registry.get_or_create("customers", "-80");

    println!("Simulating three requests arriving during a failover...\n");
    let mut handles = Vec::new();
    for i in 0..3 {
        let buffer = buffer.clone();
        handles.push(tokio::spawn(async move {
            match buffer
                .wait_for_failover_end(true, CancellationToken::new())
                .await
            {
                Ok(None) => println!("  request {i}: passed straight through"),
                Ok(Some(retry_done)) => {
                    println!("  request {i}: buffered, now retrying");
                    retry_done.report();
                }
                Err(err) => println!("  request {i}: rejected ({err})"),
            }
        }));
    }

    tokio::time::sleep(Duration::from_millis(200)).await;
    println!("\nHealth check observes the new primary, ending the failover...");
    buffer.record_reparent_timestamp(1);

    for handle in handles {
        let _ = handle.await;
    }

    println!("\nFinal state: {:?}", buffer.stats().state);
}
