//! In-memory request buffer that rides out a shard's primary failover
//! instead of failing clients outright.
//!
//! A database routing proxy sitting in front of many shards needs somewhere
//! to put requests that land on a shard mid-failover: failing them outright
//! pushes an application-visible error spike through every client for the
//! handful of seconds a new primary takes to get elected. [`ShardBuffer`]
//! gives each shard a small holding area instead — requests wait there,
//! bounded by a size budget shared across every shard, until the failover
//! ends or they themselves time out.
//!
//! This crate owns exactly the state machine and concurrency primitives of
//! that holding area. It knows nothing about how a failover is detected
//! (that's an RPC-error classification problem for the caller), how shards
//! are discovered, or how the retried RPC is actually sent — those are a
//! proxy's dispatcher and health-check subsystems, kept deliberately on the
//! other side of this crate's boundary.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use tower_resilience_shardbuffer::{ShardBufferConfig, ShardBufferRegistry};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ShardBufferConfig::builder()
//!     .global_size(2000)
//!     .per_request_window(std::time::Duration::from_secs(10))
//!     .build();
//!
//! let registry = Arc::new(ShardBufferRegistry::new(config));
//! let buffer = registry.get_or_create("customers", "-80");
//!
//! // A health-check subsystem observes a reparent and calls this, from
//! // somewhere entirely outside this crate:
//! // buffer.record_reparent_timestamp(unix_nanos);
//!
//! // An RPC dispatcher that just saw what looks like a failover error:
//! match buffer.wait_for_failover_end(true, CancellationToken::new()).await? {
//!     None => { /* not a failover, or buffering didn't apply: fail normally */ }
//!     Some(retry_done) => {
//!         // retry the RPC against the (hopefully new) primary
//!         retry_done.report();
//!     }
//! }
//! # Ok(())
//! # }
//! ```

mod budget;
mod buffer;
mod config;
mod drain;
mod entry;
mod error;
mod events;
mod registry;
mod stats;
mod timeout_worker;

pub use budget::GlobalSizeBudget;
pub use buffer::{BufferState, ShardBuffer};
pub use config::{ShardBufferConfig, ShardBufferConfigBuilder};
pub use entry::RetryGuard;
pub use error::{Result, ShardBufferError};
pub use events::{EvictionReason, RejectionReason, ShardBufferEvent};
pub use registry::ShardBufferRegistry;
pub use stats::ShardBufferStats;
