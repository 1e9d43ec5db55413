//! Core infrastructure shared by tower-resilience crates.
//!
//! Currently this is just the event system used for observability: a
//! pattern-agnostic listener registry that resilience components emit
//! structured events into.

pub mod events;

pub use events::{EventListener, ResilienceEvent};
