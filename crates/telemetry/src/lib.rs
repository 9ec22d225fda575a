//! Internal telemetry for the cardinality limiter.
//!
//! Counters and health live in-process; operators read them through
//! snapshots and the structured logs emitted alongside.

pub mod health;
pub mod metrics;
pub mod tracing_setup;

pub use health::*;
pub use metrics::*;
pub use tracing_setup::*;
