//! Caller side of the cardinality limiter.
//!
//! Handles the pipeline around a limiter:
//! - Batching (per metric path key, flushed by size or age)
//! - Stage (check → drop → forward → commit)
//! - Consumer (channel-fed loop driving both)

pub mod batch;
pub mod consumer;
pub mod stage;

pub use batch::*;
pub use consumer::*;
pub use stage::*;
