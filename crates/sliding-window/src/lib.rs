//! In-process sliding-window quota backend.
//!
//! Each quota window is split into granularity buckets. A committed unit is
//! written into every bucket it stays visible in, so a check only has to
//! read the bucket containing the current timestamp.

pub mod config;
pub mod window;

pub use config::*;
pub use window::*;
