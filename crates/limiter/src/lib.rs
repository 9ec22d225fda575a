//! Timeseries cardinality limiting for the metrics ingestion pipeline.
//!
//! For every consumed batch, [`TimeseriesCardinalityLimiter`]:
//! 1. Drops organizations outside the rollout from consideration
//! 2. Groups records by use-case and organization, hashing each timeseries
//! 3. Asks the quota backend, in one round trip, which hashes fit
//! 4. Maps rejected hashes back to the record keys to drop
//!
//! After the caller has dropped those records, [`TimeseriesCardinalityLimiter::accept_keys`]
//! commits the granted usage.

pub mod config;
pub mod limiter;
pub mod options;
pub mod resolve;
pub mod rollout;

pub use config::*;
pub use limiter::*;
pub use options::*;
pub use resolve::*;
pub use rollout::*;
