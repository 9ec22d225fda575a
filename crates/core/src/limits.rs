//! Defaults and bounds for the cardinality limiter.
//!
//! The limiter sits on the hot path of metrics ingestion, so every blocking
//! point has a bound: one backend round trip to check, one to commit.
//!
//! # Design Rationale
//!
//! At 100k buckets/sec with batches of 1000 buckets:
//! - ~100 batches/sec per worker fleet
//! - Each batch costs exactly two backend round trips
//! - A 250ms check budget keeps a stalled backend from stalling ingestion;
//!   past it the limiter fails open.

// === Backend Round Trips ===

/// Default timeout for the quota check call (milliseconds).
pub const DEFAULT_CHECK_TIMEOUT_MS: u64 = 250;

/// Default timeout for the usage commit call (milliseconds).
pub const DEFAULT_COMMIT_TIMEOUT_MS: u64 = 250;

// === Rollout ===

/// Default modulus for the organization rollout gate.
///
/// With 100, rollout rates are effectively percentages of org ids.
pub const DEFAULT_ROLLOUT_GRANULARITY: u64 = 100;

// === Options ===

/// Default TTL for cached option reads (seconds).
///
/// Bounds how stale a quota or rollout change can be.
pub const DEFAULT_OPTIONS_CACHE_TTL_SECS: u64 = 10;

/// Maximum number of cached option entries.
pub const OPTIONS_CACHE_MAX_CAPACITY: u64 = 1_000;

// === Default Quota ===

/// Default quota window (1 hour).
pub const DEFAULT_WINDOW_SECONDS: u64 = 3600;

/// Default quota granularity (10 minutes).
pub const DEFAULT_GRANULARITY_SECONDS: u64 = 600;

/// Default distinct timeseries per org and use-case per window.
pub const DEFAULT_CARDINALITY_LIMIT: u64 = 10_000;

// === Batching ===

/// Maximum buckets per batch handed to the limiter.
pub const MAX_BATCH_RECORDS: usize = 1000;

/// Maximum batch age before flush (milliseconds).
pub const MAX_BATCH_AGE_MS: u64 = 100;
