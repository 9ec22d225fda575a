//! Cardinality limiter configuration.

use limiter_core::limits::{
    DEFAULT_CHECK_TIMEOUT_MS, DEFAULT_COMMIT_TIMEOUT_MS, DEFAULT_OPTIONS_CACHE_TTL_SECS,
    DEFAULT_ROLLOUT_GRANULARITY,
};
use limiter_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use validator::Validate;

use crate::options::StaticOptions;

/// Limiter configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct LimiterConfig {
    /// Name used in logs to tell limiters apart
    #[serde(default)]
    pub namespace: String,
    /// Quota check timeout in milliseconds
    #[serde(default = "default_check_timeout_ms")]
    #[validate(range(min = 1))]
    pub check_timeout_ms: u64,
    /// Usage commit timeout in milliseconds
    #[serde(default = "default_commit_timeout_ms")]
    #[validate(range(min = 1))]
    pub commit_timeout_ms: u64,
    /// Modulus of the organization rollout gate
    #[serde(default = "default_rollout_granularity")]
    #[validate(range(min = 1))]
    pub rollout_granularity: u64,
    /// TTL of cached reads from a live options provider in seconds (0 disables
    /// caching). The fixed `options` tables are never cached.
    #[serde(default = "default_options_cache_ttl_secs")]
    pub options_cache_ttl_secs: u64,
    /// Quota rules and rollout rates
    #[serde(default)]
    pub options: StaticOptions,
}

fn default_check_timeout_ms() -> u64 {
    DEFAULT_CHECK_TIMEOUT_MS
}

fn default_commit_timeout_ms() -> u64 {
    DEFAULT_COMMIT_TIMEOUT_MS
}

fn default_rollout_granularity() -> u64 {
    DEFAULT_ROLLOUT_GRANULARITY
}

fn default_options_cache_ttl_secs() -> u64 {
    DEFAULT_OPTIONS_CACHE_TTL_SECS
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            namespace: String::new(),
            check_timeout_ms: default_check_timeout_ms(),
            commit_timeout_ms: default_commit_timeout_ms(),
            rollout_granularity: default_rollout_granularity(),
            options_cache_ttl_secs: default_options_cache_ttl_secs(),
            options: StaticOptions::default(),
        }
    }
}

impl LimiterConfig {
    pub fn check_timeout(&self) -> Duration {
        Duration::from_millis(self.check_timeout_ms)
    }

    pub fn commit_timeout(&self) -> Duration {
        Duration::from_millis(self.commit_timeout_ms)
    }

    /// `None` when option caching is disabled.
    pub fn options_cache_ttl(&self) -> Option<Duration> {
        (self.options_cache_ttl_secs > 0).then(|| Duration::from_secs(self.options_cache_ttl_secs))
    }

    /// Validates bounds, mapping failures to a validation error.
    pub fn check(&self) -> Result<()> {
        self.validate()
            .map_err(|e| Error::validation(format!("limiter config: {e}")))
    }
}
