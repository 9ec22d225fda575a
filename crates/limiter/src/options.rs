//! Read-only option stores for quota rules and rollout rates.

use limiter_core::limits::{
    DEFAULT_CARDINALITY_LIMIT, DEFAULT_GRANULARITY_SECONDS, DEFAULT_WINDOW_SECONDS,
    OPTIONS_CACHE_MAX_CAPACITY,
};
use limiter_core::Quota;
use moka::sync::Cache;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Option names understood by the default registry.
pub mod names {
    pub const PERFORMANCE_QUOTAS: &str = "limits-performance-per-org";
    pub const RELEASE_HEALTH_QUOTAS: &str = "limits-releasehealth-per-org";
    pub const SPANS_QUOTAS: &str = "limits-spans-per-org";
    pub const CUSTOM_QUOTAS: &str = "limits-custom-per-org";
    pub const PROFILES_QUOTAS: &str = "limits-profiles-per-org";
    pub const GENERIC_QUOTAS: &str = "limits-generic-metrics-per-org";

    pub const ORGS_ROLLOUT_RATE: &str = "orgs-rollout-rate";
    pub const RELEASE_HEALTH_ROLLOUT_RATE: &str = "rh-orgs-rollout-rate";
}

/// Source of dynamic limiter options.
///
/// Implementations are read on every batch and must not block.
pub trait OptionsProvider: Send + Sync {
    /// Quota rules stored under `name`, `None` if the option is not set.
    fn quota_rules(&self, name: &str) -> Option<Vec<Quota>>;

    /// Rollout rate stored under `name`, `None` if the option is not set.
    fn rollout_rate(&self, name: &str) -> Option<f64>;
}

impl<T: OptionsProvider + ?Sized> OptionsProvider for Arc<T> {
    fn quota_rules(&self, name: &str) -> Option<Vec<Quota>> {
        (**self).quota_rules(name)
    }

    fn rollout_rate(&self, name: &str) -> Option<f64> {
        (**self).rollout_rate(name)
    }
}

/// Fixed option tables, typically loaded from the config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StaticOptions {
    #[serde(default)]
    pub quotas: HashMap<String, Vec<Quota>>,
    #[serde(default)]
    pub rollout_rates: HashMap<String, f64>,
}

impl Default for StaticOptions {
    /// Every per-use-case option gets one hourly rule, the generic option
    /// none, and both rollout flavors start dark.
    fn default() -> Self {
        let default_rule = Quota::new(
            DEFAULT_WINDOW_SECONDS,
            DEFAULT_GRANULARITY_SECONDS,
            DEFAULT_CARDINALITY_LIMIT,
        );

        let mut options = Self::empty().with_quotas(names::GENERIC_QUOTAS, Vec::new());
        for name in [
            names::PERFORMANCE_QUOTAS,
            names::RELEASE_HEALTH_QUOTAS,
            names::SPANS_QUOTAS,
            names::CUSTOM_QUOTAS,
            names::PROFILES_QUOTAS,
        ] {
            options = options.with_quotas(name, vec![default_rule]);
        }

        options
            .with_rollout_rate(names::ORGS_ROLLOUT_RATE, 0.0)
            .with_rollout_rate(names::RELEASE_HEALTH_ROLLOUT_RATE, 0.0)
    }
}

impl StaticOptions {
    /// Tables with no options set at all.
    pub fn empty() -> Self {
        Self {
            quotas: HashMap::new(),
            rollout_rates: HashMap::new(),
        }
    }

    pub fn with_quotas(mut self, name: impl Into<String>, rules: Vec<Quota>) -> Self {
        self.quotas.insert(name.into(), rules);
        self
    }

    pub fn with_rollout_rate(mut self, name: impl Into<String>, rate: f64) -> Self {
        self.rollout_rates.insert(name.into(), rate);
        self
    }
}

impl OptionsProvider for StaticOptions {
    fn quota_rules(&self, name: &str) -> Option<Vec<Quota>> {
        self.quotas.get(name).cloned()
    }

    fn rollout_rate(&self, name: &str) -> Option<f64> {
        self.rollout_rates.get(name).copied()
    }
}

/// Caches another provider's answers for a short TTL.
///
/// A changed option becomes visible at most `ttl` after it was written.
pub struct CachedOptions<P> {
    inner: P,
    quotas: Cache<String, Option<Vec<Quota>>>,
    rollout_rates: Cache<String, Option<f64>>,
}

impl<P: OptionsProvider> CachedOptions<P> {
    pub fn new(inner: P, ttl: Duration) -> Self {
        Self {
            inner,
            quotas: Cache::builder()
                .max_capacity(OPTIONS_CACHE_MAX_CAPACITY)
                .time_to_live(ttl)
                .build(),
            rollout_rates: Cache::builder()
                .max_capacity(OPTIONS_CACHE_MAX_CAPACITY)
                .time_to_live(ttl)
                .build(),
        }
    }

    /// Forces the next read of every option through to the inner provider.
    pub fn invalidate_all(&self) {
        self.quotas.invalidate_all();
        self.rollout_rates.invalidate_all();
    }
}

impl<P: OptionsProvider> OptionsProvider for CachedOptions<P> {
    fn quota_rules(&self, name: &str) -> Option<Vec<Quota>> {
        self.quotas
            .get_with(name.to_string(), || self.inner.quota_rules(name))
    }

    fn rollout_rate(&self, name: &str) -> Option<f64> {
        self.rollout_rates
            .get_with(name.to_string(), || self.inner.rollout_rate(name))
    }
}
