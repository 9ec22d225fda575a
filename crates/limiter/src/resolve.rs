//! Use-case to quota and rollout option mapping.

use limiter_core::{Quota, UseCaseId, UseCaseKey};
use std::collections::HashMap;
use telemetry::metrics;
use tracing::{debug, warn};

use crate::options::{names, OptionsProvider};

/// Lookup tables from use-cases and metric path keys to option names.
///
/// Plain values: tests and alternate deployments build their own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UseCaseRegistry {
    quota_options: HashMap<UseCaseId, String>,
    generic_quota_option: String,
    rollout_options: HashMap<UseCaseKey, String>,
}

impl Default for UseCaseRegistry {
    fn default() -> Self {
        Self::new(names::GENERIC_QUOTAS)
            .with_quota_option(UseCaseId::Transactions, names::PERFORMANCE_QUOTAS)
            .with_quota_option(UseCaseId::Sessions, names::RELEASE_HEALTH_QUOTAS)
            .with_quota_option(UseCaseId::Spans, names::SPANS_QUOTAS)
            .with_quota_option(UseCaseId::Custom, names::CUSTOM_QUOTAS)
            .with_quota_option(UseCaseId::Profiles, names::PROFILES_QUOTAS)
            .with_rollout_option(UseCaseKey::ReleaseHealth, names::RELEASE_HEALTH_ROLLOUT_RATE)
            .with_rollout_option(UseCaseKey::Performance, names::ORGS_ROLLOUT_RATE)
    }
}

impl UseCaseRegistry {
    /// An empty registry: every use-case reads `generic_quota_option` and
    /// no metric path key has a rollout option.
    pub fn new(generic_quota_option: impl Into<String>) -> Self {
        Self {
            quota_options: HashMap::new(),
            generic_quota_option: generic_quota_option.into(),
            rollout_options: HashMap::new(),
        }
    }

    pub fn with_quota_option(mut self, use_case: UseCaseId, option: impl Into<String>) -> Self {
        self.quota_options.insert(use_case, option.into());
        self
    }

    pub fn with_rollout_option(mut self, key: UseCaseKey, option: impl Into<String>) -> Self {
        self.rollout_options.insert(key, option.into());
        self
    }

    /// Quota option for `use_case`, falling back to the generic option.
    pub fn quota_option(&self, use_case: &UseCaseId) -> &str {
        self.quota_options
            .get(use_case)
            .map(String::as_str)
            .unwrap_or(&self.generic_quota_option)
    }

    pub fn generic_quota_option(&self) -> &str {
        &self.generic_quota_option
    }

    /// Rollout option gating `key`, if any.
    pub fn rollout_option(&self, key: UseCaseKey) -> Option<&str> {
        self.rollout_options.get(&key).map(String::as_str)
    }

    /// Resolves the enforceable quota rules for `use_case`.
    ///
    /// Falls back to the generic option when the use-case's own option is
    /// unset, and to no rules at all when that is unset too. Invalid and
    /// unlimited rules are dropped. An empty result means "always accept".
    pub fn resolve_quotas(
        &self,
        options: &dyn OptionsProvider,
        use_case: &UseCaseId,
    ) -> Vec<Quota> {
        let option = self.quota_option(use_case);
        let rules = options.quota_rules(option).or_else(|| {
            if option == self.generic_quota_option {
                return None;
            }
            debug!(
                use_case = %use_case,
                option,
                "Quota option unset, using generic option"
            );
            options.quota_rules(&self.generic_quota_option)
        });

        rules
            .unwrap_or_default()
            .into_iter()
            .filter(|quota| match quota.check() {
                Ok(()) => !quota.is_unlimited(),
                Err(e) => {
                    metrics().invalid_quota_rules.inc();
                    warn!(use_case = %use_case, option, error = %e, "Skipping invalid quota rule");
                    false
                }
            })
            .collect()
    }
}
