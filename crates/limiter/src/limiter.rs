//! The timeseries cardinality limiter.

use limiter_core::error::BackendErrorCode;
use limiter_core::error::ConfigErrorCode;
use limiter_core::{
    unit_hash, Error, GrantedQuota, GroupingKey, MetricRecord, Quota, QuotaBackend,
    RequestedQuota, Timestamp, UnitHash, UseCaseId, UseCaseKey,
};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};
use telemetry::{health, metrics};
use tracing::{debug, warn};

use crate::config::LimiterConfig;
use crate::options::{CachedOptions, OptionsProvider};
use crate::resolve::UseCaseRegistry;
use crate::rollout::RolloutGate;

/// Grants retained for the commit step.
#[derive(Debug)]
struct PendingCommit {
    timestamp: Timestamp,
    grants: Vec<GrantedQuota>,
}

/// Outcome of checking one batch.
///
/// Hand it back to [`TimeseriesCardinalityLimiter::accept_keys`] once the
/// records in `keys_to_remove` have been dropped. The state is consumed
/// there, so usage can only be committed once.
#[derive(Debug)]
pub struct CardinalityLimiterState<K> {
    /// Keys of records to drop, ascending.
    pub keys_to_remove: Vec<K>,
    metric_path_key: UseCaseKey,
    commit: Option<PendingCommit>,
}

impl<K> CardinalityLimiterState<K> {
    /// A state that admits everything and has nothing to commit.
    fn unchecked(metric_path_key: UseCaseKey) -> Self {
        Self {
            keys_to_remove: Vec::new(),
            metric_path_key,
            commit: None,
        }
    }

    pub fn metric_path_key(&self) -> UseCaseKey {
        self.metric_path_key
    }

    /// Grants awaiting commit. `None` if the backend was never consulted or
    /// the check failed open.
    pub fn grants(&self) -> Option<&[GrantedQuota]> {
        self.commit.as_ref().map(|c| c.grants.as_slice())
    }

    /// Timestamp the check was evaluated at.
    pub fn timestamp(&self) -> Option<Timestamp> {
        self.commit.as_ref().map(|c| c.timestamp)
    }
}

/// Records of one grouping key.
struct Group<K> {
    quotas: Vec<Quota>,
    /// Distinct units and every record key carrying them.
    units: BTreeMap<UnitHash, Vec<K>>,
}

impl<K> Group<K> {
    fn new(quotas: Vec<Quota>) -> Self {
        Self {
            quotas,
            units: BTreeMap::new(),
        }
    }

    fn requests(&self, key: &GroupingKey) -> impl Iterator<Item = RequestedQuota> + '_ {
        let hashes: BTreeSet<UnitHash> = self.units.keys().copied().collect();
        let key = key.clone();
        self.quotas
            .iter()
            .map(move |quota| RequestedQuota::new(key.clone(), *quota, hashes.clone()))
    }
}

/// Limits the number of distinct timeseries per use-case and organization.
///
/// Holds no mutable state: concurrent calls from many workers only
/// coordinate through the backend.
pub struct TimeseriesCardinalityLimiter {
    namespace: String,
    backend: Arc<dyn QuotaBackend>,
    options: Arc<dyn OptionsProvider>,
    registry: UseCaseRegistry,
    rollout: RolloutGate,
    check_timeout: Duration,
    commit_timeout: Duration,
}

impl TimeseriesCardinalityLimiter {
    /// Creates a limiter with the default registry, rollout gate, and timeouts.
    pub fn new(
        namespace: impl Into<String>,
        backend: Arc<dyn QuotaBackend>,
        options: Arc<dyn OptionsProvider>,
    ) -> Self {
        let defaults = LimiterConfig::default();
        Self {
            namespace: namespace.into(),
            backend,
            options,
            registry: UseCaseRegistry::default(),
            rollout: RolloutGate::new(defaults.rollout_granularity),
            check_timeout: defaults.check_timeout(),
            commit_timeout: defaults.commit_timeout(),
        }
    }

    /// Creates a limiter reading the fixed option tables of `config`.
    pub fn from_config(config: &LimiterConfig, backend: Arc<dyn QuotaBackend>) -> Self {
        Self::configured(config, backend, Arc::new(config.options.clone()))
    }

    /// Creates a limiter reading options from a live `provider`.
    ///
    /// Reads go through a cache with the configured TTL, unless caching is
    /// disabled.
    pub fn from_config_with_provider(
        config: &LimiterConfig,
        backend: Arc<dyn QuotaBackend>,
        provider: Arc<dyn OptionsProvider>,
    ) -> Self {
        let options: Arc<dyn OptionsProvider> = match config.options_cache_ttl() {
            Some(ttl) => Arc::new(CachedOptions::new(provider, ttl)),
            None => provider,
        };
        Self::configured(config, backend, options)
    }

    fn configured(
        config: &LimiterConfig,
        backend: Arc<dyn QuotaBackend>,
        options: Arc<dyn OptionsProvider>,
    ) -> Self {
        Self::new(config.namespace.clone(), backend, options)
            .with_rollout_gate(RolloutGate::new(config.rollout_granularity))
            .with_timeouts(config.check_timeout(), config.commit_timeout())
    }

    pub fn with_registry(mut self, registry: UseCaseRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_rollout_gate(mut self, rollout: RolloutGate) -> Self {
        self.rollout = rollout;
        self
    }

    pub fn with_timeouts(mut self, check: Duration, commit: Duration) -> Self {
        self.check_timeout = check;
        self.commit_timeout = commit;
        self
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Decides which records of a batch exceed their cardinality quota.
    ///
    /// Never fails: if the backend errors or times out, the batch is
    /// admitted whole and the failure is logged and counted.
    pub async fn check_cardinality_limits<'a, K, I>(
        &self,
        metric_path_key: UseCaseKey,
        messages: I,
    ) -> CardinalityLimiterState<K>
    where
        K: Clone + Ord + 'a,
        I: IntoIterator<Item = (&'a K, &'a MetricRecord)>,
    {
        metrics().batches_checked.inc();

        let rate = self.rollout_rate(metric_path_key);
        if rate == 0.0 {
            debug!(
                namespace = %self.namespace,
                metric_path_key = %metric_path_key,
                "Cardinality limiting not rolled out, admitting batch"
            );
            return CardinalityLimiterState::unchecked(metric_path_key);
        }

        let mut groups: BTreeMap<GroupingKey, Group<K>> = BTreeMap::new();
        let mut resolved: HashMap<UseCaseId, Vec<Quota>> = HashMap::new();
        let mut checked = 0u64;
        let mut sampled = 0u64;

        for (key, message) in messages {
            checked += 1;
            if !self.rollout.is_sampled(message.org_id, rate) {
                continue;
            }
            sampled += 1;

            let quotas = resolved
                .entry(message.use_case_id.clone())
                .or_insert_with(|| {
                    self.registry
                        .resolve_quotas(self.options.as_ref(), &message.use_case_id)
                });
            if quotas.is_empty() {
                continue;
            }

            groups
                .entry(GroupingKey::new(message.use_case_id.clone(), message.org_id))
                .or_insert_with(|| Group::new(quotas.clone()))
                .units
                .entry(unit_hash(message))
                .or_default()
                .push(key.clone());
        }

        metrics().records_checked.inc_by(checked);
        metrics().records_sampled.inc_by(sampled);

        let requests: Vec<RequestedQuota> = groups
            .iter()
            .flat_map(|(key, group)| group.requests(key))
            .collect();
        if requests.is_empty() {
            debug!(
                namespace = %self.namespace,
                records = checked,
                "No applicable quotas, admitting batch"
            );
            return CardinalityLimiterState::unchecked(metric_path_key);
        }

        let requested_units: usize = groups.values().map(|g| g.units.len()).sum();
        metrics().unit_hashes_requested.inc_by(requested_units as u64);

        let Some((timestamp, mut grants)) = self.check_backend(requests).await else {
            return CardinalityLimiterState::unchecked(metric_path_key);
        };

        // A unit survives only if every rule of its group granted it.
        let mut rejected: BTreeMap<GroupingKey, BTreeSet<UnitHash>> = BTreeMap::new();
        for grant in &grants {
            let Some(group) = groups.get(&grant.request.key) else {
                debug!(prefix = %grant.request.key, "Ignoring grant for unrequested group");
                continue;
            };
            let denied: BTreeSet<UnitHash> = grant
                .rejected_unit_hashes()
                .filter(|hash| group.units.contains_key(hash))
                .collect();
            if denied.is_empty() {
                continue;
            }
            debug!(
                prefix = %grant.request.key,
                quota = %grant.request.quota,
                rejected = denied.len(),
                reached = grant.reached_quotas.len(),
                "Cardinality quota reached"
            );
            rejected
                .entry(grant.request.key.clone())
                .or_default()
                .extend(denied);
        }

        // Only commit units that were requested and admitted by every rule.
        grants.retain(|grant| groups.contains_key(&grant.request.key));
        for grant in &mut grants {
            let group_rejected = rejected.get(&grant.request.key);
            let units = groups.get(&grant.request.key).map(|g| &g.units);
            grant.granted_unit_hashes.retain(|hash| {
                units.is_some_and(|units| units.contains_key(hash))
                    && !group_rejected.is_some_and(|r| r.contains(hash))
            });
        }

        let mut keys_to_remove: Vec<K> = rejected
            .iter()
            .filter_map(|(key, hashes)| groups.get(key).map(|group| (group, hashes)))
            .flat_map(|(group, hashes)| {
                hashes
                    .iter()
                    .filter_map(move |hash| group.units.get(hash))
                    .flatten()
                    .cloned()
            })
            .collect();
        keys_to_remove.sort();
        keys_to_remove.dedup();

        let rejected_units: usize = rejected.values().map(BTreeSet::len).sum();
        metrics().unit_hashes_rejected.inc_by(rejected_units as u64);
        metrics().records_removed.inc_by(keys_to_remove.len() as u64);

        debug!(
            namespace = %self.namespace,
            metric_path_key = %metric_path_key,
            records = checked,
            groups = groups.len(),
            units = requested_units,
            rejected_units,
            removed = keys_to_remove.len(),
            "Checked cardinality limits"
        );

        CardinalityLimiterState {
            keys_to_remove,
            metric_path_key,
            commit: Some(PendingCommit { timestamp, grants }),
        }
    }

    /// Commits the usage granted by a previous check.
    ///
    /// Call after the rejected records have been dropped. Best effort: a
    /// failed commit is logged and counted, never retried.
    pub async fn accept_keys<K>(&self, state: CardinalityLimiterState<K>) {
        let Some(PendingCommit { timestamp, grants }) = state.commit else {
            return;
        };
        if grants.is_empty() {
            return;
        }

        metrics().backend_commits.inc();
        let start = Instant::now();
        let result = tokio::time::timeout(
            self.commit_timeout,
            self.backend.use_quotas(&grants, timestamp),
        )
        .await;
        metrics()
            .backend_commit_latency_ms
            .observe(start.elapsed().as_millis() as u64);

        let error = match result {
            Ok(Ok(())) => {
                health().quota_commit.set_healthy();
                return;
            }
            Ok(Err(e)) => e,
            Err(_) => Error::backend(
                BackendErrorCode::CommitFailed,
                format!("commit exceeded {}ms", self.commit_timeout.as_millis()),
            ),
        };

        metrics().backend_commit_failures.inc();
        health().quota_commit.set_unhealthy(error.to_string());
        warn!(
            namespace = %self.namespace,
            metric_path_key = %state.metric_path_key,
            timestamp,
            grants = grants.len(),
            error = %error,
            "Failed to commit cardinality usage"
        );
    }

    fn rollout_rate(&self, metric_path_key: UseCaseKey) -> f64 {
        let Some(option) = self.registry.rollout_option(metric_path_key) else {
            return 0.0;
        };
        let raw = self.options.rollout_rate(option).unwrap_or(0.0);
        let rate = RolloutGate::normalize_rate(raw);
        if rate != raw {
            let error = Error::config(
                ConfigErrorCode::InvalidRolloutRate,
                format!("{option} = {raw}"),
            );
            warn!(error = %error, rate, "Clamped rollout rate");
        }
        rate
    }

    /// One round trip to the backend; `None` means fail open.
    async fn check_backend(
        &self,
        requests: Vec<RequestedQuota>,
    ) -> Option<(Timestamp, Vec<GrantedQuota>)> {
        metrics().backend_checks.inc();
        let start = Instant::now();
        let result = tokio::time::timeout(
            self.check_timeout,
            self.backend.check_within_quotas(requests, None),
        )
        .await;
        metrics()
            .backend_check_latency_ms
            .observe(start.elapsed().as_millis() as u64);

        let error = match result {
            Ok(Ok(answer)) => {
                health().quota_backend.set_healthy();
                return Some(answer);
            }
            Ok(Err(e)) => {
                metrics().backend_check_failures.inc();
                e
            }
            Err(_) => {
                metrics().backend_check_timeouts.inc();
                Error::backend(
                    BackendErrorCode::Timeout,
                    format!("quota check exceeded {}ms", self.check_timeout.as_millis()),
                )
            }
        };

        health().quota_backend.set_unhealthy(error.to_string());
        warn!(
            namespace = %self.namespace,
            error = %error,
            "Quota check failed, admitting batch without cardinality limits"
        );
        None
    }
}
