//! Bucketed unit sets behind a single lock.

use async_trait::async_trait;
use limiter_core::{
    unix_now, GrantedQuota, Quota, QuotaBackend, RequestedQuota, Result, Timestamp, UnitHash,
};
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::debug;

/// Identifies the unit set of one bucket of one rule for one prefix.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct SetKey {
    prefix: String,
    window_seconds: u64,
    granularity_seconds: u64,
    bucket: u64,
}

impl SetKey {
    fn new(prefix: &str, quota: &Quota, bucket: u64) -> Self {
        Self {
            prefix: prefix.to_string(),
            window_seconds: quota.window_seconds,
            granularity_seconds: quota.granularity_seconds,
            bucket,
        }
    }
}

#[derive(Debug)]
struct BucketSet {
    hashes: BTreeSet<UnitHash>,
    expires_at: Timestamp,
}

/// Sliding-window cardinality counter kept in process memory.
///
/// Checks never mutate state; only [`QuotaBackend::use_quotas`] does.
pub struct MemorySlidingWindow {
    sets: Mutex<HashMap<SetKey, BucketSet>>,
}

impl Default for MemorySlidingWindow {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySlidingWindow {
    pub fn new() -> Self {
        Self {
            sets: Mutex::new(HashMap::new()),
        }
    }

    /// Distinct units counted for `prefix` under `quota` at `timestamp`.
    pub fn cardinality(&self, prefix: &str, quota: &Quota, timestamp: Timestamp) -> usize {
        let key = SetKey::new(prefix, quota, quota.bucket_index(timestamp));
        self.sets
            .lock()
            .get(&key)
            .filter(|set| set.expires_at > timestamp)
            .map_or(0, |set| set.hashes.len())
    }

    /// Number of live bucket sets.
    pub fn len(&self) -> usize {
        self.sets.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sets.lock().is_empty()
    }

    /// Drops bucket sets that expired at or before `now`.
    pub fn cleanup(&self, now: Timestamp) -> usize {
        let mut sets = self.sets.lock();
        let before = sets.len();
        sets.retain(|_, set| set.expires_at > now);
        before - sets.len()
    }

    /// Sweeps expired buckets every `period` until the runtime shuts down.
    pub fn start_cleanup_task(self: Arc<Self>, period: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(period);
            loop {
                ticker.tick().await;
                let removed = self.cleanup(unix_now());
                if removed > 0 {
                    debug!(removed, remaining = self.len(), "Swept expired window buckets");
                }
            }
        })
    }

    fn grant(
        sets: &HashMap<SetKey, BucketSet>,
        request: RequestedQuota,
        timestamp: Timestamp,
    ) -> GrantedQuota {
        let Some(limit) = request.quota.limit else {
            return GrantedQuota::all(request);
        };

        let bucket = request.quota.bucket_index(timestamp);
        let key = SetKey::new(&request.prefix(), &request.quota, bucket);
        let existing = sets.get(&key).filter(|set| set.expires_at > timestamp);
        let cardinality = existing.map_or(0, |set| set.hashes.len() as u64);

        let mut granted = BTreeSet::new();
        let mut admitted = 0u64;
        for hash in &request.unit_hashes {
            if existing.is_some_and(|set| set.hashes.contains(hash)) {
                granted.insert(*hash);
            } else if cardinality + admitted < limit {
                admitted += 1;
                granted.insert(*hash);
            }
        }

        GrantedQuota::new(request, granted)
    }
}

#[async_trait]
impl QuotaBackend for MemorySlidingWindow {
    async fn check_within_quotas(
        &self,
        requests: Vec<RequestedQuota>,
        timestamp: Option<Timestamp>,
    ) -> Result<(Timestamp, Vec<GrantedQuota>)> {
        let timestamp = timestamp.unwrap_or_else(unix_now);
        if requests.is_empty() {
            return Ok((timestamp, Vec::new()));
        }

        let sets = self.sets.lock();
        let grants = requests
            .into_iter()
            .map(|request| Self::grant(&sets, request, timestamp))
            .collect();
        Ok((timestamp, grants))
    }

    /// Commits grants, enforcing each limit again under the lock.
    ///
    /// Another caller may have committed since this grant was checked, so a
    /// new hash only lands in a bucket that still has room. Known hashes are
    /// always kept.
    async fn use_quotas(&self, grants: &[GrantedQuota], timestamp: Timestamp) -> Result<()> {
        let mut sets = self.sets.lock();
        let mut late = 0usize;
        for grant in grants {
            let quota = &grant.request.quota;
            let Some(limit) = quota.limit else {
                continue;
            };
            if grant.granted_unit_hashes.is_empty() {
                continue;
            }

            let limit = usize::try_from(limit).unwrap_or(usize::MAX);
            let prefix = grant.request.prefix();
            let first = quota.bucket_index(timestamp);
            for bucket in first..first + quota.buckets() {
                let set = sets
                    .entry(SetKey::new(&prefix, quota, bucket))
                    .or_insert_with(|| BucketSet {
                        hashes: BTreeSet::new(),
                        expires_at: (bucket + 1) * quota.granularity_seconds,
                    });
                for hash in &grant.granted_unit_hashes {
                    if set.hashes.contains(hash) {
                        continue;
                    }
                    if set.hashes.len() < limit {
                        set.hashes.insert(*hash);
                    } else if bucket == first {
                        late += 1;
                    }
                }
            }
        }
        drop(sets);

        if late > 0 {
            debug!(late, "Dropped grants that no longer fit at commit time");
        }
        Ok(())
    }
}
