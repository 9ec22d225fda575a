//! Quota rules and the request/grant types exchanged with the backend.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use validator::{Validate, ValidationError};

use crate::error::{ConfigErrorCode, Error, Result};
use crate::hash::UnitHash;
use crate::record::UseCaseId;

/// Unix timestamp in seconds.
pub type Timestamp = u64;

/// Current wall-clock time as a [`Timestamp`].
pub fn unix_now() -> Timestamp {
    chrono::Utc::now().timestamp().max(0) as Timestamp
}

/// A cardinality rule: at most `limit` distinct units per sliding window.
///
/// The window is subdivided into `window_seconds / granularity_seconds`
/// buckets, which is the resolution at which old units fall out of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Validate)]
#[validate(schema(function = "validate_window"))]
pub struct Quota {
    #[validate(range(min = 1))]
    pub window_seconds: u64,
    #[validate(range(min = 1))]
    pub granularity_seconds: u64,
    /// `None` is unlimited, `Some(0)` rejects everything.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
}

fn validate_window(quota: &Quota) -> std::result::Result<(), ValidationError> {
    if quota.granularity_seconds == 0 {
        // Reported by the field validator.
        return Ok(());
    }
    if quota.window_seconds < quota.granularity_seconds
        || quota.window_seconds % quota.granularity_seconds != 0
    {
        return Err(ValidationError::new("window_not_multiple_of_granularity"));
    }
    Ok(())
}

impl Quota {
    pub const fn new(window_seconds: u64, granularity_seconds: u64, limit: u64) -> Self {
        Self {
            window_seconds,
            granularity_seconds,
            limit: Some(limit),
        }
    }

    pub const fn unlimited(window_seconds: u64, granularity_seconds: u64) -> Self {
        Self {
            window_seconds,
            granularity_seconds,
            limit: None,
        }
    }

    pub fn is_unlimited(&self) -> bool {
        self.limit.is_none()
    }

    /// Number of granularity buckets spanning one window.
    pub fn buckets(&self) -> u64 {
        self.window_seconds / self.granularity_seconds.max(1)
    }

    /// Index of the granularity bucket containing `timestamp`.
    pub fn bucket_index(&self, timestamp: Timestamp) -> u64 {
        timestamp / self.granularity_seconds.max(1)
    }

    /// Validates the rule, mapping failures to a coded config error.
    pub fn check(&self) -> Result<()> {
        self.validate()
            .map_err(|e| Error::config(ConfigErrorCode::InvalidQuota, format!("{self}: {e}")))
    }
}

impl fmt::Display for Quota {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.limit {
            Some(limit) => write!(
                f,
                "{limit} per {}s/{}s",
                self.window_seconds, self.granularity_seconds
            ),
            None => write!(
                f,
                "unlimited per {}s/{}s",
                self.window_seconds, self.granularity_seconds
            ),
        }
    }
}

/// Records sharing a grouping key are limited against one pool.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GroupingKey {
    pub use_case_id: UseCaseId,
    pub org_id: u64,
}

impl GroupingKey {
    pub fn new(use_case_id: UseCaseId, org_id: u64) -> Self {
        Self {
            use_case_id,
            org_id,
        }
    }
}

/// Formats as the backend counter prefix, `"{use_case}-{org_id}"`.
impl fmt::Display for GroupingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.use_case_id, self.org_id)
    }
}

/// Candidate units for one grouping key under one quota rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestedQuota {
    pub key: GroupingKey,
    pub quota: Quota,
    pub unit_hashes: BTreeSet<UnitHash>,
}

impl RequestedQuota {
    pub fn new(key: GroupingKey, quota: Quota, unit_hashes: BTreeSet<UnitHash>) -> Self {
        Self {
            key,
            quota,
            unit_hashes,
        }
    }

    /// The backend counter prefix for this request.
    pub fn prefix(&self) -> String {
        self.key.to_string()
    }
}

/// The backend's answer to one [`RequestedQuota`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrantedQuota {
    pub request: RequestedQuota,
    pub granted_unit_hashes: BTreeSet<UnitHash>,
    /// Rules that were the limiting factor, empty when everything was granted.
    #[serde(default)]
    pub reached_quotas: Vec<Quota>,
}

impl GrantedQuota {
    pub fn new(request: RequestedQuota, granted_unit_hashes: BTreeSet<UnitHash>) -> Self {
        let reached_quotas = if granted_unit_hashes.len() < request.unit_hashes.len() {
            vec![request.quota]
        } else {
            Vec::new()
        };
        Self {
            request,
            granted_unit_hashes,
            reached_quotas,
        }
    }

    /// Grants every requested unit.
    pub fn all(request: RequestedQuota) -> Self {
        let granted = request.unit_hashes.clone();
        Self::new(request, granted)
    }

    /// Requested units that were not granted.
    pub fn rejected_unit_hashes(&self) -> impl Iterator<Item = UnitHash> + '_ {
        self.request
            .unit_hashes
            .iter()
            .copied()
            .filter(|hash| !self.granted_unit_hashes.contains(hash))
    }
}
