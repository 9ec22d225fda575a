//! Metric bucket records and their identifiers.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Position of a record in the consumed stream.
///
/// Unique within a batch. The limiter only uses it to map verdicts back to
/// inputs and never interprets it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PartitionIdxOffset {
    pub partition_idx: i32,
    pub offset: i64,
}

impl PartitionIdxOffset {
    pub const fn new(partition_idx: i32, offset: i64) -> Self {
        Self {
            partition_idx,
            offset,
        }
    }
}

impl fmt::Display for PartitionIdxOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.partition_idx, self.offset)
    }
}

/// The metrics namespace a bucket belongs to.
///
/// Use-cases not known to this build are carried as `Unknown` and limited
/// under the generic quota.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum UseCaseId {
    Sessions,
    Transactions,
    Spans,
    Custom,
    EscalatingIssues,
    Profiles,
    BundleAnalysis,
    MetricStats,
    Unknown(String),
}

impl UseCaseId {
    /// Returns the use-case corresponding to the given name.
    pub fn from_name(name: &str) -> Self {
        match name {
            "sessions" => Self::Sessions,
            "transactions" => Self::Transactions,
            "spans" => Self::Spans,
            "custom" => Self::Custom,
            "escalating_issues" => Self::EscalatingIssues,
            "profiles" => Self::Profiles,
            "bundle_analysis" => Self::BundleAnalysis,
            "metric_stats" => Self::MetricStats,
            other => Self::Unknown(other.to_string()),
        }
    }

    /// Returns the canonical name of this use-case.
    pub fn name(&self) -> &str {
        match self {
            Self::Sessions => "sessions",
            Self::Transactions => "transactions",
            Self::Spans => "spans",
            Self::Custom => "custom",
            Self::EscalatingIssues => "escalating_issues",
            Self::Profiles => "profiles",
            Self::BundleAnalysis => "bundle_analysis",
            Self::MetricStats => "metric_stats",
            Self::Unknown(name) => name,
        }
    }
}

impl From<String> for UseCaseId {
    fn from(name: String) -> Self {
        Self::from_name(&name)
    }
}

impl From<UseCaseId> for String {
    fn from(use_case: UseCaseId) -> Self {
        use_case.name().to_string()
    }
}

impl fmt::Display for UseCaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Which family of metrics a batch was consumed from.
///
/// Selects the rollout flavor, so release health and performance metrics
/// can be enabled independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UseCaseKey {
    ReleaseHealth,
    Performance,
}

impl UseCaseKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ReleaseHealth => "release_health",
            Self::Performance => "performance",
        }
    }
}

impl fmt::Display for UseCaseKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One ingested metric bucket, already parsed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricRecord {
    pub org_id: u64,
    pub use_case_id: UseCaseId,
    pub name: String,
    /// Tag mapping; ordered so identical tag sets compare and hash equal.
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

impl MetricRecord {
    pub fn new(org_id: u64, use_case_id: UseCaseId, name: impl Into<String>) -> Self {
        Self {
            org_id,
            use_case_id,
            name: name.into(),
            tags: BTreeMap::new(),
        }
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }
}
