//! Deterministic per-organization rollout.

use limiter_core::limits::DEFAULT_ROLLOUT_GRANULARITY;

/// Decides which organizations are subject to cardinality limiting.
///
/// An organization is in iff `org_id % granularity < granularity * rate`,
/// so the answer for a given org and rate never changes between batches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RolloutGate {
    granularity: u64,
}

impl Default for RolloutGate {
    fn default() -> Self {
        Self::new(DEFAULT_ROLLOUT_GRANULARITY)
    }
}

impl RolloutGate {
    pub fn new(granularity: u64) -> Self {
        Self {
            granularity: granularity.max(1),
        }
    }

    pub fn granularity(&self) -> u64 {
        self.granularity
    }

    /// Clamps a configured rate into `[0, 1]`; non-finite rates become 0.
    pub fn normalize_rate(rate: f64) -> f64 {
        if !rate.is_finite() || rate <= 0.0 {
            0.0
        } else {
            rate.min(1.0)
        }
    }

    /// Whether `org_id` is limited at `rate`.
    pub fn is_sampled(&self, org_id: u64, rate: f64) -> bool {
        let rate = Self::normalize_rate(rate);
        if rate == 0.0 {
            return false;
        }
        if rate >= 1.0 {
            return true;
        }
        ((org_id % self.granularity) as f64) < self.granularity as f64 * rate
    }
}
