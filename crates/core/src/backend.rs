//! The quota backend contract.

use async_trait::async_trait;

use crate::error::Result;
use crate::quota::{GrantedQuota, RequestedQuota, Timestamp};

/// A shared sliding-window store that admits and counts unit hashes.
///
/// The protocol has two calls per batch. `check_within_quotas` decides which
/// hashes fit and must not mutate any counter; `use_quotas` records the
/// grants. Callers that never commit leave no trace in the store.
///
/// Implementations must make concurrent commits for the same prefix and
/// window bucket atomic.
#[async_trait]
pub trait QuotaBackend: Send + Sync {
    /// Checks every request against its quota.
    ///
    /// Returns the timestamp the check was evaluated at (`timestamp` if
    /// given, otherwise now) and one grant per request. An empty request list
    /// must succeed with an empty grant list.
    async fn check_within_quotas(
        &self,
        requests: Vec<RequestedQuota>,
        timestamp: Option<Timestamp>,
    ) -> Result<(Timestamp, Vec<GrantedQuota>)>;

    /// Records granted usage at the timestamp returned by the check.
    async fn use_quotas(&self, grants: &[GrantedQuota], timestamp: Timestamp) -> Result<()>;
}
