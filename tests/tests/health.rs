//! Health reporting driven by backend outcomes.
//!
//! Kept in its own test binary: the registry is process-global and these
//! steps must not interleave with other limiter tests.

use cardinality::names;
use integration_tests::fixtures::{self, batch, hourly, rolled_out};
use integration_tests::mocks::MockBackend;
use limiter_core::{UseCaseId, UseCaseKey};
use std::sync::Arc;
use telemetry::{health, HealthStatus};

#[tokio::test]
async fn test_health_follows_backend_outcomes() {
    let backend = MockBackend::new();
    backend.set_grant_hashes(1);
    let options = rolled_out().with_quotas(names::PERFORMANCE_QUOTAS, vec![hourly(1)]);
    let limiter = fixtures::limiter(Arc::new(backend.clone()), options);
    let messages = batch(fixtures::distinct_records(1, UseCaseId::Transactions, 2));

    assert_eq!(health().report().status, HealthStatus::Healthy);

    // Failing checks: limits are no longer enforced.
    backend.set_should_fail(true);
    let state = limiter
        .check_cardinality_limits(UseCaseKey::Performance, &messages)
        .await;
    assert!(state.keys_to_remove.is_empty());
    assert!(!health().is_enforcing());
    let report = health().report();
    assert_eq!(report.status, HealthStatus::Degraded);
    let backend_report = report
        .components
        .iter()
        .find(|c| c.name == "quota_backend")
        .unwrap();
    assert!(backend_report.message.as_deref().unwrap().contains("QUOTA_001"));

    // Failing commits on top: nothing is healthy.
    backend.set_should_fail(false);
    backend.set_should_fail_commit(true);
    let state = limiter
        .check_cardinality_limits(UseCaseKey::Performance, &messages)
        .await;
    assert!(health().is_enforcing());
    limiter.accept_keys(state).await;
    assert!(!health().quota_commit.is_healthy());
    assert_eq!(health().report().status, HealthStatus::Degraded);

    backend.set_should_fail(true);
    let _ = limiter
        .check_cardinality_limits(UseCaseKey::Performance, &messages)
        .await;
    assert_eq!(health().report().status, HealthStatus::Unhealthy);

    // Full recovery.
    backend.set_should_fail(false);
    backend.set_should_fail_commit(false);
    let state = limiter
        .check_cardinality_limits(UseCaseKey::Performance, &messages)
        .await;
    limiter.accept_keys(state).await;
    assert_eq!(health().report().status, HealthStatus::Healthy);
    assert!(health().quota_backend.message().is_none());
}
