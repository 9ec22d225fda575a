//! Fail-open and best-effort commit behavior.
//!
//! Counters are process-global and tests run in parallel, so assertions on
//! them only look at increases.

use cardinality::names;
use integration_tests::fixtures::{self, batch, hourly, rolled_out};
use integration_tests::mocks::MockBackend;
use limiter_core::{UseCaseId, UseCaseKey};
use std::sync::Arc;
use std::time::Duration;
use telemetry::metrics;

fn limiter(backend: &MockBackend, limit: u64) -> cardinality::TimeseriesCardinalityLimiter {
    let options = rolled_out().with_quotas(names::PERFORMANCE_QUOTAS, vec![hourly(limit)]);
    fixtures::limiter(Arc::new(backend.clone()), options)
        .with_timeouts(Duration::from_millis(50), Duration::from_millis(50))
}

/// A failing backend admits the whole batch and commits nothing.
#[tokio::test]
async fn test_check_error_fails_open() {
    let backend = MockBackend::new();
    backend.set_grant_hashes(0);
    backend.set_should_fail(true);
    let limiter = limiter(&backend, 0);
    let failures = metrics().backend_check_failures.get();

    let messages = batch(fixtures::distinct_records(1, UseCaseId::Transactions, 3));
    let state = limiter
        .check_cardinality_limits(UseCaseKey::Performance, &messages)
        .await;

    assert!(state.keys_to_remove.is_empty());
    assert!(state.grants().is_none());
    assert_eq!(backend.check_count(), 1);
    assert!(metrics().backend_check_failures.get() > failures);

    limiter.accept_keys(state).await;
    assert_eq!(backend.commit_count(), 0);
}

/// A slow backend is abandoned after the check timeout.
#[tokio::test]
async fn test_check_timeout_fails_open() {
    let backend = MockBackend::new();
    backend.set_grant_hashes(0);
    backend.set_delay(Duration::from_millis(500));
    let limiter = limiter(&backend, 0);
    let timeouts = metrics().backend_check_timeouts.get();

    let messages = batch(fixtures::distinct_records(1, UseCaseId::Transactions, 3));
    let started = std::time::Instant::now();
    let state = limiter
        .check_cardinality_limits(UseCaseKey::Performance, &messages)
        .await;

    assert!(started.elapsed() < Duration::from_millis(400));
    assert!(state.keys_to_remove.is_empty());
    assert!(state.grants().is_none());
    assert!(metrics().backend_check_timeouts.get() > timeouts);
}

/// Commit failures are counted and swallowed.
#[tokio::test]
async fn test_commit_failure_is_swallowed() {
    let backend = MockBackend::new();
    backend.set_grant_hashes(1);
    backend.set_should_fail_commit(true);
    let limiter = limiter(&backend, 1);
    let failures = metrics().backend_commit_failures.get();

    let messages = batch(fixtures::distinct_records(1, UseCaseId::Transactions, 2));
    let state = limiter
        .check_cardinality_limits(UseCaseKey::Performance, &messages)
        .await;
    assert_eq!(state.keys_to_remove.len(), 1);

    limiter.accept_keys(state).await;
    assert_eq!(backend.commit_count(), 0);
    assert!(metrics().backend_commit_failures.get() > failures);
}

/// A commit slower than the commit timeout is abandoned, not awaited.
#[tokio::test]
async fn test_commit_timeout_is_swallowed() {
    let backend = MockBackend::new();
    backend.set_grant_hashes(1);
    let limiter = limiter(&backend, 1);

    let messages = batch(fixtures::distinct_records(1, UseCaseId::Transactions, 2));
    let state = limiter
        .check_cardinality_limits(UseCaseKey::Performance, &messages)
        .await;
    assert!(state.grants().is_some());

    backend.set_delay(Duration::from_millis(500));
    let failures = metrics().backend_commit_failures.get();
    let started = std::time::Instant::now();
    limiter.accept_keys(state).await;

    assert!(started.elapsed() < Duration::from_millis(400));
    assert_eq!(backend.commit_count(), 0);
    assert!(metrics().backend_commit_failures.get() > failures);
}

/// The backend recovering restores enforcement on the next batch.
#[tokio::test]
async fn test_enforcement_resumes_after_recovery() {
    let backend = MockBackend::new();
    backend.set_grant_hashes(0);
    backend.set_should_fail(true);
    let limiter = limiter(&backend, 0);
    let messages = batch(fixtures::distinct_records(1, UseCaseId::Transactions, 2));

    let state = limiter
        .check_cardinality_limits(UseCaseKey::Performance, &messages)
        .await;
    assert!(state.keys_to_remove.is_empty());

    backend.set_should_fail(false);
    let state = limiter
        .check_cardinality_limits(UseCaseKey::Performance, &messages)
        .await;
    assert_eq!(state.keys_to_remove.len(), 2);
    assert_eq!(backend.check_count(), 2);
}
