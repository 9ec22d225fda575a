//! Behavior that must hold for any batch, checked over a range of shapes.

use cardinality::names;
use integration_tests::fixtures::{self, batch, hourly, key, record, rolled_out, Batch};
use integration_tests::mocks::MockBackend;
use limiter_core::{
    unit_hash, MetricRecord, PartitionIdxOffset, QuotaBackend, UseCaseId, UseCaseKey,
};
use sliding_window::MemorySlidingWindow;
use std::collections::BTreeSet;
use std::sync::Arc;

/// A limit of zero removes every record of every limited group.
#[tokio::test]
async fn test_zero_limit_rejects_all() {
    for size in [1, 2, 17, 250] {
        let backend = MockBackend::new();
        backend.set_grant_hashes(0);
        let options = rolled_out().with_quotas(names::PERFORMANCE_QUOTAS, vec![hourly(0)]);
        let limiter = fixtures::limiter(Arc::new(backend.clone()), options);

        let messages = batch(fixtures::distinct_records(1, UseCaseId::Transactions, size));
        let state = limiter
            .check_cardinality_limits(UseCaseKey::Performance, &messages)
            .await;

        let expected: Vec<_> = messages.keys().copied().collect();
        assert_eq!(state.keys_to_remove, expected);
    }
}

/// A use-case without rules is never limited, whatever the batch size.
#[tokio::test]
async fn test_no_rules_accepts_all() {
    let backend = Arc::new(MemorySlidingWindow::new());
    let options = rolled_out()
        .with_quotas(names::PERFORMANCE_QUOTAS, vec![hourly(0)])
        .with_quotas(names::SPANS_QUOTAS, vec![]);
    let limiter = fixtures::limiter(backend, options);

    for size in [1, 10, 1000] {
        let mut records = fixtures::distinct_records(1, UseCaseId::Spans, size);
        records.push(record(1, UseCaseId::Transactions, "limited"));
        let messages = batch(records);

        let state = limiter
            .check_cardinality_limits(UseCaseKey::Performance, &messages)
            .await;

        // Only the transactions record is limited.
        assert_eq!(state.keys_to_remove, vec![key(size as i64)]);
    }
}

/// With limit N and M > N distinct units, exactly M - N units are rejected.
#[tokio::test]
async fn test_partial_grant_admits_at_most_limit() {
    for (limit, distinct) in [(1u64, 2usize), (3, 10), (10, 11), (5, 100)] {
        let backend = Arc::new(MemorySlidingWindow::new());
        let options = rolled_out().with_quotas(names::PERFORMANCE_QUOTAS, vec![hourly(limit)]);
        let limiter = fixtures::limiter(backend, options);

        // Every unit appears twice so rejection has to cover both copies.
        let unique = fixtures::distinct_records(4, UseCaseId::Transactions, distinct);
        let messages = batch(unique.iter().chain(unique.iter()).cloned());
        let state = limiter
            .check_cardinality_limits(UseCaseKey::Performance, &messages)
            .await;

        let rejected: BTreeSet<_> = state
            .keys_to_remove
            .iter()
            .map(|k| unit_hash(&messages[k]))
            .collect();
        let admitted: BTreeSet<_> = messages
            .iter()
            .filter(|(k, _)| !state.keys_to_remove.contains(*k))
            .map(|(_, r)| unit_hash(r))
            .collect();

        assert_eq!(rejected.len(), distinct - limit as usize);
        assert_eq!(admitted.len(), limit as usize);
        assert!(rejected.is_disjoint(&admitted));
        assert_eq!(state.keys_to_remove.len(), 2 * (distinct - limit as usize));
    }
}

/// Identical identities share one verdict, and tag order is irrelevant.
#[tokio::test]
async fn test_duplicate_identities_are_fungible() {
    let backend = MockBackend::new();
    backend.set_grant_hashes(1);
    let options = rolled_out().with_quotas(names::PERFORMANCE_QUOTAS, vec![hourly(1)]);
    let limiter = fixtures::limiter(Arc::new(backend.clone()), options);

    let a = record(1, UseCaseId::Transactions, "d:transactions/duration@ms")
        .with_tag("env", "prod")
        .with_tag("release", "1.0");
    let a_reordered = record(1, UseCaseId::Transactions, "d:transactions/duration@ms")
        .with_tag("release", "1.0")
        .with_tag("env", "prod");
    let b = record(1, UseCaseId::Transactions, "d:transactions/duration@ms")
        .with_tag("env", "staging");

    let messages = batch([a.clone(), b.clone(), a_reordered, b]);
    let state = limiter
        .check_cardinality_limits(UseCaseKey::Performance, &messages)
        .await;

    // Two units in one request, and both copies of the loser go.
    assert_eq!(backend.captured_checks()[0][0].unit_hashes.len(), 2);
    let removed: BTreeSet<_> = state.keys_to_remove.iter().copied().collect();
    let a_lost = unit_hash(&a) > unit_hash(&messages[&key(1)]);
    let expected = if a_lost {
        BTreeSet::from([key(0), key(2)])
    } else {
        BTreeSet::from([key(1), key(3)])
    };
    assert_eq!(removed, expected);
}

/// A dark rollout never calls the backend; a full one limits everyone; the
/// decision per org is stable.
#[tokio::test]
async fn test_rollout_is_deterministic() {
    let backend = MockBackend::new();
    backend.set_grant_hashes(0);
    let records: Vec<MetricRecord> = (0..300)
        .map(|org| record(org, UseCaseId::Transactions, "c:transactions/count@none"))
        .collect();
    let messages = batch(records);

    for rate in [0.0, -1.0, f64::NAN] {
        let options = rolled_out()
            .with_rollout_rate(names::ORGS_ROLLOUT_RATE, rate)
            .with_quotas(names::PERFORMANCE_QUOTAS, vec![hourly(0)]);
        let limiter = fixtures::limiter(Arc::new(backend.clone()), options);
        let state = limiter
            .check_cardinality_limits(UseCaseKey::Performance, &messages)
            .await;
        assert!(state.keys_to_remove.is_empty());
    }
    assert_eq!(backend.check_count(), 0);

    let options = rolled_out().with_quotas(names::PERFORMANCE_QUOTAS, vec![hourly(0)]);
    let limiter = fixtures::limiter(Arc::new(backend.clone()), options);
    let state = limiter
        .check_cardinality_limits(UseCaseKey::Performance, &messages)
        .await;
    assert_eq!(state.keys_to_remove.len(), 300);

    let options = rolled_out()
        .with_rollout_rate(names::ORGS_ROLLOUT_RATE, 0.25)
        .with_quotas(names::PERFORMANCE_QUOTAS, vec![hourly(0)]);
    let limiter = fixtures::limiter(Arc::new(backend.clone()), options);
    let first = limiter
        .check_cardinality_limits(UseCaseKey::Performance, &messages)
        .await;
    let second = limiter
        .check_cardinality_limits(UseCaseKey::Performance, &messages)
        .await;
    assert_eq!(first.keys_to_remove, second.keys_to_remove);
    // Orgs 0-24, 100-124 and 200-224.
    assert_eq!(first.keys_to_remove.len(), 75);
    assert!(first
        .keys_to_remove
        .iter()
        .all(|k| messages[k].org_id % 100 < 25));
}

/// Re-keying a batch in a different order yields the same removed identities.
#[tokio::test]
async fn test_verdict_is_independent_of_batch_order() {
    let records: Vec<MetricRecord> = (0..40)
        .map(|i| {
            record(i % 3, UseCaseId::Transactions, &format!("c:custom/m_{}@none", i % 7))
                .with_tag("shard", (i % 2).to_string())
        })
        .collect();

    let mut removed_sets = Vec::new();
    for rotation in [0, 7, 23] {
        let backend = Arc::new(MemorySlidingWindow::new());
        let options = rolled_out().with_quotas(names::PERFORMANCE_QUOTAS, vec![hourly(4)]);
        let limiter = fixtures::limiter(backend, options);

        let mut rotated = records.clone();
        rotated.rotate_left(rotation);
        rotated.reverse();
        let messages = batch(rotated);

        let state = limiter
            .check_cardinality_limits(UseCaseKey::Performance, &messages)
            .await;
        let removed: BTreeSet<(u64, u64)> = state
            .keys_to_remove
            .iter()
            .map(|k| (messages[k].org_id, unit_hash(&messages[k])))
            .collect();
        removed_sets.push(removed);
    }

    assert!(!removed_sets[0].is_empty());
    assert!(removed_sets.windows(2).all(|pair| pair[0] == pair[1]));
}

/// Each organization is counted against its own pool.
#[tokio::test]
async fn test_organizations_are_isolated() {
    let backend = Arc::new(MemorySlidingWindow::new());
    let options = rolled_out().with_quotas(names::PERFORMANCE_QUOTAS, vec![hourly(1)]);
    let limiter = fixtures::limiter(backend.clone(), options);

    let messages = batch([
        record(1, UseCaseId::Transactions, "foo"),
        record(2, UseCaseId::Transactions, "foo"),
        record(2, UseCaseId::Transactions, "bar"),
    ]);
    let state = limiter
        .check_cardinality_limits(UseCaseKey::Performance, &messages)
        .await;

    // Org 1 has its single unit admitted; org 2 loses exactly one of two.
    assert!(!state.keys_to_remove.contains(&key(0)));
    assert_eq!(state.keys_to_remove.len(), 1);

    // A saturated org 2 leaves org 1 untouched in the next batch too.
    limiter.accept_keys(state).await;
    let next = batch([
        record(1, UseCaseId::Transactions, "foo"),
        record(2, UseCaseId::Transactions, "baz"),
    ]);
    let state = limiter
        .check_cardinality_limits(UseCaseKey::Performance, &next)
        .await;
    assert_eq!(state.keys_to_remove, vec![key(1)]);
}

/// Limits carry over from batch to batch through the shared backend.
#[tokio::test]
async fn test_committed_units_count_against_later_batches() {
    let backend = Arc::new(MemorySlidingWindow::new());
    let options = rolled_out().with_quotas(names::PERFORMANCE_QUOTAS, vec![hourly(3)]);
    let limiter = fixtures::limiter(backend.clone(), options);

    let first = batch(fixtures::distinct_records(1, UseCaseId::Transactions, 2));
    let state = limiter
        .check_cardinality_limits(UseCaseKey::Performance, &first)
        .await;
    assert!(state.keys_to_remove.is_empty());
    limiter.accept_keys(state).await;

    // Two known units plus three new ones: only one new unit fits.
    let second: Batch = fixtures::distinct_records(1, UseCaseId::Transactions, 5)
        .into_iter()
        .enumerate()
        .map(|(i, r)| (PartitionIdxOffset::new(1, i as i64), r))
        .collect();
    let state = limiter
        .check_cardinality_limits(UseCaseKey::Performance, &second)
        .await;
    assert_eq!(state.keys_to_remove.len(), 2);
    assert!(!state.keys_to_remove.contains(&PartitionIdxOffset::new(1, 0)));
    assert!(!state.keys_to_remove.contains(&PartitionIdxOffset::new(1, 1)));
}

/// Checking without committing leaves no trace in the backend.
#[tokio::test]
async fn test_abandoned_check_leaves_backend_untouched() {
    let backend = Arc::new(MemorySlidingWindow::new());
    let options = rolled_out().with_quotas(names::PERFORMANCE_QUOTAS, vec![hourly(1)]);
    let limiter = fixtures::limiter(backend.clone(), options);

    let messages = batch(fixtures::distinct_records(1, UseCaseId::Transactions, 3));
    let state = limiter
        .check_cardinality_limits(UseCaseKey::Performance, &messages)
        .await;
    assert_eq!(state.keys_to_remove.len(), 2);
    drop(state);

    assert!(backend.is_empty());
    let (_, grants) = backend
        .check_within_quotas(Vec::new(), None)
        .await
        .unwrap();
    assert!(grants.is_empty());
}
