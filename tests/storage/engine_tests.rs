//! StorageEngine contract tests.
//!
//! These tests verify the contract of the StorageEngine and StorageTransaction
//! traits. Each test claims its own type names, so all of them can run
//! against one engine instance.

use chrono::{TimeZone, Utc};
use futures::future::join_all;

use chronik::model::{AgentKey, EventDto, NaturalKey, SnapshotDto};
use chronik::storage::{HistoryReader, StorageEngine, StorageError, StorageTransaction, TypeKind};

/// Ids needed to append events for one aggregate type.
pub struct Fixture {
    pub aggregate_type_id: i32,
    pub event_type_id: i32,
    pub agent_id: i64,
}

/// Register an aggregate type, an event type and one agent.
pub async fn fixture<S: StorageEngine>(engine: &S, name: &str) -> Fixture {
    let aggregate_type_id = engine
        .get_or_create_type_id(TypeKind::Aggregate, name)
        .await
        .expect("aggregate type should register");
    let event_type_id = engine
        .get_or_create_type_id(TypeKind::Event, &format!("{name}.happened"))
        .await
        .expect("event type should register");
    let agent_type_id = engine
        .get_or_create_type_id(TypeKind::Agent, "TestRunner")
        .await
        .expect("agent type should register");
    let agent_id = engine
        .get_or_create_agent_id(agent_type_id, None, Some(1))
        .await
        .expect("agent should register");

    Fixture {
        aggregate_type_id,
        event_type_id,
        agent_id,
    }
}

/// Build an event for `aggregate_id` at `sequence`.
pub fn make_event(fixture: &Fixture, aggregate_id: i64, sequence: i64) -> EventDto {
    EventDto {
        aggregate_type_id: fixture.aggregate_type_id,
        aggregate_id,
        event_type_id: fixture.event_type_id,
        sequence,
        payload: format!("{{\"n\":{sequence}}}"),
        agent_id: fixture.agent_id,
        event_time: Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
            + chrono::Duration::seconds(sequence),
    }
}

pub fn make_snapshot(
    fixture: &Fixture,
    aggregate_id: i64,
    version: i32,
    sequence: i64,
) -> SnapshotDto {
    SnapshotDto {
        aggregate_type_id: fixture.aggregate_type_id,
        aggregate_id,
        version,
        sequence,
        state: format!("{{\"at\":{sequence}}}"),
    }
}

/// Create an aggregate with `count` committed events.
pub async fn seed<S: StorageEngine>(engine: &S, fixture: &Fixture, count: i64) -> i64 {
    let mut tx = engine.begin().await.expect("begin should succeed");
    let id = tx
        .create_aggregate(fixture.aggregate_type_id, None)
        .await
        .expect("create should succeed");
    let events = (1..=count).map(|seq| make_event(fixture, id, seq)).collect();
    tx.append_events(events).await.expect("append should succeed");
    tx.commit().await.expect("commit should succeed");
    id
}

// =============================================================================
// Vocabulary tests
// =============================================================================

pub async fn test_type_id_is_idempotent<S: StorageEngine>(engine: &S) {
    let first = engine
        .get_or_create_type_id(TypeKind::Aggregate, "test_idempotent")
        .await
        .unwrap();
    let second = engine
        .get_or_create_type_id(TypeKind::Aggregate, "test_idempotent")
        .await
        .unwrap();
    let other = engine
        .get_or_create_type_id(TypeKind::Aggregate, "test_idempotent_other")
        .await
        .unwrap();

    assert_eq!(first, second);
    assert_ne!(first, other);
}

pub async fn test_concurrent_type_id_creation<S: StorageEngine>(engine: &S) {
    let ids = join_all(
        (0..16).map(|_| engine.get_or_create_type_id(TypeKind::Event, "test_concurrent_name")),
    )
    .await;

    let first = *ids[0].as_ref().unwrap();
    for id in ids {
        assert_eq!(id.unwrap(), first, "racing callers must agree on one id");
    }
}

pub async fn test_agent_id_is_idempotent<S: StorageEngine>(engine: &S) {
    let agent_type_id = engine
        .get_or_create_type_id(TypeKind::Agent, "test_agent_type")
        .await
        .unwrap();
    let key = AgentKey::new("alice").unwrap();

    let keyed = engine
        .get_or_create_agent_id(agent_type_id, Some(&key), None)
        .await
        .unwrap();
    let again = engine
        .get_or_create_agent_id(agent_type_id, Some(&key), None)
        .await
        .unwrap();
    let with_system_id = engine
        .get_or_create_agent_id(agent_type_id, Some(&key), Some(7))
        .await
        .unwrap();
    let anonymous = engine
        .get_or_create_agent_id(agent_type_id, None, None)
        .await
        .unwrap();

    assert_eq!(keyed, again);
    assert_ne!(keyed, with_system_id);
    assert_ne!(keyed, anonymous);
}

// =============================================================================
// Aggregate creation tests
// =============================================================================

pub async fn test_create_allocates_distinct_ids<S: StorageEngine>(engine: &S) {
    let fixture = fixture(engine, "test_create_ids").await;
    let mut tx = engine.begin().await.unwrap();

    let a = tx.create_aggregate(fixture.aggregate_type_id, None).await.unwrap();
    let b = tx.create_aggregate(fixture.aggregate_type_id, None).await.unwrap();
    tx.commit().await.unwrap();

    assert_ne!(a, b);
}

pub async fn test_natural_key_conflict<S: StorageEngine>(engine: &S) {
    let fixture = fixture(engine, "test_natural_key").await;
    let key = NaturalKey::new("test-key").unwrap();

    let mut tx = engine.begin().await.unwrap();
    tx.create_aggregate(fixture.aggregate_type_id, Some(&key))
        .await
        .unwrap();
    tx.commit().await.unwrap();

    let mut tx = engine.begin().await.unwrap();
    let err = tx
        .create_aggregate(fixture.aggregate_type_id, Some(&key))
        .await
        .unwrap_err();

    match err {
        StorageError::DuplicateKey(e) => {
            assert_eq!(e.aggregate_type_id, fixture.aggregate_type_id);
            assert_eq!(e.natural_key, key);
        }
        other => panic!("expected duplicate key, got {other:?}"),
    }
}

pub async fn test_natural_key_scoped_by_type<S: StorageEngine>(engine: &S) {
    let first = fixture(engine, "test_key_scope_a").await;
    let second = fixture(engine, "test_key_scope_b").await;
    let key = NaturalKey::new("shared-key").unwrap();

    let mut tx = engine.begin().await.unwrap();
    tx.create_aggregate(first.aggregate_type_id, Some(&key))
        .await
        .unwrap();
    tx.create_aggregate(second.aggregate_type_id, Some(&key))
        .await
        .expect("same key under another type should be accepted");
    tx.commit().await.unwrap();
}

pub async fn test_concurrent_natural_key_claim<S: StorageEngine>(engine: &S) {
    let fixture = fixture(engine, "test_key_race").await;
    let key = NaturalKey::new("raced-key").unwrap();

    let mut first = engine.begin().await.unwrap();
    let mut second = engine.begin().await.unwrap();
    first
        .create_aggregate(fixture.aggregate_type_id, Some(&key))
        .await
        .unwrap();
    let second_created = second
        .create_aggregate(fixture.aggregate_type_id, Some(&key))
        .await;

    first.commit().await.unwrap();
    let outcome = match second_created {
        Ok(_) => second.commit().await,
        Err(e) => Err(e),
    };

    assert!(
        matches!(outcome, Err(StorageError::DuplicateKey(_))),
        "second claim of a key must fail, got {outcome:?}"
    );
}

// =============================================================================
// Event append / read tests
// =============================================================================

pub async fn test_append_and_read_back<S: StorageEngine>(engine: &S) {
    let fixture = fixture(engine, "test_append_read").await;
    let id = seed(engine, &fixture, 3).await;

    let events = engine
        .get_events(fixture.aggregate_type_id, id, 0, None)
        .await
        .unwrap();

    assert_eq!(events.len(), 3);
    let sequences: Vec<i64> = events.iter().map(|e| e.sequence).collect();
    assert_eq!(sequences, vec![1, 2, 3]);

    let expected = make_event(&fixture, id, 2);
    let second = &events[1];
    assert_eq!(second.aggregate_type.as_str(), "test_append_read");
    assert_eq!(second.event_type.as_str(), "test_append_read.happened");
    assert_eq!(second.payload, expected.payload);
    assert_eq!(second.event_time, expected.event_time);
    assert_eq!(second.agent.agent_type.as_str(), "TestRunner");
    assert_eq!(second.agent.system_id, Some(1));
}

pub async fn test_get_events_range<S: StorageEngine>(engine: &S) {
    let fixture = fixture(engine, "test_range").await;
    let id = seed(engine, &fixture, 5).await;

    let after_two = engine
        .get_events(fixture.aggregate_type_id, id, 2, None)
        .await
        .unwrap();
    let bounded = engine
        .get_events(fixture.aggregate_type_id, id, 1, Some(3))
        .await
        .unwrap();
    let past_end = engine
        .get_events(fixture.aggregate_type_id, id, 5, None)
        .await
        .unwrap();

    assert_eq!(
        after_two.iter().map(|e| e.sequence).collect::<Vec<_>>(),
        vec![3, 4, 5]
    );
    assert_eq!(
        bounded.iter().map(|e| e.sequence).collect::<Vec<_>>(),
        vec![2, 3]
    );
    assert!(past_end.is_empty());
}

pub async fn test_get_events_unknown_aggregate<S: StorageEngine>(engine: &S) {
    let fixture = fixture(engine, "test_unknown_aggregate").await;

    let events = engine
        .get_events(fixture.aggregate_type_id, i64::MAX, 0, None)
        .await
        .unwrap();

    assert!(events.is_empty());
}

pub async fn test_sequence_gap_rejected<S: StorageEngine>(engine: &S) {
    let fixture = fixture(engine, "test_gap").await;
    let mut tx = engine.begin().await.unwrap();
    let id = tx.create_aggregate(fixture.aggregate_type_id, None).await.unwrap();

    let err = tx
        .append_events(vec![make_event(&fixture, id, 2)])
        .await
        .unwrap_err();

    match err {
        StorageError::SequenceConflict(e) => {
            assert_eq!(e.aggregate_id, id);
            assert_eq!(e.expected, 1);
            assert_eq!(e.actual, 2);
        }
        other => panic!("expected sequence conflict, got {other:?}"),
    }
}

pub async fn test_batch_rejected_whole<S: StorageEngine>(engine: &S) {
    let fixture = fixture(engine, "test_batch_whole").await;
    let id = seed(engine, &fixture, 1).await;

    let mut tx = engine.begin().await.unwrap();
    let batch = vec![
        make_event(&fixture, id, 2),
        make_event(&fixture, id, 3),
        make_event(&fixture, id, 5),
    ];
    assert!(matches!(
        tx.append_events(batch).await,
        Err(StorageError::SequenceConflict(_))
    ));
    tx.append_events(vec![make_event(&fixture, id, 2)])
        .await
        .expect("a rejected batch must leave nothing staged");
    tx.commit().await.unwrap();

    let events = engine
        .get_events(fixture.aggregate_type_id, id, 0, None)
        .await
        .unwrap();
    assert_eq!(events.len(), 2);
}

pub async fn test_concurrent_append_conflict<S: StorageEngine>(engine: &S) {
    let fixture = fixture(engine, "test_append_race").await;
    let id = seed(engine, &fixture, 1).await;

    let mut first = engine.begin().await.unwrap();
    let mut second = engine.begin().await.unwrap();
    first
        .append_events(vec![make_event(&fixture, id, 2)])
        .await
        .unwrap();
    let second_appended = second.append_events(vec![make_event(&fixture, id, 2)]).await;

    first.commit().await.unwrap();
    let outcome = match second_appended {
        Ok(()) => second.commit().await,
        Err(e) => Err(e),
    };

    assert!(
        matches!(outcome, Err(StorageError::SequenceConflict(_))),
        "second writer at the same sequence must fail, got {outcome:?}"
    );
    let events = engine
        .get_events(fixture.aggregate_type_id, id, 0, None)
        .await
        .unwrap();
    assert_eq!(events.len(), 2);
}

// =============================================================================
// Transaction tests
// =============================================================================

pub async fn test_reads_see_own_writes<S: StorageEngine>(engine: &S) {
    let fixture = fixture(engine, "test_own_writes").await;
    let mut tx = engine.begin().await.unwrap();
    let id = tx.create_aggregate(fixture.aggregate_type_id, None).await.unwrap();
    tx.append_events(vec![make_event(&fixture, id, 1)])
        .await
        .unwrap();

    let inside = tx
        .get_events(fixture.aggregate_type_id, id, 0, None)
        .await
        .unwrap();
    let outside = engine
        .get_events(fixture.aggregate_type_id, id, 0, None)
        .await
        .unwrap();

    assert_eq!(inside.len(), 1);
    assert!(outside.is_empty(), "uncommitted events must stay private");
    tx.commit().await.unwrap();
}

pub async fn test_rollback_discards_writes<S: StorageEngine>(engine: &S) {
    let fixture = fixture(engine, "test_rollback").await;
    let key = NaturalKey::new("rolled-back").unwrap();

    let mut tx = engine.begin().await.unwrap();
    let id = tx
        .create_aggregate(fixture.aggregate_type_id, Some(&key))
        .await
        .unwrap();
    tx.append_events(vec![make_event(&fixture, id, 1)])
        .await
        .unwrap();
    tx.save_snapshot(make_snapshot(&fixture, id, 1, 1))
        .await
        .unwrap();
    tx.rollback().await.unwrap();

    assert!(engine
        .get_events(fixture.aggregate_type_id, id, 0, None)
        .await
        .unwrap()
        .is_empty());
    assert!(engine
        .get_snapshot(fixture.aggregate_type_id, id, 1, None)
        .await
        .unwrap()
        .is_none());

    let mut tx = engine.begin().await.unwrap();
    tx.create_aggregate(fixture.aggregate_type_id, Some(&key))
        .await
        .expect("a rolled back key should be free again");
    tx.commit().await.unwrap();
}

pub async fn test_drop_rolls_back<S: StorageEngine>(engine: &S) {
    let fixture = fixture(engine, "test_drop").await;
    let id = {
        let mut tx = engine.begin().await.unwrap();
        let id = tx.create_aggregate(fixture.aggregate_type_id, None).await.unwrap();
        tx.append_events(vec![make_event(&fixture, id, 1)])
            .await
            .unwrap();
        id
    };

    assert!(engine
        .get_events(fixture.aggregate_type_id, id, 0, None)
        .await
        .unwrap()
        .is_empty());
}

// =============================================================================
// Snapshot tests
// =============================================================================

pub async fn test_snapshot_supersedes<S: StorageEngine>(engine: &S) {
    let fixture = fixture(engine, "test_snapshot_supersede").await;
    let id = seed(engine, &fixture, 20).await;

    for sequence in [10, 20] {
        let mut tx = engine.begin().await.unwrap();
        tx.save_snapshot(make_snapshot(&fixture, id, 1, sequence))
            .await
            .unwrap();
        tx.commit().await.unwrap();
    }

    let snapshot = engine
        .get_snapshot(fixture.aggregate_type_id, id, 1, None)
        .await
        .unwrap()
        .expect("snapshot should exist");
    assert_eq!(snapshot.sequence, 20);
    assert_eq!(snapshot.state, "{\"at\":20}");
    assert_eq!(snapshot.aggregate_type.as_str(), "test_snapshot_supersede");
}

pub async fn test_snapshot_version_must_match<S: StorageEngine>(engine: &S) {
    let fixture = fixture(engine, "test_snapshot_version").await;
    let id = seed(engine, &fixture, 10).await;

    let mut tx = engine.begin().await.unwrap();
    tx.save_snapshot(make_snapshot(&fixture, id, 1, 10))
        .await
        .unwrap();
    tx.commit().await.unwrap();

    assert!(engine
        .get_snapshot(fixture.aggregate_type_id, id, 2, None)
        .await
        .unwrap()
        .is_none());
}

pub async fn test_snapshot_bounded_by_max_sequence<S: StorageEngine>(engine: &S) {
    let fixture = fixture(engine, "test_snapshot_bound").await;
    let id = seed(engine, &fixture, 20).await;

    let mut tx = engine.begin().await.unwrap();
    tx.save_snapshot(make_snapshot(&fixture, id, 1, 20))
        .await
        .unwrap();
    tx.commit().await.unwrap();

    assert!(engine
        .get_snapshot(fixture.aggregate_type_id, id, 1, Some(15))
        .await
        .unwrap()
        .is_none());
    assert!(engine
        .get_snapshot(fixture.aggregate_type_id, id, 1, Some(20))
        .await
        .unwrap()
        .is_some());
}

// =============================================================================
// Test runner macro
// =============================================================================

/// Run all StorageEngine contract tests against an engine implementation.
#[macro_export]
macro_rules! run_storage_engine_tests {
    ($engine:expr) => {
        use $crate::storage::engine_tests::*;

        // vocabulary tests
        test_type_id_is_idempotent($engine).await;
        println!("  test_type_id_is_idempotent: PASSED");

        test_concurrent_type_id_creation($engine).await;
        println!("  test_concurrent_type_id_creation: PASSED");

        test_agent_id_is_idempotent($engine).await;
        println!("  test_agent_id_is_idempotent: PASSED");

        // creation tests
        test_create_allocates_distinct_ids($engine).await;
        println!("  test_create_allocates_distinct_ids: PASSED");

        test_natural_key_conflict($engine).await;
        println!("  test_natural_key_conflict: PASSED");

        test_natural_key_scoped_by_type($engine).await;
        println!("  test_natural_key_scoped_by_type: PASSED");

        test_concurrent_natural_key_claim($engine).await;
        println!("  test_concurrent_natural_key_claim: PASSED");

        // append / read tests
        test_append_and_read_back($engine).await;
        println!("  test_append_and_read_back: PASSED");

        test_get_events_range($engine).await;
        println!("  test_get_events_range: PASSED");

        test_get_events_unknown_aggregate($engine).await;
        println!("  test_get_events_unknown_aggregate: PASSED");

        test_sequence_gap_rejected($engine).await;
        println!("  test_sequence_gap_rejected: PASSED");

        test_batch_rejected_whole($engine).await;
        println!("  test_batch_rejected_whole: PASSED");

        test_concurrent_append_conflict($engine).await;
        println!("  test_concurrent_append_conflict: PASSED");

        // transaction tests
        test_reads_see_own_writes($engine).await;
        println!("  test_reads_see_own_writes: PASSED");

        test_rollback_discards_writes($engine).await;
        println!("  test_rollback_discards_writes: PASSED");

        test_drop_rolls_back($engine).await;
        println!("  test_drop_rolls_back: PASSED");

        // snapshot tests
        test_snapshot_supersedes($engine).await;
        println!("  test_snapshot_supersedes: PASSED");

        test_snapshot_version_must_match($engine).await;
        println!("  test_snapshot_version_must_match: PASSED");

        test_snapshot_bounded_by_max_sequence($engine).await;
        println!("  test_snapshot_bounded_by_max_sequence: PASSED");
    };
}
