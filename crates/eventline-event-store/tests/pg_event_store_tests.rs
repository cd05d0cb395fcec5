//! Integration tests for `PgEventStore`.

use chrono::Duration;
use eventline_core::error::StoreError;
use eventline_core::event::{AuditRecord, Event, LogPosition};
use eventline_core::replay::ReplayFilter;
use eventline_core::repository::EventStore;
use eventline_event_store::pg_event_store::PgEventStore;
use eventline_test_support::{fixed_now, stored_event};
use sqlx::PgPool;
use uuid::Uuid;

async fn commit(store: &PgEventStore, event: &Event) -> Result<(), StoreError> {
    let mut uow = store.begin().await?;
    uow.insert_event(event).await?;
    uow.insert_audit(&AuditRecord::ingested(event)).await?;
    uow.commit().await
}

fn stream(aggregate_id: &str, versions: i64) -> Vec<Event> {
    (1..=versions)
        .map(|v| stored_event(aggregate_id, v, fixed_now() - Duration::minutes(60 - v)))
        .collect()
}

// --- commit + find_by_id ---

#[sqlx::test(migrations = "../../migrations")]
async fn test_committed_event_round_trips_with_origin(pool: PgPool) {
    let store = PgEventStore::new(pool.clone());
    let mut event = stored_event("order-123", 1, fixed_now());
    event.origin = Some(LogPosition {
        topic: "business-events".into(),
        partition: 2,
        offset: 41,
    });

    commit(&store, &event).await.unwrap();

    let loaded = store.find_by_id(event.event_id).await.unwrap().unwrap();
    assert_eq!(loaded, event);

    let audits: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM event_audit_log WHERE event_id = $1 AND action = 'EVENT_INGESTED'",
    )
    .bind(event.event_id)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(audits, 1);
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_find_by_id_returns_none_for_unknown_event(pool: PgPool) {
    let store = PgEventStore::new(pool);

    assert!(store.find_by_id(Uuid::new_v4()).await.unwrap().is_none());
}

// --- uniqueness ---

#[sqlx::test(migrations = "../../migrations")]
async fn test_same_event_id_is_a_unique_violation(pool: PgPool) {
    let store = PgEventStore::new(pool);
    let event = stored_event("order-123", 1, fixed_now());
    commit(&store, &event).await.unwrap();

    let mut again = event.clone();
    again.version = 2;
    let err = commit(&store, &again).await.unwrap_err();

    assert!(err.is_unique_violation());
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_same_aggregate_version_is_a_unique_violation(pool: PgPool) {
    let store = PgEventStore::new(pool);
    commit(&store, &stored_event("order-123", 1, fixed_now()))
        .await
        .unwrap();

    let err = commit(&store, &stored_event("order-123", 1, fixed_now()))
        .await
        .unwrap_err();

    assert!(
        matches!(&err, StoreError::UniqueViolation { constraint } if constraint == "uq_events_aggregate_version")
    );
    assert_eq!(store.load_stream("order-123", "Order").await.unwrap().len(), 1);
}

// --- atomicity ---

#[sqlx::test(migrations = "../../migrations")]
async fn test_rolled_back_unit_of_work_leaves_nothing(pool: PgPool) {
    let store = PgEventStore::new(pool);
    let event = stored_event("order-123", 1, fixed_now());

    let mut uow = store.begin().await.unwrap();
    uow.insert_event(&event).await.unwrap();
    uow.rollback().await.unwrap();

    assert!(store.find_by_id(event.event_id).await.unwrap().is_none());
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_events_are_append_only(pool: PgPool) {
    let store = PgEventStore::new(pool.clone());
    let event = stored_event("order-123", 1, fixed_now());
    commit(&store, &event).await.unwrap();

    let update = sqlx::query("UPDATE events SET source = 'tampered' WHERE event_id = $1")
        .bind(event.event_id)
        .execute(&pool)
        .await;
    let delete = sqlx::query("DELETE FROM events WHERE event_id = $1")
        .bind(event.event_id)
        .execute(&pool)
        .await;

    assert!(update.is_err());
    assert!(delete.is_err());
    let loaded = store.find_by_id(event.event_id).await.unwrap().unwrap();
    assert_eq!(loaded.source, "checkout");
}

// --- replay reads ---

#[sqlx::test(migrations = "../../migrations")]
async fn test_count_matching_applies_every_filter(pool: PgPool) {
    let store = PgEventStore::new(pool);
    for event in stream("order-123", 3).iter().chain(&stream("order-999", 2)) {
        commit(&store, event).await.unwrap();
    }

    let by_versions = ReplayFilter {
        aggregate_id: Some("order-123".into()),
        from_version: Some(1),
        to_version: Some(2),
        ..ReplayFilter::default()
    };
    let by_time = ReplayFilter {
        from_timestamp: Some(fixed_now() - Duration::minutes(59)),
        to_timestamp: Some(fixed_now() - Duration::minutes(58)),
        ..ReplayFilter::default()
    };
    let by_type = ReplayFilter {
        event_types: vec!["OrderShipped".into()],
        ..ReplayFilter::default()
    };

    assert_eq!(store.count_matching(&ReplayFilter::default()).await.unwrap(), 5);
    assert_eq!(store.count_matching(&by_versions).await.unwrap(), 2);
    // Version 1 of both aggregates sits at minute -59; the end is exclusive.
    assert_eq!(store.count_matching(&by_time).await.unwrap(), 2);
    assert_eq!(store.count_matching(&by_type).await.unwrap(), 0);
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_load_page_walks_replay_order_with_keyset_cursor(pool: PgPool) {
    let store = PgEventStore::new(pool);
    let mut events: Vec<Event> = stream("order-123", 3)
        .into_iter()
        .chain(stream("order-999", 2))
        .collect();
    for event in &events {
        commit(&store, event).await.unwrap();
    }
    events.sort_by_key(|e| (e.timestamp, e.version, e.event_id));
    let filter = ReplayFilter::default();

    let mut seen = Vec::new();
    let mut after = None;
    loop {
        let page = store.load_page(&filter, after, 2).await.unwrap();
        seen.extend(page.iter().map(|e| e.event_id));
        if page.len() < 2 {
            break;
        }
        after = page.last().map(Event::cursor);
    }

    let expected: Vec<Uuid> = events.iter().map(|e| e.event_id).collect();
    assert_eq!(seen, expected);
}
