//! Two processors ingesting against the same PostgreSQL store at once.

use std::sync::Arc;

use chrono::Duration;
use eventline_core::metrics::NoopMetrics;
use eventline_core::repository::{DeadLetterSink, EventStore};
use eventline_event_store::pg_dead_letter_sink::PgDeadLetterSink;
use eventline_event_store::pg_event_store::PgEventStore;
use eventline_ingestion::application::processor::{EventProcessor, ProcessOutcome};
use eventline_ingestion::domain::registry::DecoderRegistry;
use eventline_ingestion::domain::validation::{DEFAULT_MAX_FUTURE_SKEW_SECS, EventValidator};
use eventline_test_support::{FixedClock, fixed_now, log_message, order_created_message};
use sqlx::PgPool;
use uuid::Uuid;

fn processor(pool: &PgPool) -> EventProcessor {
    EventProcessor::new(
        Arc::new(DecoderRegistry::with_catalogue()),
        Arc::new(EventValidator::with_catalogue_rules(Duration::seconds(
            DEFAULT_MAX_FUTURE_SKEW_SECS,
        ))),
        Arc::new(PgEventStore::new(pool.clone())),
        Arc::new(PgDeadLetterSink::new(pool.clone())),
        Arc::new(NoopMetrics),
        Arc::new(FixedClock(fixed_now())),
    )
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_concurrent_commits_of_same_aggregate_version_store_one_row(pool: PgPool) {
    // Arrange: two distinct events claiming version 1 of the same order,
    // delivered to two consumers.
    let first = processor(&pool);
    let second = processor(&pool);
    let first_id = Uuid::new_v4();
    let second_id = Uuid::new_v4();
    let first_message = log_message(0, "order-123", order_created_message(first_id, "order-123", 1));
    let second_message =
        log_message(1, "order-123", order_created_message(second_id, "order-123", 1));

    // Act
    let (a, b) = tokio::join!(first.process(&first_message), second.process(&second_message));

    // Assert
    let committed = [a, b]
        .iter()
        .filter(|o| matches!(o, ProcessOutcome::Committed { .. }))
        .count();
    let duplicates = [a, b]
        .iter()
        .filter(|o| matches!(o, ProcessOutcome::Duplicate { .. }))
        .count();
    assert_eq!((committed, duplicates), (1, 1));

    let store = PgEventStore::new(pool.clone());
    assert_eq!(store.load_stream("order-123", "Order").await.unwrap().len(), 1);
    let audits: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM event_audit_log")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(audits, 1);
    let dead_letters = PgDeadLetterSink::new(pool);
    assert!(dead_letters.list_unresolved(10).await.unwrap().is_empty());
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_concurrent_redeliveries_of_same_event_store_one_row(pool: PgPool) {
    // Arrange
    let first = processor(&pool);
    let second = processor(&pool);
    let event_id = Uuid::new_v4();
    let raw = order_created_message(event_id, "order-123", 1);
    let first_message = log_message(0, "order-123", raw.clone());
    let second_message = log_message(0, "order-123", raw);

    // Act
    let (a, b) = tokio::join!(first.process(&first_message), second.process(&second_message));

    // Assert
    let mut outcomes = [a, b];
    outcomes.sort_by_key(ProcessOutcome::label);
    assert_eq!(
        outcomes,
        [
            ProcessOutcome::Committed { event_id },
            ProcessOutcome::Duplicate { event_id },
        ]
    );
    let store = PgEventStore::new(pool.clone());
    assert!(store.find_by_id(event_id).await.unwrap().is_some());
    assert_eq!(store.load_stream("order-123", "Order").await.unwrap().len(), 1);
    let dead_letters = PgDeadLetterSink::new(pool);
    assert!(dead_letters.list_unresolved(10).await.unwrap().is_empty());
}
