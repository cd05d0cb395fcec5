//! The event processor: one log message in, one terminal outcome out.
//!
//! Stages run in a fixed order (decode, validate, duplicate check, persist)
//! and the first failing stage decides the dead-letter classification. No
//! failure escapes [`EventProcessor::process`]; the caller only ever sees a
//! [`ProcessOutcome`] and may commit the message's offset.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use eventline_core::clock::Clock;
use eventline_core::dead_letter::{FailureKind, NewDeadLetter, ProcessingFailure};
use eventline_core::error::StoreError;
use eventline_core::event::{AuditRecord, Event};
use eventline_core::message::LogMessage;
use eventline_core::metrics::{
    DEAD_LETTER_WRITE_FAILURES, EVENTS_DUPLICATE, EVENTS_FAILED, EVENTS_PROCESSED, MetricsSink,
    PROCESSING_DURATION,
};
use eventline_core::repository::{DeadLetterSink, EventStore};
use futures::FutureExt;
use sha2::{Digest, Sha256};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::domain::registry::DecoderRegistry;
use crate::domain::validation::EventValidator;

/// Terminal outcome of processing one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// The event was stored.
    Committed {
        /// Id of the stored event.
        event_id: Uuid,
    },
    /// The event was already stored.
    Duplicate {
        /// Id carried by the message.
        event_id: Uuid,
    },
    /// The message was routed to the dead-letter sink.
    DeadLettered {
        /// Classification of the failure.
        kind: FailureKind,
        /// Id of the dead-letter entry, `None` if writing it failed.
        entry_id: Option<Uuid>,
    },
}

impl ProcessOutcome {
    /// Label used for the `outcome` dimension of the duration histogram.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Committed { .. } => "committed",
            Self::Duplicate { .. } => "duplicate",
            Self::DeadLettered { .. } => "dead_lettered",
        }
    }
}

/// A message that passed every stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Accepted {
    /// Newly stored.
    Committed(Uuid),
    /// Already stored, by an earlier delivery or a concurrent writer.
    Duplicate(Uuid),
}

/// SHA-256 fingerprint of a raw message, lowercase hex.
#[must_use]
pub fn payload_fingerprint(raw: &[u8]) -> String {
    format!("{:x}", Sha256::digest(raw))
}

fn persistence_failure(err: &StoreError) -> ProcessingFailure {
    ProcessingFailure::new(FailureKind::PersistenceFailure, err.to_string())
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        format!("panic during processing: {message}")
    } else if let Some(message) = panic.downcast_ref::<String>() {
        format!("panic during processing: {message}")
    } else {
        "panic during processing".to_owned()
    }
}

/// Turns log messages into stored events or dead-letter entries.
pub struct EventProcessor {
    decoders: Arc<DecoderRegistry>,
    validator: Arc<EventValidator>,
    store: Arc<dyn EventStore>,
    dead_letters: Arc<dyn DeadLetterSink>,
    metrics: Arc<dyn MetricsSink>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for EventProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventProcessor")
            .field("decoders", &self.decoders)
            .field("validator", &self.validator)
            .finish_non_exhaustive()
    }
}

impl EventProcessor {
    /// Creates a processor over the given collaborators.
    #[must_use]
    pub fn new(
        decoders: Arc<DecoderRegistry>,
        validator: Arc<EventValidator>,
        store: Arc<dyn EventStore>,
        dead_letters: Arc<dyn DeadLetterSink>,
        metrics: Arc<dyn MetricsSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            decoders,
            validator,
            store,
            dead_letters,
            metrics,
            clock,
        }
    }

    /// Processes `message` to a terminal outcome, dead-lettering any
    /// failure. Never fails.
    #[instrument(
        skip(self, message),
        fields(topic = %message.topic, partition = message.partition, offset = message.offset)
    )]
    pub async fn process(&self, message: &LogMessage) -> ProcessOutcome {
        let started = Instant::now();
        let topic_label = [("topic", message.topic.clone())];

        let outcome = match self.try_process(message).await {
            Ok(Accepted::Committed(event_id)) => {
                self.metrics.increment_counter(EVENTS_PROCESSED, &topic_label);
                info!(%event_id, "event committed");
                ProcessOutcome::Committed { event_id }
            }
            Ok(Accepted::Duplicate(event_id)) => {
                self.metrics.increment_counter(EVENTS_DUPLICATE, &topic_label);
                info!(%event_id, "event already committed; skipping");
                ProcessOutcome::Duplicate { event_id }
            }
            Err(failure) => self.dead_letter(message, &failure).await,
        };

        self.metrics.record_histogram(
            PROCESSING_DURATION,
            started.elapsed().as_secs_f64(),
            &[
                ("topic", message.topic.clone()),
                ("outcome", outcome.label().to_owned()),
            ],
        );
        outcome
    }

    /// Runs every stage on `message` without touching the dead-letter sink
    /// or the metrics. A panic in any stage is reported as
    /// [`FailureKind::UnexpectedError`].
    ///
    /// # Errors
    ///
    /// Returns the [`ProcessingFailure`] of the first stage that failed.
    pub async fn try_process(&self, message: &LogMessage) -> Result<Accepted, ProcessingFailure> {
        AssertUnwindSafe(self.evaluate(message))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| {
                Err(ProcessingFailure::new(
                    FailureKind::UnexpectedError,
                    panic_message(panic.as_ref()),
                ))
            })
    }

    async fn evaluate(&self, message: &LogMessage) -> Result<Accepted, ProcessingFailure> {
        let incoming = self.decoders.decode(&message.value).map_err(|e| {
            ProcessingFailure::new(FailureKind::DeserializationFailure, e.to_string())
        })?;

        let now = self.clock.now();
        let report = self.validator.validate(&incoming, now);
        if !report.is_valid() {
            return Err(ProcessingFailure::new(
                FailureKind::ValidationFailure,
                report.message(),
            ));
        }

        let event_id = incoming.envelope.event_id;
        let existing = self
            .store
            .find_by_id(event_id)
            .await
            .map_err(|e| persistence_failure(&e))?;
        if existing.is_some() {
            debug!(%event_id, "duplicate found by event id");
            return Ok(Accepted::Duplicate(event_id));
        }

        let event = incoming.into_event(now, Some(message.position()));
        self.persist(&event).await
    }

    /// Stores `event` and its audit row in one unit of work. A uniqueness
    /// violation means a concurrent writer won and is reported as a
    /// duplicate.
    async fn persist(&self, event: &Event) -> Result<Accepted, ProcessingFailure> {
        let mut unit = self
            .store
            .begin()
            .await
            .map_err(|e| persistence_failure(&e))?;

        let written = match unit.insert_event(event).await {
            Ok(()) => unit.insert_audit(&AuditRecord::ingested(event)).await,
            Err(e) => Err(e),
        };

        let result = match written {
            Ok(()) => unit.commit().await,
            Err(e) => {
                if let Err(rollback) = unit.rollback().await {
                    warn!(error = %rollback, "rollback failed");
                }
                Err(e)
            }
        };

        match result {
            Ok(()) => Ok(Accepted::Committed(event.event_id)),
            Err(e) if e.is_unique_violation() => {
                debug!(event_id = %event.event_id, error = %e, "lost insert race; treating as duplicate");
                Ok(Accepted::Duplicate(event.event_id))
            }
            Err(e) => Err(persistence_failure(&e)),
        }
    }

    async fn dead_letter(&self, message: &LogMessage, failure: &ProcessingFailure) -> ProcessOutcome {
        self.metrics.increment_counter(
            EVENTS_FAILED,
            &[
                ("topic", message.topic.clone()),
                ("classification", failure.kind.as_str().to_owned()),
            ],
        );
        warn!(classification = %failure.kind, error = %failure.detail, "routing message to dead-letter sink");

        let entry = NewDeadLetter {
            message_key: message.key.clone(),
            raw_message: message.value.clone(),
            payload_sha256: payload_fingerprint(&message.value),
            origin: message.position(),
            failure_kind: failure.kind,
            error_detail: failure.detail.clone(),
            failed_at: self.clock.now(),
        };

        let entry_id = match self.dead_letters.record(&entry).await {
            Ok(id) => Some(id),
            Err(e) => {
                self.metrics.increment_counter(
                    DEAD_LETTER_WRITE_FAILURES,
                    &[("topic", message.topic.clone())],
                );
                error!(error = %e, classification = %failure.kind, "failed to write dead-letter entry");
                None
            }
        };

        ProcessOutcome::DeadLettered {
            kind: failure.kind,
            entry_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use chrono::Duration;
    use eventline_core::event::{EventCursor, EVENT_INGESTED_ACTION};
    use eventline_core::replay::ReplayFilter;
    use eventline_core::repository::UnitOfWork;
    use eventline_test_support::{
        FailingDeadLetterSink, FailingEventStore, FixedClock, InMemoryDeadLetterSink,
        InMemoryEventStore, RecordingMetrics, fixed_now, log_message, order_created_message,
        stored_event,
    };
    use serde_json::json;

    use super::*;
    use crate::domain::validation::DEFAULT_MAX_FUTURE_SKEW_SECS;

    struct Harness {
        processor: EventProcessor,
        store: InMemoryEventStore,
        dead_letters: InMemoryDeadLetterSink,
        metrics: RecordingMetrics,
    }

    fn harness_with(
        store: Arc<dyn EventStore>,
        dead_letters: Arc<dyn DeadLetterSink>,
    ) -> (EventProcessor, RecordingMetrics) {
        let metrics = RecordingMetrics::new();
        let processor = EventProcessor::new(
            Arc::new(DecoderRegistry::with_catalogue()),
            Arc::new(EventValidator::with_catalogue_rules(Duration::seconds(
                DEFAULT_MAX_FUTURE_SKEW_SECS,
            ))),
            store,
            dead_letters,
            Arc::new(metrics.clone()),
            Arc::new(FixedClock(fixed_now())),
        );
        (processor, metrics)
    }

    fn harness() -> Harness {
        let store = InMemoryEventStore::new();
        let dead_letters = InMemoryDeadLetterSink::new();
        let (processor, metrics) =
            harness_with(Arc::new(store.clone()), Arc::new(dead_letters.clone()));
        Harness {
            processor,
            store,
            dead_letters,
            metrics,
        }
    }

    fn mutate(raw: &[u8], edit: impl FnOnce(&mut serde_json::Value)) -> Vec<u8> {
        let mut value: serde_json::Value = serde_json::from_slice(raw).unwrap();
        edit(&mut value);
        serde_json::to_vec(&value).unwrap()
    }

    #[tokio::test]
    async fn test_valid_message_is_committed_with_audit_row() {
        // Arrange
        let h = harness();
        let event_id = Uuid::new_v4();
        let message = log_message(7, "order-123", order_created_message(event_id, "order-123", 1));

        // Act
        let outcome = h.processor.process(&message).await;

        // Assert
        assert_eq!(outcome, ProcessOutcome::Committed { event_id });
        let events = h.store.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].aggregate_id, "order-123");
        assert_eq!(events[0].ingested_at, fixed_now());
        assert_eq!(events[0].origin, Some(message.position()));
        let audits = h.store.audit_records();
        assert_eq!(audits.len(), 1);
        assert_eq!(audits[0].event_id, event_id);
        assert_eq!(audits[0].action, EVENT_INGESTED_ACTION);
        assert_eq!(h.metrics.counter(EVENTS_PROCESSED), 1);
        assert_eq!(h.metrics.histogram_count(PROCESSING_DURATION), 1);
        assert!(h.dead_letters.entries().is_empty());
    }

    #[tokio::test]
    async fn test_redelivery_with_same_event_id_keeps_original_payload() {
        // Arrange
        let h = harness();
        let event_id = Uuid::new_v4();
        let original = order_created_message(event_id, "order-123", 1);
        let mutated = mutate(&original, |v| v["payload"]["total_amount"] = json!(99.0));

        // Act
        let first = h.processor.process(&log_message(0, "order-123", original)).await;
        let second = h.processor.process(&log_message(1, "order-123", mutated)).await;

        // Assert
        assert_eq!(first, ProcessOutcome::Committed { event_id });
        assert_eq!(second, ProcessOutcome::Duplicate { event_id });
        let events = h.store.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].payload["total_amount"], json!(42.5));
        assert_eq!(h.metrics.counter(EVENTS_DUPLICATE), 1);
    }

    #[tokio::test]
    async fn test_version_conflict_with_new_event_id_is_duplicate() {
        // Arrange
        let h = harness();
        let first_id = Uuid::new_v4();
        let second_id = Uuid::new_v4();

        // Act
        h.processor
            .process(&log_message(0, "order-123", order_created_message(first_id, "order-123", 1)))
            .await;
        let outcome = h
            .processor
            .process(&log_message(1, "order-123", order_created_message(second_id, "order-123", 1)))
            .await;

        // Assert
        assert_eq!(outcome, ProcessOutcome::Duplicate { event_id: second_id });
        assert_eq!(h.store.events().len(), 1);
        assert_eq!(h.store.audit_records().len(), 1);
    }

    #[tokio::test]
    async fn test_version_committed_by_another_writer_is_duplicate() {
        // Arrange
        let h = harness();
        let rival = stored_event("order-123", 1, fixed_now() - Duration::minutes(2));
        h.store.insert_committed(rival.clone());
        let event_id = Uuid::new_v4();

        // Act
        let outcome = h
            .processor
            .process(&log_message(0, "order-123", order_created_message(event_id, "order-123", 1)))
            .await;

        // Assert
        assert_eq!(outcome, ProcessOutcome::Duplicate { event_id });
        let events = h.store.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_id, rival.event_id);
        assert!(h.store.audit_records().is_empty());
        assert!(h.dead_letters.entries().is_empty());
    }

    /// Delegates to an in-memory store but never finds anything by id, so the
    /// processor reaches the insert and hits the uniqueness constraint.
    struct BlindEventStore(InMemoryEventStore);

    #[async_trait]
    impl EventStore for BlindEventStore {
        async fn begin(&self) -> Result<Box<dyn UnitOfWork>, StoreError> {
            self.0.begin().await
        }

        async fn find_by_id(&self, _event_id: Uuid) -> Result<Option<Event>, StoreError> {
            Ok(None)
        }

        async fn load_stream(
            &self,
            aggregate_id: &str,
            aggregate_type: &str,
        ) -> Result<Vec<Event>, StoreError> {
            self.0.load_stream(aggregate_id, aggregate_type).await
        }

        async fn count_matching(&self, filter: &ReplayFilter) -> Result<i64, StoreError> {
            self.0.count_matching(filter).await
        }

        async fn load_page(
            &self,
            filter: &ReplayFilter,
            after: Option<EventCursor>,
            limit: i64,
        ) -> Result<Vec<Event>, StoreError> {
            self.0.load_page(filter, after, limit).await
        }
    }

    #[tokio::test]
    async fn test_insert_race_on_event_id_resolves_as_duplicate() {
        // Arrange
        let store = InMemoryEventStore::new();
        let dead_letters = InMemoryDeadLetterSink::new();
        let (processor, _) = harness_with(
            Arc::new(BlindEventStore(store.clone())),
            Arc::new(dead_letters.clone()),
        );
        let event_id = Uuid::new_v4();
        let raw = order_created_message(event_id, "order-123", 1);
        processor.process(&log_message(0, "order-123", raw.clone())).await;

        // Act
        let outcome = processor.process(&log_message(1, "order-123", raw)).await;

        // Assert
        assert_eq!(outcome, ProcessOutcome::Duplicate { event_id });
        assert_eq!(store.events().len(), 1);
        assert!(dead_letters.entries().is_empty());
    }

    #[tokio::test]
    async fn test_unregistered_event_type_is_dead_lettered_as_deserialization_failure() {
        // Arrange
        let h = harness();
        let raw = mutate(
            &order_created_message(Uuid::new_v4(), "order-123", 1),
            |v| v["event_type"] = json!("OrderTeleported"),
        );
        let message = log_message(3, "order-123", raw.clone());

        // Act
        let outcome = h.processor.process(&message).await;

        // Assert
        let entries = h.dead_letters.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(
            outcome,
            ProcessOutcome::DeadLettered {
                kind: FailureKind::DeserializationFailure,
                entry_id: Some(entries[0].id),
            }
        );
        let entry = &entries[0];
        assert_eq!(entry.raw_message, raw);
        assert_eq!(entry.payload_sha256, payload_fingerprint(&raw));
        assert_eq!(entry.origin, message.position());
        assert_eq!(entry.message_key.as_deref(), Some("order-123"));
        assert_eq!(entry.failed_at, fixed_now());
        assert!(entry.error_detail.contains("OrderTeleported"));
        assert!(h.store.events().is_empty());
        assert_eq!(
            h.metrics
                .counter_with(EVENTS_FAILED, "classification", "DESERIALIZATION_FAILURE"),
            1
        );
    }

    #[tokio::test]
    async fn test_invalid_event_reports_every_violation() {
        // Arrange
        let h = harness();
        let raw = mutate(
            &order_created_message(Uuid::new_v4(), "order-123", 0),
            |v| v["payload"]["currency"] = json!("EURO"),
        );

        // Act
        let outcome = h.processor.process(&log_message(0, "order-123", raw)).await;

        // Assert
        assert!(matches!(
            outcome,
            ProcessOutcome::DeadLettered {
                kind: FailureKind::ValidationFailure,
                entry_id: Some(_)
            }
        ));
        let detail = &h.dead_letters.entries()[0].error_detail;
        assert!(detail.contains("version must be greater than 0"));
        assert!(detail.contains("currency"));
        assert!(h.store.events().is_empty());
    }

    #[tokio::test]
    async fn test_storage_error_is_dead_lettered_as_persistence_failure() {
        // Arrange
        let dead_letters = InMemoryDeadLetterSink::new();
        let (processor, metrics) =
            harness_with(Arc::new(FailingEventStore), Arc::new(dead_letters.clone()));
        let raw = order_created_message(Uuid::new_v4(), "order-123", 1);

        // Act
        let outcome = processor.process(&log_message(0, "order-123", raw)).await;

        // Assert
        assert!(matches!(
            outcome,
            ProcessOutcome::DeadLettered {
                kind: FailureKind::PersistenceFailure,
                ..
            }
        ));
        assert!(dead_letters.entries()[0].error_detail.contains("connection refused"));
        assert_eq!(
            metrics.counter_with(EVENTS_FAILED, "classification", "PERSISTENCE_FAILURE"),
            1
        );
    }

    #[tokio::test]
    async fn test_dead_letter_write_failure_does_not_escape() {
        // Arrange
        let (processor, metrics) =
            harness_with(Arc::new(InMemoryEventStore::new()), Arc::new(FailingDeadLetterSink));

        // Act
        let outcome = processor
            .process(&log_message(0, "order-123", b"not json".to_vec()))
            .await;

        // Assert
        assert_eq!(
            outcome,
            ProcessOutcome::DeadLettered {
                kind: FailureKind::DeserializationFailure,
                entry_id: None,
            }
        );
        assert_eq!(metrics.counter(DEAD_LETTER_WRITE_FAILURES), 1);
    }

    /// A store whose lookups panic.
    struct PanickingEventStore;

    #[async_trait]
    impl EventStore for PanickingEventStore {
        async fn begin(&self) -> Result<Box<dyn UnitOfWork>, StoreError> {
            unimplemented!()
        }

        async fn find_by_id(&self, _event_id: Uuid) -> Result<Option<Event>, StoreError> {
            panic!("index corrupted")
        }

        async fn load_stream(&self, _: &str, _: &str) -> Result<Vec<Event>, StoreError> {
            unimplemented!()
        }

        async fn count_matching(&self, _: &ReplayFilter) -> Result<i64, StoreError> {
            unimplemented!()
        }

        async fn load_page(
            &self,
            _: &ReplayFilter,
            _: Option<EventCursor>,
            _: i64,
        ) -> Result<Vec<Event>, StoreError> {
            unimplemented!()
        }
    }

    #[tokio::test]
    async fn test_panic_is_dead_lettered_as_unexpected_error() {
        // Arrange
        let dead_letters = InMemoryDeadLetterSink::new();
        let (processor, _) =
            harness_with(Arc::new(PanickingEventStore), Arc::new(dead_letters.clone()));
        let raw = order_created_message(Uuid::new_v4(), "order-123", 1);

        // Act
        let outcome = processor.process(&log_message(0, "order-123", raw)).await;

        // Assert
        assert!(matches!(
            outcome,
            ProcessOutcome::DeadLettered {
                kind: FailureKind::UnexpectedError,
                ..
            }
        ));
        assert!(dead_letters.entries()[0].error_detail.contains("index corrupted"));
    }

    #[tokio::test]
    async fn test_unchanged_bad_message_is_classified_the_same_every_time() {
        // Arrange
        let h = harness();
        let raw = mutate(
            &order_created_message(Uuid::new_v4(), "order-123", 1),
            |v| v["event_type"] = json!("OrderTeleported"),
        );

        // Act
        let first = h.processor.process(&log_message(0, "order-123", raw.clone())).await;
        let second = h.processor.process(&log_message(0, "order-123", raw)).await;

        // Assert
        let entries = h.dead_letters.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].failure_kind, entries[1].failure_kind);
        assert_eq!(entries[0].payload_sha256, entries[1].payload_sha256);
        assert!(matches!(first, ProcessOutcome::DeadLettered { .. }));
        assert!(matches!(second, ProcessOutcome::DeadLettered { .. }));
        assert!(h.store.events().is_empty());
    }

    #[test]
    fn test_fingerprint_is_lowercase_hex_sha256() {
        assert_eq!(
            payload_fingerprint(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
