//! Stored event records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Audit action written alongside every ingested event.
pub const EVENT_INGESTED_ACTION: &str = "EVENT_INGESTED";

/// Coordinates of a message in the partitioned log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogPosition {
    /// Topic the message was read from.
    pub topic: String,
    /// Partition within the topic.
    pub partition: i32,
    /// Offset within the partition.
    pub offset: i64,
}

/// An immutable, committed business event.
///
/// Rows are never updated or deleted after commit; the store enforces this
/// with a trigger in addition to the absence of mutating operations here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Producer-assigned identifier; the deduplication key.
    pub event_id: Uuid,
    /// Payload discriminator, e.g. `OrderCreated`.
    pub event_type: String,
    /// Logical stream identifier.
    pub aggregate_id: String,
    /// Logical stream kind, e.g. `Order`.
    pub aggregate_type: String,
    /// Position within `(aggregate_id, aggregate_type)`, starting at 1.
    pub version: i64,
    /// Producer-asserted occurrence time.
    pub timestamp: DateTime<Utc>,
    /// Producing system.
    pub source: String,
    /// Correlation identifier for tracing a flow across services.
    pub correlation_id: Option<String>,
    /// Identifier of the event or command that caused this one.
    pub causation_id: Option<String>,
    /// Acting user, when known.
    pub user_id: Option<String>,
    /// Event-type-specific data, stored opaquely.
    pub payload: serde_json::Value,
    /// Wall-clock time the pipeline committed the event.
    pub ingested_at: DateTime<Utc>,
    /// Where the event was consumed from; `None` for events written by
    /// other means (e.g. test fixtures).
    pub origin: Option<LogPosition>,
}

impl Event {
    /// Returns the keyset cursor positioned at this event.
    #[must_use]
    pub fn cursor(&self) -> EventCursor {
        EventCursor {
            timestamp: self.timestamp,
            version: self.version,
            event_id: self.event_id,
        }
    }
}

/// Keyset pagination position over the `(timestamp, version, event_id)`
/// ordering used by replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventCursor {
    /// Timestamp of the last event read.
    pub timestamp: DateTime<Utc>,
    /// Version of the last event read.
    pub version: i64,
    /// Identifier of the last event read; breaks ties across aggregates.
    pub event_id: Uuid,
}

/// Companion audit-trail row committed atomically with an [`Event`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Audit row identifier.
    pub audit_id: Uuid,
    /// The event this row describes.
    pub event_id: Uuid,
    /// What happened, e.g. [`EVENT_INGESTED_ACTION`].
    pub action: String,
    /// Free-form structured detail.
    pub details: serde_json::Value,
    /// When the row was written.
    pub recorded_at: DateTime<Utc>,
}

impl AuditRecord {
    /// Builds the "event ingested" audit row for `event`.
    #[must_use]
    pub fn ingested(event: &Event) -> Self {
        let details = serde_json::json!({
            "event_type": event.event_type,
            "aggregate_id": event.aggregate_id,
            "aggregate_type": event.aggregate_type,
            "version": event.version,
            "source": event.source,
            "origin": event.origin,
        });
        Self {
            audit_id: Uuid::new_v4(),
            event_id: event.event_id,
            action: EVENT_INGESTED_ACTION.to_owned(),
            details,
            recorded_at: event.ingested_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;

    #[test]
    fn test_ingested_audit_record_describes_event() {
        let at = Utc.with_ymd_and_hms(2026, 1, 15, 10, 0, 0).unwrap();
        let event = Event {
            event_id: Uuid::new_v4(),
            event_type: "OrderCreated".into(),
            aggregate_id: "order-123".into(),
            aggregate_type: "Order".into(),
            version: 1,
            timestamp: at,
            source: "checkout".into(),
            correlation_id: None,
            causation_id: None,
            user_id: None,
            payload: serde_json::json!({}),
            ingested_at: at,
            origin: Some(LogPosition {
                topic: "orders".into(),
                partition: 2,
                offset: 17,
            }),
        };

        let audit = AuditRecord::ingested(&event);

        assert_eq!(audit.event_id, event.event_id);
        assert_eq!(audit.action, EVENT_INGESTED_ACTION);
        assert_eq!(audit.recorded_at, at);
        assert_eq!(audit.details["aggregate_id"], "order-123");
        assert_eq!(audit.details["origin"]["offset"], 17);
    }
}
