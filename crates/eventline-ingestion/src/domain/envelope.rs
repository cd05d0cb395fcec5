//! The wire envelope every message carries.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;

use eventline_core::event::{Event, LogPosition};

use super::payloads::EventPayload;

/// Envelope fields as sent by producers.
///
/// Missing fields deserialize to their defaults so that an incomplete
/// envelope is reported by the validator with every violation at once,
/// instead of failing on the first absent field.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EventEnvelope {
    /// Producer-assigned identifier.
    #[serde(default)]
    pub event_id: Uuid,
    /// Payload discriminator.
    #[serde(default)]
    pub event_type: String,
    /// Logical stream identifier.
    #[serde(default)]
    pub aggregate_id: String,
    /// Logical stream kind.
    #[serde(default)]
    pub aggregate_type: String,
    /// Position within the stream.
    #[serde(default)]
    pub version: i64,
    /// Producer-asserted occurrence time; the epoch when absent.
    #[serde(default)]
    pub timestamp: DateTime<Utc>,
    /// Producing system.
    #[serde(default)]
    pub source: String,
    /// Correlation identifier.
    #[serde(default)]
    pub correlation_id: Option<String>,
    /// Causation identifier.
    #[serde(default)]
    pub causation_id: Option<String>,
    /// Acting user.
    #[serde(default)]
    pub user_id: Option<String>,
    /// Event-type-specific data, kept verbatim for storage.
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// A decoded message: the envelope plus its typed payload.
#[derive(Debug, Clone, PartialEq)]
pub struct IncomingEvent {
    /// Envelope fields.
    pub envelope: EventEnvelope,
    /// Typed view of `envelope.payload`.
    pub payload: EventPayload,
}

impl IncomingEvent {
    /// Converts the message into the record that gets stored.
    #[must_use]
    pub fn into_event(self, ingested_at: DateTime<Utc>, origin: Option<LogPosition>) -> Event {
        let envelope = self.envelope;
        Event {
            event_id: envelope.event_id,
            event_type: envelope.event_type,
            aggregate_id: envelope.aggregate_id,
            aggregate_type: envelope.aggregate_type,
            version: envelope.version,
            timestamp: envelope.timestamp,
            source: envelope.source,
            correlation_id: envelope.correlation_id,
            causation_id: envelope.causation_id,
            user_id: envelope.user_id,
            payload: envelope.payload,
            ingested_at,
            origin,
        }
    }
}
