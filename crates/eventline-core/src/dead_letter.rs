//! Dead-letter records for messages that could not become events.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::event::LogPosition;

/// Why a message was routed to the dead-letter sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureKind {
    /// The message was not a well-formed envelope of a registered type.
    DeserializationFailure,
    /// The event broke an envelope or payload rule.
    ValidationFailure,
    /// The store rejected the write for a reason other than a duplicate.
    PersistenceFailure,
    /// Anything else, including panics inside processing.
    UnexpectedError,
}

impl FailureKind {
    /// Returns the stable wire/storage name of the classification.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::DeserializationFailure => "DESERIALIZATION_FAILURE",
            Self::ValidationFailure => "VALIDATION_FAILURE",
            Self::PersistenceFailure => "PERSISTENCE_FAILURE",
            Self::UnexpectedError => "UNEXPECTED_ERROR",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a stored classification name is not recognised.
#[derive(Debug, Error)]
#[error("unknown failure kind: {0}")]
pub struct UnknownFailureKind(pub String);

impl FromStr for FailureKind {
    type Err = UnknownFailureKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DESERIALIZATION_FAILURE" => Ok(Self::DeserializationFailure),
            "VALIDATION_FAILURE" => Ok(Self::ValidationFailure),
            "PERSISTENCE_FAILURE" => Ok(Self::PersistenceFailure),
            "UNEXPECTED_ERROR" => Ok(Self::UnexpectedError),
            other => Err(UnknownFailureKind(other.to_owned())),
        }
    }
}

/// A classified processing failure. Never escapes the event processor; it is
/// turned into a dead-letter entry instead.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {detail}")]
pub struct ProcessingFailure {
    /// Failure classification.
    pub kind: FailureKind,
    /// Human-readable explanation.
    pub detail: String,
}

impl ProcessingFailure {
    /// Creates a new failure of the given kind.
    pub fn new(kind: FailureKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }
}

/// A dead-letter entry about to be written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewDeadLetter {
    /// Message key as delivered, if any.
    pub message_key: Option<String>,
    /// The raw message body, byte-for-byte.
    pub raw_message: Vec<u8>,
    /// Hex SHA-256 of `raw_message`; groups repeat deliveries of the same
    /// bad payload.
    pub payload_sha256: String,
    /// Where the message was consumed from.
    pub origin: LogPosition,
    /// Failure classification.
    pub failure_kind: FailureKind,
    /// Human-readable explanation.
    pub error_detail: String,
    /// When the failure happened.
    pub failed_at: DateTime<Utc>,
}

/// A persisted dead-letter entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeadLetterEntry {
    /// Entry identifier.
    pub id: Uuid,
    /// Message key as delivered, if any.
    pub message_key: Option<String>,
    /// The raw message body. Serialized lossily as UTF-8 for operators.
    #[serde(serialize_with = "serialize_lossy_utf8")]
    pub raw_message: Vec<u8>,
    /// Hex SHA-256 of `raw_message`.
    pub payload_sha256: String,
    /// Where the message was consumed from.
    pub origin: LogPosition,
    /// Failure classification.
    pub failure_kind: FailureKind,
    /// Explanation recorded when the entry was created.
    pub error_detail: String,
    /// Number of reprocessing attempts made.
    pub retry_count: i32,
    /// Time of the latest reprocessing attempt.
    pub last_retry_at: Option<DateTime<Utc>>,
    /// Explanation from the latest failed reprocessing attempt.
    pub last_error: Option<String>,
    /// Whether an operator or a successful reprocess closed the entry.
    pub resolved: bool,
    /// When the entry was resolved.
    pub resolved_at: Option<DateTime<Utc>>,
    /// Who resolved the entry.
    pub resolved_by: Option<String>,
    /// When the original failure happened.
    pub failed_at: DateTime<Utc>,
}

fn serialize_lossy_utf8<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_str(&String::from_utf8_lossy(bytes))
}
