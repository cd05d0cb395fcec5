//! Replay job records.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::event::Event;

/// Lifecycle of a replay job.
///
/// `Pending -> Running -> {Completed | Failed | Cancelled}`; a pending job
/// may also be cancelled before it starts. Terminal states never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReplayStatus {
    /// Row created, worker not started yet.
    Pending,
    /// Worker is dispatching events.
    Running,
    /// Every matching event was dispatched.
    Completed,
    /// Dispatch stopped on an error.
    Failed,
    /// Stopped at a caller's request.
    Cancelled,
}

impl ReplayStatus {
    /// Returns the stable storage name of the status.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
        }
    }

    /// Returns `true` for `Completed`, `Failed` and `Cancelled`.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for ReplayStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a stored status name is not recognised.
#[derive(Debug, Error)]
#[error("unknown replay status: {0}")]
pub struct UnknownReplayStatus(pub String);

impl FromStr for ReplayStatus {
    type Err = UnknownReplayStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "RUNNING" => Ok(Self::Running),
            "COMPLETED" => Ok(Self::Completed),
            "FAILED" => Ok(Self::Failed),
            "CANCELLED" => Ok(Self::Cancelled),
            other => Err(UnknownReplayStatus(other.to_owned())),
        }
    }
}

/// Why a filter cannot describe a non-empty selection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidFilter {
    /// `from_timestamp` is not before `to_timestamp`.
    #[error("time range start {from} must be before end {to}")]
    TimeRange {
        /// Range start.
        from: DateTime<Utc>,
        /// Range end.
        to: DateTime<Utc>,
    },
    /// `from_version` is greater than `to_version`.
    #[error("version range start {from} must not exceed end {to}")]
    VersionRange {
        /// Range start.
        from: i64,
        /// Range end.
        to: i64,
    },
}

/// Selection criteria for a replay. Unset fields do not constrain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayFilter {
    /// Only events of this aggregate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aggregate_id: Option<String>,
    /// Only events of this aggregate type.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aggregate_type: Option<String>,
    /// Only these event types; empty means all.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub event_types: Vec<String>,
    /// Inclusive lower bound on the event timestamp.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_timestamp: Option<DateTime<Utc>>,
    /// Exclusive upper bound on the event timestamp.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_timestamp: Option<DateTime<Utc>>,
    /// Inclusive lower bound on the version.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_version: Option<i64>,
    /// Inclusive upper bound on the version.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_version: Option<i64>,
}

impl ReplayFilter {
    /// Checks that the ranges are well-formed.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidFilter`] when a range start is not before (time) or
    /// not at most (version) its end.
    pub fn validate(&self) -> Result<(), InvalidFilter> {
        if let (Some(from), Some(to)) = (self.from_timestamp, self.to_timestamp)
            && from >= to
        {
            return Err(InvalidFilter::TimeRange { from, to });
        }
        if let (Some(from), Some(to)) = (self.from_version, self.to_version)
            && from > to
        {
            return Err(InvalidFilter::VersionRange { from, to });
        }
        Ok(())
    }

    /// Returns `true` if `event` falls inside the selection.
    #[must_use]
    pub fn matches(&self, event: &Event) -> bool {
        self.aggregate_id
            .as_ref()
            .is_none_or(|id| *id == event.aggregate_id)
            && self
                .aggregate_type
                .as_ref()
                .is_none_or(|t| *t == event.aggregate_type)
            && (self.event_types.is_empty() || self.event_types.contains(&event.event_type))
            && self.from_timestamp.is_none_or(|from| event.timestamp >= from)
            && self.to_timestamp.is_none_or(|to| event.timestamp < to)
            && self.from_version.is_none_or(|from| event.version >= from)
            && self.to_version.is_none_or(|to| event.version <= to)
    }
}

/// Where replayed events are sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReplayDestination {
    /// Emit each event as a structured log line.
    Log,
    /// Re-publish each event to a message log topic.
    Topic {
        /// Target topic.
        topic: String,
    },
    /// POST each event as JSON to an HTTP endpoint.
    Webhook {
        /// Target URL.
        url: String,
    },
}

/// A caller's replay submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayRequest {
    /// Selection criteria.
    #[serde(default)]
    pub filter: ReplayFilter,
    /// Destination for the selected events.
    pub destination: ReplayDestination,
    /// Who asked for the replay.
    #[serde(default)]
    pub requested_by: Option<String>,
}

/// Durable state of one replay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReplayJob {
    /// Replay identifier.
    pub replay_id: Uuid,
    /// Selection criteria.
    pub filter: ReplayFilter,
    /// Destination descriptor.
    pub destination: ReplayDestination,
    /// Current lifecycle state.
    pub status: ReplayStatus,
    /// Matching events counted at submission.
    pub total_events: i64,
    /// Events dispatched so far; checkpointed periodically while running.
    pub events_replayed: i64,
    /// Who asked for the replay.
    pub requested_by: Option<String>,
    /// Who cancelled the replay.
    pub cancelled_by: Option<String>,
    /// Failure explanation for `Failed` jobs.
    pub error: Option<String>,
    /// When the row was created.
    pub created_at: DateTime<Utc>,
    /// When the worker started.
    pub started_at: Option<DateTime<Utc>>,
    /// When the job reached a terminal state.
    pub completed_at: Option<DateTime<Utc>>,
}

impl ReplayJob {
    /// Creates a `Pending` job for `request`.
    #[must_use]
    pub fn pending(request: ReplayRequest, total_events: i64, created_at: DateTime<Utc>) -> Self {
        Self {
            replay_id: Uuid::now_v7(),
            filter: request.filter,
            destination: request.destination,
            status: ReplayStatus::Pending,
            total_events,
            events_replayed: 0,
            requested_by: request.requested_by,
            cancelled_by: None,
            error: None,
            created_at,
            started_at: None,
            completed_at: None,
        }
    }
}

/// Result of a cancellation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelOutcome {
    /// The job was pending and is now `Cancelled`.
    Cancelled,
    /// The job is running; its worker will stop before the next dispatch.
    CancellationRequested,
    /// The job is already terminal.
    NotCancellable(ReplayStatus),
}
