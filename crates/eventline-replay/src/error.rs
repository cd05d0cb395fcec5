//! Replay error types.

use eventline_core::error::{BrokerError, StoreError};
use eventline_core::replay::{InvalidFilter, ReplayStatus};
use thiserror::Error;
use uuid::Uuid;

/// Why a replay request or operation was refused.
#[derive(Debug, Error)]
pub enum ReplayError {
    /// The time range does not satisfy `start < end`.
    #[error("invalid time range: {0}")]
    InvalidTimeRange(InvalidFilter),

    /// The version range does not satisfy `from <= to`.
    #[error("invalid version range: {0}")]
    InvalidVersionRange(InvalidFilter),

    /// Nothing in the store matches the filter.
    #[error("no stored events match the replay filter")]
    NoMatchingEvents,

    /// No job with this id.
    #[error("replay job {0} not found")]
    NotFound(Uuid),

    /// A worker already owns this job.
    #[error("replay job {0} is already running")]
    AlreadyRunning(Uuid),

    /// Only `PENDING` jobs can be started.
    #[error("replay job {replay_id} is {status} and cannot be started")]
    NotStartable {
        /// The job.
        replay_id: Uuid,
        /// Its current status.
        status: ReplayStatus,
    },

    /// The destination cannot be served.
    #[error("replay destination error: {0}")]
    Destination(#[from] DispatchError),

    /// The store failed.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),
}

impl From<InvalidFilter> for ReplayError {
    fn from(err: InvalidFilter) -> Self {
        match err {
            InvalidFilter::TimeRange { .. } => Self::InvalidTimeRange(err),
            InvalidFilter::VersionRange { .. } => Self::InvalidVersionRange(err),
        }
    }
}

/// Failure to hand one event to a destination.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// No dispatcher is configured for this destination kind.
    #[error("unsupported destination: {0}")]
    Unsupported(String),

    /// The event could not be encoded.
    #[error("failed to encode event: {0}")]
    Encode(#[from] serde_json::Error),

    /// The message log refused the publish.
    #[error("publish failed: {0}")]
    Publish(#[from] BrokerError),

    /// The webhook endpoint answered with a non-success status.
    #[error("webhook returned HTTP {status}: {body}")]
    Webhook {
        /// HTTP status code.
        status: u16,
        /// Response body, possibly empty.
        body: String,
    },

    /// The webhook endpoint could not be reached.
    #[error("webhook unreachable: {0}")]
    Unreachable(#[from] reqwest::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_filter_maps_to_matching_variant() {
        let err = ReplayError::from(InvalidFilter::VersionRange { from: 3, to: 1 });
        assert!(matches!(err, ReplayError::InvalidVersionRange(_)));
        assert_eq!(
            err.to_string(),
            "invalid version range: version range start 3 must not exceed end 1"
        );
    }
}
