//! Eventline — API and start-up error types.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use eventline_core::error::BrokerError;
use eventline_ingestion::application::dead_letters::ReprocessError;
use eventline_ingestion::application::ingestion_loop::IngestionError;
use eventline_replay::error::{DispatchError, ReplayError};
use serde::Serialize;
use thiserror::Error;

/// Start-up and runtime errors of the host process.
#[derive(Debug, Error)]
pub enum AppError {
    /// A required environment variable is missing or invalid.
    #[error("configuration error: {0}")]
    Config(String),

    /// Database connection or pool error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Schema migrations could not be applied.
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Network binding or I/O error.
    #[error("server error: {0}")]
    Server(#[from] std::io::Error),

    /// The tracing subscriber or metrics recorder could not be installed.
    #[error("telemetry error: {0}")]
    Telemetry(String),

    /// The message log could not be prepared.
    #[error("message log error: {0}")]
    Broker(#[from] BrokerError),

    /// Replay wiring or recovery failed.
    #[error("replay error: {0}")]
    Replay(#[from] ReplayError),

    /// The replay destinations could not be set up.
    #[error("replay destination error: {0}")]
    Dispatch(#[from] DispatchError),

    /// An ingestion loop stopped on a fatal broker error.
    #[error("ingestion error: {0}")]
    Ingestion(#[from] IngestionError),

    /// A background task panicked or was aborted.
    #[error("background task failed: {0}")]
    Task(String),
}

/// JSON body returned for error responses.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    /// Machine-readable error code.
    pub error: &'static str,
    /// Human-readable error message.
    pub message: String,
}

/// HTTP-layer wrapper around the operation errors that implements
/// `IntoResponse`.
#[derive(Debug)]
pub enum ApiError {
    /// A replay operation was refused or failed.
    Replay(ReplayError),
    /// A dead-letter operation was refused or failed.
    DeadLetter(ReprocessError),
}

impl From<ReplayError> for ApiError {
    fn from(err: ReplayError) -> Self {
        Self::Replay(err)
    }
}

impl From<ReprocessError> for ApiError {
    fn from(err: ReprocessError) -> Self {
        Self::DeadLetter(err)
    }
}

impl ApiError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            Self::Replay(err) => match err {
                ReplayError::InvalidTimeRange(_) => (StatusCode::BAD_REQUEST, "invalid_time_range"),
                ReplayError::InvalidVersionRange(_) => {
                    (StatusCode::BAD_REQUEST, "invalid_version_range")
                }
                ReplayError::Destination(_) => (StatusCode::BAD_REQUEST, "invalid_destination"),
                ReplayError::NoMatchingEvents => {
                    (StatusCode::UNPROCESSABLE_ENTITY, "no_matching_events")
                }
                ReplayError::NotFound(_) => (StatusCode::NOT_FOUND, "replay_not_found"),
                ReplayError::AlreadyRunning(_) => (StatusCode::CONFLICT, "replay_already_running"),
                ReplayError::NotStartable { .. } => (StatusCode::CONFLICT, "replay_not_startable"),
                ReplayError::Store(_) => (StatusCode::INTERNAL_SERVER_ERROR, "storage_error"),
            },
            Self::DeadLetter(err) => match err {
                ReprocessError::NotFound(_) => (StatusCode::NOT_FOUND, "dead_letter_not_found"),
                ReprocessError::AlreadyResolved(_) => {
                    (StatusCode::CONFLICT, "dead_letter_already_resolved")
                }
                ReprocessError::Store(_) => (StatusCode::INTERNAL_SERVER_ERROR, "storage_error"),
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code) = self.status_and_code();
        let message = match &self {
            Self::Replay(err) => err.to_string(),
            Self::DeadLetter(err) => err.to_string(),
        };

        if status.is_server_error() {
            tracing::error!(error = %message, "request failed");
        }

        let body = ErrorBody {
            error: error_code,
            message,
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use eventline_core::error::StoreError;
    use eventline_core::replay::{InvalidFilter, ReplayStatus};
    use uuid::Uuid;

    fn status_of(err: impl Into<ApiError>) -> StatusCode {
        let response = err.into().into_response();
        response.status()
    }

    #[test]
    fn test_invalid_ranges_map_to_400() {
        assert_eq!(
            status_of(ReplayError::from(InvalidFilter::VersionRange { from: 3, to: 1 })),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(ReplayError::Destination(DispatchError::Unsupported(
                "topic".into()
            ))),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn test_no_matching_events_maps_to_422() {
        assert_eq!(
            status_of(ReplayError::NoMatchingEvents),
            StatusCode::UNPROCESSABLE_ENTITY
        );
    }

    #[test]
    fn test_not_found_maps_to_404() {
        assert_eq!(
            status_of(ReplayError::NotFound(Uuid::new_v4())),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(ReprocessError::NotFound(Uuid::new_v4())),
            StatusCode::NOT_FOUND
        );
    }

    #[test]
    fn test_conflicts_map_to_409() {
        assert_eq!(
            status_of(ReplayError::AlreadyRunning(Uuid::new_v4())),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(ReplayError::NotStartable {
                replay_id: Uuid::new_v4(),
                status: ReplayStatus::Completed,
            }),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(ReprocessError::AlreadyResolved(Uuid::new_v4())),
            StatusCode::CONFLICT
        );
    }

    #[test]
    fn test_store_failure_maps_to_500() {
        assert_eq!(
            status_of(ReplayError::Store(StoreError::Database("db down".into()))),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            status_of(ReprocessError::Store(StoreError::Database("db down".into()))),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
