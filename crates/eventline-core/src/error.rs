//! Infrastructure error types shared by every adapter.

use thiserror::Error;

/// Errors raised by the relational store adapters.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A uniqueness constraint rejected the write.
    ///
    /// Raised for both the `event_id` key and the
    /// `(aggregate_id, aggregate_type, version)` constraint; callers treat it
    /// as a lost race against an identical commit.
    #[error("unique constraint violated: {constraint}")]
    UniqueViolation {
        /// Name of the violated constraint, when the backend reports one.
        constraint: String,
    },

    /// The addressed row does not exist.
    #[error("record not found: {0}")]
    NotFound(String),

    /// Any other storage failure.
    #[error("database error: {0}")]
    Database(String),

    /// A stored column could not be mapped back to a domain value.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl StoreError {
    /// Returns `true` when the error is a uniqueness-constraint violation.
    #[must_use]
    pub fn is_unique_violation(&self) -> bool {
        matches!(self, Self::UniqueViolation { .. })
    }
}

/// Errors raised by the message log client.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// Broker unavailable, rebalance in progress, or similar. Retried with
    /// backoff inside the ingestion loop.
    #[error("transient broker error: {0}")]
    Transient(String),

    /// Unrecoverable subscription failure. Terminates the ingestion loop.
    #[error("fatal broker error: {0}")]
    Fatal(String),
}

impl BrokerError {
    /// Returns `true` when the error should terminate the consumer.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal(_))
    }
}
