//! Operator workflow over dead-letter entries: inspect, reprocess, resolve.

use std::sync::Arc;

use eventline_core::clock::Clock;
use eventline_core::dead_letter::{DeadLetterEntry, FailureKind};
use eventline_core::error::StoreError;
use eventline_core::message::LogMessage;
use eventline_core::repository::DeadLetterSink;
use serde::Serialize;
use thiserror::Error;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::processor::{Accepted, EventProcessor};

/// Who resolves an entry that reprocessing fixed.
pub const REPROCESS_RESOLVER: &str = "reprocess";

/// Errors from dead-letter operations.
#[derive(Debug, Error)]
pub enum ReprocessError {
    /// No entry with this id.
    #[error("dead-letter entry {0} not found")]
    NotFound(Uuid),

    /// The entry was resolved already and is not reprocessed again.
    #[error("dead-letter entry {0} is already resolved")]
    AlreadyResolved(Uuid),

    /// The dead-letter table could not be read or written.
    #[error(transparent)]
    Store(StoreError),
}

fn store_error(id: Uuid, err: StoreError) -> ReprocessError {
    match err {
        StoreError::NotFound(_) => ReprocessError::NotFound(id),
        other => ReprocessError::Store(other),
    }
}

/// Result of re-running the processor on a dead-lettered message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ReprocessOutcome {
    /// The message now became an event; the entry is resolved.
    Committed {
        /// Id of the stored event.
        event_id: Uuid,
    },
    /// The event had been stored meanwhile; the entry is resolved.
    Duplicate {
        /// Id carried by the message.
        event_id: Uuid,
    },
    /// The message still fails; the retry is recorded on the entry.
    Failed {
        /// Classification of the new failure.
        kind: FailureKind,
        /// Detail of the new failure.
        error: String,
        /// Reprocessing attempts so far.
        retry_count: i32,
    },
}

/// Runs operator actions against the dead-letter sink.
pub struct DeadLetterReprocessor {
    processor: Arc<EventProcessor>,
    dead_letters: Arc<dyn DeadLetterSink>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for DeadLetterReprocessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeadLetterReprocessor")
            .field("processor", &self.processor)
            .finish_non_exhaustive()
    }
}

impl DeadLetterReprocessor {
    /// Creates the operator surface.
    #[must_use]
    pub fn new(
        processor: Arc<EventProcessor>,
        dead_letters: Arc<dyn DeadLetterSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            processor,
            dead_letters,
            clock,
        }
    }

    /// Fetches one entry.
    ///
    /// # Errors
    ///
    /// Returns [`ReprocessError::NotFound`] for an unknown id.
    pub async fn get(&self, id: Uuid) -> Result<DeadLetterEntry, ReprocessError> {
        self.dead_letters
            .get(id)
            .await
            .map_err(|e| store_error(id, e))?
            .ok_or(ReprocessError::NotFound(id))
    }

    /// Lists up to `limit` unresolved entries, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`ReprocessError::Store`] if the sink cannot be read.
    pub async fn list_unresolved(&self, limit: i64) -> Result<Vec<DeadLetterEntry>, ReprocessError> {
        self.dead_letters
            .list_unresolved(limit)
            .await
            .map_err(ReprocessError::Store)
    }

    /// Re-runs every processing stage on the stored raw message. No new
    /// dead-letter entry is written: success resolves the entry, failure
    /// bumps its retry count.
    ///
    /// # Errors
    ///
    /// Returns [`ReprocessError::NotFound`] or
    /// [`ReprocessError::AlreadyResolved`] when there is nothing to retry.
    #[instrument(skip(self))]
    pub async fn reprocess(&self, id: Uuid) -> Result<ReprocessOutcome, ReprocessError> {
        let entry = self.get(id).await?;
        if entry.resolved {
            return Err(ReprocessError::AlreadyResolved(id));
        }

        let message = LogMessage {
            key: entry.message_key.clone(),
            value: entry.raw_message.clone(),
            topic: entry.origin.topic.clone(),
            partition: entry.origin.partition,
            offset: entry.origin.offset,
        };
        let now = self.clock.now();

        match self.processor.try_process(&message).await {
            Ok(accepted) => {
                self.dead_letters
                    .resolve(id, REPROCESS_RESOLVER, now)
                    .await
                    .map_err(|e| store_error(id, e))?;
                let outcome = match accepted {
                    Accepted::Committed(event_id) => ReprocessOutcome::Committed { event_id },
                    Accepted::Duplicate(event_id) => ReprocessOutcome::Duplicate { event_id },
                };
                info!(?outcome, "dead-letter entry reprocessed");
                Ok(outcome)
            }
            Err(failure) => {
                self.dead_letters
                    .record_retry(id, &failure.to_string(), now)
                    .await
                    .map_err(|e| store_error(id, e))?;
                warn!(classification = %failure.kind, error = %failure.detail, "reprocessing failed again");
                Ok(ReprocessOutcome::Failed {
                    kind: failure.kind,
                    error: failure.detail,
                    retry_count: entry.retry_count + 1,
                })
            }
        }
    }

    /// Marks an entry resolved by `resolved_by`. Returns `false` when it
    /// already was.
    ///
    /// # Errors
    ///
    /// Returns [`ReprocessError::NotFound`] for an unknown id.
    #[instrument(skip(self))]
    pub async fn resolve(&self, id: Uuid, resolved_by: &str) -> Result<bool, ReprocessError> {
        let resolved = self
            .dead_letters
            .resolve(id, resolved_by, self.clock.now())
            .await
            .map_err(|e| store_error(id, e))?;
        if resolved {
            info!("dead-letter entry resolved");
        }
        Ok(resolved)
    }
}
