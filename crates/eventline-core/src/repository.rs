//! Storage ports: event store, dead-letter sink and replay job repository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::dead_letter::{DeadLetterEntry, NewDeadLetter};
use crate::error::StoreError;
use crate::event::{AuditRecord, Event, EventCursor};
use crate::replay::{ReplayFilter, ReplayJob};

/// One atomic unit of work against the event store.
///
/// Everything written through a unit of work becomes visible on
/// [`commit`](UnitOfWork::commit) or not at all. Dropping it without
/// committing rolls back.
#[async_trait]
pub trait UnitOfWork: Send {
    /// Inserts an event row.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::UniqueViolation`] when `event_id` or
    /// `(aggregate_id, aggregate_type, version)` is already taken.
    async fn insert_event(&mut self, event: &Event) -> Result<(), StoreError>;

    /// Inserts an audit-trail row.
    async fn insert_audit(&mut self, record: &AuditRecord) -> Result<(), StoreError>;

    /// Makes every write in this unit durable.
    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    /// Discards every write in this unit.
    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}

/// Append-only event storage.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Opens a unit of work.
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, StoreError>;

    /// Looks an event up by its deduplication key.
    async fn find_by_id(&self, event_id: Uuid) -> Result<Option<Event>, StoreError>;

    /// Loads one aggregate stream ordered by version.
    async fn load_stream(
        &self,
        aggregate_id: &str,
        aggregate_type: &str,
    ) -> Result<Vec<Event>, StoreError>;

    /// Counts events matching `filter`.
    async fn count_matching(&self, filter: &ReplayFilter) -> Result<i64, StoreError>;

    /// Returns up to `limit` events matching `filter`, ordered by
    /// `(timestamp, version, event_id)` and strictly after `after`.
    async fn load_page(
        &self,
        filter: &ReplayFilter,
        after: Option<EventCursor>,
        limit: i64,
    ) -> Result<Vec<Event>, StoreError>;
}

/// Durable record of unprocessable messages.
///
/// The ingestion side only ever calls [`record`](DeadLetterSink::record);
/// the remaining operations serve the operator workflow.
#[async_trait]
pub trait DeadLetterSink: Send + Sync {
    /// Persists a new entry and returns its id.
    async fn record(&self, entry: &NewDeadLetter) -> Result<Uuid, StoreError>;

    /// Fetches one entry.
    async fn get(&self, id: Uuid) -> Result<Option<DeadLetterEntry>, StoreError>;

    /// Lists unresolved entries, oldest first.
    async fn list_unresolved(&self, limit: i64) -> Result<Vec<DeadLetterEntry>, StoreError>;

    /// Records a failed reprocessing attempt.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if the entry does not exist.
    async fn record_retry(
        &self,
        id: Uuid,
        error: &str,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Marks an entry resolved. Returns `false` if it already was.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if the entry does not exist.
    async fn resolve(
        &self,
        id: Uuid,
        resolved_by: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;
}

/// Persistence for replay jobs.
///
/// Every state change is conditional on the current state; the boolean
/// results report whether the transition applied.
#[async_trait]
pub trait ReplayJobRepository: Send + Sync {
    /// Inserts a new job row.
    async fn insert(&self, job: &ReplayJob) -> Result<(), StoreError>;

    /// Fetches one job.
    async fn get(&self, replay_id: Uuid) -> Result<Option<ReplayJob>, StoreError>;

    /// Lists jobs in `Pending` or `Running`.
    async fn list_active(&self) -> Result<Vec<ReplayJob>, StoreError>;

    /// `Pending -> Running`.
    async fn mark_running(&self, replay_id: Uuid, at: DateTime<Utc>) -> Result<bool, StoreError>;

    /// Checkpoints the replayed count of a `Running` job.
    async fn record_progress(&self, replay_id: Uuid, events_replayed: i64)
    -> Result<(), StoreError>;

    /// `Running -> Completed`.
    async fn mark_completed(
        &self,
        replay_id: Uuid,
        events_replayed: i64,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// `Pending | Running -> Failed`.
    async fn mark_failed(
        &self,
        replay_id: Uuid,
        events_replayed: i64,
        error: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// `Pending | Running -> Cancelled`.
    async fn mark_cancelled(
        &self,
        replay_id: Uuid,
        events_replayed: i64,
        cancelled_by: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;
}
