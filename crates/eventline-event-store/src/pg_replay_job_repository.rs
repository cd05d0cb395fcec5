//! `PostgreSQL` implementation of the `ReplayJobRepository` trait.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use eventline_core::error::StoreError;
use eventline_core::replay::{ReplayJob, ReplayStatus};
use eventline_core::repository::ReplayJobRepository;

use crate::error::map_sqlx_error;

const REPLAY_JOB_COLUMNS: &str = "replay_id, filter, destination, status, total_events, \
     events_replayed, requested_by, cancelled_by, error, created_at, started_at, completed_at";

#[derive(Debug, sqlx::FromRow)]
struct ReplayJobRow {
    replay_id: Uuid,
    filter: serde_json::Value,
    destination: serde_json::Value,
    status: String,
    total_events: i64,
    events_replayed: i64,
    requested_by: Option<String>,
    cancelled_by: Option<String>,
    error: Option<String>,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
}

impl TryFrom<ReplayJobRow> for ReplayJob {
    type Error = StoreError;

    fn try_from(row: ReplayJobRow) -> Result<Self, Self::Error> {
        let serialization = |e: &dyn std::fmt::Display| StoreError::Serialization(e.to_string());
        Ok(Self {
            replay_id: row.replay_id,
            filter: serde_json::from_value(row.filter).map_err(|e| serialization(&e))?,
            destination: serde_json::from_value(row.destination).map_err(|e| serialization(&e))?,
            status: row.status.parse().map_err(|e| serialization(&e))?,
            total_events: row.total_events,
            events_replayed: row.events_replayed,
            requested_by: row.requested_by,
            cancelled_by: row.cancelled_by,
            error: row.error,
            created_at: row.created_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
        })
    }
}

/// PostgreSQL-backed replay job repository.
#[derive(Debug, Clone)]
pub struct PgReplayJobRepository {
    pool: PgPool,
}

impl PgReplayJobRepository {
    /// Creates a new `PgReplayJobRepository`.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Applies a terminal transition from any of `from`.
    #[allow(clippy::too_many_arguments)]
    async fn finish(
        &self,
        replay_id: Uuid,
        from: &[ReplayStatus],
        to: ReplayStatus,
        events_replayed: i64,
        error: Option<&str>,
        cancelled_by: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let from: Vec<&str> = from.iter().map(|s| s.as_str()).collect();
        let result = sqlx::query(
            "UPDATE replay_jobs \
             SET status = $2, events_replayed = $3, error = $4, cancelled_by = $5, completed_at = $6 \
             WHERE replay_id = $1 AND status = ANY($7)",
        )
        .bind(replay_id)
        .bind(to.as_str())
        .bind(events_replayed)
        .bind(error)
        .bind(cancelled_by)
        .bind(at)
        .bind(&from)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(result.rows_affected() == 1)
    }
}

#[async_trait]
impl ReplayJobRepository for PgReplayJobRepository {
    async fn insert(&self, job: &ReplayJob) -> Result<(), StoreError> {
        let filter = serde_json::to_value(&job.filter)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        let destination = serde_json::to_value(&job.destination)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        sqlx::query(
            "INSERT INTO replay_jobs (replay_id, filter, destination, status, total_events, \
             events_replayed, requested_by, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(job.replay_id)
        .bind(filter)
        .bind(destination)
        .bind(job.status.as_str())
        .bind(job.total_events)
        .bind(job.events_replayed)
        .bind(&job.requested_by)
        .bind(job.created_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn get(&self, replay_id: Uuid) -> Result<Option<ReplayJob>, StoreError> {
        let sql = format!("SELECT {REPLAY_JOB_COLUMNS} FROM replay_jobs WHERE replay_id = $1");
        sqlx::query_as::<_, ReplayJobRow>(&sql)
            .bind(replay_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?
            .map(ReplayJob::try_from)
            .transpose()
    }

    async fn list_active(&self) -> Result<Vec<ReplayJob>, StoreError> {
        let sql = format!(
            "SELECT {REPLAY_JOB_COLUMNS} FROM replay_jobs \
             WHERE status IN ('PENDING', 'RUNNING') ORDER BY created_at"
        );
        sqlx::query_as::<_, ReplayJobRow>(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)?
            .into_iter()
            .map(ReplayJob::try_from)
            .collect()
    }

    async fn mark_running(&self, replay_id: Uuid, at: DateTime<Utc>) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE replay_jobs SET status = 'RUNNING', started_at = $2 \
             WHERE replay_id = $1 AND status = 'PENDING'",
        )
        .bind(replay_id)
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(result.rows_affected() == 1)
    }

    async fn record_progress(
        &self,
        replay_id: Uuid,
        events_replayed: i64,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE replay_jobs SET events_replayed = $2 \
             WHERE replay_id = $1 AND status = 'RUNNING'",
        )
        .bind(replay_id)
        .bind(events_replayed)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn mark_completed(
        &self,
        replay_id: Uuid,
        events_replayed: i64,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        self.finish(
            replay_id,
            &[ReplayStatus::Running],
            ReplayStatus::Completed,
            events_replayed,
            None,
            None,
            at,
        )
        .await
    }

    async fn mark_failed(
        &self,
        replay_id: Uuid,
        events_replayed: i64,
        error: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        self.finish(
            replay_id,
            &[ReplayStatus::Pending, ReplayStatus::Running],
            ReplayStatus::Failed,
            events_replayed,
            Some(error),
            None,
            at,
        )
        .await
    }

    async fn mark_cancelled(
        &self,
        replay_id: Uuid,
        events_replayed: i64,
        cancelled_by: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        self.finish(
            replay_id,
            &[ReplayStatus::Pending, ReplayStatus::Running],
            ReplayStatus::Cancelled,
            events_replayed,
            None,
            Some(cancelled_by),
            at,
        )
        .await
    }
}
