//! `PostgreSQL` implementation of the `DeadLetterSink` trait.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use eventline_core::dead_letter::{DeadLetterEntry, FailureKind, NewDeadLetter};
use eventline_core::error::StoreError;
use eventline_core::event::LogPosition;
use eventline_core::repository::DeadLetterSink;

use crate::error::map_sqlx_error;

const DEAD_LETTER_COLUMNS: &str = "id, message_key, raw_message, payload_sha256, source_topic, \
     source_partition, source_offset, failure_kind, error_detail, retry_count, last_retry_at, \
     last_error, resolved, resolved_at, resolved_by, failed_at";

#[derive(Debug, sqlx::FromRow)]
struct DeadLetterRow {
    id: Uuid,
    message_key: Option<String>,
    raw_message: Vec<u8>,
    payload_sha256: String,
    source_topic: String,
    source_partition: i32,
    source_offset: i64,
    failure_kind: String,
    error_detail: String,
    retry_count: i32,
    last_retry_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
    resolved: bool,
    resolved_at: Option<DateTime<Utc>>,
    resolved_by: Option<String>,
    failed_at: DateTime<Utc>,
}

impl TryFrom<DeadLetterRow> for DeadLetterEntry {
    type Error = StoreError;

    fn try_from(row: DeadLetterRow) -> Result<Self, Self::Error> {
        let failure_kind: FailureKind = row
            .failure_kind
            .parse()
            .map_err(|e| StoreError::Serialization(format!("{e}")))?;
        Ok(Self {
            id: row.id,
            message_key: row.message_key,
            raw_message: row.raw_message,
            payload_sha256: row.payload_sha256,
            origin: LogPosition {
                topic: row.source_topic,
                partition: row.source_partition,
                offset: row.source_offset,
            },
            failure_kind,
            error_detail: row.error_detail,
            retry_count: row.retry_count,
            last_retry_at: row.last_retry_at,
            last_error: row.last_error,
            resolved: row.resolved,
            resolved_at: row.resolved_at,
            resolved_by: row.resolved_by,
            failed_at: row.failed_at,
        })
    }
}

/// PostgreSQL-backed dead-letter sink.
#[derive(Debug, Clone)]
pub struct PgDeadLetterSink {
    pool: PgPool,
}

impl PgDeadLetterSink {
    /// Creates a new `PgDeadLetterSink`.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn exists(&self, id: Uuid) -> Result<bool, StoreError> {
        sqlx::query_scalar::<_, bool>("SELECT EXISTS (SELECT 1 FROM dead_letter_entries WHERE id = $1)")
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error)
    }
}

#[async_trait]
impl DeadLetterSink for PgDeadLetterSink {
    async fn record(&self, entry: &NewDeadLetter) -> Result<Uuid, StoreError> {
        let id = Uuid::now_v7();
        sqlx::query(
            "INSERT INTO dead_letter_entries (id, message_key, raw_message, payload_sha256, \
             source_topic, source_partition, source_offset, failure_kind, error_detail, failed_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(id)
        .bind(&entry.message_key)
        .bind(&entry.raw_message)
        .bind(&entry.payload_sha256)
        .bind(&entry.origin.topic)
        .bind(entry.origin.partition)
        .bind(entry.origin.offset)
        .bind(entry.failure_kind.as_str())
        .bind(&entry.error_detail)
        .bind(entry.failed_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(id)
    }

    async fn get(&self, id: Uuid) -> Result<Option<DeadLetterEntry>, StoreError> {
        let sql = format!("SELECT {DEAD_LETTER_COLUMNS} FROM dead_letter_entries WHERE id = $1");
        sqlx::query_as::<_, DeadLetterRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?
            .map(DeadLetterEntry::try_from)
            .transpose()
    }

    async fn list_unresolved(&self, limit: i64) -> Result<Vec<DeadLetterEntry>, StoreError> {
        let sql = format!(
            "SELECT {DEAD_LETTER_COLUMNS} FROM dead_letter_entries \
             WHERE NOT resolved ORDER BY failed_at, id LIMIT $1"
        );
        sqlx::query_as::<_, DeadLetterRow>(&sql)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)?
            .into_iter()
            .map(DeadLetterEntry::try_from)
            .collect()
    }

    async fn record_retry(
        &self,
        id: Uuid,
        error: &str,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE dead_letter_entries \
             SET retry_count = retry_count + 1, last_retry_at = $2, last_error = $3 \
             WHERE id = $1",
        )
        .bind(id)
        .bind(at)
        .bind(error)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("dead-letter entry {id}")));
        }
        Ok(())
    }

    async fn resolve(
        &self,
        id: Uuid,
        resolved_by: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE dead_letter_entries \
             SET resolved = TRUE, resolved_at = $2, resolved_by = $3 \
             WHERE id = $1 AND NOT resolved",
        )
        .bind(id)
        .bind(at)
        .bind(resolved_by)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        if result.rows_affected() == 1 {
            return Ok(true);
        }
        if self.exists(id).await? {
            Ok(false)
        } else {
            Err(StoreError::NotFound(format!("dead-letter entry {id}")))
        }
    }
}
