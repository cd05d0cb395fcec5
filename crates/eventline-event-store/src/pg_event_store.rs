//! `PostgreSQL` implementation of the `EventStore` trait.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, QueryBuilder, Transaction};
use tracing::debug;
use uuid::Uuid;

use eventline_core::error::StoreError;
use eventline_core::event::{AuditRecord, Event, EventCursor, LogPosition};
use eventline_core::replay::ReplayFilter;
use eventline_core::repository::{EventStore, UnitOfWork};

use crate::error::map_sqlx_error;

const EVENT_COLUMNS: &str = "event_id, event_type, aggregate_id, aggregate_type, version, \
     occurred_at, source, correlation_id, causation_id, user_id, payload, ingested_at, \
     source_topic, source_partition, source_offset";

#[derive(Debug, sqlx::FromRow)]
struct EventRow {
    event_id: Uuid,
    event_type: String,
    aggregate_id: String,
    aggregate_type: String,
    version: i64,
    occurred_at: DateTime<Utc>,
    source: String,
    correlation_id: Option<String>,
    causation_id: Option<String>,
    user_id: Option<String>,
    payload: serde_json::Value,
    ingested_at: DateTime<Utc>,
    source_topic: Option<String>,
    source_partition: Option<i32>,
    source_offset: Option<i64>,
}

impl From<EventRow> for Event {
    fn from(row: EventRow) -> Self {
        let origin = match (row.source_topic, row.source_partition, row.source_offset) {
            (Some(topic), Some(partition), Some(offset)) => Some(LogPosition {
                topic,
                partition,
                offset,
            }),
            _ => None,
        };
        Self {
            event_id: row.event_id,
            event_type: row.event_type,
            aggregate_id: row.aggregate_id,
            aggregate_type: row.aggregate_type,
            version: row.version,
            timestamp: row.occurred_at,
            source: row.source,
            correlation_id: row.correlation_id,
            causation_id: row.causation_id,
            user_id: row.user_id,
            payload: row.payload,
            ingested_at: row.ingested_at,
            origin,
        }
    }
}

/// PostgreSQL-backed event store.
#[derive(Debug, Clone)]
pub struct PgEventStore {
    pool: PgPool,
}

impl PgEventStore {
    /// Creates a new `PgEventStore`.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Appends the `WHERE` clause for `filter` to `builder`.
fn push_filter<'a>(builder: &mut QueryBuilder<'a, Postgres>, filter: &'a ReplayFilter) {
    builder.push(" WHERE TRUE");
    if let Some(aggregate_id) = &filter.aggregate_id {
        builder.push(" AND aggregate_id = ").push_bind(aggregate_id);
    }
    if let Some(aggregate_type) = &filter.aggregate_type {
        builder.push(" AND aggregate_type = ").push_bind(aggregate_type);
    }
    if !filter.event_types.is_empty() {
        builder
            .push(" AND event_type = ANY(")
            .push_bind(&filter.event_types)
            .push(")");
    }
    if let Some(from) = filter.from_timestamp {
        builder.push(" AND occurred_at >= ").push_bind(from);
    }
    if let Some(to) = filter.to_timestamp {
        builder.push(" AND occurred_at < ").push_bind(to);
    }
    if let Some(from) = filter.from_version {
        builder.push(" AND version >= ").push_bind(from);
    }
    if let Some(to) = filter.to_version {
        builder.push(" AND version <= ").push_bind(to);
    }
}

#[async_trait]
impl EventStore for PgEventStore {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, StoreError> {
        let tx = self.pool.begin().await.map_err(map_sqlx_error)?;
        Ok(Box::new(PgUnitOfWork { tx }))
    }

    async fn find_by_id(&self, event_id: Uuid) -> Result<Option<Event>, StoreError> {
        let sql = format!("SELECT {EVENT_COLUMNS} FROM events WHERE event_id = $1");
        let row = sqlx::query_as::<_, EventRow>(&sql)
            .bind(event_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(row.map(Event::from))
    }

    async fn load_stream(
        &self,
        aggregate_id: &str,
        aggregate_type: &str,
    ) -> Result<Vec<Event>, StoreError> {
        let sql = format!(
            "SELECT {EVENT_COLUMNS} FROM events \
             WHERE aggregate_id = $1 AND aggregate_type = $2 ORDER BY version"
        );
        let rows = sqlx::query_as::<_, EventRow>(&sql)
            .bind(aggregate_id)
            .bind(aggregate_type)
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(rows.into_iter().map(Event::from).collect())
    }

    async fn count_matching(&self, filter: &ReplayFilter) -> Result<i64, StoreError> {
        let mut builder = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM events");
        push_filter(&mut builder, filter);
        builder
            .build_query_scalar::<i64>()
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error)
    }

    async fn load_page(
        &self,
        filter: &ReplayFilter,
        after: Option<EventCursor>,
        limit: i64,
    ) -> Result<Vec<Event>, StoreError> {
        let mut builder = QueryBuilder::<Postgres>::new(format!("SELECT {EVENT_COLUMNS} FROM events"));
        push_filter(&mut builder, filter);
        if let Some(cursor) = after {
            builder
                .push(" AND (occurred_at, version, event_id) > (")
                .push_bind(cursor.timestamp)
                .push(", ")
                .push_bind(cursor.version)
                .push(", ")
                .push_bind(cursor.event_id)
                .push(")");
        }
        builder
            .push(" ORDER BY occurred_at, version, event_id LIMIT ")
            .push_bind(limit);

        let rows = builder
            .build_query_as::<EventRow>()
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(rows.into_iter().map(Event::from).collect())
    }
}

/// A unit of work backed by one database transaction.
pub struct PgUnitOfWork {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl UnitOfWork for PgUnitOfWork {
    async fn insert_event(&mut self, event: &Event) -> Result<(), StoreError> {
        let origin = event.origin.as_ref();
        sqlx::query(
            "INSERT INTO events (event_id, event_type, aggregate_id, aggregate_type, version, \
             occurred_at, source, correlation_id, causation_id, user_id, payload, ingested_at, \
             source_topic, source_partition, source_offset) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)",
        )
        .bind(event.event_id)
        .bind(&event.event_type)
        .bind(&event.aggregate_id)
        .bind(&event.aggregate_type)
        .bind(event.version)
        .bind(event.timestamp)
        .bind(&event.source)
        .bind(&event.correlation_id)
        .bind(&event.causation_id)
        .bind(&event.user_id)
        .bind(&event.payload)
        .bind(event.ingested_at)
        .bind(origin.map(|o| o.topic.as_str()))
        .bind(origin.map(|o| o.partition))
        .bind(origin.map(|o| o.offset))
        .execute(&mut *self.tx)
        .await
        .map_err(map_sqlx_error)?;

        debug!(event_id = %event.event_id, "inserted event row");
        Ok(())
    }

    async fn insert_audit(&mut self, record: &AuditRecord) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO event_audit_log (audit_id, event_id, action, details, recorded_at) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(record.audit_id)
        .bind(record.event_id)
        .bind(&record.action)
        .bind(&record.details)
        .bind(record.recorded_at)
        .execute(&mut *self.tx)
        .await
        .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit().await.map_err(map_sqlx_error)
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.rollback().await.map_err(map_sqlx_error)
    }
}
