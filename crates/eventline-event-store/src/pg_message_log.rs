//! `PostgreSQL`-backed partitioned message log.
//!
//! Topics are declared in `log_topics` with a fixed partition count. Each
//! partition is an offset-ordered sequence in `log_messages`; consumer group
//! progress lives in `consumer_offsets` and only moves on an explicit
//! [`LogConsumer::commit`].

use std::collections::BTreeMap;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use sqlx::PgPool;
use tracing::{debug, info, warn};

use eventline_core::error::BrokerError;
use eventline_core::event::LogPosition;
use eventline_core::message::{LogConsumer, LogMessage, LogPublisher};

const PUBLISH_ATTEMPTS: usize = 5;

fn map_broker_error(err: sqlx::Error) -> BrokerError {
    match err {
        sqlx::Error::Configuration(_) | sqlx::Error::Migrate(_) => {
            BrokerError::Fatal(err.to_string())
        }
        other => BrokerError::Transient(other.to_string()),
    }
}

/// Picks the partition for `key`. Keyless messages land on partition 0.
#[must_use]
pub fn partition_for_key(key: Option<&str>, partitions: i32) -> i32 {
    let Some(key) = key else {
        return 0;
    };
    let digest = Sha256::digest(key.as_bytes());
    let bucket = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);
    let partitions = u32::try_from(partitions.max(1)).unwrap_or(1);
    // `bucket % partitions` is below `partitions`, which came from an i32.
    i32::try_from(bucket % partitions).unwrap_or(0)
}

async fn topic_partitions(pool: &PgPool, topic: &str) -> Result<Option<i32>, BrokerError> {
    sqlx::query_scalar::<_, i32>("SELECT partitions FROM log_topics WHERE topic = $1")
        .bind(topic)
        .fetch_optional(pool)
        .await
        .map_err(map_broker_error)
}

#[derive(Debug, sqlx::FromRow)]
struct LogMessageRow {
    message_key: Option<String>,
    value: Vec<u8>,
    log_offset: i64,
}

/// Publishes messages into the PostgreSQL log.
#[derive(Debug, Clone)]
pub struct PgLogPublisher {
    pool: PgPool,
}

impl PgLogPublisher {
    /// Creates a new `PgLogPublisher`.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Declares `topic` with `partitions` partitions. Existing topics are
    /// left unchanged.
    ///
    /// # Errors
    ///
    /// Returns `BrokerError` if the declaration cannot be written.
    pub async fn create_topic(&self, topic: &str, partitions: i32) -> Result<(), BrokerError> {
        sqlx::query(
            "INSERT INTO log_topics (topic, partitions) VALUES ($1, $2) \
             ON CONFLICT (topic) DO NOTHING",
        )
        .bind(topic)
        .bind(partitions)
        .execute(&self.pool)
        .await
        .map_err(map_broker_error)?;
        Ok(())
    }
}

#[async_trait]
impl LogPublisher for PgLogPublisher {
    async fn publish(
        &self,
        topic: &str,
        key: Option<&str>,
        value: &[u8],
    ) -> Result<LogPosition, BrokerError> {
        let partitions = topic_partitions(&self.pool, topic)
            .await?
            .ok_or_else(|| BrokerError::Fatal(format!("unknown topic {topic}")))?;
        let partition = partition_for_key(key, partitions);

        // Offsets are allocated as MAX + 1; concurrent publishers to the same
        // partition collide on the primary key and retry.
        for attempt in 1..=PUBLISH_ATTEMPTS {
            let result = sqlx::query_scalar::<_, i64>(
                "INSERT INTO log_messages (topic, partition_id, log_offset, message_key, value) \
                 SELECT $1, $2, COALESCE(MAX(log_offset) + 1, 0), $3, $4 \
                 FROM log_messages WHERE topic = $1 AND partition_id = $2 \
                 RETURNING log_offset",
            )
            .bind(topic)
            .bind(partition)
            .bind(key)
            .bind(value)
            .fetch_one(&self.pool)
            .await;

            match result {
                Ok(offset) => {
                    return Ok(LogPosition {
                        topic: topic.to_owned(),
                        partition,
                        offset,
                    });
                }
                Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                    debug!(topic, partition, attempt, "offset allocation collided, retrying");
                }
                Err(err) => return Err(map_broker_error(err)),
            }
        }

        Err(BrokerError::Transient(format!(
            "could not allocate an offset on {topic}/{partition} after {PUBLISH_ATTEMPTS} attempts"
        )))
    }
}

/// A consumer group member with a static partition assignment.
#[derive(Debug)]
pub struct PgLogConsumer {
    pool: PgPool,
    group_id: String,
    partitions: Vec<i32>,
    /// Next offset to read, per `(topic, partition)`.
    positions: BTreeMap<(String, i32), i64>,
    closed: bool,
}

impl PgLogConsumer {
    /// Creates a consumer for `group_id` reading `partitions` of every
    /// subscribed topic.
    #[must_use]
    pub fn new(pool: PgPool, group_id: impl Into<String>, partitions: Vec<i32>) -> Self {
        Self {
            pool,
            group_id: group_id.into(),
            partitions,
            positions: BTreeMap::new(),
            closed: false,
        }
    }

    async fn committed_offset(&self, topic: &str, partition: i32) -> Result<i64, BrokerError> {
        let committed = sqlx::query_scalar::<_, i64>(
            "SELECT next_offset FROM consumer_offsets \
             WHERE group_id = $1 AND topic = $2 AND partition_id = $3",
        )
        .bind(&self.group_id)
        .bind(topic)
        .bind(partition)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_broker_error)?;
        Ok(committed.unwrap_or(0))
    }
}

#[async_trait]
impl LogConsumer for PgLogConsumer {
    async fn subscribe(&mut self, topics: &[String]) -> Result<(), BrokerError> {
        if topics.is_empty() {
            return Err(BrokerError::Fatal("no topics to subscribe to".to_owned()));
        }
        self.positions.clear();
        for topic in topics {
            let partitions = topic_partitions(&self.pool, topic)
                .await?
                .ok_or_else(|| BrokerError::Fatal(format!("unknown topic {topic}")))?;
            for &partition in &self.partitions {
                if partition < 0 || partition >= partitions {
                    return Err(BrokerError::Fatal(format!(
                        "topic {topic} has no partition {partition}"
                    )));
                }
                let next = self.committed_offset(topic, partition).await?;
                self.positions.insert((topic.clone(), partition), next);
            }
        }
        self.closed = false;
        info!(
            group_id = %self.group_id,
            topics = ?topics,
            partitions = ?self.partitions,
            "subscribed to message log"
        );
        Ok(())
    }

    async fn poll(&mut self, max_messages: usize) -> Result<Vec<LogMessage>, BrokerError> {
        if self.closed || self.positions.is_empty() {
            return Err(BrokerError::Fatal("consumer is not subscribed".to_owned()));
        }

        // Positions only move once every partition was read, so a failed
        // poll redelivers the whole batch.
        let mut batch = Vec::new();
        let mut advanced = Vec::new();
        for ((topic, partition), &next) in &self.positions {
            let remaining = max_messages.saturating_sub(batch.len());
            if remaining == 0 {
                break;
            }
            let rows = sqlx::query_as::<_, LogMessageRow>(
                "SELECT message_key, value, log_offset FROM log_messages \
                 WHERE topic = $1 AND partition_id = $2 AND log_offset >= $3 \
                 ORDER BY log_offset LIMIT $4",
            )
            .bind(topic)
            .bind(partition)
            .bind(next)
            .bind(i64::try_from(remaining).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await
            .map_err(map_broker_error)?;

            if let Some(last) = rows.last() {
                advanced.push(((topic.clone(), *partition), last.log_offset + 1));
            }
            batch.extend(rows.into_iter().map(|row| LogMessage {
                key: row.message_key,
                value: row.value,
                topic: topic.clone(),
                partition: *partition,
                offset: row.log_offset,
            }));
        }
        self.positions.extend(advanced);
        Ok(batch)
    }

    async fn commit(&mut self, message: &LogMessage) -> Result<(), BrokerError> {
        sqlx::query(
            "INSERT INTO consumer_offsets (group_id, topic, partition_id, next_offset, committed_at) \
             VALUES ($1, $2, $3, $4, NOW()) \
             ON CONFLICT (group_id, topic, partition_id) DO UPDATE \
             SET next_offset = GREATEST(consumer_offsets.next_offset, EXCLUDED.next_offset), \
                 committed_at = NOW()",
        )
        .bind(&self.group_id)
        .bind(&message.topic)
        .bind(message.partition)
        .bind(message.offset + 1)
        .execute(&self.pool)
        .await
        .map_err(map_broker_error)?;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), BrokerError> {
        if self.closed {
            warn!(group_id = %self.group_id, "consumer already closed");
            return Ok(());
        }
        self.closed = true;
        self.positions.clear();
        info!(group_id = %self.group_id, "closed message log consumer");
        Ok(())
    }
}
