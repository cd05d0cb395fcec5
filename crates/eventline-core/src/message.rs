//! Message log ports.
//!
//! The log is an external collaborator offering partition-ordered,
//! at-least-once delivery with manual offset commits. Adapters implement
//! [`LogConsumer`] for reading and [`LogPublisher`] for writing.

use async_trait::async_trait;

use crate::error::BrokerError;
use crate::event::LogPosition;

/// One message as delivered by the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogMessage {
    /// Partitioning key, normally the aggregate id.
    pub key: Option<String>,
    /// Raw message body.
    pub value: Vec<u8>,
    /// Topic the message was read from.
    pub topic: String,
    /// Partition within the topic.
    pub partition: i32,
    /// Offset within the partition.
    pub offset: i64,
}

impl LogMessage {
    /// Returns the message's coordinates in the log.
    #[must_use]
    pub fn position(&self) -> LogPosition {
        LogPosition {
            topic: self.topic.clone(),
            partition: self.partition,
            offset: self.offset,
        }
    }
}

/// A consumer-group member reading a fixed topic set.
///
/// Implementations deliver messages of one partition in offset order and
/// never advance the committed position on their own.
#[async_trait]
pub trait LogConsumer: Send {
    /// Subscribes to `topics`, positioning at the group's committed offsets.
    async fn subscribe(&mut self, topics: &[String]) -> Result<(), BrokerError>;

    /// Returns up to `max_messages` messages past the current read position.
    /// An empty vector means nothing is available right now.
    async fn poll(&mut self, max_messages: usize) -> Result<Vec<LogMessage>, BrokerError>;

    /// Commits `message` as consumed: the group resumes after its offset.
    async fn commit(&mut self, message: &LogMessage) -> Result<(), BrokerError>;

    /// Leaves the group and releases the connection.
    async fn close(&mut self) -> Result<(), BrokerError>;
}

/// Writes messages to the log.
#[async_trait]
pub trait LogPublisher: Send + Sync {
    /// Appends `value` to `topic`; the partition is derived from `key`.
    async fn publish(
        &self,
        topic: &str,
        key: Option<&str>,
        value: &[u8],
    ) -> Result<LogPosition, BrokerError>;
}
