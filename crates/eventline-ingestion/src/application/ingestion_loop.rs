//! The consume loop for one consumer-group member.
//!
//! Messages are processed strictly one at a time in delivery order. A
//! message's offset is committed only after the processor returned a
//! terminal outcome for it, dead-lettered messages included.

use std::sync::Arc;
use std::time::Duration;

use eventline_core::error::BrokerError;
use eventline_core::message::{LogConsumer, LogMessage};
use eventline_core::metrics::{CONSUME_ERRORS, MetricsSink};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};

use super::processor::{EventProcessor, ProcessOutcome};

/// Fatal termination of the ingestion loop. The host is expected to exit
/// and be restarted.
#[derive(Debug, Error)]
pub enum IngestionError {
    /// The broker reported an unrecoverable error.
    #[error("fatal broker error: {0}")]
    Broker(#[source] BrokerError),
}

/// Tuning for one ingestion loop.
#[derive(Debug, Clone)]
pub struct IngestionConfig {
    /// Topics to subscribe to.
    pub topics: Vec<String>,
    /// Consumer group the loop commits offsets under.
    pub consumer_group: String,
    /// Upper bound on messages fetched per poll.
    pub poll_batch_size: usize,
    /// Pause after a poll that returned nothing.
    pub poll_interval: Duration,
    /// First delay after a transient broker error.
    pub initial_backoff: Duration,
    /// Ceiling for the doubling backoff delay.
    pub max_backoff: Duration,
    /// Attempts per offset commit before giving up on it.
    pub commit_attempts: u32,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            topics: vec!["business-events".to_owned()],
            consumer_group: "eventline-ingestion".to_owned(),
            poll_batch_size: 100,
            poll_interval: Duration::from_millis(500),
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(30),
            commit_attempts: 3,
        }
    }
}

/// Where the loop currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    /// Waiting for the next poll.
    Idle,
    /// Fetching a batch.
    Polling,
    /// Running the processor on one message.
    Processing,
    /// Committing the offset of the processed message.
    Committing,
    /// Consumer closed; the loop has returned.
    Stopped,
}

/// Counters for one run of the loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestionStats {
    /// Messages stored as new events.
    pub committed: u64,
    /// Messages recognised as already stored.
    pub duplicates: u64,
    /// Messages routed to the dead-letter sink.
    pub dead_lettered: u64,
    /// Transient poll and commit errors.
    pub consume_errors: u64,
}

/// Doubling delay between retries, capped at `max`.
#[derive(Debug)]
struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            current: initial,
        }
    }

    fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    fn reset(&mut self) {
        self.current = self.initial;
    }
}

/// Waits for `delay` or a shutdown signal. Returns `true` on shutdown.
async fn sleep_or_shutdown(delay: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    if *shutdown.borrow() {
        return true;
    }
    tokio::select! {
        () = tokio::time::sleep(delay) => *shutdown.borrow(),
        changed = shutdown.changed() => changed.is_err() || *shutdown.borrow(),
    }
}

/// Feeds one consumer's messages through the event processor.
pub struct IngestionLoop {
    consumer: Box<dyn LogConsumer>,
    processor: Arc<EventProcessor>,
    metrics: Arc<dyn MetricsSink>,
    config: IngestionConfig,
    state: LoopState,
    stats: IngestionStats,
}

impl std::fmt::Debug for IngestionLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IngestionLoop")
            .field("config", &self.config)
            .field("state", &self.state)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

impl IngestionLoop {
    /// Creates a loop over `consumer`. Nothing happens until [`run`](Self::run).
    #[must_use]
    pub fn new(
        consumer: Box<dyn LogConsumer>,
        processor: Arc<EventProcessor>,
        metrics: Arc<dyn MetricsSink>,
        config: IngestionConfig,
    ) -> Self {
        Self {
            consumer,
            processor,
            metrics,
            config,
            state: LoopState::Idle,
            stats: IngestionStats::default(),
        }
    }

    /// Current position in the state machine.
    #[must_use]
    pub fn state(&self) -> LoopState {
        self.state
    }

    /// Subscribes, then polls and processes until `shutdown` turns `true`.
    ///
    /// On shutdown the in-flight message is finished and committed before
    /// the consumer is closed.
    ///
    /// # Errors
    ///
    /// Returns [`IngestionError::Broker`] when the broker reports a fatal
    /// error; the consumer is closed first.
    #[instrument(skip_all, fields(group = %self.config.consumer_group))]
    pub async fn run(
        mut self,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<IngestionStats, IngestionError> {
        let mut backoff = Backoff::new(self.config.initial_backoff, self.config.max_backoff);

        loop {
            match self.consumer.subscribe(&self.config.topics).await {
                Ok(()) => break,
                Err(e) if e.is_fatal() => return Err(self.fail(e).await),
                Err(e) => {
                    self.record_consume_error(&e, "subscribe");
                    if sleep_or_shutdown(backoff.next_delay(), &mut shutdown).await {
                        return Ok(self.stop().await);
                    }
                }
            }
        }
        backoff.reset();
        info!(topics = ?self.config.topics, "ingestion loop subscribed");

        'polling: loop {
            if *shutdown.borrow() {
                break;
            }

            self.state = LoopState::Polling;
            let batch = match self.consumer.poll(self.config.poll_batch_size.max(1)).await {
                Ok(batch) => batch,
                Err(e) if e.is_fatal() => return Err(self.fail(e).await),
                Err(e) => {
                    self.record_consume_error(&e, "poll");
                    self.state = LoopState::Idle;
                    if sleep_or_shutdown(backoff.next_delay(), &mut shutdown).await {
                        break;
                    }
                    continue;
                }
            };
            backoff.reset();

            if batch.is_empty() {
                self.state = LoopState::Idle;
                if sleep_or_shutdown(self.config.poll_interval, &mut shutdown).await {
                    break;
                }
                continue;
            }

            debug!(messages = batch.len(), "polled batch");
            for message in batch {
                self.state = LoopState::Processing;
                let outcome = self.processor.process(&message).await;
                self.tally(outcome);

                self.state = LoopState::Committing;
                if let Err(e) = self.commit(&message, &mut backoff).await {
                    return Err(self.fail(e).await);
                }

                if *shutdown.borrow() {
                    break 'polling;
                }
            }
        }

        Ok(self.stop().await)
    }

    fn tally(&mut self, outcome: ProcessOutcome) {
        match outcome {
            ProcessOutcome::Committed { .. } => self.stats.committed += 1,
            ProcessOutcome::Duplicate { .. } => self.stats.duplicates += 1,
            ProcessOutcome::DeadLettered { .. } => self.stats.dead_lettered += 1,
        }
    }

    /// Commits `message`, retrying transient failures. A commit that still
    /// fails is dropped: the message is redelivered later and recognised as
    /// a duplicate.
    async fn commit(
        &mut self,
        message: &LogMessage,
        backoff: &mut Backoff,
    ) -> Result<(), BrokerError> {
        let attempts = self.config.commit_attempts.max(1);
        for attempt in 1..=attempts {
            match self.consumer.commit(message).await {
                Ok(()) => {
                    backoff.reset();
                    return Ok(());
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    self.record_consume_error(&e, "commit");
                    if attempt < attempts {
                        tokio::time::sleep(backoff.next_delay()).await;
                    }
                }
            }
        }
        warn!(
            topic = %message.topic,
            partition = message.partition,
            offset = message.offset,
            attempts,
            "giving up on offset commit; message will be redelivered"
        );
        Ok(())
    }

    fn record_consume_error(&mut self, err: &BrokerError, operation: &'static str) {
        self.stats.consume_errors += 1;
        for topic in &self.config.topics {
            self.metrics
                .increment_counter(CONSUME_ERRORS, &[("topic", topic.clone())]);
        }
        warn!(error = %err, operation, "transient broker error; backing off");
    }

    async fn close_consumer(&mut self) {
        if let Err(e) = self.consumer.close().await {
            warn!(error = %e, "failed to close consumer");
        }
        self.state = LoopState::Stopped;
    }

    async fn stop(mut self) -> IngestionStats {
        self.close_consumer().await;
        info!(stats = ?self.stats, "ingestion loop stopped");
        self.stats
    }

    async fn fail(mut self, err: BrokerError) -> IngestionError {
        error!(error = %err, "fatal broker error; stopping ingestion loop");
        self.close_consumer().await;
        IngestionError::Broker(err)
    }
}
