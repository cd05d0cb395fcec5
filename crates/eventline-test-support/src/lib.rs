//! Shared test doubles and utilities for the Eventline pipeline.

mod clock;
mod dead_letter;
mod event_store;
mod fixtures;
mod message_log;
mod metrics;
mod replay_jobs;

pub use clock::FixedClock;
pub use dead_letter::{FailingDeadLetterSink, InMemoryDeadLetterSink};
pub use event_store::{FailingEventStore, InMemoryEventStore};
pub use fixtures::{fixed_now, log_message, order_created_message, stored_event};
pub use message_log::{PublishedMessage, RecordingLogPublisher, ScriptedLogConsumer};
pub use metrics::RecordingMetrics;
pub use replay_jobs::InMemoryReplayJobRepository;
