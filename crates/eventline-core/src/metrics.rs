//! Metrics sink abstraction and metric names.

/// Messages committed as new events.
pub const EVENTS_PROCESSED: &str = "eventline_events_processed_total";
/// Messages recognised as already committed.
pub const EVENTS_DUPLICATE: &str = "eventline_events_duplicate_total";
/// Messages routed to the dead-letter sink, tagged by classification.
pub const EVENTS_FAILED: &str = "eventline_events_failed_total";
/// Transient errors while polling or committing.
pub const CONSUME_ERRORS: &str = "eventline_consume_errors_total";
/// Dead-letter writes that themselves failed.
pub const DEAD_LETTER_WRITE_FAILURES: &str = "eventline_dead_letter_write_failures_total";
/// Wall time spent processing one message.
pub const PROCESSING_DURATION: &str = "eventline_event_processing_duration_seconds";
/// Replay jobs reaching a terminal state, tagged by status.
pub const REPLAY_JOBS: &str = "eventline_replay_jobs_total";
/// Events handed to a replay destination.
pub const REPLAY_EVENTS_DISPATCHED: &str = "eventline_replay_events_dispatched_total";

/// Label set attached to a metric observation.
pub type Labels<'a> = &'a [(&'static str, String)];

/// Process-wide sink for counters and histograms.
///
/// Installed once at start-up and never reset while the process runs.
pub trait MetricsSink: Send + Sync {
    /// Increments the counter `name` by one.
    fn increment_counter(&self, name: &'static str, labels: Labels<'_>);

    /// Records `value` into the histogram `name`.
    fn record_histogram(&self, name: &'static str, value: f64, labels: Labels<'_>);
}

/// A sink that discards every observation.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn increment_counter(&self, _name: &'static str, _labels: Labels<'_>) {}

    fn record_histogram(&self, _name: &'static str, _value: f64, _labels: Labels<'_>) {}
}
