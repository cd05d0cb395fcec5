//! Shared application state.

use std::sync::Arc;

use eventline_ingestion::application::dead_letters::DeadLetterReprocessor;
use eventline_replay::coordinator::ReplayCoordinator;
use metrics_exporter_prometheus::PrometheusHandle;

/// Application state shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Replay submission, status and cancellation.
    pub replays: Arc<ReplayCoordinator>,
    /// Dead-letter inspection and reprocessing.
    pub dead_letters: Arc<DeadLetterReprocessor>,
    /// Renders the Prometheus scrape body; absent when no recorder is
    /// installed.
    pub metrics: Option<PrometheusHandle>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("replays", &self.replays)
            .field("dead_letters", &self.dead_letters)
            .field("metrics", &self.metrics.is_some())
            .finish()
    }
}

impl AppState {
    /// Create new application state.
    #[must_use]
    pub fn new(
        replays: Arc<ReplayCoordinator>,
        dead_letters: Arc<DeadLetterReprocessor>,
        metrics: Option<PrometheusHandle>,
    ) -> Self {
        Self {
            replays,
            dead_letters,
            metrics,
        }
    }
}
