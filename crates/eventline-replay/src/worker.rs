//! The background task driving one replay job.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use eventline_core::clock::Clock;
use eventline_core::event::Event;
use eventline_core::metrics::{MetricsSink, REPLAY_EVENTS_DISPATCHED, REPLAY_JOBS};
use eventline_core::replay::{ReplayFilter, ReplayStatus};
use eventline_core::repository::{EventStore, ReplayJobRepository};
use futures::FutureExt;
use tokio::sync::watch;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::coordinator::{ReplayConfig, WORKER_PANICKED};
use crate::dispatch::EventDispatcher;

fn panic_detail(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        format!("{WORKER_PANICKED}: {message}")
    } else if let Some(message) = panic.downcast_ref::<String>() {
        format!("{WORKER_PANICKED}: {message}")
    } else {
        WORKER_PANICKED.to_owned()
    }
}

/// How a worker run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Finish {
    Completed { replayed: i64 },
    Cancelled { replayed: i64, by: String },
    Failed { replayed: i64, error: String },
    /// The job was not `PENDING` when the worker picked it up.
    Skipped(Option<ReplayStatus>),
}

pub(crate) struct ReplayWorker {
    pub(crate) replay_id: Uuid,
    pub(crate) filter: ReplayFilter,
    pub(crate) store: Arc<dyn EventStore>,
    pub(crate) jobs: Arc<dyn ReplayJobRepository>,
    pub(crate) dispatcher: Arc<dyn EventDispatcher>,
    pub(crate) metrics: Arc<dyn MetricsSink>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) config: ReplayConfig,
    pub(crate) cancel: watch::Receiver<Option<String>>,
}

impl ReplayWorker {
    fn cancellation(&self) -> Option<String> {
        self.cancel.borrow().clone()
    }

    #[instrument(skip_all, fields(replay_id = %self.replay_id))]
    pub(crate) async fn run(self) {
        let finish = match AssertUnwindSafe(self.execute()).catch_unwind().await {
            Ok(finish) => finish,
            Err(panic) => {
                // Progress up to the last checkpoint is all that survives.
                let replayed = self
                    .jobs
                    .get(self.replay_id)
                    .await
                    .ok()
                    .flatten()
                    .map_or(0, |job| job.events_replayed);
                Finish::Failed {
                    replayed,
                    error: panic_detail(panic.as_ref()),
                }
            }
        };
        self.finish(finish).await;
    }

    async fn execute(&self) -> Finish {
        if let Some(by) = self.cancellation() {
            return Finish::Cancelled { replayed: 0, by };
        }

        match self.jobs.mark_running(self.replay_id, self.clock.now()).await {
            Ok(true) => info!("replay started"),
            Ok(false) => {
                let status = self
                    .jobs
                    .get(self.replay_id)
                    .await
                    .ok()
                    .flatten()
                    .map(|j| j.status);
                return Finish::Skipped(status);
            }
            Err(e) => {
                return Finish::Failed {
                    replayed: 0,
                    error: format!("failed to start: {e}"),
                };
            }
        }

        let mut replayed: i64 = 0;
        let mut after = None;
        loop {
            let page = match self
                .store
                .load_page(&self.filter, after, self.config.page_size)
                .await
            {
                Ok(page) => page,
                Err(e) => {
                    return Finish::Failed {
                        replayed,
                        error: format!("failed to read events: {e}"),
                    };
                }
            };

            for event in &page {
                if let Some(by) = self.cancellation() {
                    return Finish::Cancelled { replayed, by };
                }
                if let Err(e) = self.dispatcher.dispatch(event).await {
                    return Finish::Failed {
                        replayed,
                        error: format!("dispatch of event {} failed: {e}", event.event_id),
                    };
                }
                replayed += 1;
                self.metrics.increment_counter(REPLAY_EVENTS_DISPATCHED, &[]);
                if replayed % self.config.checkpoint_interval == 0 {
                    self.checkpoint(replayed).await;
                }
            }

            if i64::try_from(page.len()).unwrap_or(i64::MAX) < self.config.page_size {
                break;
            }
            after = page.last().map(Event::cursor);
        }

        Finish::Completed { replayed }
    }

    async fn checkpoint(&self, replayed: i64) {
        if let Err(e) = self.jobs.record_progress(self.replay_id, replayed).await {
            warn!(error = %e, replayed, "failed to checkpoint replay progress");
        }
    }

    async fn finish(&self, finish: Finish) {
        let now = self.clock.now();
        let (status, result) = match &finish {
            Finish::Completed { replayed } => (
                ReplayStatus::Completed,
                self.jobs.mark_completed(self.replay_id, *replayed, now).await,
            ),
            Finish::Cancelled { replayed, by } => (
                ReplayStatus::Cancelled,
                self.jobs
                    .mark_cancelled(self.replay_id, *replayed, by, now)
                    .await,
            ),
            Finish::Failed { replayed, error } => (
                ReplayStatus::Failed,
                self.jobs
                    .mark_failed(self.replay_id, *replayed, error, now)
                    .await,
            ),
            Finish::Skipped(status) => {
                warn!(?status, "replay job was not pending; worker exits without running");
                return;
            }
        };

        match result {
            Ok(true) => {
                self.metrics
                    .increment_counter(REPLAY_JOBS, &[("status", status.as_str().to_owned())]);
                match &finish {
                    Finish::Completed { replayed } => {
                        info!(replayed = *replayed, "replay completed");
                    }
                    Finish::Cancelled { replayed, by } => {
                        info!(replayed = *replayed, cancelled_by = %by, "replay cancelled");
                    }
                    Finish::Failed { replayed, error } => {
                        error!(replayed = *replayed, error = %error, "replay failed");
                    }
                    Finish::Skipped(_) => {}
                }
            }
            Ok(false) => warn!(
                target_status = %status,
                "replay job changed state concurrently; final transition not applied"
            ),
            Err(e) => error!(error = %e, target_status = %status, "failed to record replay outcome"),
        }
    }
}
