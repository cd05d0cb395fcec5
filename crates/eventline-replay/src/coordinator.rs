//! The replay coordinator: submission, cancellation, status and recovery.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use eventline_core::clock::Clock;
use eventline_core::metrics::{MetricsSink, REPLAY_JOBS};
use eventline_core::replay::{CancelOutcome, ReplayJob, ReplayRequest, ReplayStatus};
use eventline_core::repository::{EventStore, ReplayJobRepository};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::dispatch::{DispatcherFactory, EventDispatcher};
use crate::error::ReplayError;
use crate::worker::ReplayWorker;

/// Error recorded on jobs found active by a fresh process.
pub const INTERRUPTED_BY_RESTART: &str = "interrupted by process restart";

/// Error prefix recorded on jobs whose worker panicked.
pub const WORKER_PANICKED: &str = "worker panicked";

/// Worker tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplayConfig {
    /// Events per store read.
    pub page_size: i64,
    /// Dispatched events between progress checkpoints.
    pub checkpoint_interval: i64,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            page_size: 500,
            checkpoint_interval: 100,
        }
    }
}

#[derive(Debug)]
struct JobHandle {
    cancel: watch::Sender<Option<String>>,
    task: JoinHandle<()>,
}

impl JobHandle {
    fn is_live(&self) -> bool {
        !self.task.is_finished()
    }
}

type Registry = Arc<Mutex<HashMap<Uuid, JobHandle>>>;

fn lock(registry: &Registry) -> MutexGuard<'_, HashMap<Uuid, JobHandle>> {
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Owns every replay worker of this process.
///
/// The registry holds one entry per live worker, keyed by replay id; a job
/// never has two workers.
pub struct ReplayCoordinator {
    store: Arc<dyn EventStore>,
    jobs: Arc<dyn ReplayJobRepository>,
    dispatchers: Arc<dyn DispatcherFactory>,
    metrics: Arc<dyn MetricsSink>,
    clock: Arc<dyn Clock>,
    config: ReplayConfig,
    registry: Registry,
}

impl std::fmt::Debug for ReplayCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplayCoordinator")
            .field("config", &self.config)
            .field("live_workers", &lock(&self.registry).len())
            .finish_non_exhaustive()
    }
}

impl ReplayCoordinator {
    /// Creates a coordinator with no running workers.
    #[must_use]
    pub fn new(
        store: Arc<dyn EventStore>,
        jobs: Arc<dyn ReplayJobRepository>,
        dispatchers: Arc<dyn DispatcherFactory>,
        metrics: Arc<dyn MetricsSink>,
        clock: Arc<dyn Clock>,
        config: ReplayConfig,
    ) -> Self {
        let config = ReplayConfig {
            page_size: config.page_size.max(1),
            checkpoint_interval: config.checkpoint_interval.max(1),
        };
        Self {
            store,
            jobs,
            dispatchers,
            metrics,
            clock,
            config,
            registry: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Validates `request`, records a `PENDING` job and starts its worker.
    ///
    /// Invalid requests are refused before any job row is written.
    ///
    /// # Errors
    ///
    /// Returns [`ReplayError::InvalidTimeRange`],
    /// [`ReplayError::InvalidVersionRange`], [`ReplayError::Destination`]
    /// or [`ReplayError::NoMatchingEvents`] for a request that cannot run,
    /// and [`ReplayError::Store`] if the store fails.
    #[instrument(skip(self, request), fields(destination = ?request.destination))]
    pub async fn submit(&self, request: ReplayRequest) -> Result<ReplayJob, ReplayError> {
        request.filter.validate()?;
        let dispatcher = self.dispatchers.dispatcher_for(&request.destination)?;

        let total_events = self.store.count_matching(&request.filter).await?;
        if total_events == 0 {
            return Err(ReplayError::NoMatchingEvents);
        }

        let job = ReplayJob::pending(request, total_events, self.clock.now());
        self.jobs.insert(&job).await?;
        info!(replay_id = %job.replay_id, total_events, "replay job submitted");

        self.spawn_worker(&job, dispatcher)?;
        Ok(job)
    }

    /// Starts the worker of a `PENDING` job that has none, e.g. one created
    /// while no worker could be spawned.
    ///
    /// # Errors
    ///
    /// Returns [`ReplayError::AlreadyRunning`] if a worker owns the job or it
    /// is `RUNNING`, [`ReplayError::NotStartable`] for terminal jobs and
    /// [`ReplayError::NotFound`] for unknown ids.
    #[instrument(skip(self))]
    pub async fn start(&self, replay_id: Uuid) -> Result<(), ReplayError> {
        if self.is_live(replay_id) {
            return Err(ReplayError::AlreadyRunning(replay_id));
        }
        let job = self.get(replay_id).await?;
        match job.status {
            ReplayStatus::Pending => {}
            ReplayStatus::Running => return Err(ReplayError::AlreadyRunning(replay_id)),
            status => return Err(ReplayError::NotStartable { replay_id, status }),
        }
        let dispatcher = self.dispatchers.dispatcher_for(&job.destination)?;
        self.spawn_worker(&job, dispatcher)
    }

    /// Fetches a job.
    ///
    /// # Errors
    ///
    /// Returns [`ReplayError::NotFound`] for unknown ids.
    pub async fn get(&self, replay_id: Uuid) -> Result<ReplayJob, ReplayError> {
        self.jobs
            .get(replay_id)
            .await?
            .ok_or(ReplayError::NotFound(replay_id))
    }

    /// Requests cancellation of a job.
    ///
    /// A job with a live worker is flagged and the worker stops before its
    /// next dispatch. An active job without a worker in this process is
    /// cancelled directly. Terminal jobs are reported as not cancellable.
    ///
    /// # Errors
    ///
    /// Returns [`ReplayError::NotFound`] for unknown ids and
    /// [`ReplayError::Store`] if the store fails.
    #[instrument(skip(self))]
    pub async fn cancel(
        &self,
        replay_id: Uuid,
        cancelled_by: &str,
    ) -> Result<CancelOutcome, ReplayError> {
        let job = self.get(replay_id).await?;
        if job.status.is_terminal() {
            return Ok(CancelOutcome::NotCancellable(job.status));
        }

        let flagged = {
            let registry = lock(&self.registry);
            match registry.get(&replay_id) {
                Some(handle) if handle.is_live() => {
                    handle.cancel.send_replace(Some(cancelled_by.to_owned()));
                    true
                }
                _ => false,
            }
        };
        if flagged {
            info!("cancellation requested");
            return Ok(CancelOutcome::CancellationRequested);
        }

        let applied = self
            .jobs
            .mark_cancelled(replay_id, job.events_replayed, cancelled_by, self.clock.now())
            .await?;
        if applied {
            self.metrics.increment_counter(
                REPLAY_JOBS,
                &[("status", ReplayStatus::Cancelled.as_str().to_owned())],
            );
            info!("replay job cancelled");
            return Ok(CancelOutcome::Cancelled);
        }
        let current = self.get(replay_id).await?;
        Ok(CancelOutcome::NotCancellable(current.status))
    }

    /// Marks jobs left `PENDING` or `RUNNING` by a previous process as
    /// `FAILED`. Returns how many were marked.
    ///
    /// # Errors
    ///
    /// Returns [`ReplayError::Store`] if the active jobs cannot be listed.
    #[instrument(skip(self))]
    pub async fn recover_orphaned_jobs(&self) -> Result<usize, ReplayError> {
        let mut recovered = 0;
        for job in self.jobs.list_active().await? {
            if self.is_live(job.replay_id) {
                continue;
            }
            match self
                .jobs
                .mark_failed(
                    job.replay_id,
                    job.events_replayed,
                    INTERRUPTED_BY_RESTART,
                    self.clock.now(),
                )
                .await
            {
                Ok(true) => {
                    recovered += 1;
                    self.metrics.increment_counter(
                        REPLAY_JOBS,
                        &[("status", ReplayStatus::Failed.as_str().to_owned())],
                    );
                    warn!(replay_id = %job.replay_id, status = %job.status, "orphaned replay job marked failed");
                }
                Ok(false) => {}
                Err(e) => warn!(replay_id = %job.replay_id, error = %e, "failed to recover replay job"),
            }
        }
        Ok(recovered)
    }

    /// Waits for the worker of `replay_id`, if this process runs one.
    pub async fn join(&self, replay_id: Uuid) {
        let handle = lock(&self.registry).remove(&replay_id);
        if let Some(handle) = handle
            && let Err(e) = handle.task.await
        {
            warn!(%replay_id, error = %e, "replay worker did not finish cleanly");
        }
    }

    /// Number of workers still running.
    #[must_use]
    pub fn live_workers(&self) -> usize {
        lock(&self.registry)
            .values()
            .filter(|h| h.is_live())
            .count()
    }

    fn is_live(&self, replay_id: Uuid) -> bool {
        lock(&self.registry)
            .get(&replay_id)
            .is_some_and(JobHandle::is_live)
    }

    /// Spawns the worker for `job` and registers it. The registry lock is
    /// held across the check and the insert so two callers cannot both
    /// spawn.
    fn spawn_worker(
        &self,
        job: &ReplayJob,
        dispatcher: Arc<dyn EventDispatcher>,
    ) -> Result<(), ReplayError> {
        let mut registry = lock(&self.registry);
        if registry.get(&job.replay_id).is_some_and(JobHandle::is_live) {
            return Err(ReplayError::AlreadyRunning(job.replay_id));
        }

        let (cancel, cancel_rx) = watch::channel(None);
        let worker = ReplayWorker {
            replay_id: job.replay_id,
            filter: job.filter.clone(),
            store: Arc::clone(&self.store),
            jobs: Arc::clone(&self.jobs),
            dispatcher,
            metrics: Arc::clone(&self.metrics),
            clock: Arc::clone(&self.clock),
            config: self.config,
            cancel: cancel_rx,
        };
        registry.retain(|_, handle| handle.is_live());
        let task = tokio::spawn(worker.run());
        registry.insert(job.replay_id, JobHandle { cancel, task });
        Ok(())
    }
}
