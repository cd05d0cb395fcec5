//! In-memory replay job repository.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use eventline_core::error::StoreError;
use eventline_core::replay::{ReplayJob, ReplayStatus};
use eventline_core::repository::ReplayJobRepository;
use uuid::Uuid;

/// Replay jobs held in memory, with the same conditional transitions as the
/// database adapter.
#[derive(Debug, Clone, Default)]
pub struct InMemoryReplayJobRepository {
    jobs: Arc<Mutex<HashMap<Uuid, ReplayJob>>>,
}

impl InMemoryReplayJobRepository {
    /// Creates an empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of every stored job, oldest first.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn jobs(&self) -> Vec<ReplayJob> {
        let mut jobs: Vec<ReplayJob> = self.jobs.lock().unwrap().values().cloned().collect();
        jobs.sort_by_key(|j| (j.created_at, j.replay_id));
        jobs
    }

    fn transition(
        &self,
        replay_id: Uuid,
        from: &[ReplayStatus],
        apply: impl FnOnce(&mut ReplayJob),
    ) -> Result<bool, StoreError> {
        let mut jobs = self.jobs.lock().unwrap();
        let job = jobs
            .get_mut(&replay_id)
            .ok_or_else(|| StoreError::NotFound(format!("replay job {replay_id}")))?;
        if !from.contains(&job.status) {
            return Ok(false);
        }
        apply(job);
        Ok(true)
    }
}

#[async_trait]
impl ReplayJobRepository for InMemoryReplayJobRepository {
    async fn insert(&self, job: &ReplayJob) -> Result<(), StoreError> {
        let mut jobs = self.jobs.lock().unwrap();
        if jobs.contains_key(&job.replay_id) {
            return Err(StoreError::UniqueViolation {
                constraint: "replay_jobs_pkey".into(),
            });
        }
        jobs.insert(job.replay_id, job.clone());
        Ok(())
    }

    async fn get(&self, replay_id: Uuid) -> Result<Option<ReplayJob>, StoreError> {
        Ok(self.jobs.lock().unwrap().get(&replay_id).cloned())
    }

    async fn list_active(&self) -> Result<Vec<ReplayJob>, StoreError> {
        Ok(self
            .jobs()
            .into_iter()
            .filter(|j| !j.status.is_terminal())
            .collect())
    }

    async fn mark_running(&self, replay_id: Uuid, at: DateTime<Utc>) -> Result<bool, StoreError> {
        self.transition(replay_id, &[ReplayStatus::Pending], |job| {
            job.status = ReplayStatus::Running;
            job.started_at = Some(at);
        })
    }

    async fn record_progress(
        &self,
        replay_id: Uuid,
        events_replayed: i64,
    ) -> Result<(), StoreError> {
        self.transition(replay_id, &[ReplayStatus::Running], |job| {
            job.events_replayed = events_replayed;
        })
        .map(|_| ())
    }

    async fn mark_completed(
        &self,
        replay_id: Uuid,
        events_replayed: i64,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        self.transition(replay_id, &[ReplayStatus::Running], |job| {
            job.status = ReplayStatus::Completed;
            job.events_replayed = events_replayed;
            job.completed_at = Some(at);
        })
    }

    async fn mark_failed(
        &self,
        replay_id: Uuid,
        events_replayed: i64,
        error: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        self.transition(
            replay_id,
            &[ReplayStatus::Pending, ReplayStatus::Running],
            |job| {
                job.status = ReplayStatus::Failed;
                job.events_replayed = events_replayed;
                job.error = Some(error.to_owned());
                job.completed_at = Some(at);
            },
        )
    }

    async fn mark_cancelled(
        &self,
        replay_id: Uuid,
        events_replayed: i64,
        cancelled_by: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        self.transition(
            replay_id,
            &[ReplayStatus::Pending, ReplayStatus::Running],
            |job| {
                job.status = ReplayStatus::Cancelled;
                job.events_replayed = events_replayed;
                job.cancelled_by = Some(cancelled_by.to_owned());
                job.completed_at = Some(at);
            },
        )
    }
}
