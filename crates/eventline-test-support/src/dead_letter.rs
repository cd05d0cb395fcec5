//! Test dead-letter sinks.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use eventline_core::dead_letter::{DeadLetterEntry, NewDeadLetter};
use eventline_core::error::StoreError;
use eventline_core::repository::DeadLetterSink;
use uuid::Uuid;

/// A dead-letter sink holding entries in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryDeadLetterSink {
    entries: Arc<Mutex<Vec<DeadLetterEntry>>>,
}

impl InMemoryDeadLetterSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of every recorded entry, in insertion order.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn entries(&self) -> Vec<DeadLetterEntry> {
        self.entries.lock().unwrap().clone()
    }
}

#[async_trait]
impl DeadLetterSink for InMemoryDeadLetterSink {
    async fn record(&self, entry: &NewDeadLetter) -> Result<Uuid, StoreError> {
        let id = Uuid::new_v4();
        self.entries.lock().unwrap().push(DeadLetterEntry {
            id,
            message_key: entry.message_key.clone(),
            raw_message: entry.raw_message.clone(),
            payload_sha256: entry.payload_sha256.clone(),
            origin: entry.origin.clone(),
            failure_kind: entry.failure_kind,
            error_detail: entry.error_detail.clone(),
            retry_count: 0,
            last_retry_at: None,
            last_error: None,
            resolved: false,
            resolved_at: None,
            resolved_by: None,
            failed_at: entry.failed_at,
        });
        Ok(id)
    }

    async fn get(&self, id: Uuid) -> Result<Option<DeadLetterEntry>, StoreError> {
        Ok(self
            .entries
            .lock()
            .unwrap()
            .iter()
            .find(|e| e.id == id)
            .cloned())
    }

    async fn list_unresolved(&self, limit: i64) -> Result<Vec<DeadLetterEntry>, StoreError> {
        let limit = usize::try_from(limit).unwrap_or(0);
        let mut unresolved: Vec<DeadLetterEntry> = self
            .entries
            .lock()
            .unwrap()
            .iter()
            .filter(|e| !e.resolved)
            .cloned()
            .collect();
        unresolved.sort_by_key(|e| e.failed_at);
        unresolved.truncate(limit);
        Ok(unresolved)
    }

    async fn record_retry(
        &self,
        id: Uuid,
        error: &str,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().unwrap();
        let entry = entries
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or_else(|| StoreError::NotFound(format!("dead letter {id}")))?;
        entry.retry_count += 1;
        entry.last_retry_at = Some(at);
        entry.last_error = Some(error.to_owned());
        Ok(())
    }

    async fn resolve(
        &self,
        id: Uuid,
        resolved_by: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut entries = self.entries.lock().unwrap();
        let entry = entries
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or_else(|| StoreError::NotFound(format!("dead letter {id}")))?;
        if entry.resolved {
            return Ok(false);
        }
        entry.resolved = true;
        entry.resolved_at = Some(at);
        entry.resolved_by = Some(resolved_by.to_owned());
        Ok(true)
    }
}

/// A dead-letter sink whose every operation fails with a database error.
#[derive(Debug, Clone, Copy, Default)]
pub struct FailingDeadLetterSink;

fn unavailable() -> StoreError {
    StoreError::Database("dead-letter table unavailable".into())
}

#[async_trait]
impl DeadLetterSink for FailingDeadLetterSink {
    async fn record(&self, _entry: &NewDeadLetter) -> Result<Uuid, StoreError> {
        Err(unavailable())
    }

    async fn get(&self, _id: Uuid) -> Result<Option<DeadLetterEntry>, StoreError> {
        Err(unavailable())
    }

    async fn list_unresolved(&self, _limit: i64) -> Result<Vec<DeadLetterEntry>, StoreError> {
        Err(unavailable())
    }

    async fn record_retry(
        &self,
        _id: Uuid,
        _error: &str,
        _at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        Err(unavailable())
    }

    async fn resolve(
        &self,
        _id: Uuid,
        _resolved_by: &str,
        _at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        Err(unavailable())
    }
}
