//! Test event stores — in-memory `EventStore` implementations for tests.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use eventline_core::error::StoreError;
use eventline_core::event::{AuditRecord, Event, EventCursor};
use eventline_core::replay::ReplayFilter;
use eventline_core::repository::{EventStore, UnitOfWork};
use uuid::Uuid;

#[derive(Debug, Default)]
struct StoreState {
    events: Vec<Event>,
    audits: Vec<AuditRecord>,
}

impl StoreState {
    fn conflict(&self, event: &Event) -> Option<&'static str> {
        if self.events.iter().any(|e| e.event_id == event.event_id) {
            return Some("events_pkey");
        }
        if self.events.iter().any(|e| {
            e.aggregate_id == event.aggregate_id
                && e.aggregate_type == event.aggregate_type
                && e.version == event.version
        }) {
            return Some("uq_events_aggregate_version");
        }
        None
    }
}

/// An event store holding committed events in memory. Enforces the same
/// uniqueness constraints as the database: `event_id` and
/// `(aggregate_id, aggregate_type, version)`.
#[derive(Debug, Clone, Default)]
pub struct InMemoryEventStore {
    state: Arc<Mutex<StoreState>>,
}

impl InMemoryEventStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store pre-populated with `events`.
    #[must_use]
    pub fn with_events(events: Vec<Event>) -> Self {
        let store = Self::new();
        store.state.lock().unwrap().events = events;
        store
    }

    /// Commits `event` directly, bypassing the unit of work. Simulates a
    /// concurrent writer.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn insert_committed(&self, event: Event) {
        self.state.lock().unwrap().events.push(event);
    }

    /// Returns a snapshot of all committed events.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn events(&self) -> Vec<Event> {
        self.state.lock().unwrap().events.clone()
    }

    /// Returns a snapshot of all committed audit rows.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn audit_records(&self) -> Vec<AuditRecord> {
        self.state.lock().unwrap().audits.clone()
    }

    fn sorted_matching(&self, filter: &ReplayFilter) -> Vec<Event> {
        let mut matching: Vec<Event> = self
            .state
            .lock()
            .unwrap()
            .events
            .iter()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect();
        matching.sort_by_key(|e| (e.timestamp, e.version, e.event_id));
        matching
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, StoreError> {
        Ok(Box::new(InMemoryUnitOfWork {
            state: Arc::clone(&self.state),
            events: Vec::new(),
            audits: Vec::new(),
        }))
    }

    async fn find_by_id(&self, event_id: Uuid) -> Result<Option<Event>, StoreError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .events
            .iter()
            .find(|e| e.event_id == event_id)
            .cloned())
    }

    async fn load_stream(
        &self,
        aggregate_id: &str,
        aggregate_type: &str,
    ) -> Result<Vec<Event>, StoreError> {
        let mut stream: Vec<Event> = self
            .state
            .lock()
            .unwrap()
            .events
            .iter()
            .filter(|e| e.aggregate_id == aggregate_id && e.aggregate_type == aggregate_type)
            .cloned()
            .collect();
        stream.sort_by_key(|e| e.version);
        Ok(stream)
    }

    async fn count_matching(&self, filter: &ReplayFilter) -> Result<i64, StoreError> {
        Ok(i64::try_from(self.sorted_matching(filter).len()).unwrap_or(i64::MAX))
    }

    async fn load_page(
        &self,
        filter: &ReplayFilter,
        after: Option<EventCursor>,
        limit: i64,
    ) -> Result<Vec<Event>, StoreError> {
        let limit = usize::try_from(limit).unwrap_or(0);
        Ok(self
            .sorted_matching(filter)
            .into_iter()
            .filter(|e| {
                after.is_none_or(|c| {
                    (e.timestamp, e.version, e.event_id) > (c.timestamp, c.version, c.event_id)
                })
            })
            .take(limit)
            .collect())
    }
}

struct InMemoryUnitOfWork {
    state: Arc<Mutex<StoreState>>,
    events: Vec<Event>,
    audits: Vec<AuditRecord>,
}

#[async_trait]
impl UnitOfWork for InMemoryUnitOfWork {
    async fn insert_event(&mut self, event: &Event) -> Result<(), StoreError> {
        let state = self.state.lock().unwrap();
        if let Some(constraint) = state.conflict(event) {
            return Err(StoreError::UniqueViolation {
                constraint: constraint.to_owned(),
            });
        }
        drop(state);
        self.events.push(event.clone());
        Ok(())
    }

    async fn insert_audit(&mut self, record: &AuditRecord) -> Result<(), StoreError> {
        self.audits.push(record.clone());
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let Self {
            state,
            events,
            audits,
        } = *self;
        let mut state = state.lock().unwrap();
        for event in &events {
            if let Some(constraint) = state.conflict(event) {
                return Err(StoreError::UniqueViolation {
                    constraint: constraint.to_owned(),
                });
            }
        }
        state.events.extend(events);
        state.audits.extend(audits);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        Ok(())
    }
}

/// An event store that finds nothing and fails every write and scan with a
/// database error. Useful for testing persistence-failure paths.
#[derive(Debug, Clone, Copy, Default)]
pub struct FailingEventStore;

#[async_trait]
impl EventStore for FailingEventStore {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, StoreError> {
        Err(StoreError::Database("connection refused".into()))
    }

    async fn find_by_id(&self, _event_id: Uuid) -> Result<Option<Event>, StoreError> {
        Ok(None)
    }

    async fn load_stream(
        &self,
        _aggregate_id: &str,
        _aggregate_type: &str,
    ) -> Result<Vec<Event>, StoreError> {
        Err(StoreError::Database("connection refused".into()))
    }

    async fn count_matching(&self, _filter: &ReplayFilter) -> Result<i64, StoreError> {
        Err(StoreError::Database("connection refused".into()))
    }

    async fn load_page(
        &self,
        _filter: &ReplayFilter,
        _after: Option<EventCursor>,
        _limit: i64,
    ) -> Result<Vec<Event>, StoreError> {
        Err(StoreError::Database("connection refused".into()))
    }
}
