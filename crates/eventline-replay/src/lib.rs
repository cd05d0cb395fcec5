//! Eventline Replay — re-dispatches stored events to a destination.
//!
//! A replay is submitted as a filter plus a destination. The coordinator
//! validates it, records a `PENDING` job and owns exactly one background
//! worker per job. The worker pages through matching events in
//! `(timestamp, version, event_id)` order, checkpoints progress and honors
//! cooperative cancellation between dispatches.

pub mod coordinator;
pub mod dispatch;
pub mod error;
mod worker;
