//! PostgreSQL adapters for the Eventline pipeline.
//!
//! Schema lives in the workspace `migrations/` directory and is applied with
//! [`MIGRATOR`].

pub mod pg_dead_letter_sink;
pub mod pg_event_store;
pub mod pg_message_log;
pub mod pg_replay_job_repository;

mod error;

/// Embedded schema migrations.
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("../../migrations");
