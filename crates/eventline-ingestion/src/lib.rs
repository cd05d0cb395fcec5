//! Eventline Ingestion — turns log messages into committed events.
//!
//! The domain layer holds the event catalogue, the decoder registry and the
//! validator. The application layer drives them: the event processor handles
//! one message end to end and the ingestion loop feeds it from the log,
//! committing offsets only once a message has a terminal outcome.

pub mod application;
pub mod domain;
