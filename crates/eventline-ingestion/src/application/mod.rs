//! Message processing, the consume loop and dead-letter operations.

pub mod dead_letters;
pub mod ingestion_loop;
pub mod processor;
