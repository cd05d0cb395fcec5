//! Eventline Core — shared domain types and ports.
//!
//! This crate defines the records that flow through the ingestion and replay
//! pipeline and the traits every external collaborator (relational store,
//! message log, metrics backend) is reached through. It contains no
//! infrastructure code.

pub mod clock;
pub mod dead_letter;
pub mod error;
pub mod event;
pub mod message;
pub mod metrics;
pub mod replay;
pub mod repository;
