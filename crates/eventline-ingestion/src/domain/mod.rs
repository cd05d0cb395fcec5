//! Event catalogue, decoding and validation.

pub mod envelope;
pub mod payloads;
pub mod registry;
pub mod validation;
