//! HTTP routes of the operational surface.

pub mod dead_letters;
pub mod health;
pub mod metrics;
pub mod replays;
