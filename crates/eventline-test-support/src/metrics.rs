//! A metrics sink that remembers what it was told.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use eventline_core::metrics::{Labels, MetricsSink};

type Series = (&'static str, Vec<(&'static str, String)>);

#[derive(Debug, Default)]
struct Recorded {
    counters: HashMap<Series, u64>,
    histograms: HashMap<Series, Vec<f64>>,
}

/// Records counter increments and histogram samples per label set.
#[derive(Debug, Clone, Default)]
pub struct RecordingMetrics {
    recorded: Arc<Mutex<Recorded>>,
}

impl RecordingMetrics {
    /// Creates an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Total of counter `name` across all label sets.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn counter(&self, name: &str) -> u64 {
        self.recorded
            .lock()
            .unwrap()
            .counters
            .iter()
            .filter(|((n, _), _)| *n == name)
            .map(|(_, count)| count)
            .sum()
    }

    /// Value of counter `name` for series carrying label `key=value`.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn counter_with(&self, name: &str, key: &str, value: &str) -> u64 {
        self.recorded
            .lock()
            .unwrap()
            .counters
            .iter()
            .filter(|((n, labels), _)| {
                *n == name && labels.iter().any(|(k, v)| *k == key && v == value)
            })
            .map(|(_, count)| count)
            .sum()
    }

    /// Number of samples recorded into histogram `name`.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn histogram_count(&self, name: &str) -> usize {
        self.recorded
            .lock()
            .unwrap()
            .histograms
            .iter()
            .filter(|((n, _), _)| *n == name)
            .map(|(_, samples)| samples.len())
            .sum()
    }
}

impl MetricsSink for RecordingMetrics {
    fn increment_counter(&self, name: &'static str, labels: Labels<'_>) {
        *self
            .recorded
            .lock()
            .unwrap()
            .counters
            .entry((name, labels.to_vec()))
            .or_default() += 1;
    }

    fn record_histogram(&self, name: &'static str, value: f64, labels: Labels<'_>) {
        self.recorded
            .lock()
            .unwrap()
            .histograms
            .entry((name, labels.to_vec()))
            .or_default()
            .push(value);
    }
}
