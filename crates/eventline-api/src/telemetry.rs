//! Logging, tracing export and the Prometheus metrics sink.

use eventline_core::metrics::{
    CONSUME_ERRORS, DEAD_LETTER_WRITE_FAILURES, EVENTS_DUPLICATE, EVENTS_FAILED, EVENTS_PROCESSED,
    Labels, MetricsSink, PROCESSING_DURATION, REPLAY_EVENTS_DISPATCHED, REPLAY_JOBS,
};
use metrics::Label;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::trace::SdkTracerProvider;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::error::AppError;

const SERVICE_NAME: &str = "eventline";

/// Keeps the span exporter alive; flushed by [`Telemetry::shutdown`].
#[derive(Debug)]
pub struct Telemetry {
    tracer_provider: Option<SdkTracerProvider>,
}

impl Telemetry {
    /// Flushes pending spans.
    pub fn shutdown(self) {
        if let Some(provider) = self.tracer_provider
            && let Err(e) = provider.shutdown()
        {
            eprintln!("failed to flush spans: {e}");
        }
    }
}

/// Installs the global tracing subscriber: JSON lines filtered by
/// `RUST_LOG` (default `info`), plus an OTLP span exporter when
/// `otlp_endpoint` is set.
///
/// # Errors
///
/// Returns [`AppError::Telemetry`] if the exporter cannot be built or a
/// subscriber is already installed.
pub fn init_tracing(otlp_endpoint: Option<&str>) -> Result<Telemetry, AppError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let tracer_provider = match otlp_endpoint {
        Some(endpoint) => {
            let exporter = opentelemetry_otlp::SpanExporter::builder()
                .with_tonic()
                .with_endpoint(endpoint)
                .build()
                .map_err(|e| AppError::Telemetry(format!("OTLP exporter: {e}")))?;
            Some(
                SdkTracerProvider::builder()
                    .with_batch_exporter(exporter)
                    .with_resource(Resource::builder().with_service_name(SERVICE_NAME).build())
                    .build(),
            )
        }
        None => None,
    };
    let otel_layer = tracer_provider
        .as_ref()
        .map(|provider| tracing_opentelemetry::layer().with_tracer(provider.tracer(SERVICE_NAME)));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().json())
        .with(otel_layer)
        .try_init()
        .map_err(|e| AppError::Telemetry(e.to_string()))?;

    Ok(Telemetry { tracer_provider })
}

/// Installs the process-wide Prometheus recorder and describes every
/// pipeline metric. Returns the handle that renders the scrape body.
///
/// # Errors
///
/// Returns [`AppError::Telemetry`] if a recorder is already installed.
pub fn install_prometheus() -> Result<PrometheusHandle, AppError> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| AppError::Telemetry(format!("Prometheus recorder: {e}")))?;

    metrics::describe_counter!(EVENTS_PROCESSED, "Messages committed as new events");
    metrics::describe_counter!(EVENTS_DUPLICATE, "Messages recognised as already committed");
    metrics::describe_counter!(EVENTS_FAILED, "Messages routed to the dead-letter sink");
    metrics::describe_counter!(CONSUME_ERRORS, "Transient message log errors");
    metrics::describe_counter!(
        DEAD_LETTER_WRITE_FAILURES,
        "Dead-letter writes that themselves failed"
    );
    metrics::describe_histogram!(
        PROCESSING_DURATION,
        metrics::Unit::Seconds,
        "Time taken to process one message"
    );
    metrics::describe_counter!(REPLAY_JOBS, "Replay jobs reaching a terminal state");
    metrics::describe_counter!(
        REPLAY_EVENTS_DISPATCHED,
        "Events handed to a replay destination"
    );

    Ok(handle)
}

/// Forwards observations to the `metrics` facade.
#[derive(Debug, Clone, Copy, Default)]
pub struct PrometheusMetrics;

fn to_labels(labels: Labels<'_>) -> Vec<Label> {
    labels
        .iter()
        .map(|(key, value)| Label::new(*key, value.clone()))
        .collect()
}

impl MetricsSink for PrometheusMetrics {
    fn increment_counter(&self, name: &'static str, labels: Labels<'_>) {
        metrics::increment_counter!(name, to_labels(labels));
    }

    fn record_histogram(&self, name: &'static str, value: f64, labels: Labels<'_>) {
        metrics::histogram!(name, value, to_labels(labels));
    }
}
