//! Eventline entry point.

use std::error::Error;

use eventline_api::config::AppConfig;
use eventline_api::{host, telemetry};

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let config = AppConfig::from_env()?;
    let guard = telemetry::init_tracing(config.otlp_endpoint.as_deref())?;
    let metrics = telemetry::install_prometheus()?;

    tracing::info!(
        topics = ?config.ingestion.topics,
        partitions = ?config.ingestion.partitions,
        "Starting Eventline"
    );

    let result = host::run(config, Some(metrics)).await;
    if let Err(e) = &result {
        tracing::error!(error = %e, "Eventline stopped on error");
    }
    guard.shutdown();

    Ok(result?)
}
