//! Process wiring: storage, ingestion loops, replay coordinator and the
//! HTTP server, plus the shutdown sequence tying them together.

use std::net::SocketAddr;
use std::sync::Arc;

use eventline_core::clock::{Clock, SystemClock};
use eventline_core::message::LogPublisher;
use eventline_core::metrics::MetricsSink;
use eventline_event_store::MIGRATOR;
use eventline_event_store::pg_dead_letter_sink::PgDeadLetterSink;
use eventline_event_store::pg_event_store::PgEventStore;
use eventline_event_store::pg_message_log::{PgLogConsumer, PgLogPublisher};
use eventline_event_store::pg_replay_job_repository::PgReplayJobRepository;
use eventline_ingestion::application::dead_letters::DeadLetterReprocessor;
use eventline_ingestion::application::ingestion_loop::{
    IngestionConfig, IngestionError, IngestionLoop, IngestionStats,
};
use eventline_ingestion::application::processor::EventProcessor;
use eventline_ingestion::domain::registry::DecoderRegistry;
use eventline_ingestion::domain::validation::EventValidator;
use eventline_replay::coordinator::ReplayCoordinator;
use eventline_replay::dispatch::DestinationDispatchers;
use metrics_exporter_prometheus::PrometheusHandle;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinSet};
use tracing::{error, info, warn};

use crate::config::AppConfig;
use crate::error::AppError;
use crate::state::AppState;
use crate::telemetry::PrometheusMetrics;

type LoopExit = (i32, Result<IngestionStats, IngestionError>);

/// Runs the process until a shutdown signal or a fatal ingestion error.
///
/// Start-up applies migrations, declares the ingestion topics, marks replay
/// jobs orphaned by a previous process as failed, then starts one ingestion
/// loop per assigned partition next to the HTTP server. On shutdown every
/// loop finishes its in-flight message and closes its consumer before this
/// returns.
///
/// # Errors
///
/// Returns [`AppError`] when start-up fails, or when an ingestion loop
/// stopped on a fatal broker error.
pub async fn run(config: AppConfig, metrics: Option<PrometheusHandle>) -> Result<(), AppError> {
    let pool = PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .connect(&config.database_url)
        .await?;
    MIGRATOR.run(&pool).await?;
    info!("database migrations applied");

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let sink: Arc<dyn MetricsSink> = Arc::new(PrometheusMetrics);

    let publisher = PgLogPublisher::new(pool.clone());
    let partitions = config.ingestion.partitions.iter().max().map_or(1, |p| p + 1);
    for topic in &config.ingestion.topics {
        publisher.create_topic(topic, partitions).await?;
    }

    let max_future_skew = chrono::TimeDelta::try_seconds(config.max_future_skew_secs)
        .ok_or_else(|| AppError::Config("VALIDATION_MAX_FUTURE_SKEW_SECS is out of range".into()))?;

    let store = Arc::new(PgEventStore::new(pool.clone()));
    let dead_letter_sink = Arc::new(PgDeadLetterSink::new(pool.clone()));
    let processor = Arc::new(EventProcessor::new(
        Arc::new(DecoderRegistry::with_catalogue()),
        Arc::new(EventValidator::with_catalogue_rules(max_future_skew)),
        store.clone(),
        dead_letter_sink.clone(),
        Arc::clone(&sink),
        Arc::clone(&clock),
    ));
    let reprocessor = Arc::new(DeadLetterReprocessor::new(
        Arc::clone(&processor),
        dead_letter_sink,
        Arc::clone(&clock),
    ));

    let publisher: Arc<dyn LogPublisher> = Arc::new(publisher);
    let dispatchers = DestinationDispatchers::new(Some(publisher), config.webhook_timeout)?;
    let replays = Arc::new(ReplayCoordinator::new(
        store,
        Arc::new(PgReplayJobRepository::new(pool.clone())),
        Arc::new(dispatchers),
        Arc::clone(&sink),
        clock,
        config.replay,
    ));
    let recovered = replays.recover_orphaned_jobs().await?;
    if recovered > 0 {
        warn!(recovered, "replay jobs interrupted by a previous process marked failed");
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut ingestion = spawn_ingestion(&config, &pool, &processor, &sink, &shutdown_rx);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .map_err(|e| AppError::Config(format!("invalid HOST:PORT combination: {e}")))?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "listening");

    let app = crate::app(AppState::new(replays, reprocessor, metrics));
    let mut server_shutdown = shutdown_rx.clone();
    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = server_shutdown.wait_for(|stop| *stop).await;
            })
            .await
    });

    let mut failure = None;
    tokio::select! {
        () = shutdown_signal() => info!("shutdown signal received"),
        Some(exit) = ingestion.join_next() => failure = loop_failure(exit),
    }

    shutdown_tx.send_replace(true);
    while let Some(exit) = ingestion.join_next().await {
        if let Some(err) = loop_failure(exit) {
            failure.get_or_insert(err);
        }
    }
    match server.await {
        Ok(result) => result?,
        Err(e) => error!(error = %e, "HTTP server task failed"),
    }

    match failure {
        Some(err) => Err(err),
        None => {
            info!("shutdown complete");
            Ok(())
        }
    }
}

fn spawn_ingestion(
    config: &AppConfig,
    pool: &PgPool,
    processor: &Arc<EventProcessor>,
    sink: &Arc<dyn MetricsSink>,
    shutdown: &watch::Receiver<bool>,
) -> JoinSet<LoopExit> {
    let settings = &config.ingestion;
    let mut loops = JoinSet::new();
    for &partition in &settings.partitions {
        let consumer = PgLogConsumer::new(
            pool.clone(),
            settings.consumer_group.clone(),
            vec![partition],
        );
        let ingestion_loop = IngestionLoop::new(
            Box::new(consumer),
            Arc::clone(processor),
            Arc::clone(sink),
            IngestionConfig {
                topics: settings.topics.clone(),
                consumer_group: settings.consumer_group.clone(),
                poll_batch_size: settings.poll_batch_size,
                poll_interval: settings.poll_interval,
                max_backoff: settings.max_backoff,
                ..IngestionConfig::default()
            },
        );
        let shutdown = shutdown.clone();
        loops.spawn(async move { (partition, ingestion_loop.run(shutdown).await) });
        info!(partition, "ingestion loop started");
    }
    loops
}

/// Logs how a loop ended and returns the error that should stop the
/// process, if any.
fn loop_failure(exit: Result<LoopExit, JoinError>) -> Option<AppError> {
    match exit {
        Ok((partition, Ok(stats))) => {
            info!(partition, ?stats, "ingestion loop stopped");
            None
        }
        Ok((partition, Err(e))) => {
            error!(partition, error = %e, "ingestion loop failed");
            Some(AppError::Ingestion(e))
        }
        Err(e) => {
            error!(error = %e, "ingestion loop task aborted");
            Some(AppError::Task(e.to_string()))
        }
    }
}

/// Completes on Ctrl-C or, on Unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to register SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
