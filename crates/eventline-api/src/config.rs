//! Process configuration read from the environment.

use std::str::FromStr;
use std::time::Duration;

use eventline_ingestion::domain::validation::DEFAULT_MAX_FUTURE_SKEW_SECS;
use eventline_replay::coordinator::ReplayConfig;

use crate::error::AppError;

/// Largest accepted `VALIDATION_MAX_FUTURE_SKEW_SECS`: one day.
pub const MAX_FUTURE_SKEW_LIMIT_SECS: i64 = 86_400;

/// Everything the host process needs to start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    /// PostgreSQL DSN.
    pub database_url: String,
    /// Connection pool size.
    pub database_max_connections: u32,
    /// HTTP bind host.
    pub host: String,
    /// HTTP bind port.
    pub port: u16,
    /// Ingestion settings.
    pub ingestion: IngestionSettings,
    /// Allowed distance of an event timestamp into the future, in seconds.
    pub max_future_skew_secs: i64,
    /// Replay worker tuning.
    pub replay: ReplayConfig,
    /// Timeout of one webhook dispatch.
    pub webhook_timeout: Duration,
    /// OTLP collector endpoint; spans are exported only when set.
    pub otlp_endpoint: Option<String>,
}

/// Consumer settings shared by every ingestion loop of the process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestionSettings {
    /// Subscribed topics.
    pub topics: Vec<String>,
    /// Consumer group name.
    pub consumer_group: String,
    /// Partitions assigned to this process; one loop runs per partition.
    pub partitions: Vec<i32>,
    /// Upper bound on messages per poll.
    pub poll_batch_size: usize,
    /// Idle wait after an empty poll.
    pub poll_interval: Duration,
    /// Ceiling of the transient error backoff.
    pub max_backoff: Duration,
}

impl AppConfig {
    /// Reads the configuration from process environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Config`] when `DATABASE_URL` is missing or a
    /// value cannot be parsed or is out of range.
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads the configuration through `lookup`, which returns the value of
    /// a variable if it is set.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Config`] when `DATABASE_URL` is missing or a
    /// value cannot be parsed or is out of range.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);

        let database_url = env
            .string("DATABASE_URL")
            .ok_or_else(|| AppError::Config("DATABASE_URL environment variable must be set".into()))?;

        let topics = env.list("INGESTION_TOPICS", "business-events");
        if topics.is_empty() {
            return Err(AppError::Config(
                "INGESTION_TOPICS must name at least one topic".into(),
            ));
        }
        let partitions = env
            .list("INGESTION_PARTITIONS", "0")
            .iter()
            .map(|p| {
                p.parse::<i32>()
                    .ok()
                    .filter(|p| *p >= 0)
                    .ok_or_else(|| {
                        AppError::Config(format!(
                            "INGESTION_PARTITIONS must be non-negative integers, got {p}"
                        ))
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let ingestion = IngestionSettings {
            topics,
            consumer_group: env
                .string("INGESTION_CONSUMER_GROUP")
                .unwrap_or_else(|| "eventline-ingestion".to_string()),
            partitions,
            poll_batch_size: env.parse("INGESTION_POLL_BATCH_SIZE", 100)?,
            poll_interval: Duration::from_millis(env.parse("INGESTION_POLL_INTERVAL_MS", 500)?),
            max_backoff: Duration::from_millis(env.parse("INGESTION_MAX_BACKOFF_MS", 30_000)?),
        };

        if ingestion.poll_batch_size < 1 {
            return Err(AppError::Config(
                "INGESTION_POLL_BATCH_SIZE must be positive".into(),
            ));
        }

        let max_future_skew_secs =
            env.parse("VALIDATION_MAX_FUTURE_SKEW_SECS", DEFAULT_MAX_FUTURE_SKEW_SECS)?;
        if !(0..=MAX_FUTURE_SKEW_LIMIT_SECS).contains(&max_future_skew_secs) {
            return Err(AppError::Config(format!(
                "VALIDATION_MAX_FUTURE_SKEW_SECS must be between 0 and {MAX_FUTURE_SKEW_LIMIT_SECS}"
            )));
        }

        let replay = ReplayConfig {
            page_size: env.parse("REPLAY_PAGE_SIZE", 500)?,
            checkpoint_interval: env.parse("REPLAY_CHECKPOINT_INTERVAL", 100)?,
        };
        if replay.page_size < 1 || replay.checkpoint_interval < 1 {
            return Err(AppError::Config(
                "REPLAY_PAGE_SIZE and REPLAY_CHECKPOINT_INTERVAL must be positive".into(),
            ));
        }

        Ok(Self {
            database_url,
            database_max_connections: env.parse("DATABASE_MAX_CONNECTIONS", 10)?,
            host: env.string("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: env.parse("PORT", 3000)?,
            ingestion,
            max_future_skew_secs,
            replay,
            webhook_timeout: Duration::from_millis(env.parse("REPLAY_WEBHOOK_TIMEOUT_MS", 10_000)?),
            otlp_endpoint: env.string("OTEL_EXPORTER_OTLP_ENDPOINT"),
        })
    }
}

struct Env<F>(F);

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    /// A set, non-blank value.
    fn string(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parse<T>(&self, key: &str, default: T) -> Result<T, AppError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.string(key) {
            None => Ok(default),
            Some(raw) => raw
                .parse()
                .map_err(|e| AppError::Config(format!("{key} must be a valid number: {e}"))),
        }
    }

    fn list(&self, key: &str, default: &str) -> Vec<String> {
        self.string(key)
            .unwrap_or_else(|| default.to_string())
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }
}
