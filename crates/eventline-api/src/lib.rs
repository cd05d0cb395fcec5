//! Eventline — host process.
//!
//! Wires the PostgreSQL adapters, the ingestion loops and the replay
//! coordinator together and exposes a small operational HTTP surface:
//! replay submission and status, dead-letter operations, health and
//! Prometheus metrics.

use axum::Router;
use tower_http::trace::TraceLayer;

pub mod config;
pub mod error;
pub mod host;
pub mod routes;
pub mod state;
pub mod telemetry;

/// Builds the HTTP router over `state`.
pub fn app(state: state::AppState) -> Router {
    Router::new()
        .merge(routes::health::router())
        .merge(routes::metrics::router())
        .nest("/api/v1/replays", routes::replays::router())
        .nest("/api/v1/dead-letters", routes::dead_letters::router())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
