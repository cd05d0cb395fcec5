//! Prometheus scrape endpoint.

use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;
use axum::{Router, routing::get};

use crate::state::AppState;

const CONTENT_TYPE: &str = "text/plain; version=0.0.4";

/// GET /metrics
async fn scrape(State(state): State<AppState>) -> impl IntoResponse {
    let body = state
        .metrics
        .as_ref()
        .map(metrics_exporter_prometheus::PrometheusHandle::render)
        .unwrap_or_default();
    ([(header::CONTENT_TYPE, CONTENT_TYPE)], body)
}

/// Returns the metrics router.
pub fn router() -> Router<AppState> {
    Router::new().route("/metrics", get(scrape))
}
