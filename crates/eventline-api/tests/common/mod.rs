//! Shared test helpers for API integration tests.
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use eventline_core::clock::Clock;
use eventline_core::event::Event;
use eventline_core::message::LogPublisher;
use eventline_core::metrics::NoopMetrics;
use eventline_ingestion::application::dead_letters::DeadLetterReprocessor;
use eventline_ingestion::application::processor::EventProcessor;
use eventline_ingestion::domain::registry::DecoderRegistry;
use eventline_ingestion::domain::validation::{DEFAULT_MAX_FUTURE_SKEW_SECS, EventValidator};
use eventline_replay::coordinator::{ReplayConfig, ReplayCoordinator};
use eventline_replay::dispatch::DestinationDispatchers;
use eventline_test_support::{
    FixedClock, InMemoryDeadLetterSink, InMemoryEventStore, InMemoryReplayJobRepository,
    RecordingLogPublisher, fixed_now,
};
use http_body_util::BodyExt;
use tower::ServiceExt;

use eventline_api::state::AppState;

/// The app plus handles on the in-memory ports behind it.
pub struct TestApp {
    pub router: Router,
    pub replays: Arc<ReplayCoordinator>,
    pub processor: Arc<EventProcessor>,
    pub store: InMemoryEventStore,
    pub jobs: InMemoryReplayJobRepository,
    pub dead_letters: InMemoryDeadLetterSink,
    pub publisher: RecordingLogPublisher,
}

/// Build the full app router over in-memory ports seeded with `events` and
/// a clock fixed at 2026-01-15 10:00 UTC. Uses the same route structure as
/// the binary.
pub fn build_test_app(events: Vec<Event>) -> TestApp {
    let clock: Arc<dyn Clock> = Arc::new(FixedClock(fixed_now()));
    let store = InMemoryEventStore::with_events(events);
    let jobs = InMemoryReplayJobRepository::new();
    let dead_letters = InMemoryDeadLetterSink::new();
    let publisher = RecordingLogPublisher::new();

    let processor = Arc::new(EventProcessor::new(
        Arc::new(DecoderRegistry::with_catalogue()),
        Arc::new(EventValidator::with_catalogue_rules(chrono::Duration::seconds(
            DEFAULT_MAX_FUTURE_SKEW_SECS,
        ))),
        Arc::new(store.clone()),
        Arc::new(dead_letters.clone()),
        Arc::new(NoopMetrics),
        Arc::clone(&clock),
    ));
    let reprocessor = Arc::new(DeadLetterReprocessor::new(
        Arc::clone(&processor),
        Arc::new(dead_letters.clone()),
        Arc::clone(&clock),
    ));

    let topic_publisher: Arc<dyn LogPublisher> = Arc::new(publisher.clone());
    let dispatchers =
        DestinationDispatchers::new(Some(topic_publisher), Duration::from_secs(5)).unwrap();
    let replays = Arc::new(ReplayCoordinator::new(
        Arc::new(store.clone()),
        Arc::new(jobs.clone()),
        Arc::new(dispatchers),
        Arc::new(NoopMetrics),
        clock,
        ReplayConfig::default(),
    ));

    let router = eventline_api::app(AppState::new(Arc::clone(&replays), reprocessor, None));

    TestApp {
        router,
        replays,
        processor,
        store,
        jobs,
        dead_letters,
        publisher,
    }
}

async fn send(app: Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let body_bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&body_bytes).unwrap();

    (status, json)
}

/// Send a POST request with a JSON body and return the response.
pub async fn post_json(
    app: Router,
    uri: &str,
    body: &serde_json::Value,
) -> (StatusCode, serde_json::Value) {
    let request = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(body).unwrap()))
        .unwrap();

    send(app, request).await
}

/// Send a POST request without a body and return the response.
pub async fn post_empty(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let request = Request::builder()
        .method("POST")
        .uri(uri)
        .body(Body::empty())
        .unwrap();

    send(app, request).await
}

/// Send a GET request and return the response.
pub async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let request = Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .unwrap();

    send(app, request).await
}
