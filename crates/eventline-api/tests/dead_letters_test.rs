//! Integration tests for the dead-letter routes.

mod common;

use axum::http::StatusCode;
use eventline_ingestion::application::processor::ProcessOutcome;
use eventline_test_support::log_message;
use serde_json::json;
use uuid::Uuid;

async fn dead_letter(app: &common::TestApp, offset: i64, raw: &[u8]) -> Uuid {
    match app
        .processor
        .process(&log_message(offset, "order-123", raw.to_vec()))
        .await
    {
        ProcessOutcome::DeadLettered {
            entry_id: Some(id), ..
        } => id,
        other => panic!("expected a dead-letter entry, got {other:?}"),
    }
}

#[tokio::test]
async fn test_list_returns_unresolved_entries() {
    // Arrange
    let app = common::build_test_app(vec![]);
    let first = dead_letter(&app, 1, b"not json").await;
    dead_letter(&app, 2, br#"{"event_type":"Unknown"}"#).await;

    // Act
    let (status, json) = common::get_json(app.router.clone(), "/api/v1/dead-letters").await;

    // Assert
    assert_eq!(status, StatusCode::OK);
    let entries = json.as_array().unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0]["id"], first.to_string());
    assert_eq!(entries[0]["failure_kind"], "DESERIALIZATION_FAILURE");
    assert_eq!(entries[0]["raw_message"], "not json");

    let (_, json) = common::get_json(app.router.clone(), "/api/v1/dead-letters?limit=1").await;
    assert_eq!(json.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_reprocess_of_a_still_broken_message_records_a_retry() {
    // Arrange
    let app = common::build_test_app(vec![]);
    let id = dead_letter(&app, 1, b"not json").await;

    // Act
    let (status, json) = common::post_empty(
        app.router.clone(),
        &format!("/api/v1/dead-letters/{id}/reprocess"),
    )
    .await;

    // Assert
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["outcome"], "failed");
    assert_eq!(json["kind"], "DESERIALIZATION_FAILURE");
    assert_eq!(json["retry_count"], 1);

    let (status, json) =
        common::get_json(app.router.clone(), &format!("/api/v1/dead-letters/{id}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["retry_count"], 1);
    assert_eq!(json["resolved"], false);
}

#[tokio::test]
async fn test_resolve_is_idempotent_and_blocks_reprocessing() {
    // Arrange
    let app = common::build_test_app(vec![]);
    let id = dead_letter(&app, 1, b"not json").await;
    let uri = format!("/api/v1/dead-letters/{id}/resolve");

    // Act
    let (first_status, first) =
        common::post_json(app.router.clone(), &uri, &json!({ "resolved_by": "alice" })).await;
    let (_, second) =
        common::post_json(app.router.clone(), &uri, &json!({ "resolved_by": "bob" })).await;
    let (reprocess_status, reprocess) = common::post_empty(
        app.router.clone(),
        &format!("/api/v1/dead-letters/{id}/reprocess"),
    )
    .await;

    // Assert
    assert_eq!(first_status, StatusCode::OK);
    assert_eq!(first["resolved"], true);
    assert_eq!(second["resolved"], false);
    assert_eq!(reprocess_status, StatusCode::CONFLICT);
    assert_eq!(reprocess["error"], "dead_letter_already_resolved");
    assert_eq!(
        app.dead_letters.entries()[0].resolved_by.as_deref(),
        Some("alice")
    );

    let (_, json) = common::get_json(app.router.clone(), "/api/v1/dead-letters").await;
    assert!(json.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_unknown_entry_returns_404() {
    let app = common::build_test_app(vec![]);

    let (status, json) = common::post_empty(
        app.router.clone(),
        &format!("/api/v1/dead-letters/{}/reprocess", Uuid::new_v4()),
    )
    .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["error"], "dead_letter_not_found");
}
