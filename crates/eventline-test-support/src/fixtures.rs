//! Canned messages and events.

use chrono::{DateTime, TimeZone, Utc};
use eventline_core::event::Event;
use eventline_core::message::LogMessage;
use serde_json::json;
use uuid::Uuid;

/// The instant every [`FixedClock`](crate::FixedClock) in the test suites
/// reports: 2026-01-15 10:00:00 UTC.
///
/// # Panics
///
/// Never; the date is valid.
#[must_use]
pub fn fixed_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 15, 10, 0, 0).unwrap()
}

/// Serializes a well-formed `OrderCreated` message for `aggregate_id` at
/// `version`, stamped one minute before [`fixed_now`].
///
/// # Panics
///
/// Never; the message is built from a JSON literal.
#[must_use]
pub fn order_created_message(event_id: Uuid, aggregate_id: &str, version: i64) -> Vec<u8> {
    let timestamp = fixed_now() - chrono::Duration::minutes(1);
    serde_json::to_vec(&json!({
        "event_id": event_id,
        "event_type": "OrderCreated",
        "aggregate_id": aggregate_id,
        "aggregate_type": "Order",
        "version": version,
        "timestamp": timestamp,
        "source": "checkout",
        "correlation_id": "corr-1",
        "payload": {
            "customer_id": "cust-9",
            "total_amount": 42.5,
            "currency": "EUR",
            "line_items": [{"sku": "SKU-1", "quantity": 1, "unit_price": 42.5}]
        }
    }))
    .unwrap()
}

/// Builds a committed `OrderCreated` event for the replay and store suites.
#[must_use]
pub fn stored_event(aggregate_id: &str, version: i64, timestamp: DateTime<Utc>) -> Event {
    Event {
        event_id: Uuid::new_v4(),
        event_type: "OrderCreated".into(),
        aggregate_id: aggregate_id.into(),
        aggregate_type: "Order".into(),
        version,
        timestamp,
        source: "checkout".into(),
        correlation_id: None,
        causation_id: None,
        user_id: None,
        payload: json!({"customer_id": "cust-9", "total_amount": 42.5, "currency": "EUR"}),
        ingested_at: timestamp,
        origin: None,
    }
}

/// Wraps `value` as the message at `offset` of partition 0 of
/// `business-events`, keyed by `key`.
#[must_use]
pub fn log_message(offset: i64, key: &str, value: Vec<u8>) -> LogMessage {
    LogMessage {
        key: Some(key.to_owned()),
        value,
        topic: "business-events".into(),
        partition: 0,
        offset,
    }
}
