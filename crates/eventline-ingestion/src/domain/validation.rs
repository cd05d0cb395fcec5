//! Structural and business-rule validation of decoded events.
//!
//! The validator never fails on bad business data: it collects every
//! violation into a [`ValidationReport`]. Envelope checks apply to every
//! event; payload rules are looked up by event type, and a type without a
//! rule is logged and passes on the envelope checks alone.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use tracing::warn;

use super::envelope::{EventEnvelope, IncomingEvent};
use super::payloads::{
    EventPayload, ORDER_CANCELLED_EVENT_TYPE, ORDER_CREATED_EVENT_TYPE, ORDER_SHIPPED_EVENT_TYPE,
    PAYMENT_PROCESSED_EVENT_TYPE,
};

/// Default tolerance, in seconds, for producer clocks running ahead of ours.
pub const DEFAULT_MAX_FUTURE_SKEW_SECS: i64 = 300;

const MAX_EVENT_TYPE_LEN: usize = 100;
const MAX_AGGREGATE_ID_LEN: usize = 255;
const MAX_AGGREGATE_TYPE_LEN: usize = 100;
const MAX_SOURCE_LEN: usize = 255;
const MAX_TRACE_FIELD_LEN: usize = 255;

/// Outcome of validating one event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    violations: Vec<String>,
}

impl ValidationReport {
    /// Returns `true` when no rule was violated.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.violations.is_empty()
    }

    /// Returns every violation, in rule order.
    #[must_use]
    pub fn violations(&self) -> &[String] {
        &self.violations
    }

    /// Joins the violations into one message.
    #[must_use]
    pub fn message(&self) -> String {
        self.violations.join("; ")
    }
}

/// Business rules for one event type's payload.
pub trait PayloadRule: Send + Sync {
    /// Appends a message to `violations` for each broken rule.
    fn check(&self, payload: &EventPayload, violations: &mut Vec<String>);
}

fn require_non_empty(field: &str, value: &str, violations: &mut Vec<String>) {
    if value.trim().is_empty() {
        violations.push(format!("{field} must not be empty"));
    }
}

fn require_bounded(field: &str, value: &str, max: usize, violations: &mut Vec<String>) {
    if value.trim().is_empty() {
        violations.push(format!("{field} must not be empty"));
    } else if value.chars().count() > max {
        violations.push(format!("{field} must be at most {max} characters"));
    }
}

fn require_bounded_if_set(
    field: &str,
    value: Option<&str>,
    max: usize,
    violations: &mut Vec<String>,
) {
    if value.is_some_and(|v| v.chars().count() > max) {
        violations.push(format!("{field} must be at most {max} characters"));
    }
}

fn require_positive(field: &str, value: f64, violations: &mut Vec<String>) {
    if value.is_nan() || value <= 0.0 {
        violations.push(format!("{field} must be greater than 0"));
    }
}

fn require_currency(value: &str, violations: &mut Vec<String>) {
    if value.chars().count() != 3 {
        violations.push("currency must be exactly 3 characters".to_owned());
    }
}

fn payload_mismatch(expected: &str, payload: &EventPayload, violations: &mut Vec<String>) {
    violations.push(format!(
        "payload is {} but the rule expects {expected}",
        payload.event_type()
    ));
}

/// Rules for `OrderCreated`.
#[derive(Debug, Clone, Copy)]
pub struct OrderCreatedRules;

impl PayloadRule for OrderCreatedRules {
    fn check(&self, payload: &EventPayload, violations: &mut Vec<String>) {
        let EventPayload::OrderCreated(order) = payload else {
            return payload_mismatch(ORDER_CREATED_EVENT_TYPE, payload, violations);
        };
        require_non_empty("customer_id", &order.customer_id, violations);
        require_positive("total_amount", order.total_amount, violations);
        require_currency(&order.currency, violations);
        if order.line_items.is_empty() {
            violations.push("order must have at least one line item".to_owned());
        }
        for (index, item) in order.line_items.iter().enumerate() {
            require_non_empty(&format!("line_items[{index}].sku"), &item.sku, violations);
            if item.quantity == 0 {
                violations.push(format!("line_items[{index}].quantity must be greater than 0"));
            }
            require_positive(
                &format!("line_items[{index}].unit_price"),
                item.unit_price,
                violations,
            );
        }
    }
}

/// Rules for `OrderShipped`.
#[derive(Debug, Clone, Copy)]
pub struct OrderShippedRules;

impl PayloadRule for OrderShippedRules {
    fn check(&self, payload: &EventPayload, violations: &mut Vec<String>) {
        let EventPayload::OrderShipped(shipment) = payload else {
            return payload_mismatch(ORDER_SHIPPED_EVENT_TYPE, payload, violations);
        };
        require_non_empty("carrier", &shipment.carrier, violations);
        require_non_empty("tracking_number", &shipment.tracking_number, violations);
    }
}

/// Rules for `OrderCancelled`.
#[derive(Debug, Clone, Copy)]
pub struct OrderCancelledRules;

impl PayloadRule for OrderCancelledRules {
    fn check(&self, payload: &EventPayload, violations: &mut Vec<String>) {
        let EventPayload::OrderCancelled(cancellation) = payload else {
            return payload_mismatch(ORDER_CANCELLED_EVENT_TYPE, payload, violations);
        };
        require_non_empty("reason", &cancellation.reason, violations);
    }
}

/// Rules for `PaymentProcessed`.
#[derive(Debug, Clone, Copy)]
pub struct PaymentProcessedRules;

impl PayloadRule for PaymentProcessedRules {
    fn check(&self, payload: &EventPayload, violations: &mut Vec<String>) {
        let EventPayload::PaymentProcessed(payment) = payload else {
            return payload_mismatch(PAYMENT_PROCESSED_EVENT_TYPE, payload, violations);
        };
        require_non_empty("payment_id", &payment.payment_id, violations);
        require_positive("amount", payment.amount, violations);
        require_currency(&payment.currency, violations);
    }
}

/// Validates envelopes and dispatches payload rules by event type.
pub struct EventValidator {
    rules: HashMap<&'static str, Box<dyn PayloadRule>>,
    max_future_skew: Duration,
}

impl std::fmt::Debug for EventValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventValidator")
            .field("rules", &self.rules.keys().collect::<Vec<_>>())
            .field("max_future_skew", &self.max_future_skew)
            .finish()
    }
}

impl EventValidator {
    /// Creates a validator with no payload rules.
    #[must_use]
    pub fn new(max_future_skew: Duration) -> Self {
        Self {
            rules: HashMap::new(),
            max_future_skew,
        }
    }

    /// Creates a validator with the rules of the event catalogue.
    #[must_use]
    pub fn with_catalogue_rules(max_future_skew: Duration) -> Self {
        let mut validator = Self::new(max_future_skew);
        validator.register(ORDER_CREATED_EVENT_TYPE, Box::new(OrderCreatedRules));
        validator.register(ORDER_SHIPPED_EVENT_TYPE, Box::new(OrderShippedRules));
        validator.register(ORDER_CANCELLED_EVENT_TYPE, Box::new(OrderCancelledRules));
        validator.register(PAYMENT_PROCESSED_EVENT_TYPE, Box::new(PaymentProcessedRules));
        validator
    }

    /// Registers `rule` for `event_type`, replacing any previous one.
    pub fn register(&mut self, event_type: &'static str, rule: Box<dyn PayloadRule>) {
        self.rules.insert(event_type, rule);
    }

    /// Validates `event` as of `now` (the ingestion wall-clock).
    #[must_use]
    pub fn validate(&self, event: &IncomingEvent, now: DateTime<Utc>) -> ValidationReport {
        let mut violations = Vec::new();
        self.check_envelope(&event.envelope, now, &mut violations);

        match self.rules.get(event.envelope.event_type.as_str()) {
            Some(rule) => rule.check(&event.payload, &mut violations),
            None => warn!(
                event_type = %event.envelope.event_type,
                "no payload validator registered; applying envelope checks only"
            ),
        }

        ValidationReport { violations }
    }

    fn check_envelope(
        &self,
        envelope: &EventEnvelope,
        now: DateTime<Utc>,
        violations: &mut Vec<String>,
    ) {
        if envelope.event_id.is_nil() {
            violations.push("event_id must not be empty".to_owned());
        }
        require_bounded("event_type", &envelope.event_type, MAX_EVENT_TYPE_LEN, violations);
        require_bounded(
            "aggregate_id",
            &envelope.aggregate_id,
            MAX_AGGREGATE_ID_LEN,
            violations,
        );
        require_bounded(
            "aggregate_type",
            &envelope.aggregate_type,
            MAX_AGGREGATE_TYPE_LEN,
            violations,
        );
        require_bounded("source", &envelope.source, MAX_SOURCE_LEN, violations);
        require_bounded_if_set(
            "correlation_id",
            envelope.correlation_id.as_deref(),
            MAX_TRACE_FIELD_LEN,
            violations,
        );
        require_bounded_if_set(
            "causation_id",
            envelope.causation_id.as_deref(),
            MAX_TRACE_FIELD_LEN,
            violations,
        );
        require_bounded_if_set(
            "user_id",
            envelope.user_id.as_deref(),
            MAX_TRACE_FIELD_LEN,
            violations,
        );
        if envelope.version <= 0 {
            violations.push("version must be greater than 0".to_owned());
        }
        if envelope.timestamp == DateTime::<Utc>::default() {
            violations.push("timestamp must be set".to_owned());
        } else if now
            .checked_add_signed(self.max_future_skew)
            .is_some_and(|latest| envelope.timestamp > latest)
        {
            violations.push(format!(
                "timestamp {} is more than {} seconds in the future",
                envelope.timestamp.to_rfc3339(),
                self.max_future_skew.num_seconds()
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use uuid::Uuid;

    use super::*;
    use crate::domain::payloads::{
        INVENTORY_RESERVED_EVENT_TYPE, InventoryReserved, LineItem, OrderCreated, PaymentProcessed,
    };

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 15, 10, 0, 0).unwrap()
    }

    fn envelope(event_type: &str) -> EventEnvelope {
        EventEnvelope {
            event_id: Uuid::new_v4(),
            event_type: event_type.to_owned(),
            aggregate_id: "order-123".to_owned(),
            aggregate_type: "Order".to_owned(),
            version: 1,
            timestamp: now(),
            source: "checkout".to_owned(),
            correlation_id: None,
            causation_id: None,
            user_id: None,
            payload: serde_json::Value::Null,
        }
    }

    fn valid_order() -> OrderCreated {
        OrderCreated {
            customer_id: "cust-9".to_owned(),
            total_amount: 42.5,
            currency: "EUR".to_owned(),
            line_items: vec![LineItem {
                sku: "SKU-1".to_owned(),
                quantity: 1,
                unit_price: 42.5,
            }],
        }
    }

    fn order_event(order: OrderCreated) -> IncomingEvent {
        IncomingEvent {
            envelope: envelope(ORDER_CREATED_EVENT_TYPE),
            payload: EventPayload::OrderCreated(order),
        }
    }

    fn validator() -> EventValidator {
        EventValidator::with_catalogue_rules(Duration::seconds(DEFAULT_MAX_FUTURE_SKEW_SECS))
    }

    #[test]
    fn test_valid_order_passes() {
        let report = validator().validate(&order_event(valid_order()), now());
        assert!(report.is_valid(), "{:?}", report.violations());
    }

    #[test]
    fn test_envelope_violations_are_all_collected() {
        let mut event = order_event(valid_order());
        event.envelope.event_id = Uuid::nil();
        event.envelope.aggregate_id = String::new();
        event.envelope.source = "   ".to_owned();
        event.envelope.version = 0;

        let report = validator().validate(&event, now());

        assert_eq!(
            report.violations(),
            [
                "event_id must not be empty",
                "aggregate_id must not be empty",
                "source must not be empty",
                "version must be greater than 0",
            ]
        );
    }

    #[test]
    fn test_overlong_fields_are_rejected() {
        let mut event = order_event(valid_order());
        event.envelope.aggregate_type = "x".repeat(101);

        let report = validator().validate(&event, now());

        assert_eq!(
            report.violations(),
            ["aggregate_type must be at most 100 characters"]
        );
    }

    #[test]
    fn test_overlong_correlation_id_is_rejected() {
        let mut event = order_event(valid_order());
        event.envelope.correlation_id = Some("c".repeat(256));

        let report = validator().validate(&event, now());

        assert_eq!(
            report.violations(),
            ["correlation_id must be at most 255 characters"]
        );
    }

    #[test]
    fn test_overlong_causation_id_is_rejected() {
        let mut event = order_event(valid_order());
        event.envelope.causation_id = Some("c".repeat(256));

        let report = validator().validate(&event, now());

        assert_eq!(
            report.violations(),
            ["causation_id must be at most 255 characters"]
        );
    }

    #[test]
    fn test_overlong_user_id_is_rejected() {
        let mut event = order_event(valid_order());
        event.envelope.user_id = Some("u".repeat(256));

        let report = validator().validate(&event, now());

        assert_eq!(report.violations(), ["user_id must be at most 255 characters"]);
    }

    #[test]
    fn test_trace_fields_at_the_limit_pass() {
        let mut event = order_event(valid_order());
        event.envelope.correlation_id = Some("c".repeat(255));
        event.envelope.causation_id = Some(String::new());
        event.envelope.user_id = Some("u".repeat(255));

        assert!(validator().validate(&event, now()).is_valid());
    }

    #[test]
    fn test_skew_beyond_the_calendar_never_overflows() {
        let validator = EventValidator::with_catalogue_rules(Duration::MAX);
        let mut event = order_event(valid_order());
        event.envelope.timestamp = now() + Duration::days(365);

        assert!(validator.validate(&event, now()).is_valid());
    }

    #[test]
    fn test_missing_timestamp_is_rejected() {
        let mut event = order_event(valid_order());
        event.envelope.timestamp = DateTime::<Utc>::default();

        let report = validator().validate(&event, now());

        assert_eq!(report.violations(), ["timestamp must be set"]);
    }

    #[test]
    fn test_future_skew_boundary() {
        let mut within = order_event(valid_order());
        within.envelope.timestamp = now() + Duration::minutes(5);
        assert!(validator().validate(&within, now()).is_valid());

        let mut beyond = order_event(valid_order());
        beyond.envelope.timestamp = now() + Duration::minutes(5) + Duration::seconds(1);
        let report = validator().validate(&beyond, now());
        assert_eq!(report.violations().len(), 1);
        assert!(report.violations()[0].contains("in the future"));
    }

    #[test]
    fn test_order_business_rules() {
        let order = OrderCreated {
            customer_id: "cust-9".to_owned(),
            total_amount: 0.0,
            currency: "EURO".to_owned(),
            line_items: Vec::new(),
        };

        let report = validator().validate(&order_event(order), now());

        assert_eq!(
            report.violations(),
            [
                "total_amount must be greater than 0",
                "currency must be exactly 3 characters",
                "order must have at least one line item",
            ]
        );
        assert_eq!(
            report.message(),
            "total_amount must be greater than 0; currency must be exactly 3 characters; \
             order must have at least one line item"
        );
    }

    #[test]
    fn test_line_item_rules() {
        let mut order = valid_order();
        order.line_items.push(LineItem {
            sku: String::new(),
            quantity: 0,
            unit_price: -1.0,
        });

        let report = validator().validate(&order_event(order), now());

        assert_eq!(
            report.violations(),
            [
                "line_items[1].sku must not be empty",
                "line_items[1].quantity must be greater than 0",
                "line_items[1].unit_price must be greater than 0",
            ]
        );
    }

    #[test]
    fn test_payment_rules() {
        let event = IncomingEvent {
            envelope: envelope(PAYMENT_PROCESSED_EVENT_TYPE),
            payload: EventPayload::PaymentProcessed(PaymentProcessed {
                payment_id: "pay-1".to_owned(),
                amount: f64::NAN,
                currency: "US".to_owned(),
                method: None,
            }),
        };

        let report = validator().validate(&event, now());

        assert_eq!(
            report.violations(),
            [
                "amount must be greater than 0",
                "currency must be exactly 3 characters",
            ]
        );
    }

    #[test]
    fn test_type_without_rule_passes_on_envelope_checks() {
        let event = IncomingEvent {
            envelope: envelope(INVENTORY_RESERVED_EVENT_TYPE),
            payload: EventPayload::InventoryReserved(InventoryReserved {
                sku: String::new(),
                quantity: 0,
                warehouse_id: None,
            }),
        };

        assert!(validator().validate(&event, now()).is_valid());

        let mut bad_envelope = event;
        bad_envelope.envelope.version = -1;
        assert!(!validator().validate(&bad_envelope, now()).is_valid());
    }
}
