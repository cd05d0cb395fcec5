//! Decoder registry: maps `event_type` to the function that decodes its payload.

use std::collections::HashMap;

use serde::de::DeserializeOwned;
use thiserror::Error;

use super::envelope::{EventEnvelope, IncomingEvent};
use super::payloads::{
    EventPayload, INVENTORY_RESERVED_EVENT_TYPE, InventoryReserved, ORDER_CANCELLED_EVENT_TYPE,
    ORDER_CREATED_EVENT_TYPE, ORDER_SHIPPED_EVENT_TYPE, OrderCancelled, OrderCreated,
    OrderShipped, PAYMENT_PROCESSED_EVENT_TYPE, PaymentProcessed,
};

/// Decodes the payload of one event type.
pub type DecodeFn = fn(&serde_json::Value) -> Result<EventPayload, serde_json::Error>;

/// Why a message could not be decoded.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The message is not a JSON envelope.
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(#[source] serde_json::Error),

    /// The envelope has no `event_type`.
    #[error("envelope is missing event_type")]
    MissingEventType,

    /// No decoder is registered for the event type.
    #[error("unknown event type: {0}")]
    UnknownEventType(String),

    /// The payload does not fit the registered type.
    #[error("malformed {event_type} payload: {source}")]
    MalformedPayload {
        /// The event type whose decoder rejected the payload.
        event_type: String,
        /// The decoder error.
        #[source]
        source: serde_json::Error,
    },
}

/// Decodes a payload as `T`.
fn decode_as<T>(payload: &serde_json::Value) -> Result<EventPayload, serde_json::Error>
where
    T: DeserializeOwned + Into<EventPayload>,
{
    <T as serde::Deserialize>::deserialize(payload).map(Into::into)
}

/// Registry of payload decoders, populated once at start-up.
#[derive(Debug, Clone, Default)]
pub struct DecoderRegistry {
    decoders: HashMap<&'static str, DecodeFn>,
}

impl DecoderRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry holding decoders for the whole event catalogue.
    #[must_use]
    pub fn with_catalogue() -> Self {
        let mut registry = Self::new();
        registry.register(ORDER_CREATED_EVENT_TYPE, decode_as::<OrderCreated>);
        registry.register(ORDER_SHIPPED_EVENT_TYPE, decode_as::<OrderShipped>);
        registry.register(ORDER_CANCELLED_EVENT_TYPE, decode_as::<OrderCancelled>);
        registry.register(PAYMENT_PROCESSED_EVENT_TYPE, decode_as::<PaymentProcessed>);
        registry.register(INVENTORY_RESERVED_EVENT_TYPE, decode_as::<InventoryReserved>);
        registry
    }

    /// Registers `decoder` for `event_type`, replacing any previous one.
    pub fn register(&mut self, event_type: &'static str, decoder: DecodeFn) {
        self.decoders.insert(event_type, decoder);
    }

    /// Returns `true` if `event_type` has a decoder.
    #[must_use]
    pub fn contains(&self, event_type: &str) -> bool {
        self.decoders.contains_key(event_type)
    }

    /// Parses the envelope in `raw` and decodes its payload.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError`] for non-JSON input, a missing or unregistered
    /// `event_type`, or a payload the type's decoder rejects.
    pub fn decode(&self, raw: &[u8]) -> Result<IncomingEvent, DecodeError> {
        let envelope: EventEnvelope =
            serde_json::from_slice(raw).map_err(DecodeError::MalformedEnvelope)?;
        if envelope.event_type.trim().is_empty() {
            return Err(DecodeError::MissingEventType);
        }
        let decoder = self
            .decoders
            .get(envelope.event_type.as_str())
            .ok_or_else(|| DecodeError::UnknownEventType(envelope.event_type.clone()))?;
        let payload = decoder(&envelope.payload).map_err(|source| DecodeError::MalformedPayload {
            event_type: envelope.event_type.clone(),
            source,
        })?;
        Ok(IncomingEvent { envelope, payload })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn order_created_message() -> serde_json::Value {
        json!({
            "event_id": "0190a5f4-7c4e-7d1a-9b53-1f2d3c4b5a69",
            "event_type": "OrderCreated",
            "aggregate_id": "order-123",
            "aggregate_type": "Order",
            "version": 1,
            "timestamp": "2026-01-15T10:00:00Z",
            "source": "checkout",
            "payload": {
                "customer_id": "cust-9",
                "total_amount": 42.5,
                "currency": "EUR",
                "line_items": [{"sku": "SKU-1", "quantity": 1, "unit_price": 42.5}]
            }
        })
    }

    #[test]
    fn test_decode_dispatches_on_event_type() {
        let registry = DecoderRegistry::with_catalogue();
        let raw = serde_json::to_vec(&order_created_message()).unwrap();

        let incoming = registry.decode(&raw).unwrap();

        assert_eq!(incoming.envelope.aggregate_id, "order-123");
        match incoming.payload {
            EventPayload::OrderCreated(order) => {
                assert_eq!(order.currency, "EUR");
                assert_eq!(order.line_items.len(), 1);
            }
            other => panic!("expected OrderCreated, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_event_type_is_rejected() {
        let registry = DecoderRegistry::with_catalogue();
        let mut message = order_created_message();
        message["event_type"] = json!("OrderTeleported");
        let raw = serde_json::to_vec(&message).unwrap();

        let err = registry.decode(&raw).unwrap_err();

        assert!(matches!(err, DecodeError::UnknownEventType(t) if t == "OrderTeleported"));
    }

    #[test]
    fn test_missing_event_type_is_rejected() {
        let registry = DecoderRegistry::with_catalogue();
        let mut message = order_created_message();
        message.as_object_mut().unwrap().remove("event_type");
        let raw = serde_json::to_vec(&message).unwrap();

        assert!(matches!(
            registry.decode(&raw),
            Err(DecodeError::MissingEventType)
        ));
    }

    #[test]
    fn test_non_json_message_is_malformed() {
        let registry = DecoderRegistry::with_catalogue();
        assert!(matches!(
            registry.decode(b"not json"),
            Err(DecodeError::MalformedEnvelope(_))
        ));
    }

    #[test]
    fn test_payload_of_wrong_shape_is_malformed() {
        let registry = DecoderRegistry::with_catalogue();
        let mut message = order_created_message();
        message["payload"] = json!({"customer_id": 17});
        let raw = serde_json::to_vec(&message).unwrap();

        assert!(matches!(
            registry.decode(&raw),
            Err(DecodeError::MalformedPayload { event_type, .. }) if event_type == "OrderCreated"
        ));
    }

    #[test]
    fn test_empty_registry_knows_no_types() {
        let registry = DecoderRegistry::new();
        assert!(!registry.contains(ORDER_CREATED_EVENT_TYPE));
        assert!(DecoderRegistry::with_catalogue().contains(ORDER_CREATED_EVENT_TYPE));
    }
}
