//! Typed payloads for the registered business event types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Event type name for [`OrderCreated`].
pub const ORDER_CREATED_EVENT_TYPE: &str = "OrderCreated";
/// Event type name for [`OrderShipped`].
pub const ORDER_SHIPPED_EVENT_TYPE: &str = "OrderShipped";
/// Event type name for [`OrderCancelled`].
pub const ORDER_CANCELLED_EVENT_TYPE: &str = "OrderCancelled";
/// Event type name for [`PaymentProcessed`].
pub const PAYMENT_PROCESSED_EVENT_TYPE: &str = "PaymentProcessed";
/// Event type name for [`InventoryReserved`].
pub const INVENTORY_RESERVED_EVENT_TYPE: &str = "InventoryReserved";

/// One line of an order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    /// Stock keeping unit.
    pub sku: String,
    /// Units ordered.
    pub quantity: u32,
    /// Price per unit in the order currency.
    pub unit_price: f64,
}

/// Emitted when a customer places an order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderCreated {
    /// The ordering customer.
    pub customer_id: String,
    /// Order total in `currency`.
    pub total_amount: f64,
    /// ISO 4217 currency code.
    pub currency: String,
    /// Ordered lines.
    #[serde(default)]
    pub line_items: Vec<LineItem>,
}

/// Emitted when an order leaves the warehouse.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderShipped {
    /// Shipping carrier.
    pub carrier: String,
    /// Carrier tracking number.
    pub tracking_number: String,
    /// When the parcel was handed over, if reported.
    #[serde(default)]
    pub shipped_at: Option<DateTime<Utc>>,
}

/// Emitted when an order is cancelled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderCancelled {
    /// Why the order was cancelled.
    pub reason: String,
}

/// Emitted when a payment settles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentProcessed {
    /// Payment provider reference.
    pub payment_id: String,
    /// Settled amount in `currency`.
    pub amount: f64,
    /// ISO 4217 currency code.
    pub currency: String,
    /// Payment method, e.g. `card`.
    #[serde(default)]
    pub method: Option<String>,
}

/// Emitted when stock is held for an order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventoryReserved {
    /// Reserved stock keeping unit.
    pub sku: String,
    /// Units reserved.
    pub quantity: u32,
    /// Warehouse holding the stock.
    #[serde(default)]
    pub warehouse_id: Option<String>,
}

/// Decoded payload of a registered event type.
#[derive(Debug, Clone, PartialEq)]
pub enum EventPayload {
    /// An order was placed.
    OrderCreated(OrderCreated),
    /// An order shipped.
    OrderShipped(OrderShipped),
    /// An order was cancelled.
    OrderCancelled(OrderCancelled),
    /// A payment settled.
    PaymentProcessed(PaymentProcessed),
    /// Stock was reserved.
    InventoryReserved(InventoryReserved),
}

impl EventPayload {
    /// Returns the event type name of this payload.
    #[must_use]
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::OrderCreated(_) => ORDER_CREATED_EVENT_TYPE,
            Self::OrderShipped(_) => ORDER_SHIPPED_EVENT_TYPE,
            Self::OrderCancelled(_) => ORDER_CANCELLED_EVENT_TYPE,
            Self::PaymentProcessed(_) => PAYMENT_PROCESSED_EVENT_TYPE,
            Self::InventoryReserved(_) => INVENTORY_RESERVED_EVENT_TYPE,
        }
    }
}

impl From<OrderCreated> for EventPayload {
    fn from(payload: OrderCreated) -> Self {
        Self::OrderCreated(payload)
    }
}

impl From<OrderShipped> for EventPayload {
    fn from(payload: OrderShipped) -> Self {
        Self::OrderShipped(payload)
    }
}

impl From<OrderCancelled> for EventPayload {
    fn from(payload: OrderCancelled) -> Self {
        Self::OrderCancelled(payload)
    }
}

impl From<PaymentProcessed> for EventPayload {
    fn from(payload: PaymentProcessed) -> Self {
        Self::PaymentProcessed(payload)
    }
}

impl From<InventoryReserved> for EventPayload {
    fn from(payload: InventoryReserved) -> Self {
        Self::InventoryReserved(payload)
    }
}
