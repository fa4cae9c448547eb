//! Event payloads for the order context.
//!
//! Each payload is bound to one event name through [`EventPayload::NAME`].
//! Amounts are integer cents.

use cascade_core::event::EventPayload;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::aggregates::OrderStatus;

/// A product and quantity on an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    /// Catalog product identifier.
    pub product_id: u64,
    /// Units ordered.
    pub quantity: u32,
}

/// Why reserved stock went back on the shelf.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseReason {
    PaymentFailed,
    OrderCancelled,
    OrderExpired,
}

impl std::fmt::Display for ReleaseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::PaymentFailed => "payment_failed",
            Self::OrderCancelled => "order_cancelled",
            Self::OrderExpired => "order_expired",
        })
    }
}

/// An order was placed and is awaiting payment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderCreated {
    pub order_id: Uuid,
    pub customer_id: u64,
    pub total_cents: u64,
    pub items: Vec<LineItem>,
    pub expires_at: DateTime<Utc>,
}

impl EventPayload for OrderCreated {
    const NAME: &'static str = "OrderCreated";
}

/// The payment gateway captured the order total.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentProcessed {
    pub order_id: Uuid,
    pub payment_id: String,
    pub amount_cents: u64,
}

impl EventPayload for PaymentProcessed {
    const NAME: &'static str = "PaymentProcessed";
}

/// The payment gateway declined the charge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentFailed {
    pub order_id: Uuid,
    pub amount_cents: u64,
    pub reason: String,
}

impl EventPayload for PaymentFailed {
    const NAME: &'static str = "PaymentFailed";
}

/// Payment is settled and the order can be fulfilled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentCompleted {
    pub order_id: Uuid,
    pub payment_id: String,
    pub amount_cents: u64,
}

impl EventPayload for PaymentCompleted {
    const NAME: &'static str = "PaymentCompleted";
}

/// A captured payment was refunded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentRefunded {
    pub order_id: Uuid,
    pub payment_id: String,
    pub refund_id: String,
    pub amount_cents: u64,
}

impl EventPayload for PaymentRefunded {
    const NAME: &'static str = "PaymentRefunded";
}

/// Stock was set aside for an order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventoryReserved {
    pub order_id: Uuid,
    pub items: Vec<LineItem>,
}

impl EventPayload for InventoryReserved {
    const NAME: &'static str = "InventoryReserved";
}

/// A product has no available stock. `order_id` is set when an order's
/// reservation hit the shortage, and unset when the stock sync found it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventoryOutOfStock {
    pub product_id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_id: Option<Uuid>,
}

impl EventPayload for InventoryOutOfStock {
    const NAME: &'static str = "InventoryOutOfStock";
}

/// Reserved stock was returned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventoryReleased {
    pub order_id: Uuid,
    pub items: Vec<LineItem>,
    pub reason: ReleaseReason,
}

impl EventPayload for InventoryReleased {
    const NAME: &'static str = "InventoryReleased";
}

/// Available stock dropped to or below the reorder threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventoryLowStock {
    pub product_id: u64,
    pub available: u32,
    pub threshold: u32,
}

impl EventPayload for InventoryLowStock {
    const NAME: &'static str = "InventoryLowStock";
}

/// The order left the warehouse.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderShipped {
    pub order_id: Uuid,
    pub shipping_id: String,
    pub tracking_number: String,
    pub estimated_delivery: DateTime<Utc>,
}

impl EventPayload for OrderShipped {
    const NAME: &'static str = "OrderShipped";
}

/// The carrier confirmed delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderDelivered {
    pub order_id: Uuid,
    pub tracking_number: String,
    pub delivered_at: DateTime<Utc>,
}

impl EventPayload for OrderDelivered {
    const NAME: &'static str = "OrderDelivered";
}

/// The order moved to a new status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderStatusUpdated {
    pub order_id: Uuid,
    pub status: OrderStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl EventPayload for OrderStatusUpdated {
    const NAME: &'static str = "OrderStatusUpdated";
}

/// The order was cancelled before shipment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderCancelled {
    pub order_id: Uuid,
    pub customer_id: u64,
    pub reason: String,
    pub total_cents: u64,
}

impl EventPayload for OrderCancelled {
    const NAME: &'static str = "OrderCancelled";
}

/// A pending order was never paid in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderExpired {
    pub order_id: Uuid,
    pub expired_at: DateTime<Utc>,
}

impl EventPayload for OrderExpired {
    const NAME: &'static str = "OrderExpired";
}

/// The order reached the end of its lifecycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderCompleted {
    pub order_id: Uuid,
    pub completed_at: DateTime<Utc>,
}

impl EventPayload for OrderCompleted {
    const NAME: &'static str = "OrderCompleted";
}
