//! Aggregate root for the order context.

use std::fmt;
use std::str::FromStr;

use cascade_core::error::HandlerError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::commands::CreateOrder;
use super::events::LineItem;

/// Lifecycle status of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Paid,
    PaymentFailed,
    Shipped,
    Delivered,
    Completed,
    Cancelled,
    Refunded,
    Expired,
}

impl OrderStatus {
    /// Returns the snake-case label used in events and the API.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Paid => "paid",
            Self::PaymentFailed => "payment_failed",
            Self::Shipped => "shipped",
            Self::Delivered => "delivered",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Refunded => "refunded",
            Self::Expired => "expired",
        }
    }

    /// Whether the lifecycle permits moving from `self` to `to`. Statuses
    /// only move forward; a cancelled order may still record its refund.
    #[must_use]
    pub fn allows(self, to: Self) -> bool {
        matches!(
            (self, to),
            (
                Self::Pending,
                Self::Paid | Self::PaymentFailed | Self::Cancelled | Self::Expired
            ) | (Self::Paid, Self::Shipped | Self::Cancelled)
                | (Self::PaymentFailed, Self::Cancelled | Self::Expired)
                | (Self::Shipped, Self::Delivered)
                | (Self::Delivered, Self::Completed)
                | (Self::Cancelled, Self::Refunded)
        )
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Cancelled | Self::Refunded | Self::Expired
        )
    }

    /// Whether a customer may still cancel.
    #[must_use]
    pub fn is_cancellable(self) -> bool {
        self.allows(Self::Cancelled)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [
            Self::Pending,
            Self::Paid,
            Self::PaymentFailed,
            Self::Shipped,
            Self::Delivered,
            Self::Completed,
            Self::Cancelled,
            Self::Refunded,
            Self::Expired,
        ]
        .into_iter()
        .find(|status| status.as_str() == s)
        .ok_or_else(|| format!("unknown order status: {s}"))
    }
}

/// Outcome of a status change request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// The status moved.
    Applied { from: OrderStatus },
    /// The order was already in the requested status.
    Unchanged,
    /// The lifecycle does not allow the move.
    Rejected { from: OrderStatus },
}

impl Transition {
    #[must_use]
    pub fn is_applied(self) -> bool {
        matches!(self, Self::Applied { .. })
    }
}

/// One priced line of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    pub product_id: u64,
    pub quantity: u32,
    pub unit_price_cents: u64,
}

impl OrderLine {
    #[must_use]
    pub fn subtotal_cents(&self) -> u64 {
        self.unit_price_cents * u64::from(self.quantity)
    }

    #[must_use]
    pub fn item(&self) -> LineItem {
        LineItem {
            product_id: self.product_id,
            quantity: self.quantity,
        }
    }
}

/// A recorded status change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChange {
    pub from: OrderStatus,
    pub to: OrderStatus,
    pub at: DateTime<Utc>,
}

/// The aggregate root for an order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    /// Aggregate identifier.
    pub id: Uuid,
    /// Workflow instance the order was placed in. Later api calls about the
    /// order continue it.
    pub correlation_id: Uuid,
    pub customer_id: u64,
    pub lines: Vec<OrderLine>,
    pub total_cents: u64,
    status: OrderStatus,
    pub payment_id: Option<String>,
    pub refund_id: Option<String>,
    pub shipping_id: Option<String>,
    pub tracking_number: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Unpaid orders expire at this instant.
    pub expires_at: DateTime<Utc>,
    history: Vec<StatusChange>,
}

impl Order {
    /// Prices and validates a new pending order. Repeated products are
    /// merged into one line.
    ///
    /// # Errors
    ///
    /// Returns `HandlerError::Validation` for an empty order or a zero
    /// quantity, and `HandlerError::NotFound` for a product `price_of`
    /// does not know.
    pub fn place(
        id: Uuid,
        correlation_id: Uuid,
        command: &CreateOrder,
        price_of: impl Fn(u64) -> Option<u64>,
        now: DateTime<Utc>,
        ttl: chrono::Duration,
    ) -> Result<Self, HandlerError> {
        if command.items.is_empty() {
            return Err(HandlerError::Validation(
                "order must contain at least one item".into(),
            ));
        }

        let mut lines: Vec<OrderLine> = Vec::with_capacity(command.items.len());
        for item in &command.items {
            if item.quantity == 0 {
                return Err(HandlerError::Validation(format!(
                    "quantity for product {} must be at least 1",
                    item.product_id
                )));
            }
            let unit_price_cents = price_of(item.product_id)
                .ok_or_else(|| HandlerError::NotFound(format!("product {}", item.product_id)))?;
            match lines.iter_mut().find(|l| l.product_id == item.product_id) {
                Some(line) => line.quantity += item.quantity,
                None => lines.push(OrderLine {
                    product_id: item.product_id,
                    quantity: item.quantity,
                    unit_price_cents,
                }),
            }
        }

        let total_cents = lines.iter().map(OrderLine::subtotal_cents).sum();
        Ok(Self {
            id,
            correlation_id,
            customer_id: command.customer_id,
            lines,
            total_cents,
            status: OrderStatus::Pending,
            payment_id: None,
            refund_id: None,
            shipping_id: None,
            tracking_number: None,
            created_at: now,
            updated_at: now,
            expires_at: now + ttl,
            history: Vec::new(),
        })
    }

    #[must_use]
    pub fn status(&self) -> OrderStatus {
        self.status
    }

    /// Status changes, oldest first.
    #[must_use]
    pub fn history(&self) -> &[StatusChange] {
        &self.history
    }

    #[must_use]
    pub fn items(&self) -> Vec<LineItem> {
        self.lines.iter().map(OrderLine::item).collect()
    }

    #[must_use]
    pub fn contains_product(&self, product_id: u64) -> bool {
        self.lines.iter().any(|l| l.product_id == product_id)
    }

    /// Whether the order is still unpaid past its expiry.
    #[must_use]
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.status == OrderStatus::Pending && self.expires_at <= now
    }

    /// Moves the order to `to` if the lifecycle allows it. Repeating the
    /// current status is a no-op, so redelivered events are harmless.
    pub fn transition(&mut self, to: OrderStatus, now: DateTime<Utc>) -> Transition {
        let from = self.status;
        if from == to {
            return Transition::Unchanged;
        }
        if !from.allows(to) {
            return Transition::Rejected { from };
        }
        self.status = to;
        self.updated_at = now;
        self.history.push(StatusChange { from, to, at: now });
        Transition::Applied { from }
    }

    /// Remembers a captured payment. The first payment id wins; returns
    /// `false` if one was already captured.
    pub fn capture_payment(&mut self, payment_id: &str) -> bool {
        if self.payment_id.is_some() {
            return false;
        }
        self.payment_id = Some(payment_id.to_owned());
        true
    }

    /// Captures a payment and marks the order paid.
    pub fn record_payment(&mut self, payment_id: &str, now: DateTime<Utc>) -> Transition {
        self.capture_payment(payment_id);
        self.transition(OrderStatus::Paid, now)
    }

    /// Records the shipment that left the warehouse.
    pub fn record_shipment(
        &mut self,
        shipping_id: &str,
        tracking_number: &str,
        now: DateTime<Utc>,
    ) -> Transition {
        let transition = self.transition(OrderStatus::Shipped, now);
        if transition.is_applied() {
            self.shipping_id = Some(shipping_id.to_owned());
            self.tracking_number = Some(tracking_number.to_owned());
        }
        transition
    }

    /// Whether a captured payment still has to be refunded.
    #[must_use]
    pub fn needs_refund(&self) -> bool {
        self.payment_id.is_some() && self.refund_id.is_none()
    }

    /// Remembers a refund. Returns `false` if one was already recorded.
    pub fn capture_refund(&mut self, refund_id: &str) -> bool {
        if self.refund_id.is_some() {
            return false;
        }
        self.refund_id = Some(refund_id.to_owned());
        true
    }

    /// Cancels the order on a customer's request.
    ///
    /// # Errors
    ///
    /// Returns `HandlerError::Conflict` once the order has shipped or
    /// reached a terminal status.
    pub fn cancel(&mut self, now: DateTime<Utc>) -> Result<(), HandlerError> {
        match self.transition(OrderStatus::Cancelled, now) {
            Transition::Applied { .. } => Ok(()),
            Transition::Unchanged => Err(HandlerError::Conflict(format!(
                "order {} is already cancelled",
                self.id
            ))),
            Transition::Rejected { from } => Err(HandlerError::Conflict(format!(
                "order {} is {from} and cannot be cancelled",
                self.id
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn place(items: Vec<LineItem>) -> Result<Order, HandlerError> {
        let command = CreateOrder {
            customer_id: 7,
            items,
        };
        Order::place(
            Uuid::new_v4(),
            Uuid::new_v4(),
            &command,
            |product_id| (product_id < 10).then_some(2999),
            Utc::now(),
            chrono::Duration::minutes(15),
        )
    }

    fn item(product_id: u64, quantity: u32) -> LineItem {
        LineItem {
            product_id,
            quantity,
        }
    }

    #[test]
    fn test_place_prices_and_merges_lines() {
        // Act
        let order = place(vec![item(1, 2), item(2, 1), item(1, 1)]).unwrap();

        // Assert
        assert_eq!(order.status(), OrderStatus::Pending);
        assert_eq!(order.lines.len(), 2);
        assert_eq!(order.lines[0].quantity, 3);
        assert_eq!(order.total_cents, 4 * 2999);
        assert_eq!(order.expires_at - order.created_at, chrono::Duration::minutes(15));
    }

    #[test]
    fn test_place_rejects_empty_order() {
        let result = place(Vec::new());

        assert!(matches!(result, Err(HandlerError::Validation(_))));
    }

    #[test]
    fn test_place_rejects_zero_quantity() {
        let result = place(vec![item(1, 0)]);

        assert!(matches!(result, Err(HandlerError::Validation(_))));
    }

    #[test]
    fn test_place_rejects_unknown_product() {
        let result = place(vec![item(42, 1)]);

        assert_eq!(result, Err(HandlerError::NotFound("product 42".into())));
    }

    #[test]
    fn test_repeated_payment_is_unchanged() {
        // Arrange
        let mut order = place(vec![item(1, 1)]).unwrap();
        let now = Utc::now();

        // Act
        let first = order.record_payment("pay_1", now);
        let second = order.record_payment("pay_2", now);

        // Assert
        assert_eq!(first, Transition::Applied { from: OrderStatus::Pending });
        assert_eq!(second, Transition::Unchanged);
        assert_eq!(order.payment_id.as_deref(), Some("pay_1"));
        assert_eq!(order.history().len(), 1);
    }

    #[test]
    fn test_late_payment_after_shipment_is_rejected() {
        let mut order = place(vec![item(1, 1)]).unwrap();
        let now = Utc::now();
        order.record_payment("pay_1", now);
        order.record_shipment("ship_1", "TRACK000001", now);

        let late = order.record_payment("pay_1", now);

        assert_eq!(late, Transition::Rejected { from: OrderStatus::Shipped });
        assert_eq!(order.status(), OrderStatus::Shipped);
    }

    #[test]
    fn test_terminal_statuses_are_sticky() {
        let mut order = place(vec![item(1, 1)]).unwrap();
        let now = Utc::now();
        order.transition(OrderStatus::Expired, now);

        for next in [OrderStatus::Paid, OrderStatus::Cancelled, OrderStatus::Pending] {
            assert_eq!(
                order.transition(next, now),
                Transition::Rejected { from: OrderStatus::Expired }
            );
        }
        assert!(order.status().is_terminal());
    }

    #[test]
    fn test_cancel_after_shipment_conflicts() {
        let mut order = place(vec![item(1, 1)]).unwrap();
        let now = Utc::now();
        order.record_payment("pay_1", now);
        order.record_shipment("ship_1", "TRACK000001", now);

        let result = order.cancel(now);

        assert!(matches!(result, Err(HandlerError::Conflict(_))));
    }

    #[test]
    fn test_cancelled_order_records_refund() {
        let mut order = place(vec![item(1, 1)]).unwrap();
        let now = Utc::now();
        order.record_payment("pay_1", now);
        order.cancel(now).unwrap();

        assert!(order.needs_refund());
        assert!(order.capture_refund("ref_1"));
        assert!(!order.capture_refund("ref_2"));
        let refunded = order.transition(OrderStatus::Refunded, now);

        assert!(refunded.is_applied());
        assert!(!order.needs_refund());
        assert_eq!(order.refund_id.as_deref(), Some("ref_1"));
    }

    #[test]
    fn test_status_parses_from_label() {
        assert_eq!("payment_failed".parse(), Ok(OrderStatus::PaymentFailed));
        assert!("lost".parse::<OrderStatus>().is_err());
    }

    #[test]
    fn test_overdue_only_while_pending() {
        let mut order = place(vec![item(1, 1)]).unwrap();
        let later = order.expires_at + chrono::Duration::seconds(1);

        assert!(order.is_overdue(later));
        order.record_payment("pay_1", later);
        assert!(!order.is_overdue(later));
    }
}
