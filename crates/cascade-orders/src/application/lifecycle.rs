//! Workflow-instance state for order sagas.
//!
//! The instance label follows the order status, with the same forward-only
//! rules as the aggregate: a late or repeated event never moves the label
//! backwards.

use cascade_core::event::{Event, EventPayload};
use cascade_dispatch::{ConfigError, SagaConfig, StateReducer};

use crate::domain::aggregates::OrderStatus;
use crate::domain::events::{
    OrderCancelled, OrderCompleted, OrderCreated, OrderDelivered, OrderExpired, OrderShipped,
    OrderStatusUpdated, PaymentFailed, PaymentProcessed, PaymentRefunded,
};

/// Events that end an order saga.
pub const TERMINAL_EVENTS: [&str; 3] = [
    OrderCompleted::NAME,
    OrderCancelled::NAME,
    OrderExpired::NAME,
];

/// Saga settings from the environment, closing on [`TERMINAL_EVENTS`].
///
/// # Errors
///
/// Returns `ConfigError::Invalid` if a saga variable is set but unusable.
pub fn saga_config() -> Result<SagaConfig, ConfigError> {
    Ok(SagaConfig::from_env()?.with_terminal_events(TERMINAL_EVENTS))
}

/// Labels an order workflow instance with the order status.
#[derive(Debug, Clone, Copy, Default)]
pub struct OrderLifecycle;

impl OrderLifecycle {
    fn status_after(event: &Event) -> Option<OrderStatus> {
        match event.name() {
            OrderCreated::NAME => Some(OrderStatus::Pending),
            PaymentProcessed::NAME => Some(OrderStatus::Paid),
            PaymentFailed::NAME => Some(OrderStatus::PaymentFailed),
            OrderShipped::NAME => Some(OrderStatus::Shipped),
            OrderDelivered::NAME => Some(OrderStatus::Delivered),
            OrderCompleted::NAME => Some(OrderStatus::Completed),
            OrderCancelled::NAME => Some(OrderStatus::Cancelled),
            PaymentRefunded::NAME => Some(OrderStatus::Refunded),
            OrderExpired::NAME => Some(OrderStatus::Expired),
            OrderStatusUpdated::NAME => event
                .decode::<OrderStatusUpdated>()
                .ok()
                .map(|update| update.status),
            _ => None,
        }
    }
}

impl StateReducer for OrderLifecycle {
    fn reduce(&self, current: &str, event: &Event) -> Option<String> {
        let next = Self::status_after(event)?;
        let moves = match current.parse::<OrderStatus>() {
            Ok(status) => status.allows(next),
            // Not an order status yet: the instance was just opened.
            Err(_) => true,
        };
        moves.then(|| next.as_str().to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cascade_core::clock::SystemClock;
    use cascade_core::event::{Trigger, TriggerKind};
    use serde_json::json;

    fn event(name: &str, payload: serde_json::Value) -> Event {
        let trigger = Trigger::new(TriggerKind::Api, &SystemClock);
        Event::external(name, payload, &trigger, &SystemClock)
    }

    #[test]
    fn test_created_moves_open_instance_to_pending() {
        let next = OrderLifecycle.reduce("open", &event("OrderCreated", json!({})));

        assert_eq!(next.as_deref(), Some("pending"));
    }

    #[test]
    fn test_duplicate_payment_does_not_change_paid() {
        let next = OrderLifecycle.reduce("paid", &event("PaymentProcessed", json!({})));

        assert_eq!(next, None);
    }

    #[test]
    fn test_late_event_does_not_regress_terminal_state() {
        let next = OrderLifecycle.reduce("completed", &event("PaymentProcessed", json!({})));

        assert_eq!(next, None);
    }

    #[test]
    fn test_status_update_uses_payload_status() {
        let update = event(
            "OrderStatusUpdated",
            json!({ "order_id": uuid::Uuid::nil(), "status": "paid" }),
        );

        assert_eq!(OrderLifecycle.reduce("pending", &update).as_deref(), Some("paid"));
    }

    #[test]
    fn test_unrelated_event_is_ignored() {
        let next = OrderLifecycle.reduce("pending", &event("InventoryReserved", json!({})));

        assert_eq!(next, None);
    }
}
