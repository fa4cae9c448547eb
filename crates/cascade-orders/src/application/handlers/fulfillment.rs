//! Shipment, delivery, completion and status notifications.

use async_trait::async_trait;
use cascade_core::emission::EmissionContext;
use cascade_core::error::HandlerError;
use cascade_core::handler::TypedHandler;

use super::log_skipped;
use crate::application::notifier::{Notification, NotificationKind};
use crate::application::services::OrderServices;
use crate::domain::aggregates::OrderStatus;
use crate::domain::events::{
    OrderCompleted, OrderDelivered, OrderShipped, OrderStatusUpdated, PaymentCompleted,
};

/// Books a shipment for a paid order and takes its units off the shelf.
///
/// Reservation runs concurrently with payment, so the reservation may not
/// exist yet; reserving here is idempotent and settles the race.
pub struct CreateShipment(pub OrderServices);

#[async_trait]
impl TypedHandler for CreateShipment {
    type Input = PaymentCompleted;
    type Output = ();

    async fn handle(
        &self,
        event: PaymentCompleted,
        ctx: &mut EmissionContext,
    ) -> Result<(), HandlerError> {
        let services = &self.0;
        let _guard = services.orders.lock(event.order_id).await;
        let order = services.orders.require(event.order_id)?;
        if order.status() != OrderStatus::Paid {
            ctx.logger().info(
                "order not ready to ship",
                &[("order_id", &order.id), ("status", &order.status())],
            );
            return Ok(());
        }
        if let Err(e) = services.stock.reserve(order.id, &order.items()) {
            ctx.logger()
                .warning("cannot ship without stock", &[("order_id", &order.id), ("error", &e)]);
            return Ok(());
        }

        let now = ctx.now();
        let shipment = services.shipping.book(order.id, now);
        let transition = services.orders.update(order.id, |o| {
            o.record_shipment(&shipment.shipping_id, &shipment.tracking_number, now)
        })?;
        if !transition.is_applied() {
            log_skipped(ctx, order.id, "shipment", transition);
            return Ok(());
        }
        services.stock.commit(order.id);
        ctx.logger().info(
            "order shipped",
            &[("order_id", &order.id), ("tracking_number", &shipment.tracking_number)],
        );
        ctx.set_declared(&OrderShipped {
            order_id: order.id,
            shipping_id: shipment.shipping_id,
            tracking_number: shipment.tracking_number,
            estimated_delivery: shipment.estimated_delivery,
        })
    }
}

/// Follows the shipment with the carrier. The simulated carrier confirms
/// delivery as soon as it is asked.
pub struct UpdateTracking(pub OrderServices);

#[async_trait]
impl TypedHandler for UpdateTracking {
    type Input = OrderShipped;
    type Output = ();

    async fn handle(
        &self,
        event: OrderShipped,
        ctx: &mut EmissionContext,
    ) -> Result<(), HandlerError> {
        let orders = &self.0.orders;
        let _guard = orders.lock(event.order_id).await;
        let now = ctx.now();
        let transition =
            orders.update(event.order_id, |o| o.transition(OrderStatus::Delivered, now))?;
        if !transition.is_applied() {
            log_skipped(ctx, event.order_id, "delivery", transition);
            return Ok(());
        }
        ctx.set_declared(&OrderDelivered {
            order_id: event.order_id,
            tracking_number: event.tracking_number,
            delivered_at: now,
        })
    }
}

pub struct CompleteOrder(pub OrderServices);

#[async_trait]
impl TypedHandler for CompleteOrder {
    type Input = OrderDelivered;
    type Output = ();

    async fn handle(
        &self,
        event: OrderDelivered,
        ctx: &mut EmissionContext,
    ) -> Result<(), HandlerError> {
        let orders = &self.0.orders;
        let _guard = orders.lock(event.order_id).await;
        let now = ctx.now();
        let transition =
            orders.update(event.order_id, |o| o.transition(OrderStatus::Completed, now))?;
        if !transition.is_applied() {
            log_skipped(ctx, event.order_id, "completion", transition);
            return Ok(());
        }
        ctx.set_declared(&OrderStatusUpdated {
            order_id: event.order_id,
            status: OrderStatus::Completed,
            detail: None,
        })?;
        ctx.set_declared(&OrderCompleted {
            order_id: event.order_id,
            completed_at: now,
        })
    }
}

/// Tells the customer, and any websocket subscribed to the order, about a
/// status change.
pub struct SendNotifications(pub OrderServices);

#[async_trait]
impl TypedHandler for SendNotifications {
    type Input = OrderStatusUpdated;
    type Output = ();

    async fn handle(
        &self,
        event: OrderStatusUpdated,
        ctx: &mut EmissionContext,
    ) -> Result<(), HandlerError> {
        let message = match &event.detail {
            Some(detail) => format!("Order {} is now {} ({detail})", event.order_id, event.status),
            None => format!("Order {} is now {}", event.order_id, event.status),
        };
        self.0.outbox.send(Notification {
            kind: NotificationKind::StatusChanged,
            order_id: Some(event.order_id),
            message,
            connections: self.0.connections.subscribers_of(event.order_id),
            sent_at: ctx.now(),
        });
        Ok(())
    }
}
