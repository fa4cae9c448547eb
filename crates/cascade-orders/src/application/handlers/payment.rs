//! Payment capture, failure handling and refunds.

use async_trait::async_trait;
use cascade_core::emission::EmissionContext;
use cascade_core::error::HandlerError;
use cascade_core::handler::TypedHandler;

use super::log_skipped;
use crate::application::notifier::{Notification, NotificationKind};
use crate::application::payment::PaymentError;
use crate::application::services::OrderServices;
use crate::domain::aggregates::OrderStatus;
use crate::domain::events::{
    InventoryReleased, OrderCancelled, OrderCreated, OrderStatusUpdated, PaymentCompleted,
    PaymentFailed, PaymentProcessed, PaymentRefunded, ReleaseReason,
};

fn gateway_failure(error: &PaymentError) -> HandlerError {
    HandlerError::Failed(error.to_string())
}

/// Charges the order total. The payment is captured on the order and the
/// order marked paid before the lock is released, so a cancellation that
/// follows always sees the payment it has to refund.
pub struct ProcessPayment(pub OrderServices);

#[async_trait]
impl TypedHandler for ProcessPayment {
    type Input = OrderCreated;
    type Output = ();

    async fn handle(
        &self,
        event: OrderCreated,
        ctx: &mut EmissionContext,
    ) -> Result<(), HandlerError> {
        let services = &self.0;
        let _guard = services.orders.lock(event.order_id).await;
        let order = services.orders.require(event.order_id)?;
        if order.status() != OrderStatus::Pending {
            ctx.logger().info(
                "order no longer awaiting payment; not charging",
                &[("order_id", &order.id), ("status", &order.status())],
            );
            return Ok(());
        }

        match services.payments.charge(order.id, order.total_cents).await {
            Ok(payment_id) => {
                let now = ctx.now();
                services
                    .orders
                    .update(order.id, |o| o.record_payment(&payment_id, now))?;
                ctx.logger().info(
                    "payment processed",
                    &[("order_id", &order.id), ("payment_id", &payment_id)],
                );
                ctx.set_declared(&PaymentProcessed {
                    order_id: order.id,
                    payment_id,
                    amount_cents: order.total_cents,
                })
            }
            Err(PaymentError::Declined(reason)) => {
                ctx.logger()
                    .warning("payment declined", &[("order_id", &order.id), ("reason", &reason)]);
                ctx.set_declared(&PaymentFailed {
                    order_id: order.id,
                    amount_cents: order.total_cents,
                    reason,
                })
            }
            Err(e) => Err(gateway_failure(&e)),
        }
    }
}

/// Announces the paid status.
pub struct UpdateOrderPaymentStatus(pub OrderServices);

#[async_trait]
impl TypedHandler for UpdateOrderPaymentStatus {
    type Input = PaymentProcessed;
    type Output = ();

    async fn handle(
        &self,
        event: PaymentProcessed,
        ctx: &mut EmissionContext,
    ) -> Result<(), HandlerError> {
        let orders = &self.0.orders;
        let _guard = orders.lock(event.order_id).await;
        let now = ctx.now();
        let (transition, status) = orders.update(event.order_id, |o| {
            (o.record_payment(&event.payment_id, now), o.status())
        })?;
        // The charge normally moved the order to paid already.
        if status != OrderStatus::Paid {
            log_skipped(ctx, event.order_id, "payment status", transition);
            return Ok(());
        }
        ctx.set_declared(&OrderStatusUpdated {
            order_id: event.order_id,
            status: OrderStatus::Paid,
            detail: Some(event.payment_id),
        })
    }
}

/// Settles a processed payment so fulfillment can start.
pub struct PaymentCompletedHandler(pub OrderServices);

#[async_trait]
impl TypedHandler for PaymentCompletedHandler {
    type Input = PaymentProcessed;
    type Output = ();

    async fn handle(
        &self,
        event: PaymentProcessed,
        ctx: &mut EmissionContext,
    ) -> Result<(), HandlerError> {
        let order = self.0.orders.require(event.order_id)?;
        if order.status() != OrderStatus::Paid {
            ctx.logger().debug(
                "order not awaiting fulfillment",
                &[("order_id", &order.id), ("status", &order.status())],
            );
            return Ok(());
        }
        ctx.set_declared(&PaymentCompleted {
            order_id: event.order_id,
            payment_id: event.payment_id,
            amount_cents: event.amount_cents,
        })
    }
}

/// Marks the order as failed payment and returns its reserved stock.
pub struct HandlePaymentFailure(pub OrderServices);

#[async_trait]
impl TypedHandler for HandlePaymentFailure {
    type Input = PaymentFailed;
    type Output = ();

    async fn handle(
        &self,
        event: PaymentFailed,
        ctx: &mut EmissionContext,
    ) -> Result<(), HandlerError> {
        let services = &self.0;
        let _guard = services.orders.lock(event.order_id).await;
        let now = ctx.now();
        let transition = services
            .orders
            .update(event.order_id, |o| o.transition(OrderStatus::PaymentFailed, now))?;
        if !transition.is_applied() {
            log_skipped(ctx, event.order_id, "payment failure", transition);
            return Ok(());
        }

        ctx.set_declared(&OrderStatusUpdated {
            order_id: event.order_id,
            status: OrderStatus::PaymentFailed,
            detail: Some(event.reason),
        })?;
        if let Some(items) = services.stock.release(event.order_id) {
            ctx.set_declared(&InventoryReleased {
                order_id: event.order_id,
                items,
                reason: ReleaseReason::PaymentFailed,
            })?;
        }
        Ok(())
    }
}

pub struct SendPaymentFailureNotification(pub OrderServices);

#[async_trait]
impl TypedHandler for SendPaymentFailureNotification {
    type Input = PaymentFailed;
    type Output = ();

    async fn handle(
        &self,
        event: PaymentFailed,
        ctx: &mut EmissionContext,
    ) -> Result<(), HandlerError> {
        self.0.outbox.send(Notification {
            kind: NotificationKind::PaymentFailed,
            order_id: Some(event.order_id),
            message: format!("Payment for order {} failed: {}", event.order_id, event.reason),
            connections: self.0.connections.subscribers_of(event.order_id),
            sent_at: ctx.now(),
        });
        Ok(())
    }
}

/// Refunds a captured payment after cancellation. An order cancelled before
/// it was charged has nothing to refund.
pub struct RefundPayment(pub OrderServices);

#[async_trait]
impl TypedHandler for RefundPayment {
    type Input = OrderCancelled;
    type Output = ();

    async fn handle(
        &self,
        event: OrderCancelled,
        ctx: &mut EmissionContext,
    ) -> Result<(), HandlerError> {
        let services = &self.0;
        let _guard = services.orders.lock(event.order_id).await;
        let order = services.orders.require(event.order_id)?;
        let Some(payment_id) = order.payment_id.clone().filter(|_| order.needs_refund()) else {
            ctx.logger()
                .info("no captured payment to refund", &[("order_id", &order.id)]);
            return Ok(());
        };

        let refund_id = services
            .payments
            .refund(&payment_id, order.total_cents)
            .await
            .map_err(|e| gateway_failure(&e))?;
        services
            .orders
            .update(order.id, |o| o.capture_refund(&refund_id))?;
        ctx.set_declared(&PaymentRefunded {
            order_id: order.id,
            payment_id,
            refund_id,
            amount_cents: order.total_cents,
        })
    }
}

pub struct SendRefundNotification(pub OrderServices);

#[async_trait]
impl TypedHandler for SendRefundNotification {
    type Input = PaymentRefunded;
    type Output = ();

    async fn handle(
        &self,
        event: PaymentRefunded,
        ctx: &mut EmissionContext,
    ) -> Result<(), HandlerError> {
        self.0.outbox.send(Notification {
            kind: NotificationKind::Refund,
            order_id: Some(event.order_id),
            message: format!(
                "Refund {} of {} cents issued for order {}",
                event.refund_id, event.amount_cents, event.order_id
            ),
            connections: self.0.connections.subscribers_of(event.order_id),
            sent_at: ctx.now(),
        });
        Ok(())
    }
}

/// Moves a cancelled order to refunded.
pub struct UpdateOrderStatus(pub OrderServices);

#[async_trait]
impl TypedHandler for UpdateOrderStatus {
    type Input = PaymentRefunded;
    type Output = ();

    async fn handle(
        &self,
        event: PaymentRefunded,
        ctx: &mut EmissionContext,
    ) -> Result<(), HandlerError> {
        let orders = &self.0.orders;
        let _guard = orders.lock(event.order_id).await;
        let now = ctx.now();
        let transition =
            orders.update(event.order_id, |o| o.transition(OrderStatus::Refunded, now))?;
        if !transition.is_applied() {
            log_skipped(ctx, event.order_id, "refund status", transition);
            return Ok(());
        }
        ctx.set_declared(&OrderStatusUpdated {
            order_id: event.order_id,
            status: OrderStatus::Refunded,
            detail: Some(event.refund_id),
        })
    }
}
