//! Order intake, queries and expiry.

use async_trait::async_trait;
use cascade_core::emission::EmissionContext;
use cascade_core::error::HandlerError;
use cascade_core::handler::TypedHandler;
use serde::de::IgnoredAny;
use uuid::Uuid;

use super::log_skipped;
use crate::application::services::OrderServices;
use crate::domain::aggregates::{Order, OrderStatus};
use crate::domain::commands::{CancelOrder, CreateOrder, GetOrderStatus, ListOrders};
use crate::domain::events::{
    InventoryReleased, OrderCancelled, OrderCreated, OrderExpired, OrderStatusUpdated,
    ReleaseReason,
};

/// Places an order and declares `OrderCreated`.
pub struct CreateOrderHandler(pub OrderServices);

#[async_trait]
impl TypedHandler for CreateOrderHandler {
    type Input = CreateOrder;
    type Output = Order;

    async fn handle(
        &self,
        command: CreateOrder,
        ctx: &mut EmissionContext,
    ) -> Result<Order, HandlerError> {
        let services = &self.0;
        let order = Order::place(
            Uuid::new_v4(),
            ctx.correlation_id(),
            &command,
            |product_id| services.stock.price_of(product_id),
            ctx.now(),
            services.settings.order_ttl,
        )?;

        ctx.set_declared(&OrderCreated {
            order_id: order.id,
            customer_id: order.customer_id,
            total_cents: order.total_cents,
            items: order.items(),
            expires_at: order.expires_at,
        })?;
        services.orders.insert(order.clone());
        ctx.logger().info(
            "order created",
            &[("order_id", &order.id), ("total_cents", &order.total_cents)],
        );
        Ok(order)
    }
}

/// Cancels an order on the customer's request and declares `OrderCancelled`.
pub struct CancelOrderHandler(pub OrderServices);

#[async_trait]
impl TypedHandler for CancelOrderHandler {
    type Input = CancelOrder;
    type Output = Order;

    async fn handle(
        &self,
        command: CancelOrder,
        ctx: &mut EmissionContext,
    ) -> Result<Order, HandlerError> {
        let orders = &self.0.orders;
        let _guard = orders.lock(command.order_id).await;
        let now = ctx.now();
        let order = orders.update(command.order_id, |o| o.cancel(now).map(|()| o.clone()))??;

        let reason = command
            .reason
            .unwrap_or_else(|| "customer_request".to_owned());
        ctx.set_declared(&OrderCancelled {
            order_id: order.id,
            customer_id: order.customer_id,
            reason: reason.clone(),
            total_cents: order.total_cents,
        })?;
        ctx.logger()
            .info("order cancelled", &[("order_id", &order.id), ("reason", &reason)]);
        Ok(order)
    }
}

pub struct GetOrderStatusHandler(pub OrderServices);

#[async_trait]
impl TypedHandler for GetOrderStatusHandler {
    type Input = GetOrderStatus;
    type Output = Order;

    async fn handle(
        &self,
        query: GetOrderStatus,
        _ctx: &mut EmissionContext,
    ) -> Result<Order, HandlerError> {
        self.0.orders.require(query.order_id)
    }
}

pub struct ListOrdersHandler(pub OrderServices);

#[async_trait]
impl TypedHandler for ListOrdersHandler {
    type Input = ListOrders;
    type Output = Vec<Order>;

    async fn handle(
        &self,
        query: ListOrders,
        _ctx: &mut EmissionContext,
    ) -> Result<Vec<Order>, HandlerError> {
        Ok(self.0.orders.list(query.status))
    }
}

/// Cron: emits `OrderExpired` for every pending order past its expiry.
/// The status change itself happens in [`ExpireOrder`], under the order's
/// lock, so an order paid in the meantime is left alone.
pub struct ExpirePendingOrders(pub OrderServices);

#[async_trait]
impl TypedHandler for ExpirePendingOrders {
    type Input = IgnoredAny;
    type Output = Vec<Uuid>;

    async fn handle(
        &self,
        _tick: IgnoredAny,
        ctx: &mut EmissionContext,
    ) -> Result<Vec<Uuid>, HandlerError> {
        let now = ctx.now();
        let overdue = self.0.orders.ids_where(|o| o.is_overdue(now));
        for order_id in &overdue {
            ctx.emit_typed(&OrderExpired {
                order_id: *order_id,
                expired_at: now,
            });
        }
        if !overdue.is_empty() {
            ctx.logger()
                .info("expiring overdue orders", &[("count", &overdue.len())]);
        }
        Ok(overdue)
    }
}

/// Expires one order and returns its reserved stock.
pub struct ExpireOrder(pub OrderServices);

#[async_trait]
impl TypedHandler for ExpireOrder {
    type Input = OrderExpired;
    type Output = ();

    async fn handle(
        &self,
        event: OrderExpired,
        ctx: &mut EmissionContext,
    ) -> Result<(), HandlerError> {
        let services = &self.0;
        let _guard = services.orders.lock(event.order_id).await;
        let now = ctx.now();
        let transition = services
            .orders
            .update(event.order_id, |o| o.transition(OrderStatus::Expired, now))?;
        if !transition.is_applied() {
            log_skipped(ctx, event.order_id, "expire", transition);
            return Ok(());
        }

        if let Some(items) = services.stock.release(event.order_id) {
            ctx.set_declared(&InventoryReleased {
                order_id: event.order_id,
                items,
                reason: ReleaseReason::OrderExpired,
            })?;
        }
        ctx.set_declared(&OrderStatusUpdated {
            order_id: event.order_id,
            status: OrderStatus::Expired,
            detail: None,
        })?;
        Ok(())
    }
}
