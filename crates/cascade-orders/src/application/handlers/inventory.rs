//! Stock reservation, release, and the stock alerts raised by the sync cron.

use async_trait::async_trait;
use cascade_core::emission::EmissionContext;
use cascade_core::error::HandlerError;
use cascade_core::handler::TypedHandler;
use serde::Serialize;
use serde::de::IgnoredAny;

use crate::application::notifier::{Notification, NotificationKind};
use crate::application::services::OrderServices;
use crate::domain::aggregates::OrderStatus;
use crate::domain::events::{
    InventoryLowStock, InventoryOutOfStock, InventoryReleased, InventoryReserved,
    OrderCancelled, OrderCreated, ReleaseReason,
};

/// Reserves stock for a new order, or reports the product that ran out.
pub struct ReserveInventory(pub OrderServices);

#[async_trait]
impl TypedHandler for ReserveInventory {
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
        if !matches!(order.status(), OrderStatus::Pending | OrderStatus::Paid) {
            ctx.logger().info(
                "order no longer needs stock; not reserving",
                &[("order_id", &order.id), ("status", &order.status())],
            );
            return Ok(());
        }

        match services.stock.reserve(order.id, &order.items()) {
            Ok(items) => ctx.set_declared(&InventoryReserved {
                order_id: order.id,
                items,
            }),
            Err(e) => {
                ctx.logger()
                    .warning("stock reservation failed", &[("order_id", &order.id), ("error", &e)]);
                ctx.set_declared(&InventoryOutOfStock {
                    product_id: e.product_id(),
                    order_id: Some(order.id),
                })
            }
        }
    }
}

pub struct LogInventoryReservation;

#[async_trait]
impl TypedHandler for LogInventoryReservation {
    type Input = InventoryReserved;
    type Output = ();

    async fn handle(
        &self,
        event: InventoryReserved,
        ctx: &mut EmissionContext,
    ) -> Result<(), HandlerError> {
        let units: u32 = event.items.iter().map(|i| i.quantity).sum();
        ctx.logger()
            .info("inventory reserved", &[("order_id", &event.order_id), ("units", &units)]);
        Ok(())
    }
}

/// Compensation for a cancelled order. Tolerates an order that never
/// reserved anything, or whose release already happened.
pub struct ReleaseInventory(pub OrderServices);

#[async_trait]
impl TypedHandler for ReleaseInventory {
    type Input = OrderCancelled;
    type Output = ();

    async fn handle(
        &self,
        event: OrderCancelled,
        ctx: &mut EmissionContext,
    ) -> Result<(), HandlerError> {
        let services = &self.0;
        let _guard = services.orders.lock(event.order_id).await;
        match services.stock.release(event.order_id) {
            Some(items) => ctx.set_declared(&InventoryReleased {
                order_id: event.order_id,
                items,
                reason: ReleaseReason::OrderCancelled,
            }),
            None => {
                ctx.logger()
                    .info("no reservation to release", &[("order_id", &event.order_id)]);
                Ok(())
            }
        }
    }
}

pub struct LogInventoryRelease;

#[async_trait]
impl TypedHandler for LogInventoryRelease {
    type Input = InventoryReleased;
    type Output = ();

    async fn handle(
        &self,
        event: InventoryReleased,
        ctx: &mut EmissionContext,
    ) -> Result<(), HandlerError> {
        let units: u32 = event.items.iter().map(|i| i.quantity).sum();
        ctx.logger().info(
            "inventory released",
            &[("order_id", &event.order_id), ("units", &units), ("reason", &event.reason)],
        );
        Ok(())
    }
}

/// Products the stock sync raised alerts for.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StockSync {
    pub low_stock: Vec<u64>,
    pub out_of_stock: Vec<u64>,
}

/// Cron: checks stock levels and raises low-stock and out-of-stock events.
pub struct SyncInventory(pub OrderServices);

#[async_trait]
impl TypedHandler for SyncInventory {
    type Input = IgnoredAny;
    type Output = StockSync;

    async fn handle(
        &self,
        _tick: IgnoredAny,
        ctx: &mut EmissionContext,
    ) -> Result<StockSync, HandlerError> {
        let stock = &self.0.stock;
        let mut sync = StockSync::default();
        for item in stock.low_stock() {
            ctx.emit_typed(&InventoryLowStock {
                product_id: item.product_id,
                available: item.available(),
                threshold: item.reorder_threshold,
            });
            sync.low_stock.push(item.product_id);
        }
        for item in stock.out_of_stock() {
            ctx.emit_typed(&InventoryOutOfStock {
                product_id: item.product_id,
                order_id: None,
            });
            sync.out_of_stock.push(item.product_id);
        }
        ctx.logger().debug(
            "inventory synced",
            &[
                ("low_stock", &sync.low_stock.len()),
                ("out_of_stock", &sync.out_of_stock.len()),
            ],
        );
        Ok(sync)
    }
}

pub struct SendLowStockAlert(pub OrderServices);

#[async_trait]
impl TypedHandler for SendLowStockAlert {
    type Input = InventoryLowStock;
    type Output = ();

    async fn handle(
        &self,
        event: InventoryLowStock,
        ctx: &mut EmissionContext,
    ) -> Result<(), HandlerError> {
        self.0.outbox.send(Notification {
            kind: NotificationKind::LowStock,
            order_id: None,
            message: format!(
                "Product {} is low on stock: {} left (threshold {})",
                event.product_id, event.available, event.threshold
            ),
            connections: Vec::new(),
            sent_at: ctx.now(),
        });
        Ok(())
    }
}

/// Places a purchase order with the supplier, once per product until the
/// delivery arrives.
pub struct TriggerReorder(pub OrderServices);

#[async_trait]
impl TypedHandler for TriggerReorder {
    type Input = InventoryLowStock;
    type Output = Option<u32>;

    async fn handle(
        &self,
        event: InventoryLowStock,
        ctx: &mut EmissionContext,
    ) -> Result<Option<u32>, HandlerError> {
        let ordered = self.0.stock.request_reorder(event.product_id);
        match ordered {
            Some(quantity) => ctx.logger().info(
                "reorder placed",
                &[("product_id", &event.product_id), ("quantity", &quantity)],
            ),
            None => ctx
                .logger()
                .debug("reorder already pending", &[("product_id", &event.product_id)]),
        }
        Ok(ordered)
    }
}

pub struct SendOutOfStockAlert(pub OrderServices);

#[async_trait]
impl TypedHandler for SendOutOfStockAlert {
    type Input = InventoryOutOfStock;
    type Output = ();

    async fn handle(
        &self,
        event: InventoryOutOfStock,
        ctx: &mut EmissionContext,
    ) -> Result<(), HandlerError> {
        self.0.outbox.send(Notification {
            kind: NotificationKind::OutOfStock,
            order_id: event.order_id,
            message: format!("Product {} is out of stock", event.product_id),
            connections: Vec::new(),
            sent_at: ctx.now(),
        });
        Ok(())
    }
}

/// Cancels the orders that cannot be filled. A shortage hit by one order's
/// reservation cancels that order; a shortage found by the stock sync
/// cancels every pending order for the product that holds no reservation.
pub struct CancelPendingOrders(pub OrderServices);

#[async_trait]
impl TypedHandler for CancelPendingOrders {
    type Input = InventoryOutOfStock;
    type Output = usize;

    async fn handle(
        &self,
        event: InventoryOutOfStock,
        ctx: &mut EmissionContext,
    ) -> Result<usize, HandlerError> {
        let services = &self.0;
        let candidates = match event.order_id {
            Some(order_id) => vec![order_id],
            None => services.orders.ids_where(|o| {
                o.status() == OrderStatus::Pending
                    && o.contains_product(event.product_id)
                    && !services.stock.is_reserved(o.id)
            }),
        };

        let mut cancelled = 0;
        for order_id in candidates {
            let _guard = services.orders.lock(order_id).await;
            let now = ctx.now();
            match services
                .orders
                .update(order_id, |o| o.cancel(now).map(|()| o.clone()))?
            {
                Ok(order) => {
                    ctx.emit_typed(&OrderCancelled {
                        order_id,
                        customer_id: order.customer_id,
                        reason: format!("product {} out of stock", event.product_id),
                        total_cents: order.total_cents,
                    });
                    cancelled += 1;
                }
                Err(e) => ctx
                    .logger()
                    .info("order left as is", &[("order_id", &order_id), ("reason", &e)]),
            }
        }
        Ok(cancelled)
    }
}
