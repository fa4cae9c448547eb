//! Handler table of the order saga.

use std::time::Duration;

use cascade_core::error::RoutingError;
use cascade_core::event::{EventPayload, TriggerKind};
use cascade_core::handler::Typed;
use cascade_dispatch::{HandlerRegistration, HandlerRegistry, RegistryBuilder};

use super::handlers::fulfillment::{
    CompleteOrder, CreateShipment, SendNotifications, UpdateTracking,
};
use super::handlers::inventory::{
    CancelPendingOrders, LogInventoryRelease, LogInventoryReservation, ReleaseInventory,
    ReserveInventory, SendLowStockAlert, SendOutOfStockAlert, SyncInventory, TriggerReorder,
};
use super::handlers::orders::{
    CancelOrderHandler, CreateOrderHandler, ExpireOrder, ExpirePendingOrders,
    GetOrderStatusHandler, ListOrdersHandler,
};
use super::handlers::payment::{
    HandlePaymentFailure, PaymentCompletedHandler, ProcessPayment, RefundPayment,
    SendPaymentFailureNotification, SendRefundNotification, UpdateOrderPaymentStatus,
    UpdateOrderStatus,
};
use super::handlers::websocket::{OnConnect, OnDisconnect, OnMessage};
use super::handlers::{
    CANCEL_ORDER, CREATE_ORDER, EXPIRE_PENDING_ORDERS, GET_ORDER_STATUS, LIST_ORDERS,
    ON_CONNECT, ON_DISCONNECT, ON_MESSAGE, SYNC_INVENTORY,
};
use super::services::OrderServices;
use crate::domain::events::{
    InventoryLowStock, InventoryOutOfStock, InventoryReleased, InventoryReserved,
    OrderCancelled, OrderCompleted, OrderCreated, OrderDelivered, OrderExpired, OrderShipped,
    OrderStatusUpdated, PaymentCompleted, PaymentFailed, PaymentProcessed, PaymentRefunded,
};

/// Budget for handlers that call the payment gateway.
const GATEWAY_TIMEOUT: Duration = Duration::from_secs(10);

/// Registers every order handler and event payload type on `builder`.
#[must_use]
pub fn register_order_handlers(
    builder: RegistryBuilder,
    services: &OrderServices,
) -> RegistryBuilder {
    let s = services;
    builder
        .event_type::<OrderCreated>()
        .event_type::<PaymentProcessed>()
        .event_type::<PaymentFailed>()
        .event_type::<PaymentCompleted>()
        .event_type::<PaymentRefunded>()
        .event_type::<InventoryReserved>()
        .event_type::<InventoryOutOfStock>()
        .event_type::<InventoryReleased>()
        .event_type::<InventoryLowStock>()
        .event_type::<OrderShipped>()
        .event_type::<OrderDelivered>()
        .event_type::<OrderStatusUpdated>()
        .event_type::<OrderCancelled>()
        .event_type::<OrderExpired>()
        .event_type::<OrderCompleted>()
        // Only the saga tracker listens for completion.
        .allow_unsubscribed(OrderCompleted::NAME)
        // api
        .register(
            HandlerRegistration::api(CREATE_ORDER, Typed(CreateOrderHandler(s.clone())))
                .declares_event::<OrderCreated>(),
        )
        .register(
            HandlerRegistration::api(CANCEL_ORDER, Typed(CancelOrderHandler(s.clone())))
                .declares_event::<OrderCancelled>(),
        )
        .register(HandlerRegistration::api(
            GET_ORDER_STATUS,
            Typed(GetOrderStatusHandler(s.clone())),
        ))
        .register(HandlerRegistration::api(LIST_ORDERS, Typed(ListOrdersHandler(s.clone()))))
        // cron
        .register(
            HandlerRegistration::cron(EXPIRE_PENDING_ORDERS, Typed(ExpirePendingOrders(s.clone())))
                .emits_event::<OrderExpired>(),
        )
        .register(
            HandlerRegistration::cron(SYNC_INVENTORY, Typed(SyncInventory(s.clone())))
                .emits_event::<InventoryLowStock>()
                .emits_event::<InventoryOutOfStock>(),
        )
        // websocket
        .register(HandlerRegistration::new(
            ON_CONNECT,
            TriggerKind::WebsocketConnect,
            Typed(OnConnect(s.clone())),
        ))
        .register(HandlerRegistration::new(
            ON_DISCONNECT,
            TriggerKind::WebsocketDisconnect,
            Typed(OnDisconnect(s.clone())),
        ))
        .register(HandlerRegistration::new(
            ON_MESSAGE,
            TriggerKind::WebsocketMessage,
            Typed(OnMessage(s.clone())),
        ))
        // payment
        .register(
            HandlerRegistration::on::<OrderCreated>(
                "process_payment",
                Typed(ProcessPayment(s.clone())),
            )
                .declares_event::<PaymentProcessed>()
                .declares_event::<PaymentFailed>()
                .with_timeout(GATEWAY_TIMEOUT),
        )
        .register(
            HandlerRegistration::on::<PaymentProcessed>(
                "update_order_payment_status",
                Typed(UpdateOrderPaymentStatus(s.clone())),
            )
            .declares_event::<OrderStatusUpdated>(),
        )
        .register(
            HandlerRegistration::on::<PaymentProcessed>(
                "payment_completed",
                Typed(PaymentCompletedHandler(s.clone())),
            )
            .declares_event::<PaymentCompleted>(),
        )
        .register(
            HandlerRegistration::on::<PaymentFailed>(
                "handle_payment_failure",
                Typed(HandlePaymentFailure(s.clone())),
            )
            .declares_event::<OrderStatusUpdated>()
            .declares_event::<InventoryReleased>(),
        )
        .register(HandlerRegistration::on::<PaymentFailed>(
            "send_payment_failure_notification",
            Typed(SendPaymentFailureNotification(s.clone())),
        ))
        .register(
            HandlerRegistration::on::<OrderCancelled>(
                "refund_payment",
                Typed(RefundPayment(s.clone())),
            )
                .declares_event::<PaymentRefunded>()
                .with_timeout(GATEWAY_TIMEOUT),
        )
        .register(HandlerRegistration::on::<PaymentRefunded>(
            "send_refund_notification",
            Typed(SendRefundNotification(s.clone())),
        ))
        .register(
            HandlerRegistration::on::<PaymentRefunded>(
                "update_order_status",
                Typed(UpdateOrderStatus(s.clone())),
            )
            .declares_event::<OrderStatusUpdated>(),
        )
        // inventory
        .register(
            HandlerRegistration::on::<OrderCreated>(
                "reserve_inventory",
                Typed(ReserveInventory(s.clone())),
            )
            .declares_event::<InventoryReserved>()
            .declares_event::<InventoryOutOfStock>(),
        )
        .register(HandlerRegistration::on::<InventoryReserved>(
            "log_inventory_reservation",
            Typed(LogInventoryReservation),
        ))
        .register(
            HandlerRegistration::on::<OrderCancelled>(
                "release_inventory",
                Typed(ReleaseInventory(s.clone())),
            )
            .declares_event::<InventoryReleased>(),
        )
        .register(HandlerRegistration::on::<InventoryReleased>(
            "log_inventory_release",
            Typed(LogInventoryRelease),
        ))
        .register(HandlerRegistration::on::<InventoryLowStock>(
            "send_low_stock_alert",
            Typed(SendLowStockAlert(s.clone())),
        ))
        .register(HandlerRegistration::on::<InventoryLowStock>(
            "trigger_reorder",
            Typed(TriggerReorder(s.clone())),
        ))
        .register(HandlerRegistration::on::<InventoryOutOfStock>(
            "send_out_of_stock_alert",
            Typed(SendOutOfStockAlert(s.clone())),
        ))
        .register(
            HandlerRegistration::on::<InventoryOutOfStock>(
                "cancel_pending_orders",
                Typed(CancelPendingOrders(s.clone())),
            )
            .emits_event::<OrderCancelled>(),
        )
        // fulfillment
        .register(
            HandlerRegistration::on::<PaymentCompleted>(
                "create_shipment",
                Typed(CreateShipment(s.clone())),
            )
            .declares_event::<OrderShipped>(),
        )
        .register(
            HandlerRegistration::on::<OrderShipped>(
                "update_tracking",
                Typed(UpdateTracking(s.clone())),
            )
                .declares_event::<OrderDelivered>(),
        )
        .register(
            HandlerRegistration::on::<OrderDelivered>(
                "complete_order",
                Typed(CompleteOrder(s.clone())),
            )
                .declares_event::<OrderStatusUpdated>()
                .declares_event::<OrderCompleted>(),
        )
        .register(HandlerRegistration::on::<OrderStatusUpdated>(
            "send_notifications",
            Typed(SendNotifications(s.clone())),
        ))
        .register(
            HandlerRegistration::on::<OrderExpired>("expire_order", Typed(ExpireOrder(s.clone())))
                .declares_event::<InventoryReleased>()
                .declares_event::<OrderStatusUpdated>(),
        )
}

/// Builds and validates the order handler table.
///
/// # Errors
///
/// Returns `RoutingError::Misconfigured` if the table is inconsistent.
pub fn order_registry(services: &OrderServices) -> Result<HandlerRegistry, RoutingError> {
    register_order_handlers(HandlerRegistry::builder(), services).build()
}
