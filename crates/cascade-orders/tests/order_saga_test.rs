//! End-to-end tests of the order saga running on the dispatcher.

use std::sync::Arc;

use cascade_core::clock::{Clock, SystemClock};
use cascade_core::error::{DispatchError, HandlerError};
use cascade_core::event::TriggerKind;
use cascade_core::rng::DeterministicRng;
use cascade_dispatch::{CloseReason, Dispatcher, SagaConfig, SagaTracker};
use cascade_orders::application::handlers::{
    CANCEL_ORDER, CREATE_ORDER, EXPIRE_PENDING_ORDERS, ON_CONNECT, ON_MESSAGE, SYNC_INVENTORY,
};
use cascade_orders::application::lifecycle::{OrderLifecycle, TERMINAL_EVENTS};
use cascade_orders::application::notifier::NotificationKind;
use cascade_orders::application::registry::order_registry;
use cascade_orders::application::services::{OrderServices, OrderSettings};
use cascade_orders::domain::aggregates::{Order, OrderStatus};
use cascade_orders::domain::commands::{CreateOrder, ServerReply};
use cascade_orders::domain::events::LineItem;
use cascade_test_support::{ManualClock, MockRng, SequenceRng};
use serde_json::json;
use uuid::Uuid;

struct Harness {
    dispatcher: Dispatcher,
    services: OrderServices,
    tracker: Arc<SagaTracker>,
}

fn harness_with(clock: Arc<dyn Clock>, rng: impl DeterministicRng + 'static) -> Harness {
    let services =
        OrderServices::simulated(Arc::clone(&clock), OrderSettings::default(), Box::new(rng));
    let registry = order_registry(&services).unwrap();
    let tracker = Arc::new(SagaTracker::new(
        SagaConfig::default().with_terminal_events(TERMINAL_EVENTS),
        Arc::clone(&clock),
        Arc::new(OrderLifecycle),
    ));
    let dispatcher = Dispatcher::builder(registry)
        .clock(clock)
        .tracker(Arc::clone(&tracker))
        .build();
    Harness {
        dispatcher,
        services,
        tracker,
    }
}

fn harness(rng: impl DeterministicRng + 'static) -> Harness {
    harness_with(Arc::new(SystemClock), rng)
}

fn order_of(product_id: u64, quantity: u32) -> serde_json::Value {
    json!({
        "customer_id": 42,
        "items": [{ "product_id": product_id, "quantity": quantity }],
    })
}

/// Places a reserved order directly in the store, as if the forward steps
/// had already run. A paid order also carries a captured payment.
fn seed_order(h: &Harness, paid: bool) -> Order {
    let now = h.services.clock.now();
    let command = CreateOrder {
        customer_id: 42,
        items: vec![LineItem {
            product_id: 1,
            quantity: 3,
        }],
    };
    let mut order = Order::place(
        Uuid::new_v4(),
        Uuid::new_v4(),
        &command,
        |p| h.services.stock.price_of(p),
        now,
        chrono::Duration::minutes(15),
    )
    .unwrap();
    h.services.stock.reserve(order.id, &order.items()).unwrap();
    if paid {
        order.record_payment("pay_seeded_000001", now);
    }
    h.services.orders.insert(order.clone());
    order
}

#[tokio::test]
async fn test_placed_order_runs_to_completion() {
    // Arrange
    let h = harness(MockRng);
    let trigger = h.dispatcher.trigger(TriggerKind::Api);

    // Act
    let mut cascade = h
        .dispatcher
        .start(&trigger, CREATE_ORDER, order_of(1, 2))
        .unwrap();
    let placed: Order = serde_json::from_value(cascade.root_result().await.unwrap()).unwrap();
    let report = cascade.settled().await;

    // Assert
    assert!(report.succeeded(), "{:?}", report.failures);
    assert_eq!(placed.status(), OrderStatus::Pending);
    assert_eq!(placed.total_cents, 2 * 2999);
    for name in [
        "OrderCreated",
        "PaymentProcessed",
        "PaymentCompleted",
        "OrderShipped",
        "OrderDelivered",
        "OrderCompleted",
    ] {
        assert_eq!(report.events_named(name).len(), 1, "{name}");
    }

    let order = h.services.orders.get(placed.id).unwrap();
    assert_eq!(order.status(), OrderStatus::Completed);
    assert!(order.tracking_number.is_some());
    let widget = h.services.stock.get(1).unwrap();
    assert_eq!((widget.on_hand, widget.reserved), (98, 0));

    let instance = h.tracker.get(trigger.correlation_id).unwrap();
    assert_eq!(instance.state, "completed");
    assert_eq!(
        instance.close_reason,
        Some(CloseReason::TerminalEvent("OrderCompleted".into()))
    );
}

#[tokio::test]
async fn test_order_created_fans_out_to_payment_and_inventory() {
    let h = harness(MockRng);
    let trigger = h.dispatcher.trigger(TriggerKind::Api);

    let report = h
        .dispatcher
        .run(&trigger, CREATE_ORDER, order_of(1, 1))
        .await
        .unwrap();

    let created = report.events_named("OrderCreated")[0].id();
    for handler_id in ["process_payment", "reserve_inventory"] {
        let runs = report.invocations_of(handler_id);
        assert_eq!(runs.len(), 1, "{handler_id}");
        assert_eq!(runs[0].causation_id, created);
        assert_eq!(runs[0].depth, 1);
    }
}

#[tokio::test]
async fn test_declined_payment_fails_order_and_returns_stock() {
    // Arrange
    let h = harness(SequenceRng::floats(vec![0.99]));
    let trigger = h.dispatcher.trigger(TriggerKind::Api);

    // Act
    let mut cascade = h
        .dispatcher
        .start(&trigger, CREATE_ORDER, order_of(1, 4))
        .unwrap();
    let placed: Order = serde_json::from_value(cascade.root_result().await.unwrap()).unwrap();
    let report = cascade.settled().await;

    // Assert
    assert!(report.succeeded(), "{:?}", report.failures);
    let order = h.services.orders.get(placed.id).unwrap();
    assert_eq!(order.status(), OrderStatus::PaymentFailed);
    assert_eq!(order.payment_id, None);
    assert_eq!(h.services.stock.get(1).unwrap().available(), 100);
    assert_eq!(
        h.services
            .outbox
            .sent_for(order.id, NotificationKind::PaymentFailed)
            .len(),
        1
    );
    let instance = h.tracker.get(trigger.correlation_id).unwrap();
    assert!(instance.is_open());
    assert_eq!(instance.state, "payment_failed");
}

#[tokio::test]
async fn test_cancellation_runs_each_compensation_once() {
    // Arrange
    let h = harness(MockRng);
    let order = seed_order(&h, true);
    let trigger = h
        .dispatcher
        .trigger(TriggerKind::Api)
        .with_correlation_id(order.correlation_id);

    // Act
    let report = h
        .dispatcher
        .run(&trigger, CANCEL_ORDER, json!({ "order_id": order.id }))
        .await
        .unwrap();

    // Assert
    assert!(report.succeeded(), "{:?}", report.failures);
    for handler_id in [
        "refund_payment",
        "release_inventory",
        "send_refund_notification",
        "update_order_status",
        "log_inventory_release",
    ] {
        assert_eq!(report.invocations_of(handler_id).len(), 1, "{handler_id}");
    }
    let cancelled = h.services.orders.get(order.id).unwrap();
    assert_eq!(cancelled.status(), OrderStatus::Refunded);
    assert!(cancelled.refund_id.is_some());
    assert_eq!(h.services.stock.get(1).unwrap().available(), 100);
    assert_eq!(
        h.services
            .outbox
            .sent_for(order.id, NotificationKind::Refund)
            .len(),
        1
    );
    let instance = h.tracker.get(order.correlation_id).unwrap();
    assert_eq!(
        instance.close_reason,
        Some(CloseReason::TerminalEvent("OrderCancelled".into()))
    );
    // Compensations observed after the close do not move the state.
    assert_eq!(instance.state, "cancelled");
}

#[tokio::test]
async fn test_cancel_of_unpaid_order_has_nothing_to_refund() {
    // Arrange
    let h = harness(MockRng);
    let order = seed_order(&h, false);
    let trigger = h.dispatcher.trigger(TriggerKind::Api);

    // Act
    let report = h
        .dispatcher
        .run(&trigger, CANCEL_ORDER, json!({ "order_id": order.id, "reason": "changed mind" }))
        .await
        .unwrap();

    // Assert
    assert!(report.events_named("PaymentRefunded").is_empty());
    assert_eq!(report.events_named("InventoryReleased").len(), 1);
    assert_eq!(
        h.services.orders.get(order.id).unwrap().status(),
        OrderStatus::Cancelled
    );
}

#[tokio::test]
async fn test_cancel_after_completion_is_conflict() {
    // Arrange
    let h = harness(MockRng);
    let trigger = h.dispatcher.trigger(TriggerKind::Api);
    let mut placing = h
        .dispatcher
        .start(&trigger, CREATE_ORDER, order_of(1, 1))
        .unwrap();
    let placed: Order = serde_json::from_value(placing.root_result().await.unwrap()).unwrap();
    placing.settled().await;

    // Act
    let mut cancelling = h
        .dispatcher
        .start(&trigger, CANCEL_ORDER, json!({ "order_id": placed.id }))
        .unwrap();
    let result = cancelling.root_result().await;

    // Assert
    assert!(matches!(
        result,
        Err(DispatchError::HandlerExecutionFailure {
            source: HandlerError::Conflict(_),
            ..
        })
    ));
    assert!(cancelling.settled().await.events.is_empty());
}

#[tokio::test]
async fn test_redelivered_payment_leaves_completed_order_alone() {
    // Arrange
    let h = harness(MockRng);
    let trigger = h.dispatcher.trigger(TriggerKind::Api);
    let first = h
        .dispatcher
        .run(&trigger, CREATE_ORDER, order_of(1, 1))
        .await
        .unwrap();
    let processed = first.events_named("PaymentProcessed")[0].clone();
    let order_id: Uuid = serde_json::from_value(processed.payload["order_id"].clone()).unwrap();
    let before = h.services.orders.get(order_id).unwrap();

    // Act
    let again = h.dispatcher.deliver(processed.redelivered()).settled().await;

    // Assert
    assert!(again.succeeded(), "{:?}", again.failures);
    assert_eq!(again.invocations_of("update_order_payment_status").len(), 1);
    assert!(again.events_named("PaymentCompleted").is_empty());
    assert!(again.events_named("OrderShipped").is_empty());
    let after = h.services.orders.get(order_id).unwrap();
    assert_eq!(after.status(), OrderStatus::Completed);
    assert_eq!(after.history(), before.history());
    assert_eq!(h.tracker.get(trigger.correlation_id).unwrap().state, "completed");
}

#[tokio::test]
async fn test_published_payment_for_paid_order_records_payment_once() {
    // Arrange
    let h = harness(MockRng);
    let order = seed_order(&h, true);
    let trigger = h
        .dispatcher
        .trigger(TriggerKind::Event)
        .with_correlation_id(order.correlation_id);
    let payload = json!({
        "order_id": order.id,
        "payment_id": "pay_seeded_000001",
        "amount_cents": order.total_cents,
    });

    // Act
    let report = h
        .dispatcher
        .publish(&trigger, "PaymentProcessed", payload)
        .settled()
        .await;

    // Assert
    assert!(report.succeeded(), "{:?}", report.failures);
    let order = h.services.orders.get(order.id).unwrap();
    assert_eq!(order.payment_id.as_deref(), Some("pay_seeded_000001"));
    assert_eq!(order.history()[0].to, OrderStatus::Paid);
    assert_eq!(
        order
            .history()
            .iter()
            .filter(|c| c.to == OrderStatus::Paid)
            .count(),
        1
    );
}

#[tokio::test]
async fn test_out_of_stock_order_is_cancelled_and_never_left_charged() {
    // Arrange
    let h = harness(MockRng);
    let trigger = h.dispatcher.trigger(TriggerKind::Api);

    // Act
    let mut cascade = h
        .dispatcher
        .start(&trigger, CREATE_ORDER, order_of(3, 1))
        .unwrap();
    let placed: Order = serde_json::from_value(cascade.root_result().await.unwrap()).unwrap();
    let report = cascade.settled().await;

    // Assert
    assert!(report.succeeded(), "{:?}", report.failures);
    assert!(report.events_named("OrderShipped").is_empty());
    let order = h.services.orders.get(placed.id).unwrap();
    assert!(matches!(
        order.status(),
        OrderStatus::Cancelled | OrderStatus::Refunded
    ));
    assert_eq!(order.payment_id.is_some(), order.refund_id.is_some());
    assert_eq!(
        h.services
            .outbox
            .sent_for(order.id, NotificationKind::OutOfStock)
            .len(),
        1
    );
}

#[tokio::test]
async fn test_expiry_cron_expires_overdue_order_and_releases_stock() {
    // Arrange
    let clock = Arc::new(ManualClock::new(chrono::Utc::now()));
    let h = harness_with(clock.clone(), MockRng);
    let order = seed_order(&h, false);
    clock.advance(chrono::Duration::minutes(16));
    let trigger = h.dispatcher.trigger(TriggerKind::Cron);

    // Act
    let report = h
        .dispatcher
        .run(&trigger, EXPIRE_PENDING_ORDERS, json!({}))
        .await
        .unwrap();

    // Assert
    assert!(report.succeeded(), "{:?}", report.failures);
    assert_eq!(report.events_named("OrderExpired").len(), 1);
    assert_eq!(report.events_named("InventoryReleased").len(), 1);
    assert_eq!(
        h.services.orders.get(order.id).unwrap().status(),
        OrderStatus::Expired
    );
    assert_eq!(h.services.stock.get(1).unwrap().available(), 100);
}

#[tokio::test]
async fn test_expiry_cron_leaves_fresh_orders() {
    let h = harness(MockRng);
    let order = seed_order(&h, true);
    let trigger = h.dispatcher.trigger(TriggerKind::Cron);

    let report = h
        .dispatcher
        .run(&trigger, EXPIRE_PENDING_ORDERS, json!({}))
        .await
        .unwrap();

    assert!(report.events.is_empty());
    assert_eq!(
        h.services.orders.get(order.id).unwrap().status(),
        OrderStatus::Paid
    );
}

#[tokio::test]
async fn test_inventory_sync_alerts_and_reorders_once() {
    // Arrange
    let h = harness(MockRng);

    // Act
    for _ in 0..2 {
        let trigger = h.dispatcher.trigger(TriggerKind::Cron);
        let report = h
            .dispatcher
            .run(&trigger, SYNC_INVENTORY, json!({}))
            .await
            .unwrap();
        assert!(report.succeeded(), "{:?}", report.failures);
    }

    // Assert
    let sent = h.services.outbox.sent();
    let count = |kind: NotificationKind| sent.iter().filter(|n| n.kind == kind).count();
    assert_eq!(count(NotificationKind::LowStock), 2);
    assert_eq!(count(NotificationKind::OutOfStock), 2);
    assert_eq!(h.services.stock.pending_reorders(), vec![(2, 50)]);
}

#[tokio::test]
async fn test_websocket_subscriber_receives_status_notifications() {
    // Arrange
    let h = harness(MockRng);
    let order = seed_order(&h, true);
    let connect = h.dispatcher.trigger(TriggerKind::WebsocketConnect);
    h.dispatcher
        .run(&connect, ON_CONNECT, json!({ "connection_id": "c1" }))
        .await
        .unwrap();
    let message = h.dispatcher.trigger(TriggerKind::WebsocketMessage);
    let mut subscribing = h
        .dispatcher
        .start(
            &message,
            ON_MESSAGE,
            json!({ "connection_id": "c1", "type": "subscribe", "order_id": order.id }),
        )
        .unwrap();
    let reply: ServerReply =
        serde_json::from_value(subscribing.root_result().await.unwrap()).unwrap();

    // Act
    let trigger = h
        .dispatcher
        .trigger(TriggerKind::Api)
        .with_correlation_id(order.correlation_id);
    h.dispatcher
        .run(&trigger, CANCEL_ORDER, json!({ "order_id": order.id }))
        .await
        .unwrap();

    // Assert
    assert_eq!(reply, ServerReply::Subscribed { order_id: order.id });
    let updates = h
        .services
        .outbox
        .sent_for(order.id, NotificationKind::StatusChanged);
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].connections, vec!["c1".to_owned()]);
}

#[tokio::test]
async fn test_websocket_message_errors_are_replies() {
    let h = harness(MockRng);
    let trigger = h.dispatcher.trigger(TriggerKind::WebsocketMessage);

    for input in [
        json!({ "connection_id": "c1", "type": "dance" }),
        json!({ "connection_id": "ghost", "type": "subscribe", "order_id": Uuid::new_v4() }),
    ] {
        let mut cascade = h.dispatcher.start(&trigger, ON_MESSAGE, input).unwrap();
        let reply: ServerReply =
            serde_json::from_value(cascade.root_result().await.unwrap()).unwrap();
        assert!(matches!(reply, ServerReply::Error { .. }));
    }
}

#[tokio::test]
async fn test_handlers_reject_wrong_trigger_kind() {
    let h = harness(MockRng);
    let trigger = h.dispatcher.trigger(TriggerKind::Api);

    let result = h.dispatcher.start(&trigger, SYNC_INVENTORY, json!({}));

    assert!(matches!(
        result,
        Err(DispatchError::TriggerKindMismatch { .. })
    ));
}
