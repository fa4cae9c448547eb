//! Integration tests for external event ingestion.

mod common;

use axum::http::StatusCode;
use serde_json::json;

#[tokio::test]
async fn test_publish_unknown_event_returns_404() {
    let state = common::test_state();

    let (status, json) = common::post_json(
        common::build_test_app(&state),
        "/api/v1/events/SomethingHappened",
        &json!({}),
    )
    .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["error"], "unknown_event");
}

#[tokio::test]
async fn test_publish_mistyped_payload_returns_400() {
    let state = common::test_state();

    let (status, json) = common::post_json(
        common::build_test_app(&state),
        "/api/v1/events/PaymentProcessed",
        &json!({ "order_id": "not-a-uuid" }),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "invalid_payload");
}

#[tokio::test]
async fn test_redelivered_payment_joins_workflow_without_changing_order() {
    // Arrange
    let state = common::test_state();
    let order = common::place_order(&state, 1).await;
    let correlation_id = common::correlation_of(&order);
    common::wait_for_workflow(&state, correlation_id, |w| w.closed_at.is_some()).await;
    let order_id = order["id"].as_str().unwrap();
    let payload = json!({
        "order_id": order_id,
        "payment_id": "pay_provider_callback",
        "amount_cents": order["total_cents"],
    });

    // Act
    let (status, json) = common::post_json(
        common::build_test_app(&state),
        &format!("/api/v1/events/PaymentProcessed?correlation_id={correlation_id}"),
        &payload,
    )
    .await;

    // Assert
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(json["correlation_id"], correlation_id.to_string());

    let workflow = common::wait_for_workflow(&state, correlation_id, |w| {
        w.events
            .iter()
            .filter(|e| e.event_name == "PaymentProcessed")
            .count()
            == 2
    })
    .await;
    assert_eq!(workflow.state, "completed");

    let (_, json) = common::get_json(
        common::build_test_app(&state),
        &format!("/api/v1/orders/{order_id}"),
    )
    .await;
    assert_eq!(json["status"], "completed");
    assert_ne!(json["payment_id"], "pay_provider_callback");
}
