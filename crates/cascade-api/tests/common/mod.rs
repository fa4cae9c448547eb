//! Shared test helpers for API integration tests.
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use tower::ServiceExt;
use uuid::Uuid;

use cascade_api::state::AppState;
use cascade_core::clock::Clock;
use cascade_core::rng::DeterministicRng;
use cascade_dispatch::{DispatchConfig, SagaConfig, WorkflowInstance};
use cascade_orders::application::lifecycle::TERMINAL_EVENTS;
use cascade_orders::application::services::OrderSettings;
use cascade_test_support::{FixedClock, MockRng, SequenceRng};

/// Fixed timestamp used across all integration tests.
fn fixed_clock() -> Arc<dyn Clock> {
    Arc::new(FixedClock(
        chrono::TimeZone::with_ymd_and_hms(&chrono::Utc, 2026, 1, 15, 10, 0, 0).unwrap(),
    ))
}

/// Build application state whose payments draw from `rng`.
pub fn test_state_with_rng(rng: impl DeterministicRng + 'static) -> AppState {
    AppState::assemble(
        fixed_clock(),
        Box::new(rng),
        OrderSettings::default(),
        DispatchConfig::default(),
        SagaConfig::default().with_terminal_events(TERMINAL_EVENTS),
    )
    .unwrap()
}

/// Build application state where every payment is approved.
pub fn test_state() -> AppState {
    test_state_with_rng(MockRng)
}

/// Build application state where the first payment is declined.
pub fn declining_state() -> AppState {
    test_state_with_rng(SequenceRng::floats(vec![0.99]))
}

/// Build the full app router over `state`. Uses the same route structure as
/// `main.rs`.
pub fn build_test_app(state: &AppState) -> Router {
    cascade_api::app(state.clone())
}

/// Send a POST request with a JSON body and return the response.
pub async fn post_json(
    app: Router,
    uri: &str,
    body: &serde_json::Value,
) -> (StatusCode, serde_json::Value) {
    let request = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(body).unwrap()))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let body_bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&body_bytes).unwrap();

    (status, json)
}

/// Send a GET request and return the response.
pub async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let request = Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let body_bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&body_bytes).unwrap();

    (status, json)
}

/// Place an order for `quantity` widgets and return the created order.
pub async fn place_order(state: &AppState, quantity: u32) -> serde_json::Value {
    let body = serde_json::json!({
        "customer_id": 42,
        "items": [{ "product_id": 1, "quantity": quantity }],
    });
    let (status, json) = post_json(build_test_app(state), "/api/v1/orders", &body).await;
    assert_eq!(status, StatusCode::CREATED, "{json}");
    json
}

/// Correlation id of an order returned by the API.
pub fn correlation_of(order: &serde_json::Value) -> Uuid {
    order["correlation_id"].as_str().unwrap().parse().unwrap()
}

/// Poll the saga tracker until the workflow satisfies `done`.
pub async fn wait_for_workflow(
    state: &AppState,
    correlation_id: Uuid,
    done: impl Fn(&WorkflowInstance) -> bool,
) -> WorkflowInstance {
    for _ in 0..200 {
        if let Some(instance) = state.tracker.get(correlation_id) {
            if done(&instance) {
                return instance;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("workflow {correlation_id} did not reach the expected state");
}
