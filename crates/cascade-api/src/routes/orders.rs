//! Routes for the order saga.
//!
//! Each route invokes one api handler. The response carries that handler's
//! output; payment, reservation and fulfillment continue in the background
//! and show up in later reads of the order or its workflow.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{info, instrument};
use uuid::Uuid;

use cascade_core::event::{Trigger, TriggerKind};
use cascade_orders::application::handlers::{
    CANCEL_ORDER, CREATE_ORDER, GET_ORDER_STATUS, LIST_ORDERS,
};
use cascade_orders::domain::commands::{CancelOrder, CreateOrder, GetOrderStatus, ListOrders};

use super::invoke;
use crate::error::ApiError;
use crate::state::AppState;

/// Request body for POST /{order_id}/cancel.
#[derive(Debug, Default, Deserialize)]
pub struct CancelRequest {
    /// Why the customer is cancelling.
    #[serde(default)]
    pub reason: Option<String>,
}

/// An api trigger that continues the order's workflow, when the order is
/// known.
fn order_trigger(state: &AppState, order_id: Uuid) -> Trigger {
    let trigger = state.dispatcher.trigger(TriggerKind::Api);
    match state.services.orders.get(order_id) {
        Some(order) => trigger.with_correlation_id(order.correlation_id),
        None => trigger,
    }
}

/// POST /
#[instrument(skip(state, request), fields(customer_id = request.customer_id))]
async fn create_order(
    State(state): State<AppState>,
    Json(request): Json<CreateOrder>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let trigger = state.dispatcher.trigger(TriggerKind::Api);
    info!(correlation_id = %trigger.correlation_id, "handling create_order");

    let order = invoke(&state, &trigger, CREATE_ORDER, json!(request)).await?;

    Ok((StatusCode::CREATED, Json(order)))
}

/// GET /
#[instrument(skip(state))]
async fn list_orders(
    State(state): State<AppState>,
    Query(query): Query<ListOrders>,
) -> Result<Json<Value>, ApiError> {
    let trigger = state.dispatcher.trigger(TriggerKind::Api);

    let orders = invoke(&state, &trigger, LIST_ORDERS, json!(query)).await?;

    Ok(Json(orders))
}

/// GET /{order_id}
#[instrument(skip(state))]
async fn get_order(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    let trigger = order_trigger(&state, order_id);

    let query = GetOrderStatus { order_id };
    let order = invoke(&state, &trigger, GET_ORDER_STATUS, json!(query)).await?;

    Ok(Json(order))
}

/// POST /{order_id}/cancel
#[instrument(skip(state, request))]
async fn cancel_order(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
    Json(request): Json<CancelRequest>,
) -> Result<Json<Value>, ApiError> {
    let trigger = order_trigger(&state, order_id);
    info!(correlation_id = %trigger.correlation_id, "handling cancel_order");

    let command = CancelOrder {
        order_id,
        reason: request.reason,
    };
    let order = invoke(&state, &trigger, CANCEL_ORDER, json!(command)).await?;

    Ok(Json(order))
}

/// Returns the router for the order context.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(create_order).get(list_orders))
        .route("/{order_id}", get(get_order))
        .route("/{order_id}/cancel", post(cancel_order))
}
