//! External event ingestion.
//!
//! Publishes an event from outside the system, such as a payment provider
//! callback, into the dispatcher. Only event names with a registered payload
//! type are accepted, and the payload must match that type.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, instrument};
use uuid::Uuid;

use cascade_core::event::TriggerKind;

use crate::error::ApiError;
use crate::state::AppState;

/// Query string for POST /{event_name}.
#[derive(Debug, Default, Deserialize)]
pub struct PublishQuery {
    /// Workflow to publish into. A new one is opened when absent.
    pub correlation_id: Option<Uuid>,
}

/// Response body for an accepted event.
#[derive(Debug, Serialize)]
pub struct PublishResponse {
    /// Workflow the event was published into.
    pub correlation_id: Uuid,
}

/// POST /{event_name}
#[instrument(skip(state, payload))]
async fn publish_event(
    State(state): State<AppState>,
    Path(event_name): Path<String>,
    Query(query): Query<PublishQuery>,
    Json(payload): Json<Value>,
) -> Result<(StatusCode, Json<PublishResponse>), ApiError> {
    let registry = state.dispatcher.registry();
    let Some(schema) = registry.schema(&event_name) else {
        return Err(ApiError::UnknownEvent(event_name));
    };
    schema
        .validate(&payload)
        .map_err(|reason| ApiError::InvalidPayload {
            event_name: event_name.clone(),
            reason,
        })?;

    let mut trigger = state.dispatcher.trigger(TriggerKind::Api);
    if let Some(correlation_id) = query.correlation_id {
        trigger = trigger.with_correlation_id(correlation_id);
    }
    let cascade = state.dispatcher.publish(&trigger, &event_name, payload);
    info!(correlation_id = %cascade.correlation_id(), "external event accepted");

    Ok((
        StatusCode::ACCEPTED,
        Json(PublishResponse {
            correlation_id: cascade.correlation_id(),
        }),
    ))
}

/// Returns the router for external events.
pub fn router() -> Router<AppState> {
    Router::new().route("/{event_name}", post(publish_event))
}
