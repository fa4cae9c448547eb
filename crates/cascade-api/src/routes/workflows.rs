//! Read-only view of the saga tracker.

use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};
use uuid::Uuid;

use cascade_dispatch::WorkflowInstance;

use crate::error::ApiError;
use crate::state::AppState;

/// GET /
async fn list_open_workflows(State(state): State<AppState>) -> Json<Vec<WorkflowInstance>> {
    Json(state.tracker.open_instances())
}

/// GET /{correlation_id}
async fn get_workflow(
    State(state): State<AppState>,
    Path(correlation_id): Path<Uuid>,
) -> Result<Json<WorkflowInstance>, ApiError> {
    state
        .tracker
        .get(correlation_id)
        .map(Json)
        .ok_or(ApiError::WorkflowNotFound(correlation_id))
}

/// Returns the router for workflow instances.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_open_workflows))
        .route("/{correlation_id}", get(get_workflow))
}
