//! Cascade — HTTP API server library.
//!
//! Exposes the order saga over HTTP. The binary in `main.rs` adds tracing,
//! CORS, the interval scheduler and the workflow sweeper around [`app`].

pub mod error;
pub mod routes;
pub mod state;

use axum::Router;

use crate::state::AppState;

/// Builds the full route tree over `state`.
#[must_use]
pub fn app(state: AppState) -> Router {
    Router::new()
        .merge(routes::health::router())
        .nest("/api/v1/orders", routes::orders::router())
        .nest("/api/v1/workflows", routes::workflows::router())
        .nest("/api/v1/events", routes::events::router())
        .with_state(state)
}
