//! Cascade — API error types.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use cascade_core::error::{DispatchError, HandlerError, RoutingError};
use cascade_dispatch::ConfigError;
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

/// Startup and runtime errors for the API server.
#[derive(Debug, Error)]
pub enum AppError {
    /// An environment variable is set but unusable.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The handler table failed validation.
    #[error("routing error: {0}")]
    Routing(#[from] RoutingError),

    /// `HOST` and `PORT` do not form a socket address.
    #[error("invalid listen address: {0}")]
    Address(String),

    /// The OTLP exporter could not be built.
    #[error("telemetry error: {0}")]
    Telemetry(String),

    /// Network binding or I/O error.
    #[error("server error: {0}")]
    Server(#[from] std::io::Error),
}

/// JSON body returned for error responses.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    /// Machine-readable error code.
    pub error: &'static str,
    /// Human-readable error message.
    pub message: String,
}

/// HTTP-layer error that implements `IntoResponse`.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The api handler, or the dispatcher on its behalf, failed.
    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    /// No workflow instance with this correlation id is tracked.
    #[error("workflow {0} not found")]
    WorkflowNotFound(Uuid),

    /// No payload type is registered under this event name.
    #[error("unknown event: {0}")]
    UnknownEvent(String),

    /// The payload does not match the event's registered type.
    #[error("invalid payload for {event_name}: {reason}")]
    InvalidPayload {
        /// The event being published.
        event_name: String,
        /// What the payload type rejected.
        reason: String,
    },
}

impl ApiError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            Self::Dispatch(DispatchError::HandlerExecutionFailure { source, .. }) => match source {
                HandlerError::InvalidInput(_) => (StatusCode::BAD_REQUEST, "invalid_input"),
                HandlerError::Validation(_) => (StatusCode::BAD_REQUEST, "validation_error"),
                HandlerError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
                HandlerError::Conflict(_) => (StatusCode::CONFLICT, "conflict"),
                HandlerError::Failed(_) => (StatusCode::INTERNAL_SERVER_ERROR, "handler_failed"),
            },
            Self::Dispatch(DispatchError::HandlerTimeout { .. }) => {
                (StatusCode::GATEWAY_TIMEOUT, "handler_timeout")
            }
            Self::Dispatch(DispatchError::UnknownHandler(_)) => {
                (StatusCode::NOT_FOUND, "unknown_handler")
            }
            Self::Dispatch(_) => (StatusCode::INTERNAL_SERVER_ERROR, "dispatch_error"),
            Self::WorkflowNotFound(_) => (StatusCode::NOT_FOUND, "workflow_not_found"),
            Self::UnknownEvent(_) => (StatusCode::NOT_FOUND, "unknown_event"),
            Self::InvalidPayload { .. } => (StatusCode::BAD_REQUEST, "invalid_payload"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code) = self.status_and_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }

        let body = ErrorBody {
            error: error_code,
            message: self.to_string(),
        };

        (status, Json(body)).into_response()
    }
}
