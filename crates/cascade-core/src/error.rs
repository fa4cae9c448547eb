//! Error taxonomy for handlers, dispatch, and routing.

use std::time::Duration;

use thiserror::Error;

use crate::event::TriggerKind;

/// Error a handler returns to signal a well-defined terminal failure.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HandlerError {
    /// The handler input could not be decoded into its declared type.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A business rule rejected the request.
    #[error("validation error: {0}")]
    Validation(String),

    /// A referenced entity does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The request conflicts with the current state of an entity.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Any other failure (external call, infrastructure, panic).
    #[error("handler failed: {0}")]
    Failed(String),
}

/// Runtime dispatch errors. None of these ever crash the dispatcher; they are
/// caught at the invocation boundary and reported.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DispatchError {
    /// The handler returned an error or panicked.
    #[error("handler {handler_id} failed: {source}")]
    HandlerExecutionFailure {
        /// The failing handler.
        handler_id: String,
        /// What the handler reported.
        source: HandlerError,
    },

    /// The handler exceeded its execution budget.
    #[error("handler {handler_id} timed out after {budget:?}")]
    HandlerTimeout {
        /// The handler that timed out.
        handler_id: String,
        /// The budget that was exceeded.
        budget: Duration,
    },

    /// A cascade branch went deeper than the configured limit.
    #[error("cascade depth exceeded delivering {event_name}: depth {depth} > limit {limit}")]
    CascadeDepthExceeded {
        /// The event whose delivery was refused.
        event_name: String,
        /// The depth the event would have been delivered at.
        depth: u32,
        /// The configured limit.
        limit: u32,
    },

    /// No handler with the given id is registered.
    #[error("unknown handler: {0}")]
    UnknownHandler(String),

    /// The handler cannot be invoked by this kind of trigger.
    #[error("handler {handler_id} is a {expected} handler, cannot be invoked by {actual}")]
    TriggerKindMismatch {
        /// The handler.
        handler_id: String,
        /// Its registered trigger kind.
        expected: TriggerKind,
        /// The kind of the trigger that tried to invoke it.
        actual: TriggerKind,
    },

    /// The dispatcher stopped before the invocation reported back.
    #[error("invocation of {0} was abandoned")]
    Abandoned(String),
}

impl DispatchError {
    /// Returns `true` for failures that discard declared emissions.
    #[must_use]
    pub fn is_invocation_failure(&self) -> bool {
        matches!(
            self,
            Self::HandlerExecutionFailure { .. } | Self::HandlerTimeout { .. }
        )
    }
}

/// A single problem found while validating the handler registry.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RoutingProblem {
    /// Two registrations share an id.
    #[error("handler {0} is registered more than once")]
    DuplicateHandler(String),

    /// An event-kind handler has no subscription.
    #[error("event handler {0} does not subscribe to any event")]
    MissingSubscription(String),

    /// A non-event handler declares a subscription.
    #[error("handler {handler_id} is a {kind} handler but subscribes to {event_name}")]
    UnexpectedSubscription {
        /// The handler.
        handler_id: String,
        /// Its trigger kind.
        kind: TriggerKind,
        /// The subscription it should not have.
        event_name: String,
    },

    /// A subscription references an event nothing in the registry emits.
    #[error("handler {handler_id} subscribes to {event_name}, which no handler emits")]
    UnreachableSubscription {
        /// The subscriber.
        handler_id: String,
        /// The event name with no emitter.
        event_name: String,
    },

    /// An event is emitted somewhere but nothing subscribes to it.
    #[error("event {event_name} has no subscribers (emitted by {emitters:?})")]
    UnsubscribedEvent {
        /// The event name.
        event_name: String,
        /// Handlers that emit it.
        emitters: Vec<String>,
    },

    /// A handler declares an event whose payload type was never registered.
    #[error("handler {handler_id} declares {event_name}, which has no registered payload type")]
    UndeclaredPayloadType {
        /// The handler.
        handler_id: String,
        /// The declared event name.
        event_name: String,
    },
}

/// Startup validation failure; fatal to process start.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RoutingError {
    /// The registry failed validation.
    #[error("routing misconfiguration: {}", format_problems(.0))]
    Misconfigured(Vec<RoutingProblem>),
}

impl RoutingError {
    /// Returns the individual problems.
    #[must_use]
    pub fn problems(&self) -> &[RoutingProblem] {
        match self {
            Self::Misconfigured(problems) => problems,
        }
    }
}

fn format_problems(problems: &[RoutingProblem]) -> String {
    problems
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
