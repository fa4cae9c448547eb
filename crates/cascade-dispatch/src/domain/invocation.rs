//! Invocation lifecycle.
//!
//! `Scheduled -> Running -> {Succeeded | Failed | TimedOut}`. Terminal states
//! are final; any other transition is rejected.

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use cascade_core::error::DispatchError;
use cascade_core::event::TriggerKind;

/// State of a single handler invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InvocationState {
    /// Waiting for a worker permit.
    Scheduled,
    /// The handler is executing.
    Running,
    /// The handler returned successfully.
    Succeeded,
    /// The handler returned an error or panicked.
    Failed,
    /// The handler exceeded its execution budget.
    TimedOut,
}

impl InvocationState {
    /// Returns `true` for states with no outgoing transition.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::TimedOut)
    }
}

/// A transition the lifecycle does not allow.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("invalid invocation transition {from:?} -> {to:?}")]
pub struct InvalidTransition {
    /// State before the attempted transition.
    pub from: InvocationState,
    /// Requested state.
    pub to: InvocationState,
}

/// Record of one handler invocation.
#[derive(Debug, Clone, Serialize)]
pub struct InvocationRecord {
    pub invocation_id: Uuid,
    pub handler_id: String,
    pub trigger_kind: TriggerKind,
    pub correlation_id: Uuid,
    pub causation_id: Uuid,
    pub depth: u32,
    pub state: InvocationState,
    pub scheduled_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Failure reason for `Failed` and `TimedOut`.
    #[serde(serialize_with = "serialize_error")]
    pub error: Option<DispatchError>,
    /// Ad-hoc events emitted, including those of a failed invocation.
    pub ad_hoc_emitted: usize,
    /// Declared events released; zero unless the invocation succeeded.
    pub declared_emitted: usize,
}

fn serialize_error<S: serde::Serializer>(
    error: &Option<DispatchError>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match error {
        Some(e) => serializer.serialize_some(&e.to_string()),
        None => serializer.serialize_none(),
    }
}

impl InvocationRecord {
    /// Creates a record in the `Scheduled` state.
    #[must_use]
    pub fn scheduled(
        handler_id: impl Into<String>,
        trigger_kind: TriggerKind,
        correlation_id: Uuid,
        causation_id: Uuid,
        depth: u32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            invocation_id: Uuid::new_v4(),
            handler_id: handler_id.into(),
            trigger_kind,
            correlation_id,
            causation_id,
            depth,
            state: InvocationState::Scheduled,
            scheduled_at: now,
            started_at: None,
            finished_at: None,
            error: None,
            ad_hoc_emitted: 0,
            declared_emitted: 0,
        }
    }

    fn transition(&mut self, to: InvocationState) -> Result<(), InvalidTransition> {
        let allowed = match (self.state, to) {
            (InvocationState::Scheduled, InvocationState::Running) => true,
            (InvocationState::Running, next) => next.is_terminal(),
            _ => false,
        };
        if !allowed {
            return Err(InvalidTransition {
                from: self.state,
                to,
            });
        }
        self.state = to;
        Ok(())
    }

    /// `Scheduled -> Running`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidTransition` from any other state.
    pub fn start(&mut self, now: DateTime<Utc>) -> Result<(), InvalidTransition> {
        self.transition(InvocationState::Running)?;
        self.started_at = Some(now);
        Ok(())
    }

    /// `Running -> Succeeded`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidTransition` unless running.
    pub fn succeed(
        &mut self,
        now: DateTime<Utc>,
        declared_emitted: usize,
    ) -> Result<(), InvalidTransition> {
        self.transition(InvocationState::Succeeded)?;
        self.finished_at = Some(now);
        self.declared_emitted = declared_emitted;
        Ok(())
    }

    /// `Running -> Failed`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidTransition` unless running.
    pub fn fail(
        &mut self,
        now: DateTime<Utc>,
        error: DispatchError,
    ) -> Result<(), InvalidTransition> {
        self.transition(InvocationState::Failed)?;
        self.finished_at = Some(now);
        self.error = Some(error);
        Ok(())
    }

    /// `Running -> TimedOut`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidTransition` unless running.
    pub fn time_out(
        &mut self,
        now: DateTime<Utc>,
        error: DispatchError,
    ) -> Result<(), InvalidTransition> {
        self.transition(InvocationState::TimedOut)?;
        self.finished_at = Some(now);
        self.error = Some(error);
        Ok(())
    }
}
