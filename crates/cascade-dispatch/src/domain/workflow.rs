//! Workflow instances as seen by the saga tracker.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use cascade_core::event::{EmissionKind, Event};

/// Why a workflow instance closed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", content = "event", rename_all = "snake_case")]
pub enum CloseReason {
    /// A terminal event was observed.
    TerminalEvent(String),
    /// No activity for longer than the inactivity window.
    Inactivity,
}

/// Lineage entry of one observed event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventSummary {
    pub event_id: Uuid,
    pub event_name: String,
    pub causation_id: Uuid,
    pub emitted_by: Option<String>,
    pub emission: EmissionKind,
    pub depth: u32,
    pub emitted_at: DateTime<Utc>,
}

impl From<&Event> for EventSummary {
    fn from(event: &Event) -> Self {
        Self {
            event_id: event.metadata.event_id,
            event_name: event.metadata.event_name.clone(),
            causation_id: event.metadata.causation_id,
            emitted_by: event.metadata.emitted_by.clone(),
            emission: event.metadata.emission,
            depth: event.metadata.depth,
            emitted_at: event.metadata.emitted_at,
        }
    }
}

/// One logical execution of a multi-step business process.
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowInstance {
    pub correlation_id: Uuid,
    /// Application-defined state label.
    pub state: String,
    pub opened_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub close_reason: Option<CloseReason>,
    /// Trigger that opened the instance, when it was opened by one.
    pub root_trigger_id: Option<Uuid>,
    /// Every event observed, in observation order.
    pub events: Vec<EventSummary>,
}

impl WorkflowInstance {
    /// Opens a new instance.
    #[must_use]
    pub fn open(
        correlation_id: Uuid,
        initial_state: impl Into<String>,
        root_trigger_id: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            correlation_id,
            state: initial_state.into(),
            opened_at: now,
            last_activity_at: now,
            closed_at: None,
            close_reason: None,
            root_trigger_id,
            events: Vec::new(),
        }
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.closed_at.is_none()
    }

    /// Records an event. The state of a closed instance no longer changes,
    /// but late events are still kept for lineage.
    pub fn record(&mut self, event: &Event, next_state: Option<String>, now: DateTime<Utc>) {
        self.events.push(EventSummary::from(event));
        self.last_activity_at = self.last_activity_at.max(now);
        if self.is_open() {
            if let Some(state) = next_state {
                self.state = state;
            }
        }
    }

    /// Closes the instance. Closing twice keeps the first reason.
    pub fn close(&mut self, reason: CloseReason, now: DateTime<Utc>) -> bool {
        if !self.is_open() {
            return false;
        }
        self.closed_at = Some(now);
        self.close_reason = Some(reason);
        true
    }

    /// Walks causation links from `event_id` back to the root, returning the
    /// chain root-first. Stops at the first cause not observed in this
    /// instance (normally the trigger).
    #[must_use]
    pub fn lineage(&self, event_id: Uuid) -> Vec<&EventSummary> {
        let mut chain = Vec::new();
        let mut cursor = Some(event_id);
        while let Some(id) = cursor {
            match self.events.iter().find(|e| e.event_id == id) {
                Some(summary) if chain.len() <= self.events.len() => {
                    chain.push(summary);
                    cursor = Some(summary.causation_id);
                }
                _ => cursor = None,
            }
        }
        chain.reverse();
        chain
    }
}

/// Derives the application state label of an instance from its events.
pub trait StateReducer: Send + Sync {
    /// Label for a newly opened instance.
    fn initial_state(&self) -> String {
        "open".to_owned()
    }

    /// Returns the next state label, or `None` when `event` does not change it.
    fn reduce(&self, current: &str, event: &Event) -> Option<String>;
}

/// Reducer that labels the instance with the last observed event name.
#[derive(Debug, Clone, Copy, Default)]
pub struct LastEventReducer;

impl StateReducer for LastEventReducer {
    fn reduce(&self, _current: &str, event: &Event) -> Option<String> {
        Some(event.name().to_owned())
    }
}
