//! Per-invocation emission context.
//!
//! A fresh `EmissionContext` is created for every handler invocation. It is
//! never shared between invocations. Ad-hoc emissions leave the context the
//! moment they are recorded; declared payloads stay buffered until the
//! dispatcher drains them after a successful return.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::warn;
use uuid::Uuid;

use crate::clock::Clock;
use crate::error::HandlerError;
use crate::event::{EmissionKind, Event, EventMetadata, EventPayload, TriggerKind};
use crate::logger::HandlerLogger;

/// Identity and lineage of one handler invocation.
#[derive(Debug, Clone)]
pub struct InvocationInfo {
    /// Unique invocation identifier.
    pub invocation_id: Uuid,
    /// The handler being invoked.
    pub handler_id: String,
    /// What invoked the handler.
    pub trigger_kind: TriggerKind,
    /// Workflow instance; copied onto every emission.
    pub correlation_id: Uuid,
    /// The event or trigger that caused this invocation; the causation id of
    /// every emission.
    pub causation_id: Uuid,
    /// Depth of this invocation in the cascade (0 for trigger-invoked).
    pub depth: u32,
    /// Timestamp of the cause; emissions are never stamped earlier.
    pub caused_at: DateTime<Utc>,
}

/// Collects the events a handler produces during one invocation.
pub struct EmissionContext {
    info: InvocationInfo,
    declares: Vec<String>,
    clock: Arc<dyn Clock>,
    sink: mpsc::UnboundedSender<Event>,
    declared: Vec<(String, serde_json::Value)>,
    last_emitted_at: DateTime<Utc>,
    ad_hoc_count: usize,
}

impl fmt::Debug for EmissionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmissionContext")
            .field("info", &self.info)
            .field("declares", &self.declares)
            .field("declared", &self.declared)
            .field("ad_hoc_count", &self.ad_hoc_count)
            .finish_non_exhaustive()
    }
}

impl EmissionContext {
    /// Creates a context whose ad-hoc emissions are sent to `sink`.
    #[must_use]
    pub fn new(
        info: InvocationInfo,
        declares: Vec<String>,
        clock: Arc<dyn Clock>,
        sink: mpsc::UnboundedSender<Event>,
    ) -> Self {
        let last_emitted_at = info.caused_at;
        Self {
            info,
            declares,
            clock,
            sink,
            declared: Vec::new(),
            last_emitted_at,
            ad_hoc_count: 0,
        }
    }

    /// Returns the invocation identity.
    #[must_use]
    pub fn info(&self) -> &InvocationInfo {
        &self.info
    }

    /// Returns the handler id.
    #[must_use]
    pub fn handler_id(&self) -> &str {
        &self.info.handler_id
    }

    /// Returns the workflow correlation id.
    #[must_use]
    pub fn correlation_id(&self) -> Uuid {
        self.info.correlation_id
    }

    /// Returns the current time according to the dispatcher's clock.
    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Returns a logger bound to this invocation.
    #[must_use]
    pub fn logger(&self) -> HandlerLogger {
        HandlerLogger::new(
            self.info.handler_id.clone(),
            self.info.invocation_id,
            self.info.correlation_id,
        )
    }

    /// Emits an ad-hoc event. It is handed to the dispatcher immediately and
    /// stays emitted even if this invocation later fails.
    pub fn emit(&mut self, name: impl Into<String>, payload: serde_json::Value) {
        let event = self.build(name.into(), payload, EmissionKind::AdHoc);
        self.ad_hoc_count += 1;
        if self.sink.send(event).is_err() {
            warn!(
                handler_id = %self.info.handler_id,
                invocation_id = %self.info.invocation_id,
                "emission sink closed; ad-hoc event dropped"
            );
        }
    }

    /// Emits a typed ad-hoc event.
    pub fn emit_typed<P: EventPayload>(&mut self, payload: &P) {
        self.emit(P::NAME, payload.to_value());
    }

    /// Buffers the payload for a declared event. A later call with the same
    /// name replaces the payload but keeps its original position.
    ///
    /// # Errors
    ///
    /// Returns `HandlerError::Failed` if the handler's registration does not
    /// declare `name`.
    pub fn set_declared_payload(
        &mut self,
        name: impl Into<String>,
        payload: serde_json::Value,
    ) -> Result<(), HandlerError> {
        let name = name.into();
        if !self.declares.iter().any(|declared| *declared == name) {
            return Err(HandlerError::Failed(format!(
                "{name} is not declared by handler {}",
                self.info.handler_id
            )));
        }
        match self.declared.iter_mut().find(|(existing, _)| *existing == name) {
            Some((_, slot)) => *slot = payload,
            None => self.declared.push((name, payload)),
        }
        Ok(())
    }

    /// Typed form of [`set_declared_payload`](Self::set_declared_payload).
    ///
    /// # Errors
    ///
    /// Returns `HandlerError::Failed` if the event is not declared.
    pub fn set_declared<P: EventPayload>(&mut self, payload: &P) -> Result<(), HandlerError> {
        self.set_declared_payload(P::NAME, payload.to_value())
    }

    /// Returns the buffered declared payloads in insertion order.
    #[must_use]
    pub fn declared_payloads(&self) -> &[(String, serde_json::Value)] {
        &self.declared
    }

    /// Number of ad-hoc events emitted so far.
    #[must_use]
    pub fn ad_hoc_count(&self) -> usize {
        self.ad_hoc_count
    }

    /// Consumes the context and turns the declared payloads into events.
    /// Only called after the handler returned successfully.
    #[must_use]
    pub fn into_declared_events(mut self) -> Vec<Event> {
        let declared = std::mem::take(&mut self.declared);
        declared
            .into_iter()
            .map(|(name, payload)| self.build(name, payload, EmissionKind::Declared))
            .collect()
    }

    fn build(&mut self, name: String, payload: serde_json::Value, emission: EmissionKind) -> Event {
        let emitted_at = self.clock.now_not_before(self.last_emitted_at);
        self.last_emitted_at = emitted_at;
        Event {
            metadata: EventMetadata {
                event_id: Uuid::new_v4(),
                event_name: name,
                correlation_id: self.info.correlation_id,
                causation_id: self.info.causation_id,
                emitted_by: Some(self.info.handler_id.clone()),
                emission,
                depth: self.info.depth,
                emitted_at,
            },
            payload,
        }
    }
}
