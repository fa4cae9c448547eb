//! Event and trigger abstractions.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::clock::Clock;

/// How an event came to be emitted by a handler invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmissionKind {
    /// Fired immediately when recorded, regardless of the invocation outcome.
    AdHoc,
    /// Buffered during the invocation and fired only after it succeeded.
    Declared,
    /// Injected from outside the cascade (manual publish or redelivery).
    External,
}

/// The kind of source that can invoke a handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    /// An HTTP request.
    Api,
    /// A scheduler tick.
    Cron,
    /// A routed event.
    Event,
    /// A websocket client connected.
    WebsocketConnect,
    /// A websocket client disconnected.
    WebsocketDisconnect,
    /// A websocket client sent a message.
    WebsocketMessage,
}

impl fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Api => "api",
            Self::Cron => "cron",
            Self::Event => "event",
            Self::WebsocketConnect => "websocket_connect",
            Self::WebsocketDisconnect => "websocket_disconnect",
            Self::WebsocketMessage => "websocket_message",
        };
        f.write_str(name)
    }
}

/// An external stimulus that starts (or continues) a workflow instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trigger {
    /// Unique trigger identifier; the causation id of root emissions.
    pub trigger_id: Uuid,
    /// Workflow instance this trigger belongs to.
    pub correlation_id: Uuid,
    /// The source kind.
    pub kind: TriggerKind,
    /// When the trigger was received.
    pub received_at: DateTime<Utc>,
}

impl Trigger {
    /// Creates a trigger that opens a new workflow instance.
    #[must_use]
    pub fn new(kind: TriggerKind, clock: &dyn Clock) -> Self {
        Self {
            trigger_id: Uuid::new_v4(),
            correlation_id: Uuid::new_v4(),
            kind,
            received_at: clock.now(),
        }
    }

    /// Continues an existing workflow instance instead of opening a new one.
    #[must_use]
    pub fn with_correlation_id(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = correlation_id;
        self
    }
}

/// Metadata attached to every event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventMetadata {
    /// Unique event identifier.
    pub event_id: Uuid,
    /// Routing name of the event.
    pub event_name: String,
    /// Workflow instance; propagated unchanged through a cascade.
    pub correlation_id: Uuid,
    /// The event or trigger that produced this event.
    pub causation_id: Uuid,
    /// Handler that emitted the event, if any.
    pub emitted_by: Option<String>,
    /// How the event was emitted.
    pub emission: EmissionKind,
    /// Cascade depth: 0 for emissions of a trigger-invoked handler.
    pub depth: u32,
    /// Emission timestamp, non-decreasing along a causal chain.
    pub emitted_at: DateTime<Utc>,
}

/// A named event with a structured payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Event metadata.
    pub metadata: EventMetadata,
    /// Event payload.
    pub payload: serde_json::Value,
}

impl Event {
    /// Builds an event that enters the system from outside any invocation,
    /// e.g. a manual publish. The trigger becomes its cause.
    #[must_use]
    pub fn external(
        name: impl Into<String>,
        payload: serde_json::Value,
        trigger: &Trigger,
        clock: &dyn Clock,
    ) -> Self {
        Self {
            metadata: EventMetadata {
                event_id: Uuid::new_v4(),
                event_name: name.into(),
                correlation_id: trigger.correlation_id,
                causation_id: trigger.trigger_id,
                emitted_by: None,
                emission: EmissionKind::External,
                depth: 0,
                emitted_at: clock.now().max(trigger.received_at),
            },
            payload,
        }
    }

    /// Returns the routing name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.metadata.event_name
    }

    /// Returns the event id.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.metadata.event_id
    }

    /// Returns the correlation id.
    #[must_use]
    pub fn correlation_id(&self) -> Uuid {
        self.metadata.correlation_id
    }

    /// Decodes the payload into a typed event payload.
    ///
    /// # Errors
    ///
    /// Returns the `serde_json` error if the payload does not match `P`.
    pub fn decode<P: DeserializeOwned>(&self) -> Result<P, serde_json::Error> {
        serde_json::from_value(self.payload.clone())
    }

    /// Returns a copy with a fresh event id, as an at-least-once transport
    /// would when it redelivers.
    #[must_use]
    pub fn redelivered(&self) -> Self {
        let mut copy = self.clone();
        copy.metadata.event_id = Uuid::new_v4();
        copy
    }
}

/// A typed payload bound to a single event name.
pub trait EventPayload: Serialize + DeserializeOwned + Send + Sync + fmt::Debug + 'static {
    /// The routing name of the event carrying this payload.
    const NAME: &'static str;

    /// Serializes the payload to JSON.
    fn to_value(&self) -> serde_json::Value {
        // Serialization of derived Serialize types to Value is infallible.
        serde_json::to_value(self).expect("event payload serialization is infallible")
    }
}
