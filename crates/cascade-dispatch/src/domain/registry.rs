//! Handler registry and startup validation.
//!
//! The registry is built once, validated for routing completeness, and is
//! read-only afterwards. A registry that fails validation never reaches the
//! dispatcher.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use cascade_core::error::{RoutingError, RoutingProblem};
use cascade_core::event::{EventPayload, TriggerKind};
use tracing::{debug, info};

use super::registration::HandlerRegistration;

type Validator = fn(&serde_json::Value) -> Result<(), String>;

/// Payload schema registered for an event name.
#[derive(Debug, Clone, Copy)]
pub struct PayloadSchema {
    /// Rust type name of the payload, or `"open"` for open maps.
    pub type_name: &'static str,
    validate: Validator,
}

impl PayloadSchema {
    /// Validates a payload against the schema.
    ///
    /// # Errors
    ///
    /// Returns a description of the mismatch.
    pub fn validate(&self, payload: &serde_json::Value) -> Result<(), String> {
        (self.validate)(payload)
    }
}

fn validate_typed<P: EventPayload>(payload: &serde_json::Value) -> Result<(), String> {
    serde_json::from_value::<P>(payload.clone())
        .map(|_| ())
        .map_err(|e| e.to_string())
}

fn validate_open(payload: &serde_json::Value) -> Result<(), String> {
    if payload.is_object() {
        Ok(())
    } else {
        Err("open event payloads must be JSON objects".to_owned())
    }
}

/// Collects registrations and payload schemas, then validates them.
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    registrations: Vec<HandlerRegistration>,
    schemas: HashMap<String, PayloadSchema>,
    allow_unsubscribed: HashSet<String>,
}

impl RegistryBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a handler registration.
    #[must_use]
    pub fn register(mut self, registration: HandlerRegistration) -> Self {
        self.registrations.push(registration);
        self
    }

    /// Registers the payload type of a declared event.
    #[must_use]
    pub fn event_type<P: EventPayload>(mut self) -> Self {
        self.schemas.insert(
            P::NAME.to_owned(),
            PayloadSchema {
                type_name: std::any::type_name::<P>(),
                validate: validate_typed::<P>,
            },
        );
        self
    }

    /// Registers an event whose payload is an open JSON map.
    #[must_use]
    pub fn open_event(mut self, name: impl Into<String>) -> Self {
        self.schemas.insert(
            name.into(),
            PayloadSchema {
                type_name: "open",
                validate: validate_open,
            },
        );
        self
    }

    /// Accepts an emitted event that intentionally has no subscriber, such
    /// as a terminal event only the saga tracker observes.
    #[must_use]
    pub fn allow_unsubscribed(mut self, name: impl Into<String>) -> Self {
        self.allow_unsubscribed.insert(name.into());
        self
    }

    /// Validates the table and freezes it.
    ///
    /// # Errors
    ///
    /// Returns `RoutingError::Misconfigured` listing every problem found.
    pub fn build(self) -> Result<HandlerRegistry, RoutingError> {
        let mut problems = Vec::new();
        let mut handlers: HashMap<String, Arc<HandlerRegistration>> = HashMap::new();
        let mut order = Vec::new();

        for registration in self.registrations {
            match (registration.trigger_kind, &registration.subscribes_to) {
                (TriggerKind::Event, None) => {
                    problems.push(RoutingProblem::MissingSubscription(registration.id.clone()));
                }
                (kind, Some(event_name)) if kind != TriggerKind::Event => {
                    problems.push(RoutingProblem::UnexpectedSubscription {
                        handler_id: registration.id.clone(),
                        kind,
                        event_name: event_name.clone(),
                    });
                }
                _ => {}
            }
            for declared in &registration.declares {
                if !self.schemas.contains_key(declared) {
                    problems.push(RoutingProblem::UndeclaredPayloadType {
                        handler_id: registration.id.clone(),
                        event_name: declared.clone(),
                    });
                }
            }
            if handlers.contains_key(&registration.id) {
                problems.push(RoutingProblem::DuplicateHandler(registration.id.clone()));
                continue;
            }
            order.push(registration.id.clone());
            handlers.insert(registration.id.clone(), Arc::new(registration));
        }

        let mut emitters: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
        let mut subscribed: HashSet<&str> = HashSet::new();
        for id in &order {
            let registration = &handlers[id];
            for name in registration.produced_events() {
                emitters.entry(name).or_default().insert(registration.id.as_str());
            }
            if let Some(event_name) = &registration.subscribes_to {
                subscribed.insert(event_name.as_str());
            }
        }

        for id in &order {
            let registration = &handlers[id];
            if let Some(event_name) = &registration.subscribes_to {
                if !emitters.contains_key(event_name.as_str()) {
                    problems.push(RoutingProblem::UnreachableSubscription {
                        handler_id: registration.id.clone(),
                        event_name: event_name.clone(),
                    });
                }
            }
        }

        for (event_name, sources) in &emitters {
            if !subscribed.contains(event_name) && !self.allow_unsubscribed.contains(*event_name) {
                problems.push(RoutingProblem::UnsubscribedEvent {
                    event_name: (*event_name).to_owned(),
                    emitters: sources.iter().map(|s| (*s).to_owned()).collect(),
                });
            }
        }

        if !problems.is_empty() {
            return Err(RoutingError::Misconfigured(problems));
        }

        for id in &order {
            let registration = &handlers[id];
            debug!(
                handler_id = %registration.id,
                trigger_kind = %registration.trigger_kind,
                subscribes_to = ?registration.subscribes_to,
                input_type = registration.input_type,
                "registered handler"
            );
        }
        info!(handlers = order.len(), events = emitters.len(), "handler registry validated");

        Ok(HandlerRegistry {
            handlers,
            order,
            schemas: self.schemas,
        })
    }
}

/// Validated, immutable registration table.
#[derive(Debug)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<HandlerRegistration>>,
    order: Vec<String>,
    schemas: HashMap<String, PayloadSchema>,
}

impl HandlerRegistry {
    /// Starts a new registration table.
    #[must_use]
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    /// Looks up a handler by id.
    #[must_use]
    pub fn get(&self, handler_id: &str) -> Option<&Arc<HandlerRegistration>> {
        self.handlers.get(handler_id)
    }

    /// Iterates registrations in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<HandlerRegistration>> {
        self.order.iter().filter_map(|id| self.handlers.get(id))
    }

    /// Number of registered handlers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Returns `true` when no handler is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Returns the payload schema registered for an event name.
    #[must_use]
    pub fn schema(&self, event_name: &str) -> Option<&PayloadSchema> {
        self.schemas.get(event_name)
    }

    /// Validates a declared payload. Names without a schema pass.
    ///
    /// # Errors
    ///
    /// Returns a description of the mismatch.
    pub fn validate_payload(
        &self,
        event_name: &str,
        payload: &serde_json::Value,
    ) -> Result<(), String> {
        match self.schemas.get(event_name) {
            Some(schema) => schema.validate(payload),
            None => Ok(()),
        }
    }
}
