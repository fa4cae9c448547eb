//! Handler registrations.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use cascade_core::event::{EventPayload, TriggerKind};
use cascade_core::handler::Handler;

/// One row of the registration table: a handler and its routing facts.
#[derive(Clone)]
pub struct HandlerRegistration {
    /// Unique handler identifier.
    pub id: String,
    /// What may invoke the handler.
    pub trigger_kind: TriggerKind,
    /// The event the handler subscribes to (event-kind handlers only).
    pub subscribes_to: Option<String>,
    /// Events the handler may auto-emit after a successful return.
    pub declares: Vec<String>,
    /// Events the handler may emit ad-hoc while running.
    pub emits: Vec<String>,
    /// Name of the handler's input type.
    pub input_type: &'static str,
    /// Execution budget; the dispatcher default applies when unset.
    pub timeout: Option<Duration>,
    /// The implementation.
    pub handler: Arc<dyn Handler>,
}

impl fmt::Debug for HandlerRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistration")
            .field("id", &self.id)
            .field("trigger_kind", &self.trigger_kind)
            .field("subscribes_to", &self.subscribes_to)
            .field("declares", &self.declares)
            .field("emits", &self.emits)
            .field("input_type", &self.input_type)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl HandlerRegistration {
    /// Creates a registration for any trigger kind.
    pub fn new(
        id: impl Into<String>,
        trigger_kind: TriggerKind,
        handler: impl Handler + 'static,
    ) -> Self {
        let input_type = handler.input_type();
        Self {
            id: id.into(),
            trigger_kind,
            subscribes_to: None,
            declares: Vec::new(),
            emits: Vec::new(),
            input_type,
            timeout: None,
            handler: Arc::new(handler),
        }
    }

    /// An api-kind handler.
    pub fn api(id: impl Into<String>, handler: impl Handler + 'static) -> Self {
        Self::new(id, TriggerKind::Api, handler)
    }

    /// A cron-kind handler.
    pub fn cron(id: impl Into<String>, handler: impl Handler + 'static) -> Self {
        Self::new(id, TriggerKind::Cron, handler)
    }

    /// An event-kind handler subscribed to `event_name`.
    pub fn event(
        id: impl Into<String>,
        event_name: impl Into<String>,
        handler: impl Handler + 'static,
    ) -> Self {
        let mut registration = Self::new(id, TriggerKind::Event, handler);
        registration.subscribes_to = Some(event_name.into());
        registration
    }

    /// An event-kind handler subscribed to the event carrying `P`.
    pub fn on<P: EventPayload>(id: impl Into<String>, handler: impl Handler + 'static) -> Self {
        Self::event(id, P::NAME, handler)
    }

    /// Adds declared (auto-emitted) event names.
    #[must_use]
    pub fn declares<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.declares.extend(names.into_iter().map(Into::into));
        self
    }

    /// Adds one typed declared event.
    #[must_use]
    pub fn declares_event<P: EventPayload>(self) -> Self {
        self.declares([P::NAME])
    }

    /// Adds ad-hoc event names the handler may emit.
    #[must_use]
    pub fn emits<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.emits.extend(names.into_iter().map(Into::into));
        self
    }

    /// Adds one typed ad-hoc event.
    #[must_use]
    pub fn emits_event<P: EventPayload>(self) -> Self {
        self.emits([P::NAME])
    }

    /// Overrides the execution budget.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Every event name this handler can produce, declared or ad-hoc.
    pub fn produced_events(&self) -> impl Iterator<Item = &str> {
        self.declares
            .iter()
            .chain(self.emits.iter())
            .map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use cascade_core::emission::EmissionContext;
    use cascade_core::error::HandlerError;

    struct Noop;

    #[async_trait]
    impl Handler for Noop {
        async fn handle(
            &self,
            _input: serde_json::Value,
            _ctx: &mut EmissionContext,
        ) -> Result<serde_json::Value, HandlerError> {
            Ok(serde_json::Value::Null)
        }
    }

    #[test]
    fn test_event_registration_records_subscription() {
        let registration = HandlerRegistration::event("ship", "PaymentCompleted", Noop)
            .declares(["OrderShipped"])
            .emits(["ShipmentDelayed"])
            .with_timeout(Duration::from_secs(2));

        assert_eq!(registration.trigger_kind, TriggerKind::Event);
        assert_eq!(registration.subscribes_to.as_deref(), Some("PaymentCompleted"));
        assert_eq!(
            registration.produced_events().collect::<Vec<_>>(),
            vec!["OrderShipped", "ShipmentDelayed"]
        );
        assert_eq!(registration.timeout, Some(Duration::from_secs(2)));
        assert_eq!(registration.input_type, "serde_json::Value");
    }

    #[test]
    fn test_api_registration_has_no_subscription() {
        let registration = HandlerRegistration::api("create_order", Noop);

        assert_eq!(registration.trigger_kind, TriggerKind::Api);
        assert!(registration.subscribes_to.is_none());
        assert!(format!("{registration:?}").contains("create_order"));
    }
}
