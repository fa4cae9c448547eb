//! Static event router.

use std::collections::HashMap;

use super::registry::HandlerRegistry;

/// Maps an event name to the handlers subscribed to it.
///
/// Built once from a validated registry and never mutated. Subscribers are
/// listed in registration order.
#[derive(Debug, Clone, Default)]
pub struct Router {
    routes: HashMap<String, Vec<String>>,
}

impl Router {
    /// Builds the routing table from a validated registry.
    #[must_use]
    pub fn from_registry(registry: &HandlerRegistry) -> Self {
        let mut routes: HashMap<String, Vec<String>> = HashMap::new();
        for registration in registry.iter() {
            if let Some(event_name) = &registration.subscribes_to {
                routes
                    .entry(event_name.clone())
                    .or_default()
                    .push(registration.id.clone());
            }
        }
        Self { routes }
    }

    /// Returns the handlers subscribed to `event_name`; empty when none.
    #[must_use]
    pub fn subscribers_for(&self, event_name: &str) -> &[String] {
        self.routes.get(event_name).map_or(&[], Vec::as_slice)
    }

    /// Iterates every routed event name.
    pub fn event_names(&self) -> impl Iterator<Item = &str> {
        self.routes.keys().map(String::as_str)
    }
}
