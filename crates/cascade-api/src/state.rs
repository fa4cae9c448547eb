//! Shared application state.

use std::sync::Arc;

use cascade_core::clock::Clock;
use cascade_core::error::RoutingError;
use cascade_core::rng::DeterministicRng;
use cascade_dispatch::{
    DispatchConfig, Dispatcher, InMemoryEventJournal, SagaConfig, SagaTracker,
};
use cascade_orders::application::lifecycle::OrderLifecycle;
use cascade_orders::application::registry::order_registry;
use cascade_orders::application::services::{OrderServices, OrderSettings};

/// Application state shared across all request handlers.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Dispatcher over the validated order handler table.
    pub dispatcher: Dispatcher,
    /// Stores and gateways the order handlers work against.
    pub services: OrderServices,
    /// Workflow instances, one per order saga.
    pub tracker: Arc<SagaTracker>,
}

impl AppState {
    /// Create new application state.
    #[must_use]
    pub fn new(dispatcher: Dispatcher, services: OrderServices, tracker: Arc<SagaTracker>) -> Self {
        Self {
            dispatcher,
            services,
            tracker,
        }
    }

    /// Wires the order saga: services, handler table, tracker and
    /// dispatcher, all on the same clock.
    ///
    /// # Errors
    ///
    /// Returns `RoutingError::Misconfigured` if the handler table does not
    /// validate.
    pub fn assemble(
        clock: Arc<dyn Clock>,
        rng: Box<dyn DeterministicRng>,
        settings: OrderSettings,
        dispatch: DispatchConfig,
        saga: SagaConfig,
    ) -> Result<Self, RoutingError> {
        let services = OrderServices::simulated(Arc::clone(&clock), settings, rng);
        let registry = order_registry(&services)?;
        let tracker = Arc::new(SagaTracker::new(
            saga,
            Arc::clone(&clock),
            Arc::new(OrderLifecycle),
        ));
        let dispatcher = Dispatcher::builder(registry)
            .config(dispatch)
            .clock(clock)
            .journal(Arc::new(InMemoryEventJournal::default()))
            .tracker(Arc::clone(&tracker))
            .build();
        Ok(Self::new(dispatcher, services, tracker))
    }
}
