//! Cascade Dispatch — event routing and cascading dispatch.
//!
//! A handler runs, may emit events, and every emitted event is delivered to
//! each handler subscribed to it, which may emit further events. This crate
//! owns that loop: the validated handler registry, the static router, the
//! dispatcher that runs invocations concurrently with failure isolation and a
//! depth guard, and the saga tracker that follows each workflow instance.

pub mod application;
pub mod config;
pub mod domain;

pub use application::dispatcher::{Cascade, CascadeReport, Dispatcher, DispatcherBuilder};
pub use application::journal::InMemoryEventJournal;
pub use application::locks::KeyedLocks;
pub use application::saga_tracker::SagaTracker;
pub use application::scheduler::IntervalScheduler;
pub use config::{ConfigError, DispatchConfig, SagaConfig};
pub use domain::invocation::{InvocationRecord, InvocationState};
pub use domain::registration::HandlerRegistration;
pub use domain::registry::{HandlerRegistry, RegistryBuilder};
pub use domain::router::Router;
pub use domain::workflow::{
    CloseReason, EventSummary, LastEventReducer, StateReducer, WorkflowInstance,
};
