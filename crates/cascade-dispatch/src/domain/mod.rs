//! Static routing model and workflow state.

pub mod invocation;
pub mod registration;
pub mod registry;
pub mod router;
pub mod workflow;
