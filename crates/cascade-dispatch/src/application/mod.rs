//! Runtime services built on the routing model.

pub mod dispatcher;
pub mod journal;
pub mod locks;
pub mod saga_tracker;
pub mod scheduler;
