//! Application layer for the order context.

pub mod connections;
pub mod handlers;
pub mod lifecycle;
pub mod notifier;
pub mod payment;
pub mod registry;
pub mod services;
pub mod shipping;
pub mod stock;
pub mod store;
