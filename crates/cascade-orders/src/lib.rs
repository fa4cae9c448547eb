//! Cascade Orders — the e-commerce order saga.
//!
//! An order moves through payment, inventory reservation, shipment and
//! delivery as a cascade of events, with compensations on cancellation,
//! payment failure and expiry. Every step is a handler registered in
//! [`application::registry::order_registry`].

pub mod application;
pub mod domain;
