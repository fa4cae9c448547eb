//! Domain layer for the order context.

pub mod aggregates;
pub mod commands;
pub mod events;
