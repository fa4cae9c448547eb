//! Cascade Core — shared event, handler and emission abstractions.
//!
//! This crate defines the types every other Cascade crate depends on: the
//! event envelope, the handler contract, the per-invocation emission
//! context, and the error taxonomy. It contains no dispatch logic.

pub mod clock;
pub mod emission;
pub mod error;
pub mod event;
pub mod handler;
pub mod journal;
pub mod logger;
pub mod rng;
