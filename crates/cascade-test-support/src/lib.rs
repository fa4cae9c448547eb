//! Shared test doubles for the Cascade dispatch engine.

mod clock;
mod handler;
mod journal;
mod rng;

pub use clock::{FixedClock, ManualClock};
pub use handler::{Call, CallLog, ScriptedHandler};
pub use journal::{FailingJournal, RecordingJournal};
pub use rng::{MockRng, SequenceRng};
