//! Event journal abstraction.

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::event::Event;

/// Journal failure. Never aborts dispatch; the dispatcher only logs it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum JournalError {
    /// The backing store is unavailable.
    #[error("journal unavailable: {0}")]
    Unavailable(String),
}

/// Append-only record of every event the dispatcher routed.
#[async_trait]
pub trait EventJournal: Send + Sync {
    /// Appends one event.
    async fn append(&self, event: &Event) -> Result<(), JournalError>;

    /// Loads every event of a workflow instance, in append order.
    async fn load_correlation(&self, correlation_id: Uuid) -> Result<Vec<Event>, JournalError>;
}
