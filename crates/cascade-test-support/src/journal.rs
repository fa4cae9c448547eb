//! Test journals: `EventJournal` implementations for tests.

use std::sync::Mutex;

use async_trait::async_trait;
use cascade_core::event::Event;
use cascade_core::journal::{EventJournal, JournalError};
use uuid::Uuid;

/// A journal that records every appended event.
#[derive(Debug, Default)]
pub struct RecordingJournal {
    appended: Mutex<Vec<Event>>,
}

impl RecordingJournal {
    /// Create an empty recording journal.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of all appended events, in append order.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn appended_events(&self) -> Vec<Event> {
        self.appended.lock().unwrap().clone()
    }

    /// Returns the names of all appended events, in append order.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn appended_names(&self) -> Vec<String> {
        self.appended
            .lock()
            .unwrap()
            .iter()
            .map(|e| e.name().to_owned())
            .collect()
    }
}

#[async_trait]
impl EventJournal for RecordingJournal {
    async fn append(&self, event: &Event) -> Result<(), JournalError> {
        self.appended.lock().unwrap().push(event.clone());
        Ok(())
    }

    async fn load_correlation(&self, correlation_id: Uuid) -> Result<Vec<Event>, JournalError> {
        Ok(self
            .appended
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.correlation_id() == correlation_id)
            .cloned()
            .collect())
    }
}

/// A journal that always fails. Useful for checking that journal outages
/// never stop dispatch.
#[derive(Debug)]
pub struct FailingJournal;

#[async_trait]
impl EventJournal for FailingJournal {
    async fn append(&self, _event: &Event) -> Result<(), JournalError> {
        Err(JournalError::Unavailable("connection refused".into()))
    }

    async fn load_correlation(&self, _correlation_id: Uuid) -> Result<Vec<Event>, JournalError> {
        Err(JournalError::Unavailable("connection refused".into()))
    }
}
