//! In-memory implementation of the `EventJournal` trait.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use uuid::Uuid;

use cascade_core::event::Event;
use cascade_core::journal::{EventJournal, JournalError};

/// Bounded in-memory journal. When full, the oldest event is dropped.
#[derive(Debug)]
pub struct InMemoryEventJournal {
    capacity: usize,
    events: Mutex<VecDeque<Event>>,
}

impl Default for InMemoryEventJournal {
    fn default() -> Self {
        Self::with_capacity(10_000)
    }
}

impl InMemoryEventJournal {
    /// Creates a journal holding at most `capacity` events.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            events: Mutex::new(VecDeque::new()),
        }
    }

    /// Number of retained events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Returns `true` if nothing has been journaled.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the retained events named `event_name`, oldest first.
    #[must_use]
    pub fn events_named(&self, event_name: &str) -> Vec<Event> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|e| e.name() == event_name)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl EventJournal for InMemoryEventJournal {
    async fn append(&self, event: &Event) -> Result<(), JournalError> {
        let mut events = self.events.lock().unwrap_or_else(PoisonError::into_inner);
        if events.len() == self.capacity {
            events.pop_front();
        }
        events.push_back(event.clone());
        Ok(())
    }

    async fn load_correlation(&self, correlation_id: Uuid) -> Result<Vec<Event>, JournalError> {
        Ok(self
            .events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|e| e.correlation_id() == correlation_id)
            .cloned()
            .collect())
    }
}
