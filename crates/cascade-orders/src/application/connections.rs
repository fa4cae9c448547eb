//! Websocket connections and their order subscriptions.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use uuid::Uuid;

#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: Mutex<BTreeMap<String, BTreeSet<Uuid>>>,
}

impl ConnectionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn connections(&self) -> MutexGuard<'_, BTreeMap<String, BTreeSet<Uuid>>> {
        self.connections.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn connect(&self, connection_id: &str) {
        self.connections().entry(connection_id.to_owned()).or_default();
    }

    /// Drops the connection and its subscriptions. Returns `false` if it
    /// was not connected.
    pub fn disconnect(&self, connection_id: &str) -> bool {
        self.connections().remove(connection_id).is_some()
    }

    /// Returns `false` if the connection is unknown.
    pub fn subscribe(&self, connection_id: &str, order_id: Uuid) -> bool {
        match self.connections().get_mut(connection_id) {
            Some(orders) => {
                orders.insert(order_id);
                true
            }
            None => false,
        }
    }

    /// Returns `false` if the connection is unknown.
    pub fn unsubscribe(&self, connection_id: &str, order_id: Uuid) -> bool {
        match self.connections().get_mut(connection_id) {
            Some(orders) => {
                orders.remove(&order_id);
                true
            }
            None => false,
        }
    }

    /// Connections subscribed to `order_id`, sorted.
    #[must_use]
    pub fn subscribers_of(&self, order_id: Uuid) -> Vec<String> {
        self.connections()
            .iter()
            .filter(|(_, orders)| orders.contains(&order_id))
            .map(|(id, _)| id.clone())
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.connections().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.connections().is_empty()
    }
}
