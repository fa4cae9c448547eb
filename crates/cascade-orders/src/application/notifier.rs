//! Customer and operations notifications.
//!
//! Delivery channels are out of scope; notifications land in an outbox that
//! the API and tests can read back.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    StatusChanged,
    PaymentFailed,
    Refund,
    LowStock,
    OutOfStock,
}

/// A notification handed to the outbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub kind: NotificationKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_id: Option<Uuid>,
    pub message: String,
    /// Websocket connections subscribed to the order when it was sent.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub connections: Vec<String>,
    pub sent_at: DateTime<Utc>,
}

const DEFAULT_CAPACITY: usize = 1_000;

/// Bounded notification outbox. Once full, the oldest notification is
/// dropped for each new one.
#[derive(Debug)]
pub struct Outbox {
    sent: Mutex<VecDeque<Notification>>,
    capacity: usize,
}

impl Default for Outbox {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl Outbox {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// An outbox keeping at most `capacity` notifications.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            sent: Mutex::new(VecDeque::with_capacity(capacity.min(DEFAULT_CAPACITY))),
            capacity,
        }
    }

    pub fn send(&self, notification: Notification) {
        info!(
            kind = ?notification.kind,
            order_id = ?notification.order_id,
            recipients = notification.connections.len(),
            "{}",
            notification.message
        );
        let mut sent = self.sent.lock().unwrap_or_else(PoisonError::into_inner);
        if sent.len() == self.capacity {
            sent.pop_front();
        }
        sent.push_back(notification);
    }

    /// Retained notifications, oldest first.
    #[must_use]
    pub fn sent(&self) -> Vec<Notification> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    /// Notifications of `kind` about `order_id`.
    #[must_use]
    pub fn sent_for(&self, order_id: Uuid, kind: NotificationKind) -> Vec<Notification> {
        self.sent()
            .into_iter()
            .filter(|n| n.order_id == Some(order_id) && n.kind == kind)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn notification(kind: NotificationKind, order_id: Uuid, message: &str) -> Notification {
        Notification {
            kind,
            order_id: Some(order_id),
            message: message.into(),
            connections: Vec::new(),
            sent_at: Utc::now(),
        }
    }

    #[test]
    fn test_sent_for_filters_by_order_and_kind() {
        // Arrange
        let outbox = Outbox::new();
        let order_id = Uuid::new_v4();
        for kind in [NotificationKind::Refund, NotificationKind::StatusChanged] {
            outbox.send(notification(kind, order_id, "hello"));
        }

        // Act
        let refunds = outbox.sent_for(order_id, NotificationKind::Refund);

        // Assert
        assert_eq!(refunds.len(), 1);
        assert_eq!(outbox.sent().len(), 2);
    }

    #[test]
    fn test_outbox_drops_oldest_beyond_capacity() {
        // Arrange
        let outbox = Outbox::with_capacity(3);
        let order_id = Uuid::new_v4();

        // Act
        for i in 0..5 {
            let message = format!("update {i}");
            outbox.send(notification(NotificationKind::StatusChanged, order_id, &message));
        }

        // Assert
        let messages: Vec<String> = outbox.sent().into_iter().map(|n| n.message).collect();
        assert_eq!(messages, vec!["update 2", "update 3", "update 4"]);
    }
}
