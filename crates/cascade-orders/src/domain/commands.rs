//! Inputs of the api and websocket handlers in the order context.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::aggregates::OrderStatus;
use super::events::LineItem;

/// Place a new order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateOrder {
    /// The customer placing the order.
    pub customer_id: u64,
    /// Requested products. Must not be empty.
    pub items: Vec<LineItem>,
}

/// Cancel an order that has not shipped yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelOrder {
    /// The order to cancel.
    pub order_id: Uuid,
    /// Free-text reason, defaulted when absent.
    #[serde(default)]
    pub reason: Option<String>,
}

/// Look up one order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetOrderStatus {
    /// The order to look up.
    pub order_id: Uuid,
}

/// List orders, newest last.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListOrders {
    /// Only orders in this status.
    #[serde(default)]
    pub status: Option<OrderStatus>,
}

/// A websocket client connected or disconnected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionChanged {
    /// Transport-assigned connection identifier.
    pub connection_id: String,
}

/// A message from a websocket client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientMessage {
    /// Transport-assigned connection identifier.
    pub connection_id: String,
    /// The request itself.
    #[serde(flatten)]
    pub request: ClientRequest,
}

/// Requests a websocket client can make.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientRequest {
    /// Receive status notifications for an order.
    Subscribe { order_id: Uuid },
    /// Stop receiving status notifications for an order.
    Unsubscribe { order_id: Uuid },
}

/// Reply sent back on the websocket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerReply {
    Subscribed { order_id: Uuid },
    Unsubscribed { order_id: Uuid },
    Error { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_client_message_decodes_tagged_request() {
        let order_id = Uuid::new_v4();

        let message: ClientMessage = serde_json::from_value(json!({
            "connection_id": "conn-1",
            "type": "subscribe",
            "order_id": order_id,
        }))
        .unwrap();

        assert_eq!(message.request, ClientRequest::Subscribe { order_id });
    }

    #[test]
    fn test_cancel_reason_is_optional() {
        let command: CancelOrder =
            serde_json::from_value(json!({ "order_id": Uuid::nil() })).unwrap();

        assert_eq!(command.reason, None);
    }
}
