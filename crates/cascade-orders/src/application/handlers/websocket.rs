//! Websocket lifecycle and message handlers.
//!
//! The transport is not part of this crate; whatever accepts the socket
//! invokes these handlers with websocket trigger kinds.

use async_trait::async_trait;
use cascade_core::emission::EmissionContext;
use cascade_core::error::HandlerError;
use cascade_core::handler::TypedHandler;
use serde_json::Value;

use crate::application::services::OrderServices;
use crate::domain::commands::{ClientMessage, ClientRequest, ConnectionChanged, ServerReply};

pub struct OnConnect(pub OrderServices);

#[async_trait]
impl TypedHandler for OnConnect {
    type Input = ConnectionChanged;
    type Output = ();

    async fn handle(
        &self,
        event: ConnectionChanged,
        ctx: &mut EmissionContext,
    ) -> Result<(), HandlerError> {
        self.0.connections.connect(&event.connection_id);
        ctx.logger()
            .info("client connected", &[("connection_id", &event.connection_id)]);
        Ok(())
    }
}

pub struct OnDisconnect(pub OrderServices);

#[async_trait]
impl TypedHandler for OnDisconnect {
    type Input = ConnectionChanged;
    type Output = ();

    async fn handle(
        &self,
        event: ConnectionChanged,
        ctx: &mut EmissionContext,
    ) -> Result<(), HandlerError> {
        if self.0.connections.disconnect(&event.connection_id) {
            ctx.logger()
                .info("client disconnected", &[("connection_id", &event.connection_id)]);
        }
        Ok(())
    }
}

/// Handles subscribe and unsubscribe requests. Malformed messages get an
/// error reply rather than failing the invocation.
pub struct OnMessage(pub OrderServices);

#[async_trait]
impl TypedHandler for OnMessage {
    type Input = Value;
    type Output = ServerReply;

    async fn handle(
        &self,
        raw: Value,
        ctx: &mut EmissionContext,
    ) -> Result<ServerReply, HandlerError> {
        let message: ClientMessage = match serde_json::from_value(raw) {
            Ok(message) => message,
            Err(e) => {
                ctx.logger().debug("unreadable client message", &[("error", &e)]);
                return Ok(ServerReply::Error {
                    message: format!("unreadable message: {e}"),
                });
            }
        };

        let services = &self.0;
        let reply = match message.request {
            ClientRequest::Subscribe { order_id } => {
                if services.orders.get(order_id).is_none() {
                    ServerReply::Error {
                        message: format!("order {order_id} not found"),
                    }
                } else if services.connections.subscribe(&message.connection_id, order_id) {
                    ServerReply::Subscribed { order_id }
                } else {
                    not_connected(&message.connection_id)
                }
            }
            ClientRequest::Unsubscribe { order_id } => {
                if services.connections.unsubscribe(&message.connection_id, order_id) {
                    ServerReply::Unsubscribed { order_id }
                } else {
                    not_connected(&message.connection_id)
                }
            }
        };
        Ok(reply)
    }
}

fn not_connected(connection_id: &str) -> ServerReply {
    ServerReply::Error {
        message: format!("connection {connection_id} is not registered"),
    }
}
