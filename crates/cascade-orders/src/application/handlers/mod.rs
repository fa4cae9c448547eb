//! Order handlers, grouped by the part of the saga they drive.
//!
//! Every handler that reads and then writes an order holds the order's lock
//! from the read to the write, and checks the order's status before acting.
//! A handler that finds the order already past its step does nothing, which
//! is what makes redelivered events and late siblings harmless.

use cascade_core::emission::EmissionContext;
use uuid::Uuid;

use crate::domain::aggregates::Transition;

pub mod fulfillment;
pub mod inventory;
pub mod orders;
pub mod payment;
pub mod websocket;

pub const CREATE_ORDER: &str = "create_order";
pub const CANCEL_ORDER: &str = "cancel_order";
pub const GET_ORDER_STATUS: &str = "get_order_status";
pub const LIST_ORDERS: &str = "list_orders";
pub const EXPIRE_PENDING_ORDERS: &str = "expire_pending_orders";
pub const SYNC_INVENTORY: &str = "sync_inventory";
pub const ON_CONNECT: &str = "on_connect";
pub const ON_DISCONNECT: &str = "on_disconnect";
pub const ON_MESSAGE: &str = "on_message";

/// Logs why a handler left an order alone.
pub(crate) fn log_skipped(
    ctx: &EmissionContext,
    order_id: Uuid,
    step: &str,
    transition: Transition,
) {
    match transition {
        Transition::Applied { .. } => {}
        Transition::Unchanged => ctx.logger().debug(
            "duplicate delivery ignored",
            &[("order_id", &order_id), ("step", &step)],
        ),
        Transition::Rejected { from } => ctx.logger().warning(
            "order is past this step",
            &[("order_id", &order_id), ("step", &step), ("status", &from)],
        ),
    }
}
