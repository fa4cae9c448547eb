//! Route modules.

pub mod events;
pub mod health;
pub mod orders;
pub mod workflows;

use cascade_core::event::Trigger;
use serde_json::Value;

use crate::error::ApiError;
use crate::state::AppState;

/// Invokes an api handler and waits for its own result only. The cascade it
/// starts keeps running after the response is sent.
pub(crate) async fn invoke(
    state: &AppState,
    trigger: &Trigger,
    handler_id: &str,
    input: Value,
) -> Result<Value, ApiError> {
    let mut cascade = state.dispatcher.start(trigger, handler_id, input)?;
    Ok(cascade.root_result().await?)
}
