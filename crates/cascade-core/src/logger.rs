//! Structured logger handed to running handlers.
//!
//! Handler fields have names only known at runtime, which `tracing` cannot
//! record as individual fields. They are collected into one JSON object and
//! recorded under a single `fields` key, e.g.
//! `fields={"order_id":"42","status":"paid"}`. Values are rendered with
//! `Display`, so every value is a JSON string.

use std::fmt;

use serde_json::{Map, Value};
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

/// Key/value pairs attached to a log line.
pub type Fields<'a> = &'a [(&'a str, &'a dyn fmt::Display)];

/// Leveled logger bound to a single invocation. Side-effect only.
#[derive(Debug, Clone)]
pub struct HandlerLogger {
    handler_id: String,
    invocation_id: Uuid,
    correlation_id: Uuid,
}

impl HandlerLogger {
    /// Creates a logger for one invocation.
    #[must_use]
    pub fn new(handler_id: String, invocation_id: Uuid, correlation_id: Uuid) -> Self {
        Self {
            handler_id,
            invocation_id,
            correlation_id,
        }
    }

    /// Logs at info level.
    pub fn info(&self, message: &str, fields: Fields<'_>) {
        info!(
            handler_id = %self.handler_id,
            invocation_id = %self.invocation_id,
            correlation_id = %self.correlation_id,
            fields = %render(fields),
            "{message}"
        );
    }

    /// Logs at warn level.
    pub fn warning(&self, message: &str, fields: Fields<'_>) {
        warn!(
            handler_id = %self.handler_id,
            invocation_id = %self.invocation_id,
            correlation_id = %self.correlation_id,
            fields = %render(fields),
            "{message}"
        );
    }

    /// Logs at error level.
    pub fn error(&self, message: &str, fields: Fields<'_>) {
        error!(
            handler_id = %self.handler_id,
            invocation_id = %self.invocation_id,
            correlation_id = %self.correlation_id,
            fields = %render(fields),
            "{message}"
        );
    }

    /// Logs at debug level.
    pub fn debug(&self, message: &str, fields: Fields<'_>) {
        debug!(
            handler_id = %self.handler_id,
            invocation_id = %self.invocation_id,
            correlation_id = %self.correlation_id,
            fields = %render(fields),
            "{message}"
        );
    }

    /// Logs at trace level.
    pub fn trace(&self, message: &str, fields: Fields<'_>) {
        trace!(
            handler_id = %self.handler_id,
            invocation_id = %self.invocation_id,
            correlation_id = %self.correlation_id,
            fields = %render(fields),
            "{message}"
        );
    }
}

/// Renders fields as a JSON object of strings. A repeated key keeps its
/// last value.
fn render(fields: Fields<'_>) -> String {
    let object: Map<String, Value> = fields
        .iter()
        .map(|(key, value)| ((*key).to_owned(), Value::String(value.to_string())))
        .collect();
    Value::Object(object).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_fields() {
        let order_id = 42;
        let status = "paid";

        let rendered = render(&[("order_id", &order_id), ("status", &status)]);

        let parsed: Value = serde_json::from_str(&rendered).unwrap();
        assert_eq!(parsed, serde_json::json!({ "order_id": "42", "status": "paid" }));
    }

    #[test]
    fn test_render_escapes_values() {
        let note = "said \"hi\" and left";

        let rendered = render(&[("note", &note)]);

        let parsed: Value = serde_json::from_str(&rendered).unwrap();
        assert_eq!(parsed["note"], "said \"hi\" and left");
    }

    #[test]
    fn test_render_empty_fields() {
        assert_eq!(render(&[]), "{}");
    }

    #[test]
    fn test_logging_without_subscriber_is_a_no_op() {
        let logger = HandlerLogger::new("h".into(), Uuid::new_v4(), Uuid::new_v4());
        logger.info("hello", &[]);
        logger.warning("careful", &[("k", &1)]);
        logger.error("bad", &[]);
        logger.debug("dbg", &[]);
        logger.trace("trc", &[]);
    }
}
