//! Handler contract.
//!
//! Every handler, whatever triggers it, has the same shape: it receives an
//! input and an [`EmissionContext`] and returns an output or a
//! [`HandlerError`].

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::emission::EmissionContext;
use crate::error::HandlerError;

/// Object-safe handler over JSON input and output.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Runs the handler to completion or failure.
    async fn handle(
        &self,
        input: serde_json::Value,
        ctx: &mut EmissionContext,
    ) -> Result<serde_json::Value, HandlerError>;

    /// Name of the input type, for diagnostics.
    fn input_type(&self) -> &'static str {
        "serde_json::Value"
    }
}

/// A handler with a statically typed input and output.
#[async_trait]
pub trait TypedHandler: Send + Sync + 'static {
    /// Input type, decoded from the trigger or event payload.
    type Input: DeserializeOwned + Send + 'static;
    /// Output type, returned to the caller of api-kind handlers.
    type Output: Serialize + Send + 'static;

    /// Runs the handler.
    async fn handle(
        &self,
        input: Self::Input,
        ctx: &mut EmissionContext,
    ) -> Result<Self::Output, HandlerError>;
}

/// Adapts a [`TypedHandler`] to the object-safe [`Handler`] trait. Input that
/// does not decode is an `InvalidInput` failure.
pub struct Typed<H>(pub H);

impl<H> Typed<H> {
    /// Wraps a typed handler.
    #[must_use]
    pub fn new(handler: H) -> Self {
        Self(handler)
    }
}

#[async_trait]
impl<H: TypedHandler> Handler for Typed<H> {
    async fn handle(
        &self,
        input: serde_json::Value,
        ctx: &mut EmissionContext,
    ) -> Result<serde_json::Value, HandlerError> {
        let input: H::Input = serde_json::from_value(input)
            .map_err(|e| HandlerError::InvalidInput(e.to_string()))?;
        let output = self.0.handle(input, ctx).await?;
        serde_json::to_value(output).map_err(|e| HandlerError::Failed(e.to_string()))
    }

    fn input_type(&self) -> &'static str {
        std::any::type_name::<H::Input>()
    }
}
