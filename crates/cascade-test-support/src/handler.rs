//! Scripted handler: a `Handler` whose behavior is a list of steps.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use cascade_core::emission::EmissionContext;
use cascade_core::error::HandlerError;
use cascade_core::handler::Handler;
use serde_json::Value;
use tokio::sync::Barrier;
use uuid::Uuid;

#[derive(Debug, Clone)]
enum Step {
    Emit(String, Value),
    Declare(String, Value),
    Sleep(Duration),
    Wait(Arc<Barrier>),
    Fail(HandlerError),
    Panic,
}

/// One recorded invocation.
#[derive(Debug, Clone)]
pub struct Call {
    /// The input the handler received.
    pub input: Value,
    /// Invocation id.
    pub invocation_id: Uuid,
    /// Cause of the invocation.
    pub causation_id: Uuid,
    /// Workflow instance.
    pub correlation_id: Uuid,
    /// Invocation depth.
    pub depth: u32,
}

/// Shared view of the invocations a [`ScriptedHandler`] received.
#[derive(Debug, Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<Call>>>);

impl CallLog {
    /// Returns a snapshot of all recorded calls.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn calls(&self) -> Vec<Call> {
        self.0.lock().unwrap().clone()
    }

    /// Number of invocations so far.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn count(&self) -> usize {
        self.0.lock().unwrap().len()
    }
}

/// A handler that runs its steps in order, then returns `output`.
///
/// Every invocation is recorded before the first step runs, so failing and
/// panicking invocations are counted too.
#[derive(Debug, Clone, Default)]
pub struct ScriptedHandler {
    steps: Vec<Step>,
    output: Value,
    log: CallLog,
}

impl ScriptedHandler {
    /// Create a handler that records its calls and returns `null`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the call log shared with every clone of this handler.
    #[must_use]
    pub fn log(&self) -> CallLog {
        self.log.clone()
    }

    /// Emit an ad-hoc event.
    #[must_use]
    pub fn emit(mut self, name: &str, payload: Value) -> Self {
        self.steps.push(Step::Emit(name.to_owned(), payload));
        self
    }

    /// Emit an ad-hoc event carrying the invocation input.
    #[must_use]
    pub fn forward(self, name: &str) -> Self {
        self.emit(name, Value::Null)
    }

    /// Set a declared payload.
    #[must_use]
    pub fn declare(mut self, name: &str, payload: Value) -> Self {
        self.steps.push(Step::Declare(name.to_owned(), payload));
        self
    }

    /// Sleep for `duration`.
    #[must_use]
    pub fn sleep(mut self, duration: Duration) -> Self {
        self.steps.push(Step::Sleep(duration));
        self
    }

    /// Wait on `barrier`. Used to prove that invocations overlap.
    #[must_use]
    pub fn wait_on(mut self, barrier: Arc<Barrier>) -> Self {
        self.steps.push(Step::Wait(barrier));
        self
    }

    /// Fail with `error`.
    #[must_use]
    pub fn fail(mut self, error: HandlerError) -> Self {
        self.steps.push(Step::Fail(error));
        self
    }

    /// Panic.
    #[must_use]
    pub fn panic(mut self) -> Self {
        self.steps.push(Step::Panic);
        self
    }

    /// Return `output` after all steps succeed.
    #[must_use]
    pub fn returning(mut self, output: Value) -> Self {
        self.output = output;
        self
    }
}

#[async_trait]
impl Handler for ScriptedHandler {
    async fn handle(&self, input: Value, ctx: &mut EmissionContext) -> Result<Value, HandlerError> {
        let info = ctx.info().clone();
        self.log.0.lock().unwrap().push(Call {
            input: input.clone(),
            invocation_id: info.invocation_id,
            causation_id: info.causation_id,
            correlation_id: info.correlation_id,
            depth: info.depth,
        });

        for step in &self.steps {
            match step {
                Step::Emit(name, Value::Null) => ctx.emit(name.clone(), input.clone()),
                Step::Emit(name, payload) => ctx.emit(name.clone(), payload.clone()),
                Step::Declare(name, payload) => {
                    ctx.set_declared_payload(name.clone(), payload.clone())?;
                }
                Step::Sleep(duration) => tokio::time::sleep(*duration).await,
                Step::Wait(barrier) => {
                    barrier.wait().await;
                }
                Step::Fail(error) => return Err(error.clone()),
                Step::Panic => panic!("scripted panic in {}", info.handler_id),
            }
        }
        Ok(self.output.clone())
    }
}
