//! Cascading dispatcher.
//!
//! Each trigger (or injected event) gets its own coordinator task. The
//! coordinator routes every event it sees to the subscribed handlers, runs
//! each invocation as its own task, and keeps going until no invocation is
//! running and no emitted event is waiting. Invocations of different
//! cascades share one worker pool, bounded by `max_concurrency`.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{Semaphore, mpsc, oneshot};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

use cascade_core::clock::{Clock, SystemClock};
use cascade_core::emission::{EmissionContext, InvocationInfo};
use cascade_core::error::{DispatchError, HandlerError};
use cascade_core::event::{Event, Trigger, TriggerKind};
use cascade_core::journal::EventJournal;

use crate::application::saga_tracker::SagaTracker;
use crate::config::DispatchConfig;
use crate::domain::invocation::{InvocationRecord, InvocationState};
use crate::domain::registration::HandlerRegistration;
use crate::domain::registry::HandlerRegistry;
use crate::domain::router::Router;

type RootReply = oneshot::Sender<Result<Value, DispatchError>>;

struct Inner {
    registry: Arc<HandlerRegistry>,
    router: Router,
    config: DispatchConfig,
    clock: Arc<dyn Clock>,
    journal: Option<Arc<dyn EventJournal>>,
    tracker: Option<Arc<SagaTracker>>,
    permits: Arc<Semaphore>,
}

/// Routes events to handlers and runs cascades to completion.
///
/// Cheap to clone; clones share the registry, worker pool, journal and
/// tracker.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("handlers", &self.inner.registry.len())
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

/// Builder for [`Dispatcher`].
pub struct DispatcherBuilder {
    registry: Arc<HandlerRegistry>,
    config: DispatchConfig,
    clock: Arc<dyn Clock>,
    journal: Option<Arc<dyn EventJournal>>,
    tracker: Option<Arc<SagaTracker>>,
}

impl DispatcherBuilder {
    #[must_use]
    pub fn config(mut self, config: DispatchConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Journal every routed event.
    #[must_use]
    pub fn journal(mut self, journal: Arc<dyn EventJournal>) -> Self {
        self.journal = Some(journal);
        self
    }

    /// Feed every routed event to a saga tracker.
    #[must_use]
    pub fn tracker(mut self, tracker: Arc<SagaTracker>) -> Self {
        self.tracker = Some(tracker);
        self
    }

    #[must_use]
    pub fn build(self) -> Dispatcher {
        let router = Router::from_registry(&self.registry);
        let permits = Arc::new(Semaphore::new(self.config.max_concurrency.max(1)));
        Dispatcher {
            inner: Arc::new(Inner {
                registry: self.registry,
                router,
                config: self.config,
                clock: self.clock,
                journal: self.journal,
                tracker: self.tracker,
                permits,
            }),
        }
    }
}

impl Dispatcher {
    /// Starts building a dispatcher over a validated registry.
    #[must_use]
    pub fn builder(registry: impl Into<Arc<HandlerRegistry>>) -> DispatcherBuilder {
        DispatcherBuilder {
            registry: registry.into(),
            config: DispatchConfig::default(),
            clock: Arc::new(SystemClock),
            journal: None,
            tracker: None,
        }
    }

    #[must_use]
    pub fn registry(&self) -> &HandlerRegistry {
        &self.inner.registry
    }

    #[must_use]
    pub fn config(&self) -> &DispatchConfig {
        &self.inner.config
    }

    #[must_use]
    pub fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.inner.clock)
    }

    #[must_use]
    pub fn tracker(&self) -> Option<&Arc<SagaTracker>> {
        self.inner.tracker.as_ref()
    }

    #[must_use]
    pub fn journal(&self) -> Option<&Arc<dyn EventJournal>> {
        self.inner.journal.as_ref()
    }

    /// Creates a trigger of `kind` stamped with the dispatcher's clock.
    #[must_use]
    pub fn trigger(&self, kind: TriggerKind) -> Trigger {
        Trigger::new(kind, self.inner.clock.as_ref())
    }

    /// Invokes `handler_id` for `trigger` and starts the cascade that
    /// follows.
    ///
    /// # Errors
    ///
    /// Returns `UnknownHandler` if no such handler is registered and
    /// `TriggerKindMismatch` if the handler cannot be invoked by this kind of
    /// trigger. Nothing runs in either case.
    pub fn start(
        &self,
        trigger: &Trigger,
        handler_id: &str,
        input: Value,
    ) -> Result<Cascade, DispatchError> {
        let registration = self
            .inner
            .registry
            .get(handler_id)
            .cloned()
            .ok_or_else(|| DispatchError::UnknownHandler(handler_id.to_owned()))?;
        if registration.trigger_kind != trigger.kind {
            return Err(DispatchError::TriggerKindMismatch {
                handler_id: handler_id.to_owned(),
                expected: registration.trigger_kind,
                actual: trigger.kind,
            });
        }
        if let Some(tracker) = &self.inner.tracker {
            tracker.open(trigger);
        }

        let record = InvocationRecord::scheduled(
            handler_id,
            trigger.kind,
            trigger.correlation_id,
            trigger.trigger_id,
            0,
            self.inner.clock.now(),
        );
        let (reply, root) = oneshot::channel();
        let job = Job {
            registration,
            record,
            input,
            caused_at: trigger.received_at,
            reply: Some(reply),
        };
        debug!(
            correlation_id = %trigger.correlation_id,
            trigger_id = %trigger.trigger_id,
            trigger_kind = %trigger.kind,
            handler_id,
            "starting cascade"
        );
        Ok(self.spawn_cascade(trigger.correlation_id, Some(job), Vec::new(), Some(root)))
    }

    /// Routes an event as if it had just been emitted, e.g. a redelivery.
    #[must_use]
    pub fn deliver(&self, event: Event) -> Cascade {
        self.spawn_cascade(event.correlation_id(), None, vec![event], None)
    }

    /// Publishes an external event into the workflow of `trigger`.
    #[must_use]
    pub fn publish(&self, trigger: &Trigger, event_name: &str, payload: Value) -> Cascade {
        if let Some(tracker) = &self.inner.tracker {
            tracker.open(trigger);
        }
        let event = Event::external(event_name, payload, trigger, self.inner.clock.as_ref());
        self.deliver(event)
    }

    /// Starts a cascade and waits for it to settle.
    ///
    /// # Errors
    ///
    /// Same as [`start`](Self::start).
    pub async fn run(
        &self,
        trigger: &Trigger,
        handler_id: &str,
        input: Value,
    ) -> Result<CascadeReport, DispatchError> {
        Ok(self.start(trigger, handler_id, input)?.settled().await)
    }

    fn spawn_cascade(
        &self,
        correlation_id: Uuid,
        root: Option<Job>,
        seed: Vec<Event>,
        reply: Option<oneshot::Receiver<Result<Value, DispatchError>>>,
    ) -> Cascade {
        let (tx, rx) = mpsc::unbounded_channel();
        let coordinator = Coordinator {
            inner: Arc::clone(&self.inner),
            tx,
            rx,
            tasks: JoinSet::new(),
            report: CascadeReport::new(correlation_id),
        };
        let span = info_span!("cascade", %correlation_id);
        let handle = tokio::spawn(coordinator.drive(root, seed).instrument(span));
        Cascade {
            correlation_id,
            root: reply,
            handle,
        }
    }
}

/// A running cascade.
///
/// Dropping it does not stop the cascade; it keeps running in the
/// background.
#[derive(Debug)]
pub struct Cascade {
    correlation_id: Uuid,
    root: Option<oneshot::Receiver<Result<Value, DispatchError>>>,
    handle: JoinHandle<CascadeReport>,
}

impl Cascade {
    #[must_use]
    pub fn correlation_id(&self) -> Uuid {
        self.correlation_id
    }

    /// Waits for the trigger-invoked handler to finish and returns its
    /// output. The rest of the cascade keeps running.
    ///
    /// # Errors
    ///
    /// Returns the invocation failure, or `Abandoned` if there is no root
    /// invocation or its result was already taken.
    pub async fn root_result(&mut self) -> Result<Value, DispatchError> {
        let Some(root) = self.root.take() else {
            return Err(DispatchError::Abandoned("root invocation".to_owned()));
        };
        root.await
            .unwrap_or_else(|_| Err(DispatchError::Abandoned("root invocation".to_owned())))
    }

    /// Waits until nothing in the cascade is running or pending.
    pub async fn settled(self) -> CascadeReport {
        match self.handle.await {
            Ok(report) => report,
            Err(e) => {
                error!(
                    correlation_id = %self.correlation_id,
                    error = %e,
                    "cascade coordinator failed"
                );
                CascadeReport::new(self.correlation_id)
            }
        }
    }
}

/// Everything that happened in one cascade.
#[derive(Debug, Clone)]
pub struct CascadeReport {
    pub correlation_id: Uuid,
    /// Finished invocations, in completion order.
    pub invocations: Vec<InvocationRecord>,
    /// Routed events, in routing order.
    pub events: Vec<Event>,
    /// Deliveries refused by the depth guard.
    pub failures: Vec<DispatchError>,
    /// Names of routed events that had no subscriber.
    pub unrouted: Vec<String>,
}

impl CascadeReport {
    fn new(correlation_id: Uuid) -> Self {
        Self {
            correlation_id,
            invocations: Vec::new(),
            events: Vec::new(),
            failures: Vec::new(),
            unrouted: Vec::new(),
        }
    }

    /// Invocations of one handler.
    #[must_use]
    pub fn invocations_of(&self, handler_id: &str) -> Vec<&InvocationRecord> {
        self.invocations
            .iter()
            .filter(|r| r.handler_id == handler_id)
            .collect()
    }

    /// Routed events with the given name.
    #[must_use]
    pub fn events_named(&self, event_name: &str) -> Vec<&Event> {
        self.events
            .iter()
            .filter(|e| e.name() == event_name)
            .collect()
    }

    /// `true` when every invocation succeeded and nothing was refused.
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.failures.is_empty()
            && self
                .invocations
                .iter()
                .all(|r| r.state == InvocationState::Succeeded)
    }
}

struct Job {
    registration: Arc<HandlerRegistration>,
    record: InvocationRecord,
    input: Value,
    caused_at: chrono::DateTime<chrono::Utc>,
    reply: Option<RootReply>,
}

struct Outcome {
    record: InvocationRecord,
    declared: Vec<Event>,
}

struct Coordinator {
    inner: Arc<Inner>,
    tx: mpsc::UnboundedSender<Event>,
    rx: mpsc::UnboundedReceiver<Event>,
    tasks: JoinSet<Outcome>,
    report: CascadeReport,
}

impl Coordinator {
    async fn drive(mut self, root: Option<Job>, seed: Vec<Event>) -> CascadeReport {
        if let Some(job) = root {
            self.spawn(job);
        }
        for event in seed {
            self.route(event).await;
        }

        loop {
            if self.tasks.is_empty() {
                // Nothing can emit any more; drain what is queued and stop.
                match self.rx.try_recv() {
                    Ok(event) => {
                        self.route(event).await;
                        continue;
                    }
                    Err(_) => break,
                }
            }
            tokio::select! {
                biased;
                Some(event) = self.rx.recv() => self.route(event).await,
                Some(joined) = self.tasks.join_next() => self.finish(joined).await,
                else => break,
            }
        }

        debug!(
            invocations = self.report.invocations.len(),
            events = self.report.events.len(),
            failures = self.report.failures.len(),
            "cascade settled"
        );
        self.report
    }

    async fn finish(&mut self, joined: Result<Outcome, JoinError>) {
        match joined {
            Ok(outcome) => {
                self.report.invocations.push(outcome.record);
                for event in outcome.declared {
                    self.route(event).await;
                }
            }
            Err(e) => error!(error = %e, "invocation task failed"),
        }
    }

    async fn route(&mut self, event: Event) {
        let inner = Arc::clone(&self.inner);

        if let Some(journal) = &inner.journal {
            if let Err(e) = journal.append(&event).await {
                warn!(event_id = %event.id(), error = %e, "failed to journal event");
            }
        }
        if let Some(tracker) = &inner.tracker {
            tracker.observe(&event);
        }

        let subscribers = inner.router.subscribers_for(event.name());
        let depth = event.metadata.depth + 1;
        if subscribers.is_empty() {
            warn!(
                event_id = %event.id(),
                event_name = event.name(),
                emitted_by = ?event.metadata.emitted_by,
                "event has no subscribers"
            );
            self.report.unrouted.push(event.name().to_owned());
        } else if depth > inner.config.max_depth {
            let violation = DispatchError::CascadeDepthExceeded {
                event_name: event.name().to_owned(),
                depth,
                limit: inner.config.max_depth,
            };
            error!(
                event_id = %event.id(),
                causation_id = %event.metadata.causation_id,
                error = %violation,
                "cascade depth exceeded; event not delivered"
            );
            self.report.failures.push(violation);
        } else {
            debug!(
                event_id = %event.id(),
                event_name = event.name(),
                depth,
                subscribers = subscribers.len(),
                "routing event"
            );
            let now = inner.clock.now();
            for handler_id in subscribers {
                let Some(registration) = inner.registry.get(handler_id) else {
                    continue;
                };
                let record = InvocationRecord::scheduled(
                    handler_id.as_str(),
                    TriggerKind::Event,
                    event.correlation_id(),
                    event.id(),
                    depth,
                    now,
                );
                self.spawn(Job {
                    registration: Arc::clone(registration),
                    record,
                    input: event.payload.clone(),
                    caused_at: event.metadata.emitted_at,
                    reply: None,
                });
            }
        }

        self.report.events.push(event);
    }

    fn spawn(&mut self, job: Job) {
        let span = info_span!(
            "invocation",
            handler_id = %job.record.handler_id,
            invocation_id = %job.record.invocation_id,
            causation_id = %job.record.causation_id,
            depth = job.record.depth,
        );
        let inner = Arc::clone(&self.inner);
        let sink = self.tx.clone();
        self.tasks.spawn(invoke(inner, job, sink).instrument(span));
    }
}

async fn invoke(inner: Arc<Inner>, job: Job, sink: mpsc::UnboundedSender<Event>) -> Outcome {
    let Job {
        registration,
        mut record,
        input,
        caused_at,
        reply,
    } = job;

    let Ok(permit) = Arc::clone(&inner.permits).acquire_owned().await else {
        let abandoned = DispatchError::Abandoned(record.handler_id.clone());
        error!(error = %abandoned, "worker pool closed");
        if let Some(reply) = reply {
            let _ = reply.send(Err(abandoned));
        }
        return Outcome {
            record,
            declared: Vec::new(),
        };
    };
    if let Err(e) = record.start(inner.clock.now()) {
        warn!(error = %e, "unexpected invocation state");
    }

    let info = InvocationInfo {
        invocation_id: record.invocation_id,
        handler_id: record.handler_id.clone(),
        trigger_kind: record.trigger_kind,
        correlation_id: record.correlation_id,
        causation_id: record.causation_id,
        depth: record.depth,
        caused_at,
    };
    let mut ctx = EmissionContext::new(
        info,
        registration.declares.clone(),
        Arc::clone(&inner.clock),
        sink,
    );
    let budget = registration.timeout.unwrap_or(inner.config.default_timeout);
    let handler = Arc::clone(&registration.handler);
    let mut running = tokio::spawn(
        async move {
            let result = handler.handle(input, &mut ctx).await;
            (result, ctx)
        }
        .in_current_span(),
    );

    let failure = |source: HandlerError| DispatchError::HandlerExecutionFailure {
        handler_id: registration.id.clone(),
        source,
    };
    let (result, declared) = match tokio::time::timeout(budget, &mut running).await {
        Ok(Ok((Ok(output), ctx))) => {
            record.ad_hoc_emitted = ctx.ad_hoc_count();
            let declared = ctx.into_declared_events();
            match validate_declared(&inner.registry, &declared) {
                Ok(()) => (Ok(output), declared),
                Err(source) => (Err(failure(source)), Vec::new()),
            }
        }
        Ok(Ok((Err(source), ctx))) => {
            record.ad_hoc_emitted = ctx.ad_hoc_count();
            (Err(failure(source)), Vec::new())
        }
        Ok(Err(join_error)) => {
            let reason = if join_error.is_panic() {
                "handler panicked"
            } else {
                "handler task was cancelled"
            };
            (Err(failure(HandlerError::Failed(reason.to_owned()))), Vec::new())
        }
        Err(_elapsed) => {
            running.abort();
            (
                Err(DispatchError::HandlerTimeout {
                    handler_id: registration.id.clone(),
                    budget,
                }),
                Vec::new(),
            )
        }
    };
    drop(permit);

    let now = inner.clock.now();
    let transition = match &result {
        Ok(_) => {
            info!(
                declared = declared.len(),
                ad_hoc = record.ad_hoc_emitted,
                "invocation succeeded"
            );
            record.succeed(now, declared.len())
        }
        Err(e @ DispatchError::HandlerTimeout { .. }) => {
            warn!(error = %e, "invocation timed out; declared emissions discarded");
            record.time_out(now, e.clone())
        }
        Err(e) => {
            error!(error = %e, "invocation failed; declared emissions discarded");
            record.fail(now, e.clone())
        }
    };
    if let Err(e) = transition {
        warn!(error = %e, "unexpected invocation state");
    }

    if let Some(reply) = reply {
        // The caller may have stopped waiting.
        let _ = reply.send(result);
    }
    Outcome { record, declared }
}

fn validate_declared(registry: &HandlerRegistry, declared: &[Event]) -> Result<(), HandlerError> {
    for event in declared {
        registry
            .validate_payload(event.name(), &event.payload)
            .map_err(|reason| {
                HandlerError::Failed(format!(
                    "declared payload for {} is invalid: {reason}",
                    event.name()
                ))
            })?;
    }
    Ok(())
}
