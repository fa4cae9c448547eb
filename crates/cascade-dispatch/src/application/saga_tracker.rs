//! Saga tracker.
//!
//! Observes every event the dispatcher routes and keeps one
//! [`WorkflowInstance`] per correlation id. It never blocks or alters
//! dispatch: observing an event cannot fail.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};
use uuid::Uuid;

use cascade_core::clock::Clock;
use cascade_core::event::{Event, Trigger};

use crate::config::SagaConfig;
use crate::domain::workflow::{CloseReason, EventSummary, StateReducer, WorkflowInstance};

/// Tracks workflow instances by correlation id.
pub struct SagaTracker {
    config: SagaConfig,
    clock: Arc<dyn Clock>,
    reducer: Arc<dyn StateReducer>,
    instances: Mutex<HashMap<Uuid, WorkflowInstance>>,
}

impl std::fmt::Debug for SagaTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SagaTracker")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl SagaTracker {
    /// Creates a tracker.
    #[must_use]
    pub fn new(config: SagaConfig, clock: Arc<dyn Clock>, reducer: Arc<dyn StateReducer>) -> Self {
        Self {
            config,
            clock,
            reducer,
            instances: Mutex::new(HashMap::new()),
        }
    }

    fn instances(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, WorkflowInstance>> {
        self.instances.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Opens an instance for a trigger. Returns `false` if the trigger
    /// continues an instance that is already known.
    pub fn open(&self, trigger: &Trigger) -> bool {
        let now = self.clock.now();
        let mut instances = self.instances();
        if let Some(instance) = instances.get_mut(&trigger.correlation_id) {
            instance.last_activity_at = instance.last_activity_at.max(now);
            return false;
        }
        instances.insert(
            trigger.correlation_id,
            WorkflowInstance::open(
                trigger.correlation_id,
                self.reducer.initial_state(),
                Some(trigger.trigger_id),
                now,
            ),
        );
        info!(
            correlation_id = %trigger.correlation_id,
            trigger_id = %trigger.trigger_id,
            trigger_kind = %trigger.kind,
            "workflow instance opened"
        );
        true
    }

    /// Records an event against its instance, opening one for an unseen
    /// correlation id and closing it on a terminal event.
    pub fn observe(&self, event: &Event) {
        let now = self.clock.now();
        let correlation_id = event.correlation_id();
        let mut instances = self.instances();
        let instance = instances.entry(correlation_id).or_insert_with(|| {
            debug!(%correlation_id, event_name = event.name(), "instance opened by event");
            WorkflowInstance::open(correlation_id, self.reducer.initial_state(), None, now)
        });
        let next = self.reducer.reduce(&instance.state, event);
        instance.record(event, next, now);

        if self.config.terminal_events.contains(event.name())
            && instance.close(CloseReason::TerminalEvent(event.name().to_owned()), now)
        {
            info!(
                %correlation_id,
                event_name = event.name(),
                state = %instance.state,
                "workflow instance closed"
            );
        }
    }

    /// Closes every open instance idle for longer than the inactivity
    /// window, then evicts closed instances past the retention window or
    /// over the size cap. Returns the correlation ids closed by this sweep.
    ///
    /// An evicted correlation id seen again opens a fresh instance.
    pub fn sweep_inactive(&self) -> Vec<Uuid> {
        let now = self.clock.now();
        let window = chrono::Duration::from_std(self.config.inactivity_timeout)
            .unwrap_or(chrono::Duration::MAX);
        let mut instances = self.instances();
        let mut closed = Vec::new();
        for instance in instances.values_mut() {
            if instance.is_open()
                && now.signed_duration_since(instance.last_activity_at) > window
                && instance.close(CloseReason::Inactivity, now)
            {
                closed.push(instance.correlation_id);
            }
        }
        if !closed.is_empty() {
            info!(count = closed.len(), "closed inactive workflow instances");
        }

        let evicted = self.evict_closed(&mut instances, now);
        if evicted > 0 {
            info!(
                count = evicted,
                retained = instances.len(),
                "evicted closed workflow instances"
            );
        }
        closed
    }

    fn evict_closed(
        &self,
        instances: &mut HashMap<Uuid, WorkflowInstance>,
        now: DateTime<Utc>,
    ) -> usize {
        let before = instances.len();
        let retention =
            chrono::Duration::from_std(self.config.retention).unwrap_or(chrono::Duration::MAX);
        instances.retain(|_, instance| {
            instance
                .closed_at
                .is_none_or(|at| now.signed_duration_since(at) <= retention)
        });

        if instances.len() > self.config.max_instances {
            let mut closed: Vec<(DateTime<Utc>, Uuid)> = instances
                .values()
                .filter_map(|i| i.closed_at.map(|at| (at, i.correlation_id)))
                .collect();
            closed.sort_unstable();
            let excess = instances.len() - self.config.max_instances;
            for (_, correlation_id) in closed.into_iter().take(excess) {
                instances.remove(&correlation_id);
            }
        }
        before - instances.len()
    }

    /// Number of tracked instances, open and closed.
    #[must_use]
    pub fn len(&self) -> usize {
        self.instances().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.instances().is_empty()
    }

    /// Returns a snapshot of one instance.
    #[must_use]
    pub fn get(&self, correlation_id: Uuid) -> Option<WorkflowInstance> {
        self.instances().get(&correlation_id).cloned()
    }

    /// Returns snapshots of every open instance, oldest first.
    #[must_use]
    pub fn open_instances(&self) -> Vec<WorkflowInstance> {
        let mut open: Vec<WorkflowInstance> = self
            .instances()
            .values()
            .filter(|i| i.is_open())
            .cloned()
            .collect();
        open.sort_by_key(|i| i.opened_at);
        open
    }

    /// Returns the causal chain ending at `event_id`, root first.
    #[must_use]
    pub fn lineage(&self, correlation_id: Uuid, event_id: Uuid) -> Vec<EventSummary> {
        self.instances()
            .get(&correlation_id)
            .map(|i| i.lineage(event_id).into_iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Runs the inactivity sweep every `sweep_interval` until `shutdown`
    /// flips to `true`.
    pub fn spawn_sweeper(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let period = self.config.sweep_interval.max(Duration::from_millis(1));
        tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.sweep_inactive();
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            debug!("saga sweeper stopped");
                            break;
                        }
                    }
                }
            }
        })
    }
}
