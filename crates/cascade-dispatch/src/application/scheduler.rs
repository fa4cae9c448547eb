//! Interval scheduler: the cron trigger source.
//!
//! Every tick is a fresh cron trigger with its own correlation id.

use std::time::Duration;

use serde_json::json;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use cascade_core::error::DispatchError;
use cascade_core::event::TriggerKind;

use super::dispatcher::{CascadeReport, Dispatcher};

#[derive(Debug, Clone)]
struct Schedule {
    handler_id: String,
    period: Duration,
}

/// Runs cron-kind handlers on fixed intervals.
#[derive(Debug, Clone)]
pub struct IntervalScheduler {
    dispatcher: Dispatcher,
    schedules: Vec<Schedule>,
}

impl IntervalScheduler {
    #[must_use]
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self {
            dispatcher,
            schedules: Vec::new(),
        }
    }

    /// Runs `handler_id` every `period`. The first run is one period after
    /// the scheduler starts.
    #[must_use]
    pub fn every(mut self, handler_id: impl Into<String>, period: Duration) -> Self {
        self.schedules.push(Schedule {
            handler_id: handler_id.into(),
            period: period.max(Duration::from_millis(1)),
        });
        self
    }

    /// Ids of the scheduled handlers.
    pub fn handler_ids(&self) -> impl Iterator<Item = &str> {
        self.schedules.iter().map(|s| s.handler_id.as_str())
    }

    /// Fires one tick of `handler_id` immediately and waits for its cascade.
    ///
    /// # Errors
    ///
    /// Returns `UnknownHandler` or `TriggerKindMismatch` if the handler is
    /// not a registered cron handler.
    pub async fn tick(&self, handler_id: &str) -> Result<CascadeReport, DispatchError> {
        let trigger = self.dispatcher.trigger(TriggerKind::Cron);
        debug!(handler_id, correlation_id = %trigger.correlation_id, "cron tick");
        self.dispatcher.run(&trigger, handler_id, json!({})).await
    }

    /// Runs every schedule until `shutdown` flips to `true`. In-flight
    /// cascades are not cancelled.
    pub async fn run(self, shutdown: watch::Receiver<bool>) {
        let mut loops = JoinSet::new();
        for schedule in self.schedules {
            let dispatcher = self.dispatcher.clone();
            let mut shutdown = shutdown.clone();
            loops.spawn(async move {
                let mut ticker = tokio::time::interval_at(
                    tokio::time::Instant::now() + schedule.period,
                    schedule.period,
                );
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            let trigger = dispatcher.trigger(TriggerKind::Cron);
                            let started =
                                dispatcher.start(&trigger, &schedule.handler_id, json!({}));
                            if let Err(e) = started {
                                warn!(
                                    handler_id = %schedule.handler_id,
                                    error = %e,
                                    "cron tick rejected"
                                );
                            }
                        }
                        changed = shutdown.changed() => {
                            if changed.is_err() || *shutdown.borrow() {
                                break;
                            }
                        }
                    }
                }
            });
        }
        info!(schedules = loops.len(), "interval scheduler started");

        while loops.join_next().await.is_some() {}
        info!("interval scheduler stopped");
    }
}
