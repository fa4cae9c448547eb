//! Integration tests for cascading dispatch.

use std::sync::Arc;
use std::time::Duration;

use cascade_core::error::{DispatchError, HandlerError, RoutingProblem};
use cascade_core::event::{EmissionKind, TriggerKind};
use cascade_core::journal::EventJournal;
use cascade_dispatch::{
    DispatchConfig, Dispatcher, HandlerRegistration, HandlerRegistry, InvocationState,
    LastEventReducer, SagaConfig, SagaTracker,
};
use cascade_test_support::{FailingJournal, RecordingJournal, ScriptedHandler};
use serde_json::json;
use tokio::sync::Barrier;

/// An api handler that forwards its input as `emits`.
fn relay_api(handler_id: &str, emits: &str) -> HandlerRegistration {
    HandlerRegistration::api(handler_id, ScriptedHandler::new().forward(emits)).emits([emits])
}

/// A subscriber to `on` that forwards its input as `emits`.
fn relay(handler_id: &str, on: &str, emits: &str) -> HandlerRegistration {
    HandlerRegistration::event(handler_id, on, ScriptedHandler::new().forward(emits))
        .emits([emits])
}

#[tokio::test]
async fn test_correlation_and_causation_propagate_through_chain() {
    // Arrange
    let registry = HandlerRegistry::builder()
        .register(relay_api("start", "A"))
        .register(relay("on_a", "A", "B"))
        .register(relay("on_b", "B", "C"))
        .allow_unsubscribed("C")
        .build()
        .unwrap();
    let journal = Arc::new(RecordingJournal::new());
    let dispatcher = Dispatcher::builder(registry)
        .journal(journal.clone())
        .build();
    let trigger = dispatcher.trigger(TriggerKind::Api);

    // Act
    let report = dispatcher
        .run(&trigger, "start", json!({ "order": 7 }))
        .await
        .unwrap();

    // Assert
    assert!(report.succeeded());
    assert_eq!(journal.appended_names(), vec!["A", "B", "C"]);
    let events = journal.appended_events();
    assert!(events.iter().all(|e| e.correlation_id() == trigger.correlation_id));
    assert_eq!(events[0].metadata.causation_id, trigger.trigger_id);
    assert_eq!(events[1].metadata.causation_id, events[0].id());
    assert_eq!(events[2].metadata.causation_id, events[1].id());
    assert_eq!(
        events.iter().map(|e| e.metadata.depth).collect::<Vec<_>>(),
        vec![0, 1, 2]
    );
    assert!(events.windows(2).all(|w| w[0].metadata.emitted_at <= w[1].metadata.emitted_at));
    assert!(events.iter().all(|e| e.payload == json!({ "order": 7 })));
    assert_eq!(report.unrouted, vec!["C".to_owned()]);
}

#[tokio::test]
async fn test_failed_handler_keeps_ad_hoc_and_discards_declared() {
    // Arrange
    let failing = ScriptedHandler::new()
        .emit("Audit", json!({ "step": 1 }))
        .declare("Done", json!({}))
        .fail(HandlerError::Failed("gateway unavailable".into()));
    let audit = ScriptedHandler::new();
    let audit_log = audit.log();
    let done = ScriptedHandler::new();
    let done_log = done.log();
    let registry = HandlerRegistry::builder()
        .open_event("Done")
        .register(
            HandlerRegistration::api("charge", failing)
                .emits(["Audit"])
                .declares(["Done"]),
        )
        .register(HandlerRegistration::event("audit", "Audit", audit))
        .register(HandlerRegistration::event("done", "Done", done))
        .build()
        .unwrap();
    let dispatcher = Dispatcher::builder(registry).build();

    // Act
    let mut cascade = dispatcher
        .start(&dispatcher.trigger(TriggerKind::Api), "charge", json!({}))
        .unwrap();
    let root = cascade.root_result().await;
    let report = cascade.settled().await;

    // Assert
    assert!(matches!(
        root,
        Err(DispatchError::HandlerExecutionFailure {
            source: HandlerError::Failed(_),
            ..
        })
    ));
    assert_eq!(audit_log.count(), 1);
    assert_eq!(done_log.count(), 0);
    let charge = report.invocations_of("charge")[0];
    assert_eq!(charge.state, InvocationState::Failed);
    assert_eq!(charge.ad_hoc_emitted, 1);
    assert_eq!(charge.declared_emitted, 0);
}

#[tokio::test(start_paused = true)]
async fn test_timed_out_handler_keeps_ad_hoc_and_discards_declared() {
    // Arrange
    let slow = ScriptedHandler::new()
        .emit("Audit", json!({ "step": 1 }))
        .declare("Done", json!({}))
        .sleep(Duration::from_secs(60));
    let audit = ScriptedHandler::new();
    let audit_log = audit.log();
    let done = ScriptedHandler::new();
    let done_log = done.log();
    let registry = HandlerRegistry::builder()
        .open_event("Done")
        .register(
            HandlerRegistration::api("charge", slow)
                .emits(["Audit"])
                .declares(["Done"])
                .with_timeout(Duration::from_millis(250)),
        )
        .register(HandlerRegistration::event("audit", "Audit", audit))
        .register(HandlerRegistration::event("done", "Done", done))
        .build()
        .unwrap();
    let journal = Arc::new(RecordingJournal::new());
    let dispatcher = Dispatcher::builder(registry)
        .journal(journal.clone())
        .build();

    // Act
    let mut cascade = dispatcher
        .start(&dispatcher.trigger(TriggerKind::Api), "charge", json!({}))
        .unwrap();
    let root = cascade.root_result().await;
    let report = cascade.settled().await;

    // Assert
    assert!(matches!(
        root,
        Err(DispatchError::HandlerTimeout { ref handler_id, budget })
            if handler_id == "charge" && budget == Duration::from_millis(250)
    ));
    assert_eq!(audit_log.count(), 1);
    assert_eq!(done_log.count(), 0);
    assert_eq!(journal.appended_names(), vec!["Audit"]);
    let charge = report.invocations_of("charge")[0];
    assert_eq!(charge.state, InvocationState::TimedOut);
    assert_eq!(charge.declared_emitted, 0);
    assert!(report.events_named("Done").is_empty());
}

#[tokio::test]
async fn test_declared_events_fire_after_success_in_insertion_order() {
    let registry = HandlerRegistry::builder()
        .open_event("First")
        .open_event("Second")
        .register(
            HandlerRegistration::api(
                "finish",
                ScriptedHandler::new()
                    .declare("First", json!({ "n": 1 }))
                    .declare("Second", json!({ "n": 2 })),
            )
            .declares(["First", "Second"]),
        )
        .allow_unsubscribed("First")
        .allow_unsubscribed("Second")
        .build()
        .unwrap();
    let dispatcher = Dispatcher::builder(registry).build();

    let report = dispatcher
        .run(&dispatcher.trigger(TriggerKind::Api), "finish", json!({}))
        .await
        .unwrap();

    let names: Vec<&str> = report.events.iter().map(|e| e.name()).collect();
    assert_eq!(names, vec!["First", "Second"]);
    assert!(
        report
            .events
            .iter()
            .all(|e| e.metadata.emission == EmissionKind::Declared)
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_sibling_handlers_run_concurrently() {
    // Arrange: both subscribers block until the other has started.
    let barrier = Arc::new(Barrier::new(2));
    let registry = HandlerRegistry::builder()
        .register(relay_api("place", "Placed"))
        .register(HandlerRegistration::event(
            "charge",
            "Placed",
            ScriptedHandler::new().wait_on(barrier.clone()),
        ))
        .register(HandlerRegistration::event(
            "reserve",
            "Placed",
            ScriptedHandler::new().wait_on(barrier.clone()),
        ))
        .build()
        .unwrap();
    let dispatcher = Dispatcher::builder(registry).build();

    // Act
    let report = tokio::time::timeout(
        Duration::from_secs(5),
        dispatcher.run(&dispatcher.trigger(TriggerKind::Api), "place", json!({})),
    )
    .await
    .expect("siblings deadlocked: they did not run concurrently")
    .unwrap();

    // Assert
    assert!(report.succeeded());
    assert_eq!(report.invocations.len(), 3);
}

#[tokio::test]
async fn test_sibling_failure_does_not_affect_other_subscriber() {
    let healthy = ScriptedHandler::new();
    let healthy_log = healthy.log();
    let registry = HandlerRegistry::builder()
        .register(relay_api("place", "Placed"))
        .register(HandlerRegistration::event(
            "broken",
            "Placed",
            ScriptedHandler::new().panic(),
        ))
        .register(HandlerRegistration::event("healthy", "Placed", healthy))
        .build()
        .unwrap();
    let dispatcher = Dispatcher::builder(registry).build();

    let report = dispatcher
        .run(&dispatcher.trigger(TriggerKind::Api), "place", json!({}))
        .await
        .unwrap();

    assert_eq!(healthy_log.count(), 1);
    assert_eq!(report.invocations_of("broken")[0].state, InvocationState::Failed);
    assert_eq!(report.invocations_of("healthy")[0].state, InvocationState::Succeeded);
}

#[tokio::test]
async fn test_cycle_is_halted_at_max_depth_without_affecting_other_cascades() {
    // Arrange
    let registry = HandlerRegistry::builder()
        .register(relay_api("kick", "Ping"))
        .register(relay("ping", "Ping", "Pong"))
        .register(relay("pong", "Pong", "Ping"))
        .register(HandlerRegistration::api(
            "independent",
            ScriptedHandler::new().returning(json!("ok")),
        ))
        .build()
        .unwrap();
    let config = DispatchConfig {
        max_depth: 5,
        ..DispatchConfig::default()
    };
    let dispatcher = Dispatcher::builder(registry).config(config).build();

    // Act
    let looping = dispatcher
        .start(&dispatcher.trigger(TriggerKind::Api), "kick", json!({}))
        .unwrap();
    let mut other = dispatcher
        .start(&dispatcher.trigger(TriggerKind::Api), "independent", json!({}))
        .unwrap();
    let other_output = other.root_result().await;
    let report = looping.settled().await;

    // Assert
    assert_eq!(other_output.unwrap(), json!("ok"));
    assert_eq!(report.invocations.len(), 6);
    assert_eq!(
        report.failures,
        vec![DispatchError::CascadeDepthExceeded {
            event_name: "Pong".into(),
            depth: 6,
            limit: 5,
        }]
    );
    assert!(
        report
            .invocations
            .iter()
            .all(|r| r.state == InvocationState::Succeeded && r.depth <= 5)
    );
}

#[tokio::test]
async fn test_journal_outage_does_not_stop_dispatch() {
    let downstream = ScriptedHandler::new();
    let log = downstream.log();
    let registry = HandlerRegistry::builder()
        .register(relay_api("place", "Placed"))
        .register(HandlerRegistration::event("downstream", "Placed", downstream))
        .build()
        .unwrap();
    let dispatcher = Dispatcher::builder(registry)
        .journal(Arc::new(FailingJournal))
        .build();

    let report = dispatcher
        .run(&dispatcher.trigger(TriggerKind::Api), "place", json!({}))
        .await
        .unwrap();

    assert!(report.succeeded());
    assert_eq!(log.count(), 1);
    assert!(dispatcher.journal().is_some());
}

#[tokio::test]
async fn test_redelivered_event_invokes_subscriber_again() {
    // Arrange
    let subscriber = ScriptedHandler::new();
    let log = subscriber.log();
    let registry = HandlerRegistry::builder()
        .register(relay_api("place", "Placed"))
        .register(HandlerRegistration::event("subscriber", "Placed", subscriber))
        .build()
        .unwrap();
    let journal = Arc::new(RecordingJournal::new());
    let dispatcher = Dispatcher::builder(registry)
        .journal(journal.clone())
        .build();
    let trigger = dispatcher.trigger(TriggerKind::Api);
    dispatcher.run(&trigger, "place", json!({})).await.unwrap();

    // Act
    let original = journal
        .load_correlation(trigger.correlation_id)
        .await
        .unwrap()
        .remove(0);
    dispatcher.deliver(original.redelivered()).settled().await;

    // Assert
    let calls = log.calls();
    assert_eq!(calls.len(), 2);
    assert_ne!(calls[0].causation_id, calls[1].causation_id);
    assert!(calls.iter().all(|c| c.correlation_id == trigger.correlation_id));
}

#[tokio::test]
async fn test_saga_tracker_follows_cascade_to_terminal_event() {
    // Arrange
    let registry = HandlerRegistry::builder()
        .register(relay_api("place", "Placed"))
        .register(relay("finish", "Placed", "Completed"))
        .allow_unsubscribed("Completed")
        .build()
        .unwrap();
    let tracker = Arc::new(SagaTracker::new(
        SagaConfig::default().with_terminal_events(["Completed"]),
        Arc::new(cascade_core::clock::SystemClock),
        Arc::new(LastEventReducer),
    ));
    let dispatcher = Dispatcher::builder(registry)
        .tracker(tracker.clone())
        .build();
    let trigger = dispatcher.trigger(TriggerKind::Api);

    // Act
    let report = dispatcher.run(&trigger, "place", json!({})).await.unwrap();

    // Assert
    let instance = tracker.get(trigger.correlation_id).unwrap();
    assert!(!instance.is_open());
    assert_eq!(instance.state, "Completed");
    assert_eq!(instance.events.len(), 2);
    let completed = report.events_named("Completed")[0];
    let lineage = tracker.lineage(trigger.correlation_id, completed.id());
    assert_eq!(
        lineage.iter().map(|e| e.event_name.as_str()).collect::<Vec<_>>(),
        vec!["Placed", "Completed"]
    );
}

#[test]
fn test_startup_validation_rejects_unreachable_subscription() {
    let result = HandlerRegistry::builder()
        .register(HandlerRegistration::api("place", ScriptedHandler::new()))
        .register(HandlerRegistration::event("charge", "Placed", ScriptedHandler::new()))
        .build();

    let err = result.unwrap_err();
    assert_eq!(
        err.problems(),
        [RoutingProblem::UnreachableSubscription {
            handler_id: "charge".into(),
            event_name: "Placed".into(),
        }]
    );
}
