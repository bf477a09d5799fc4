//! Integration tests for event delivery, timed suspension and the approval workflow

#[macro_use]
mod common;

use common::*;
use durable_flow::events::{SuspensionTrigger, TriggerCondition};
use durable_flow::pipeline::{ErrorKind, ExecutionOptions, ExecutionStatus, PipelineError};
use durable_flow::promise::{CreateOptions, PromiseState, ResumeOutcome};
use durable_flow::storage::MemoryBackend;
use durable_flow::suspension::Wakeup;
use durable_flow::workflows::{self, approval, APPROVAL, APPROVAL_GRANTED};
use serde_json::{json, Value};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_once_trigger_fires_once_under_concurrent_delivery() {
    let runtime = memory_runtime(Arc::new(MemoryBackend::new()));
    let registry = runtime.registry().clone();
    let hits = counter();

    let callback_hits = hits.clone();
    registry
        .register(
            SuspensionTrigger::new("deploy.finished")
                .when(TriggerCondition::field_equals("/env", "prod")),
            None,
            move |_| {
                let hits = callback_hits.clone();
                async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                }
            },
        )
        .await;

    let deliveries: Vec<_> = (0..50)
        .map(|_| {
            let registry = registry.clone();
            tokio::spawn(async move {
                registry
                    .trigger_event("deploy.finished", json!({"env": "prod"}))
                    .await
            })
        })
        .collect();

    let mut fired = 0;
    for delivery in deliveries {
        fired += delivery.await.unwrap();
    }
    assert_eq!(fired, 1);
    assert_eq!(count(&hits), 1);
    assert_eq!(registry.armed_count("deploy.finished").await, 0);
}

#[tokio::test]
async fn test_persistent_subscription_sees_every_matching_event() {
    let runtime = memory_runtime(Arc::new(MemoryBackend::new()));
    let hits = counter();
    let callback_hits = hits.clone();
    let id = runtime
        .registry()
        .on("heartbeat", move |_| {
            let hits = callback_hits.clone();
            async move {
                hits.fetch_add(1, Ordering::SeqCst);
            }
        })
        .await;

    for _ in 0..3 {
        assert_eq!(runtime.registry().trigger_event("heartbeat", Value::Null).await, 1);
    }
    assert!(runtime.registry().off(id).await);
    assert_eq!(runtime.registry().trigger_event("heartbeat", Value::Null).await, 0);
    assert_eq!(count(&hits), 3);
}

#[tokio::test]
async fn test_timer_wins_race_and_late_event_is_ignored() {
    let runtime = memory_runtime(Arc::new(MemoryBackend::new()));
    let promise = runtime
        .promises()
        .create::<Value>(CreateOptions::new().with_id("race-1"))
        .await
        .unwrap();

    let wakeup = runtime
        .awaiter()
        .suspend_for_duration(
            &promise,
            Duration::from_millis(50),
            vec![SuspensionTrigger::new("ping")],
        )
        .await
        .unwrap();
    assert!(matches!(wakeup, Wakeup::TimedOut { .. }));

    assert_eq!(runtime.registry().trigger_event("ping", json!({})).await, 0);
    let late = runtime
        .promises()
        .resume_promise("race-1", json!({"late": true}))
        .await
        .unwrap();
    assert_eq!(late, ResumeOutcome::NotSuspended(PromiseState::Rejected));
}

#[tokio::test]
async fn test_event_wins_race_against_timer() {
    let runtime = memory_runtime(Arc::new(MemoryBackend::new()));
    let promise = runtime
        .promises()
        .create::<Value>(CreateOptions::new().with_id("race-2"))
        .await
        .unwrap();

    let registry = runtime.registry().clone();
    let sender = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        registry.trigger_event("ping", json!({"n": 7})).await
    });

    let wakeup = runtime
        .awaiter()
        .suspend_for_duration(
            &promise,
            Duration::from_secs(5),
            vec![SuspensionTrigger::new("ping")],
        )
        .await
        .unwrap();
    assert!(!wakeup.is_timeout());
    assert_eq!(wakeup.into_event(), Some(json!({"n": 7})));
    assert_eq!(sender.await.unwrap(), 1);
    assert_eq!(runtime.timers().pending().await, 0);
}

async fn approval_runtime() -> durable_flow::DurableRuntime {
    let runtime = memory_runtime(Arc::new(MemoryBackend::new()));
    runtime.register_all(workflows::builtin()).await.unwrap();
    runtime
}

#[tokio::test]
async fn test_approval_timeout_withdraws_request() {
    let runtime = approval_runtime().await;
    let options = ExecutionOptions::new().with_execution_id("appr-timeout");

    let err = runtime
        .orchestrator()
        .execute(APPROVAL, json!({"change": "bump deps", "timeoutMs": 100}), options)
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::StepFailed { ref step_id, .. } if step_id == "await-approval"));

    let stored = runtime
        .orchestrator()
        .get_execution("appr-timeout")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status(), ExecutionStatus::Failed);
    assert_eq!(stored.record.compensated_steps, vec!["request"]);
    assert_eq!(stored.record.errors[0].kind, ErrorKind::SuspensionTimeout);
    assert_eq!(stored.record.errors.len(), 1);
}

#[tokio::test]
async fn test_approval_grant_resumes_matching_execution_only() {
    let runtime = approval_runtime().await;
    let id = runtime
        .orchestrator()
        .start(
            APPROVAL,
            json!({"change": "rotate keys", "timeoutMs": 10_000}),
            ExecutionOptions::new().with_execution_id("appr-1"),
        )
        .await
        .unwrap();

    assert!(eventually!(
        runtime.registry().armed_count(APPROVAL_GRANTED).await == 1
    ));

    let ignored = runtime
        .registry()
        .trigger_event(APPROVAL_GRANTED, json!({"requestId": "someone-else", "by": "mallory"}))
        .await;
    assert_eq!(ignored, 0);

    let grant = json!({"requestId": approval::request_id(&id), "by": "alice"});
    assert_eq!(runtime.registry().trigger_event(APPROVAL_GRANTED, grant).await, 1);

    assert!(wait_for_status(&runtime, &id, ExecutionStatus::Completed).await);
    let stored = runtime.orchestrator().get_execution(&id).await.unwrap().unwrap();
    assert_eq!(
        stored.output("apply"),
        Some(&json!({"applied": "rotate keys", "approvedBy": "alice"}))
    );
    assert!(stored.record.compensated_steps.is_empty());
}
