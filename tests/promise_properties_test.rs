//! Property tests for the distributed promise state machine
//!
//! Random operation sequences are applied both to a `PromiseManager` and to
//! a small reference model; after every step the persisted state must agree
//! with the model, and settled promises must never change again.

use durable_flow::promise::{
    CreateOptions, PromiseFailure, PromiseManager, PromiseState, ResumeOutcome, TriggerDescriptor,
};
use durable_flow::storage::{MemoryBackend, PersistenceAdapter};
use proptest::prelude::*;
use serde_json::{json, Value};
use std::sync::Arc;

#[derive(Debug, Clone)]
enum Op {
    Resolve(i64),
    Reject,
    Suspend,
    Resume(i64),
    Cancel,
    Expire,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        any::<i64>().prop_map(Op::Resolve),
        Just(Op::Reject),
        Just(Op::Suspend),
        any::<i64>().prop_map(Op::Resume),
        Just(Op::Cancel),
        Just(Op::Expire),
    ]
}

/// Reference model: state plus the value a resolution stored
#[derive(Debug, Clone, PartialEq)]
struct Model {
    state: PromiseState,
    value: Option<Value>,
}

impl Model {
    fn settle(&mut self, state: PromiseState, value: Option<Value>) -> bool {
        if self.state.is_terminal() {
            return false;
        }
        self.state = state;
        self.value = value;
        true
    }
}

fn descriptor() -> TriggerDescriptor {
    TriggerDescriptor {
        event_id: "model.event".to_string(),
        condition: None,
        once: true,
    }
}

async fn apply(manager: &Arc<PromiseManager>, model: &mut Model, op: &Op) {
    let id = "model";
    match op {
        Op::Resolve(n) => {
            let changed = manager.resolve(id, json!(n)).await.unwrap();
            assert_eq!(changed, model.settle(PromiseState::Resolved, Some(json!(n))));
        }
        Op::Reject => {
            let changed = manager
                .reject(id, PromiseFailure::error("model rejection"))
                .await
                .unwrap();
            assert_eq!(changed, model.settle(PromiseState::Rejected, None));
        }
        Op::Suspend => {
            let result = manager.suspend(id, vec![descriptor()], None).await;
            if model.state.is_terminal() {
                assert!(result.is_err());
            } else {
                assert_eq!(result.unwrap().state, PromiseState::Suspended);
                model.state = PromiseState::Suspended;
            }
        }
        Op::Resume(n) => {
            let outcome = manager.resume_promise(id, json!(n)).await.unwrap();
            if model.state == PromiseState::Suspended {
                assert!(outcome.is_resumed());
                model.settle(PromiseState::Resolved, Some(json!(n)));
            } else {
                assert_eq!(outcome, ResumeOutcome::NotSuspended(model.state));
            }
        }
        Op::Cancel => {
            let changed = manager.cancel(id, "model cancel").await.unwrap();
            assert_eq!(changed, model.settle(PromiseState::Rejected, None));
        }
        Op::Expire => {
            let changed = manager
                .expire(id, std::time::Duration::from_secs(1))
                .await
                .unwrap();
            let expected = model.state == PromiseState::Suspended
                && model.settle(PromiseState::Rejected, None);
            assert_eq!(changed, expected);
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_promise_matches_reference_model(ops in prop::collection::vec(op_strategy(), 1..24)) {
        tokio_test::block_on(async {
            let backend: Arc<dyn PersistenceAdapter> = Arc::new(MemoryBackend::new());
            let manager = PromiseManager::new(backend.clone());
            manager
                .create::<Value>(CreateOptions::new().with_id("model"))
                .await
                .unwrap();
            let mut model = Model { state: PromiseState::Pending, value: None };

            let mut settled_as: Option<(PromiseState, Option<Value>)> = None;
            for op in &ops {
                apply(&manager, &mut model, op).await;

                let record = manager.get("model").await.unwrap().unwrap();
                assert_eq!(record.state, model.state, "after {:?}", op);
                if record.state.is_terminal() {
                    let current = (record.state, record.value.clone());
                    let first = settled_as.get_or_insert_with(|| current.clone());
                    assert_eq!(*first, current, "settled promise changed after {:?}", op);
                    assert!(record.triggers.is_empty());
                }
            }

            let reloaded = PromiseManager::new(backend);
            let persisted = reloaded.get("model").await.unwrap().unwrap();
            assert_eq!(persisted.state, model.state);
            assert_eq!(persisted.value, model.value);
        });
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_resolution_settles_exactly_once() {
    let manager = PromiseManager::new(Arc::new(MemoryBackend::new()));
    let promise = manager
        .create::<i64>(CreateOptions::new().with_id("contended"))
        .await
        .unwrap();

    let attempts: Vec<_> = (0..20i64)
        .map(|n| {
            let manager = manager.clone();
            tokio::spawn(async move { (n, manager.resolve("contended", json!(n)).await.unwrap()) })
        })
        .collect();

    let mut winners = Vec::new();
    for attempt in attempts {
        let (n, won) = attempt.await.unwrap();
        if won {
            winners.push(n);
        }
    }
    assert_eq!(winners.len(), 1);
    assert_eq!(promise.result().await.unwrap(), winners[0]);

    assert!(!manager.resolve("contended", json!(-1)).await.unwrap());
    assert!(!manager.cancel("contended", "too late").await.unwrap());
    assert_eq!(promise.result().await.unwrap(), winners[0]);
}

#[tokio::test]
async fn test_duplicate_id_is_rejected() {
    let manager = PromiseManager::new(Arc::new(MemoryBackend::new()));
    manager
        .create::<Value>(CreateOptions::new().with_id("dup"))
        .await
        .unwrap();
    let err = manager
        .create::<Value>(CreateOptions::new().with_id("dup"))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("dup"));
}
