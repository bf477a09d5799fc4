//! Common test utilities and helpers

#![allow(dead_code)]

use durable_flow::config::DurableConfig;
use durable_flow::pipeline::{ExecutionStatus, StepDefinition};
use durable_flow::storage::{FileBackend, MemoryBackend, PersistenceAdapter, StorageConfig};
use durable_flow::DurableRuntime;
use serde_json::{json, Value};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Configuration with short delays so tests finish quickly
pub fn fast_config() -> DurableConfig {
    let mut config = DurableConfig::default();
    config.orchestrator.retry_delay = Duration::from_millis(10);
    config.orchestrator.checkpoint_interval = Duration::ZERO;
    config.orchestrator.heartbeat_interval = Duration::from_millis(500);
    config.orchestrator.lock_ttl = Duration::from_secs(5);
    config.orchestrator.lock_retries = 5;
    config.orchestrator.lock_retry_delay = Duration::from_millis(50);
    config.recovery.stale_threshold = Duration::from_secs(2);
    config
}

pub fn memory_runtime(backend: Arc<MemoryBackend>) -> DurableRuntime {
    let adapter: Arc<dyn PersistenceAdapter> = backend;
    DurableRuntime::with_adapter(fast_config(), adapter)
}

pub async fn file_runtime(dir: &Path) -> DurableRuntime {
    let backend = FileBackend::new(&StorageConfig::file(dir))
        .await
        .expect("open file backend");
    DurableRuntime::with_adapter(fast_config(), Arc::new(backend))
}

/// Step that counts its runs and returns `{"step": id, "run": n}`
pub fn counting_step(id: &str, runs: Arc<AtomicUsize>) -> StepDefinition {
    let name = id.to_string();
    StepDefinition::from_fn(id, move |_, _| {
        let runs = runs.clone();
        let name = name.clone();
        async move {
            let run = runs.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(json!({ "step": name, "run": run }))
        }
    })
}

pub fn counter() -> Arc<AtomicUsize> {
    Arc::new(AtomicUsize::new(0))
}

pub fn count(counter: &Arc<AtomicUsize>) -> usize {
    counter.load(Ordering::SeqCst)
}

/// Poll an async condition every 10ms until it holds or five seconds pass
///
/// Evaluates to whether the condition held.
macro_rules! eventually {
    ($cond:expr) => {{
        let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(5);
        loop {
            if $cond {
                break true;
            }
            if tokio::time::Instant::now() >= deadline {
                break false;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
    }};
}

/// Wait until an execution reaches `status`
pub async fn wait_for_status(runtime: &DurableRuntime, id: &str, status: ExecutionStatus) -> bool {
    eventually!(matches!(
        runtime.orchestrator().get_execution(id).await,
        Ok(Some(snapshot)) if snapshot.status() == status
    ))
}

/// Wait until this process stops driving an execution
pub async fn wait_until_idle(runtime: &DurableRuntime, id: &str) -> bool {
    eventually!(!runtime.orchestrator().is_active(id).await)
}

pub fn null() -> Value {
    Value::Null
}
