//! Context handed to running steps

use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Notify, RwLock};
use tracing::{debug, info};

use super::error::{StepError, StepResult};
use super::record::{checkpoint_variable, Variables};
use super::store::ExecutionStore;
use crate::events::SuspensionTrigger;
use crate::promise::{
    CreateOptions, DistributedPromise, PromiseManager, PromiseMetadata, PromiseResolver,
};
use crate::suspension::{DistributedAwait, Wakeup};

/// Cooperative control flags of one execution
#[derive(Default)]
pub(crate) struct ExecutionControl {
    cancel: std::sync::Mutex<Option<String>>,
    pause: AtomicBool,
    suspended_on: std::sync::Mutex<Option<String>>,
    changed: Notify,
}

impl ExecutionControl {
    pub(crate) fn request_cancel(&self, reason: &str) {
        if let Ok(mut cancel) = self.cancel.lock() {
            cancel.get_or_insert_with(|| reason.to_string());
        }
        self.changed.notify_one();
    }

    pub(crate) fn cancel_reason(&self) -> Option<String> {
        self.cancel.lock().ok().and_then(|c| c.clone())
    }

    pub(crate) fn request_pause(&self) {
        self.pause.store(true, Ordering::SeqCst);
        self.changed.notify_one();
    }

    pub(crate) fn pause_requested(&self) -> bool {
        self.pause.load(Ordering::SeqCst)
    }

    /// Promise the execution is currently suspended on
    pub(crate) fn suspended_on(&self) -> Option<String> {
        self.suspended_on.lock().ok().and_then(|s| s.clone())
    }

    fn set_suspended_on(&self, promise_id: Option<String>) {
        if let Ok(mut current) = self.suspended_on.lock() {
            *current = promise_id;
        }
    }

    /// Sleep for `delay` unless a cancel or pause request arrives first
    pub(crate) async fn sleep(&self, delay: Duration) {
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = self.changed.notified() => {}
        }
    }
}

pub(crate) struct ContextParts {
    pub execution_id: String,
    pub step_id: String,
    /// Namespace of promise ids created through the context
    pub scope: String,
    pub attempt: u32,
    pub promises: Arc<PromiseManager>,
    pub awaiter: Arc<DistributedAwait>,
    pub store: ExecutionStore,
    pub variables: Arc<RwLock<Variables>>,
    pub checkpoint_interval: Duration,
    pub control: Arc<ExecutionControl>,
}

struct ContextInner {
    parts: ContextParts,
    promise_seq: AtomicU32,
    last_flush: Mutex<Option<Instant>>,
}

/// Services available to a step while it runs
///
/// Cheap to clone. Promise ids created through the context are derived from
/// the execution, step, attempt and creation order, so a step replayed
/// after a restart gets back the promises of its interrupted attempt.
#[derive(Clone)]
pub struct StepContext {
    inner: Arc<ContextInner>,
}

impl fmt::Debug for StepContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepContext")
            .field("execution_id", &self.inner.parts.execution_id)
            .field("step_id", &self.inner.parts.step_id)
            .field("attempt", &self.inner.parts.attempt)
            .finish()
    }
}

impl StepContext {
    pub(crate) fn new(parts: ContextParts) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                parts,
                promise_seq: AtomicU32::new(0),
                last_flush: Mutex::new(None),
            }),
        }
    }

    pub fn execution_id(&self) -> &str {
        &self.inner.parts.execution_id
    }

    pub fn step_id(&self) -> &str {
        &self.inner.parts.step_id
    }

    /// Zero-based attempt number of this run of the step
    pub fn attempt(&self) -> u32 {
        self.inner.parts.attempt
    }

    /// A variable of the execution, e.g. the output of an earlier step
    pub async fn variable(&self, name: &str) -> Option<Value> {
        self.inner.parts.variables.read().await.get(name).cloned()
    }

    /// Decode a variable into `T`
    pub async fn variable_as<T: DeserializeOwned>(&self, name: &str) -> StepResult<Option<T>> {
        match self.variable(name).await {
            Some(value) => serde_json::from_value(value)
                .map(Some)
                .map_err(|e| StepError::permanent(format!("variable {} has wrong shape: {}", name, e))),
            None => Ok(None),
        }
    }

    /// Snapshot of all variables
    pub async fn variables(&self) -> Variables {
        self.inner.parts.variables.read().await.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.parts.control.cancel_reason().is_some()
    }

    pub fn is_pause_requested(&self) -> bool {
        self.inner.parts.control.pause_requested()
    }

    fn next_promise_id(&self) -> String {
        let seq = self.inner.promise_seq.fetch_add(1, Ordering::SeqCst);
        format!(
            "{}.{}.{}.{}",
            self.execution_id(),
            self.inner.parts.scope,
            self.attempt(),
            seq
        )
    }

    fn metadata(&self) -> PromiseMetadata {
        PromiseMetadata::for_task(self.execution_id())
            .with_execution(self.execution_id())
            .with_step(self.step_id())
            .with_tag("attempt", self.attempt().to_string())
    }

    fn ensure_not_cancelled(&self) -> StepResult<()> {
        match self.inner.parts.control.cancel_reason() {
            Some(reason) => Err(StepError::Cancelled(reason)),
            None => Ok(()),
        }
    }

    /// Create (or, on replay, adopt) a distributed promise owned by this step
    ///
    /// `executor` only runs when the promise is newly created.
    pub async fn create_distributed_promise<T, F>(
        &self,
        executor: F,
    ) -> StepResult<DistributedPromise<T>>
    where
        F: FnOnce(PromiseResolver<T>),
    {
        let id = self.next_promise_id();
        let promises = &self.inner.parts.promises;
        if let Some(existing) = promises.handle::<T>(&id).await? {
            debug!("Step {} adopted promise {} on replay", self.step_id(), id);
            return Ok(existing);
        }
        let options = CreateOptions::new()
            .with_id(id)
            .with_metadata(self.metadata());
        Ok(promises.create_promise(executor, options).await?)
    }

    /// Suspend the step until one of `triggers` fires
    pub async fn suspend_until_event<T: DeserializeOwned>(
        &self,
        triggers: Vec<SuspensionTrigger>,
    ) -> StepResult<T> {
        self.ensure_not_cancelled()?;
        let promise = self.suspension_promise::<T>().await?;
        let outcome = self
            .suspended(&promise, self.inner.parts.awaiter.suspend_for_event(&promise, triggers))
            .await;
        Ok(outcome?)
    }

    /// Suspend until an event or until `duration` elapses
    pub async fn suspend_for_duration<T: DeserializeOwned>(
        &self,
        duration: Duration,
        triggers: Vec<SuspensionTrigger>,
    ) -> StepResult<Wakeup<T>> {
        self.ensure_not_cancelled()?;
        let promise = self.suspension_promise::<T>().await?;
        let outcome = self
            .suspended(
                &promise,
                self.inner
                    .parts
                    .awaiter
                    .suspend_for_duration(&promise, duration, triggers),
            )
            .await;
        Ok(outcome?)
    }

    /// Suspend until an event; no event within `timeout` fails with
    /// [`StepError::SuspensionTimeout`]
    pub async fn suspend_until_event_with_timeout<T: DeserializeOwned>(
        &self,
        timeout: Duration,
        triggers: Vec<SuspensionTrigger>,
    ) -> StepResult<T> {
        self.ensure_not_cancelled()?;
        let promise = self.suspension_promise::<T>().await?;
        let outcome = self
            .suspended(
                &promise,
                self.inner
                    .parts
                    .awaiter
                    .suspend_with_timeout(&promise, timeout, triggers),
            )
            .await;
        Ok(outcome?)
    }

    /// Promise backing a suspension helper; adopted on replay
    async fn suspension_promise<T>(&self) -> StepResult<DistributedPromise<T>> {
        let options = CreateOptions::new()
            .with_id(self.next_promise_id())
            .with_metadata(self.metadata());
        Ok(self.inner.parts.promises.restore_or_create(options).await?)
    }

    async fn suspended<T, R>(
        &self,
        promise: &DistributedPromise<T>,
        wait: impl std::future::Future<Output = R>,
    ) -> R {
        let control = &self.inner.parts.control;
        control.set_suspended_on(Some(promise.id().to_string()));
        let outcome = wait.await;
        control.set_suspended_on(None);
        outcome
    }

    /// Persist partial progress of a long-running step
    ///
    /// Flushes are spaced at least `checkpoint_interval` apart; returns
    /// whether this call wrote to storage. The first call always writes.
    pub async fn checkpoint(&self, data: Value) -> StepResult<bool> {
        let interval = self.inner.parts.checkpoint_interval;
        let mut last_flush = self.inner.last_flush.lock().await;
        let due = last_flush.map_or(true, |at| at.elapsed() >= interval);

        let name = checkpoint_variable(self.step_id());
        let mut variables = self.inner.parts.variables.write().await;
        variables.insert(name, data);
        if !due {
            return Ok(false);
        }

        self.inner
            .parts
            .store
            .save_variables(self.execution_id(), &variables)
            .await?;
        *last_flush = Some(Instant::now());
        info!(
            "Checkpointed progress of step {} in execution {}",
            self.step_id(),
            self.execution_id()
        );
        Ok(true)
    }

    /// Write the latest checkpoint data regardless of the interval
    pub async fn flush_checkpoint(&self) -> StepResult<()> {
        let variables = self.inner.parts.variables.read().await;
        self.inner
            .parts
            .store
            .save_variables(self.execution_id(), &variables)
            .await?;
        *self.inner.last_flush.lock().await = Some(Instant::now());
        Ok(())
    }

    /// Data from the last `checkpoint` of this step, including one from an
    /// interrupted earlier attempt
    pub async fn last_checkpoint(&self) -> Option<Value> {
        self.variable(&checkpoint_variable(self.step_id())).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EventRegistry, TimerService};
    use crate::storage::MemoryBackend;
    use serde_json::json;

    fn context(backend: Arc<MemoryBackend>, interval: Duration) -> StepContext {
        let promises = PromiseManager::new(backend.clone());
        let registry = EventRegistry::new();
        let timers = TimerService::new(registry.clone());
        let awaiter = DistributedAwait::new(promises.clone(), registry, timers);
        StepContext::new(ContextParts {
            execution_id: "exec".into(),
            step_id: "scan".into(),
            scope: "scan".into(),
            attempt: 0,
            promises,
            awaiter,
            store: ExecutionStore::new(backend),
            variables: Arc::new(RwLock::new(Variables::new())),
            checkpoint_interval: interval,
            control: Arc::new(ExecutionControl::default()),
        })
    }

    #[tokio::test]
    async fn test_checkpoint_is_throttled() {
        let backend = Arc::new(MemoryBackend::new());
        let ctx = context(backend.clone(), Duration::from_secs(60));

        assert!(ctx.checkpoint(json!({"done": 1})).await.unwrap());
        assert!(!ctx.checkpoint(json!({"done": 2})).await.unwrap());
        assert_eq!(backend.write_count(), 1);
        assert_eq!(ctx.last_checkpoint().await, Some(json!({"done": 2})));

        ctx.flush_checkpoint().await.unwrap();
        let store = ExecutionStore::new(backend);
        let saved = store.load_variables("exec").await.unwrap();
        assert_eq!(saved["checkpoint:scan"], json!({"done": 2}));
    }

    #[tokio::test]
    async fn test_promise_ids_are_deterministic() {
        let backend = Arc::new(MemoryBackend::new());
        let ctx = context(backend.clone(), Duration::ZERO);
        let first = ctx.create_distributed_promise::<u32, _>(|_| {}).await.unwrap();
        let second = ctx.create_distributed_promise::<u32, _>(|_| {}).await.unwrap();
        assert_eq!(first.id(), "exec.scan.0.0");
        assert_eq!(second.id(), "exec.scan.0.1");

        // A replay of the same attempt adopts the same promises
        let replay = context(backend, Duration::ZERO);
        let adopted = replay.create_distributed_promise::<u32, _>(|_| {}).await.unwrap();
        assert_eq!(adopted.id(), "exec.scan.0.0");
    }

    #[tokio::test]
    async fn test_cancelled_context_refuses_to_suspend() {
        let backend = Arc::new(MemoryBackend::new());
        let ctx = context(backend, Duration::ZERO);
        ctx.inner.parts.control.request_cancel("stop");
        assert!(ctx.is_cancelled());
        let err = ctx
            .suspend_until_event::<Value>(vec![SuspensionTrigger::new("e")])
            .await
            .unwrap_err();
        assert!(matches!(err, StepError::Cancelled(_)));
    }
}
