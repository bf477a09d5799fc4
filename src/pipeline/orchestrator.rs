//! Pipeline orchestrator
//!
//! Drives registered pipelines step by step, persisting a checkpoint after
//! every completed step so an execution interrupted at any point resumes
//! from the first step not yet recorded as completed.
//!
//! Exclusivity has two layers: within a process the `active` table holds one
//! [`ExecutionControl`] per execution being driven, across processes the
//! storage lock `execution-<id>` (refreshed by the heartbeat together with
//! the record's `last_update` lease) keeps a second worker out.

use chrono::Utc;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::config::{ExecutionOptions, OrchestratorConfig};
use super::context::{ContextParts, ExecutionControl, StepContext};
use super::error::{PipelineError, PipelineResult, StepError};
use super::record::{
    checkpoint_variable, Continuation, ErrorKind, ExecutionRecord, ExecutionSnapshot,
    ExecutionStatus, Variables,
};
use super::step::{Pipeline, StepDefinition};
use super::store::ExecutionStore;
use crate::events::{EventRegistry, SuspensionTrigger};
use crate::promise::PromiseManager;
use crate::recovery::RecoveryReport;
use crate::storage::{acquire_with_retry, lock::current_holder, StorageLockGuard};
use crate::suspension::DistributedAwait;

type SharedGuard = Arc<Mutex<Option<Box<dyn StorageLockGuard>>>>;

/// Storage lock claiming an execution
fn lock_key(execution_id: &str) -> String {
    format!("execution-{}", execution_id)
}

/// Owner tag of an execution's resume-event listeners
fn resume_owner(execution_id: &str) -> String {
    format!("execution:{}", execution_id)
}

/// First step of the pipeline not yet completed
fn next_step<'a>(pipeline: &'a Pipeline, record: &ExecutionRecord) -> Option<&'a StepDefinition> {
    pipeline.steps.iter().find(|s| !record.is_completed(&s.id))
}

/// Heartbeat task of one run; stops when dropped, also when the run is aborted
struct Heartbeat(JoinHandle<()>);

impl Drop for Heartbeat {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Shared state of one run
struct RunState {
    id: String,
    pipeline: Arc<Pipeline>,
    input: Value,
    checkpoint_interval: Duration,
    record: Arc<Mutex<ExecutionRecord>>,
    variables: Arc<RwLock<Variables>>,
    control: Arc<ExecutionControl>,
}

pub struct Orchestrator {
    store: ExecutionStore,
    promises: Arc<PromiseManager>,
    awaiter: Arc<DistributedAwait>,
    registry: Arc<EventRegistry>,
    config: OrchestratorConfig,
    pipelines: RwLock<HashMap<String, Arc<Pipeline>>>,
    active: Mutex<HashMap<String, Arc<ExecutionControl>>>,
    this: Weak<Orchestrator>,
}

impl Orchestrator {
    pub fn new(
        store: ExecutionStore,
        promises: Arc<PromiseManager>,
        awaiter: Arc<DistributedAwait>,
        config: OrchestratorConfig,
    ) -> Arc<Self> {
        let registry = awaiter.registry().clone();
        Arc::new_cyclic(|this| Self {
            store,
            promises,
            awaiter,
            registry,
            config,
            pipelines: RwLock::new(HashMap::new()),
            active: Mutex::new(HashMap::new()),
            this: this.clone(),
        })
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn store(&self) -> &ExecutionStore {
        &self.store
    }

    /// Register (or replace) a pipeline under its name
    pub async fn register(&self, pipeline: Pipeline) -> PipelineResult<()> {
        pipeline.validate()?;
        let name = pipeline.name.clone();
        let replaced = self
            .pipelines
            .write()
            .await
            .insert(name.clone(), Arc::new(pipeline))
            .is_some();
        if replaced {
            info!("Replaced pipeline {}", name);
        } else {
            debug!("Registered pipeline {}", name);
        }
        Ok(())
    }

    /// Names of registered pipelines, sorted
    pub async fn pipelines(&self) -> Vec<String> {
        let mut names: Vec<String> = self.pipelines.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    async fn pipeline(&self, name: &str) -> PipelineResult<Arc<Pipeline>> {
        self.pipelines
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| PipelineError::NotRegistered(name.to_string()))
    }

    /// Whether this process is currently driving the execution
    pub async fn is_active(&self, id: &str) -> bool {
        self.active.lock().await.contains_key(id)
    }

    /// Create and run an execution to its end (or until paused)
    pub async fn execute(
        &self,
        pipeline: &str,
        input: Value,
        options: ExecutionOptions,
    ) -> PipelineResult<ExecutionSnapshot> {
        let id = self.enqueue(pipeline, input, options).await?;
        self.run(&id).await
    }

    /// Create an execution and drive it in a background task
    pub async fn start(
        &self,
        pipeline: &str,
        input: Value,
        options: ExecutionOptions,
    ) -> PipelineResult<String> {
        let id = self.enqueue(pipeline, input, options).await?;
        self.spawn_run(id.clone());
        Ok(id)
    }

    /// Continue a queued, paused or abandoned execution
    pub async fn resume(&self, id: &str) -> PipelineResult<ExecutionSnapshot> {
        info!("Resuming execution {}", id);
        self.run(id).await
    }

    /// Continue an execution in a background task
    pub async fn resume_in_background(&self, id: &str) -> PipelineResult<()> {
        let record = self
            .store
            .load_state(id)
            .await?
            .ok_or_else(|| PipelineError::ExecutionNotFound(id.to_string()))?;
        if record.status.is_terminal() {
            return Err(PipelineError::NotResumable {
                id: id.to_string(),
                status: record.status,
            });
        }
        self.spawn_run(id.to_string());
        Ok(())
    }

    async fn enqueue(
        &self,
        pipeline: &str,
        input: Value,
        options: ExecutionOptions,
    ) -> PipelineResult<String> {
        self.pipeline(pipeline).await?;
        let id = options
            .execution_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        if self.store.load_state(&id).await?.is_some() {
            return Err(PipelineError::Invalid(format!(
                "execution id {} is already in use",
                id
            )));
        }

        let record = ExecutionRecord::new(id.clone(), pipeline, input, options);
        self.store
            .checkpoint(&record, &Variables::new())
            .await
            .map_err(|source| PipelineError::Checkpoint {
                execution_id: id.clone(),
                source,
            })?;
        info!("Queued execution {} of pipeline {}", id, pipeline);
        Ok(id)
    }

    fn spawn_run(&self, id: String) -> Option<JoinHandle<PipelineResult<ExecutionSnapshot>>> {
        let this = self.this.upgrade()?;
        Some(tokio::spawn(async move {
            let result = this.run(&id).await;
            match &result {
                Ok(snapshot) => info!("Execution {} ended {}", id, snapshot.status()),
                Err(e) => warn!("Execution {} stopped: {}", id, e),
            }
            result
        }))
    }

    async fn claim(&self, id: &str) -> PipelineResult<Arc<ExecutionControl>> {
        let mut active = self.active.lock().await;
        if active.contains_key(id) {
            return Err(PipelineError::AlreadyRunning(id.to_string()));
        }
        let control = Arc::new(ExecutionControl::default());
        active.insert(id.to_string(), control.clone());
        Ok(control)
    }

    async fn unclaim(&self, id: &str) {
        self.active.lock().await.remove(id);
    }

    async fn lock_execution(&self, id: &str) -> PipelineResult<Box<dyn StorageLockGuard>> {
        acquire_with_retry(
            self.store.adapter().as_ref(),
            &lock_key(id),
            self.config.lock_ttl,
            self.config.lock_retries,
            self.config.lock_retry_delay,
        )
        .await
        .map_err(|e| {
            if e.is_conflict() {
                PipelineError::AlreadyRunning(id.to_string())
            } else {
                PipelineError::Storage(e)
            }
        })
    }

    async fn release(&self, id: &str, guard: Box<dyn StorageLockGuard>) {
        if let Err(e) = guard.release().await {
            warn!("Failed to release lock of execution {}: {}", id, e);
        }
    }

    async fn run(&self, id: &str) -> PipelineResult<ExecutionSnapshot> {
        let control = self.claim(id).await?;
        let result = match self.lock_execution(id).await {
            Ok(guard) => self.run_locked(id, control, guard).await,
            Err(e) => Err(e),
        };
        self.unclaim(id).await;
        result
    }

    async fn run_locked(
        &self,
        id: &str,
        control: Arc<ExecutionControl>,
        guard: Box<dyn StorageLockGuard>,
    ) -> PipelineResult<ExecutionSnapshot> {
        let setup = self.prepare_run(id, control).await;
        let run = match setup {
            Ok(run) => run,
            Err(e) => {
                self.release(id, guard).await;
                return Err(e);
            }
        };

        let guard: SharedGuard = Arc::new(Mutex::new(Some(guard)));
        let heartbeat = self.spawn_heartbeat(&run, guard.clone());
        let result = self.drive(&run).await;
        drop(heartbeat);

        if let Some(guard) = guard.lock().await.take() {
            self.release(id, guard).await;
        }
        result
    }

    /// Load the execution and mark it running
    async fn prepare_run(
        &self,
        id: &str,
        control: Arc<ExecutionControl>,
    ) -> PipelineResult<RunState> {
        let snapshot = self
            .store
            .load(id)
            .await?
            .ok_or_else(|| PipelineError::ExecutionNotFound(id.to_string()))?;
        let mut record = snapshot.record;
        if record.status.is_terminal() {
            return Err(PipelineError::NotResumable {
                id: id.to_string(),
                status: record.status,
            });
        }
        if record.status == ExecutionStatus::Paused {
            debug!("Execution {} paused -> queued", id);
            record.status = ExecutionStatus::Queued;
            record.touch();
            self.store
                .save_state(&record)
                .await
                .map_err(|source| PipelineError::Checkpoint {
                    execution_id: id.to_string(),
                    source,
                })?;
        }
        let pipeline = self.pipeline(&record.pipeline).await?;

        if let Some(reason) = &record.cancel_requested {
            control.request_cancel(reason);
        }
        self.registry.disarm_owner(&resume_owner(id)).await;

        debug!("Execution {} {} -> running", id, record.status);
        record.status = ExecutionStatus::Running;
        record.worker = Some(current_holder());
        record.touch();
        self.store
            .save_state(&record)
            .await
            .map_err(|source| PipelineError::Checkpoint {
                execution_id: id.to_string(),
                source,
            })?;

        Ok(RunState {
            id: id.to_string(),
            input: record.input.clone(),
            checkpoint_interval: record.options.checkpoint_interval(&self.config),
            pipeline,
            record: Arc::new(Mutex::new(record)),
            variables: Arc::new(RwLock::new(snapshot.variables)),
            control,
        })
    }

    /// Refresh the lease and the storage lock while the run is in progress
    fn spawn_heartbeat(&self, run: &RunState, guard: SharedGuard) -> Heartbeat {
        let store = self.store.clone();
        let record = run.record.clone();
        let id = run.id.clone();
        let period = self.config.heartbeat_interval.max(Duration::from_millis(10));

        Heartbeat(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Some(guard) = guard.lock().await.as_mut() {
                    if let Err(e) = guard.refresh().await {
                        warn!("Failed to refresh lock of execution {}: {}", id, e);
                    }
                }
                let mut record = record.lock().await;
                record.touch();
                if let Err(e) = store.save_state(&record).await {
                    warn!("Heartbeat of execution {} not persisted: {}", id, e);
                }
            }
        }))
    }

    async fn drive(&self, run: &RunState) -> PipelineResult<ExecutionSnapshot> {
        for step in &run.pipeline.steps {
            if run.record.lock().await.is_completed(&step.id) {
                debug!("Skipping completed step {} of execution {}", step.id, run.id);
                continue;
            }
            if let Some(reason) = run.control.cancel_reason() {
                return Err(self.finish_cancelled(run, &reason).await);
            }
            if run.control.pause_requested() {
                return self.finish_paused(run, step).await;
            }
            self.run_step(run, step).await?;
        }

        let mut record = run.record.lock().await;
        record.status = ExecutionStatus::Completed;
        record.current_step = None;
        record.touch();
        self.store
            .save_state(&record)
            .await
            .map_err(|source| PipelineError::Checkpoint {
                execution_id: run.id.clone(),
                source,
            })?;
        info!(
            "Execution {} completed ({} steps)",
            run.id,
            record.completed_steps.len()
        );
        let record = record.clone();
        let variables = run.variables.read().await.clone();
        Ok(ExecutionSnapshot { record, variables })
    }

    async fn run_step(&self, run: &RunState, step: &StepDefinition) -> PipelineResult<()> {
        let policy = {
            let mut record = run.record.lock().await;
            record.current_step = Some(step.id.clone());
            record.migratable = step.is_migratable();
            record.migration_timeout_ms = step.migration_timeout().map(|d| d.as_millis() as u64);
            record.touch();
            self.store
                .save_state(&record)
                .await
                .map_err(|source| PipelineError::Checkpoint {
                    execution_id: run.id.clone(),
                    source,
                })?;
            record.options.retry_policy(step, &self.config)
        };

        loop {
            if let Some(reason) = run.control.cancel_reason() {
                return Err(self.finish_cancelled(run, &reason).await);
            }

            let attempt = run.record.lock().await.failures_of(&step.id);
            if !policy.should_retry(attempt) {
                let message = format!("no attempts left after {} failures", attempt);
                return Err(self.finish_failed(run, &step.id, message).await);
            }

            info!(
                "Running step {} of execution {} (attempt {}/{})",
                step.id,
                run.id,
                attempt + 1,
                policy.max_attempts()
            );
            let ctx = self.step_context(run, &step.id, step.id.clone(), attempt);
            let outcome = match step.timeout {
                Some(limit) => {
                    match tokio::time::timeout(limit, step.handler.run(run.input.clone(), ctx)).await
                    {
                        Ok(outcome) => outcome,
                        Err(_) => Err(StepError::Timeout {
                            step_id: step.id.clone(),
                            after: limit,
                        }),
                    }
                }
                None => step.handler.run(run.input.clone(), ctx).await,
            };

            let err = match outcome {
                Ok(output) => return self.commit_step(run, &step.id, output).await,
                Err(err) => err,
            };
            self.cancel_attempt_promises(run, &step.id, attempt, &err.to_string())
                .await;

            if let Some(reason) = run.control.cancel_reason() {
                return Err(self.finish_cancelled(run, &reason).await);
            }

            let failures = {
                let mut record = run.record.lock().await;
                record.record_failure(&step.id, err.kind(), err.to_string());
                record.touch();
                self.store
                    .save_state(&record)
                    .await
                    .map_err(|source| PipelineError::Checkpoint {
                        execution_id: run.id.clone(),
                        source,
                    })?;
                record.failures_of(&step.id)
            };

            if err.is_retryable() && policy.should_retry(failures) {
                let delay = policy.delay_for(failures);
                warn!(
                    "Step {} of execution {} failed (attempt {}/{}): {}; retrying in {:?}",
                    step.id,
                    run.id,
                    failures,
                    policy.max_attempts(),
                    err,
                    delay
                );
                run.control.sleep(delay).await;
                continue;
            }

            error!(
                "Step {} of execution {} failed permanently: {}",
                step.id, run.id, err
            );
            return Err(self.finish_failed(run, &step.id, err.to_string()).await);
        }
    }

    /// Record a step's output and checkpoint; rolled back in memory if the write fails
    async fn commit_step(&self, run: &RunState, step_id: &str, output: Value) -> PipelineResult<()> {
        let mut record = run.record.lock().await;
        let mut variables = run.variables.write().await;
        let previous_record = record.clone();
        let previous_variables = variables.clone();

        variables.insert(step_id.to_string(), output);
        variables.remove(&checkpoint_variable(step_id));
        record.mark_step_completed(step_id);
        record.touch();

        if let Err(source) = self.store.checkpoint(&record, &variables).await {
            *record = previous_record;
            *variables = previous_variables;
            error!(
                "Checkpoint after step {} of execution {} failed, the step will replay: {}",
                step_id, run.id, source
            );
            return Err(PipelineError::Checkpoint {
                execution_id: run.id.clone(),
                source,
            });
        }
        info!("Step {} of execution {} completed", step_id, run.id);
        Ok(())
    }

    fn step_context(&self, run: &RunState, step_id: &str, scope: String, attempt: u32) -> StepContext {
        StepContext::new(ContextParts {
            execution_id: run.id.clone(),
            step_id: step_id.to_string(),
            scope,
            attempt,
            promises: self.promises.clone(),
            awaiter: self.awaiter.clone(),
            store: self.store.clone(),
            variables: run.variables.clone(),
            checkpoint_interval: run.checkpoint_interval,
            control: run.control.clone(),
        })
    }

    /// Run compensations of completed steps, newest first
    ///
    /// A failing compensation is recorded and the remaining ones still run.
    async fn compensate(&self, run: &RunState) {
        let (completed, compensated) = {
            let record = run.record.lock().await;
            (
                record.completed_steps.clone(),
                record.compensated_steps.clone(),
            )
        };

        for step_id in completed.iter().rev() {
            if compensated.contains(step_id) {
                continue;
            }
            let Some(step) = run.pipeline.get_step(step_id) else {
                warn!(
                    "Completed step {} of execution {} is not in pipeline {}",
                    step_id, run.id, run.pipeline.name
                );
                continue;
            };
            if !step.handler.has_compensation() {
                continue;
            }

            let output = run
                .variables
                .read()
                .await
                .get(step_id)
                .cloned()
                .unwrap_or(Value::Null);
            let ctx = self.step_context(run, step_id, format!("{}-compensation", step_id), 0);
            info!("Compensating step {} of execution {}", step_id, run.id);
            let outcome = step.handler.compensate(run.input.clone(), output, ctx).await;

            let mut record = run.record.lock().await;
            match outcome {
                Ok(()) => record.compensated_steps.push(step_id.clone()),
                Err(e) => {
                    error!(
                        "Compensation of step {} in execution {} failed: {}",
                        step_id, run.id, e
                    );
                    record.record_error(Some(step_id), ErrorKind::Compensation, e.to_string());
                }
            }
            record.touch();
            if let Err(e) = self.store.save_state(&record).await {
                warn!(
                    "Compensation progress of execution {} not persisted: {}",
                    run.id, e
                );
            }
        }
    }

    async fn finish_failed(&self, run: &RunState, step_id: &str, message: String) -> PipelineError {
        self.compensate(run).await;

        let mut record = run.record.lock().await;
        record.status = ExecutionStatus::Failed;
        record.touch();
        if let Err(source) = self.store.save_state(&record).await {
            return PipelineError::Checkpoint {
                execution_id: run.id.clone(),
                source,
            };
        }
        PipelineError::StepFailed {
            execution_id: run.id.clone(),
            step_id: step_id.to_string(),
            message,
        }
    }

    async fn finish_cancelled(&self, run: &RunState, reason: &str) -> PipelineError {
        warn!("Cancelling execution {}: {}", run.id, reason);
        self.compensate(run).await;
        self.cancel_promises(&run.id, reason).await;
        self.registry.disarm_owner(&resume_owner(&run.id)).await;

        let mut record = run.record.lock().await;
        let step = record.current_step.clone();
        record.record_error(step.as_deref(), ErrorKind::Cancelled, reason);
        record.status = ExecutionStatus::Failed;
        record.cancel_requested = Some(reason.to_string());
        record.touch();
        if let Err(source) = self.store.save_state(&record).await {
            return PipelineError::Checkpoint {
                execution_id: run.id.clone(),
                source,
            };
        }
        PipelineError::Cancelled {
            execution_id: run.id.clone(),
            reason: reason.to_string(),
        }
    }

    async fn finish_paused(
        &self,
        run: &RunState,
        next: &StepDefinition,
    ) -> PipelineResult<ExecutionSnapshot> {
        let record = {
            let mut record = run.record.lock().await;
            record.status = ExecutionStatus::Paused;
            record.current_step = None;
            record.touch();
            self.store
                .save_state(&record)
                .await
                .map_err(|source| PipelineError::Checkpoint {
                    execution_id: run.id.clone(),
                    source,
                })?;
            record.clone()
        };
        self.arm_resume_events(&run.id, next.resume_events()).await;
        info!("Execution {} paused before step {}", run.id, next.id);

        let variables = run.variables.read().await.clone();
        Ok(ExecutionSnapshot { record, variables })
    }

    /// Resume the execution in the background when one of `events` fires
    async fn arm_resume_events(&self, id: &str, events: &[String]) {
        let owner = resume_owner(id);
        for event in events {
            let this = self.this.clone();
            let execution = id.to_string();
            self.registry
                .register(SuspensionTrigger::new(event.clone()), Some(&owner), move |fired| {
                    let this = this.clone();
                    let id = execution.clone();
                    async move {
                        let Some(this) = this.upgrade() else {
                            return;
                        };
                        info!("Event {} resumes execution {}", fired.event_id, id);
                        this.registry.disarm_owner(&resume_owner(&id)).await;
                        this.spawn_run(id);
                    }
                })
                .await;
            debug!("Execution {} resumes on {}", id, event);
        }
    }

    /// Cancel the unsettled promises a failed attempt left behind
    ///
    /// A step dropped by its timeout never reaches the disarm that follows
    /// its wait; a retry creates promises under a new attempt number.
    async fn cancel_attempt_promises(
        &self,
        run: &RunState,
        step_id: &str,
        attempt: u32,
        reason: &str,
    ) {
        let attempt = attempt.to_string();
        let leftovers = self.promises.list(None).await.into_iter().filter(|r| {
            !r.state.is_terminal()
                && r.metadata.execution_id.as_deref() == Some(run.id.as_str())
                && r.metadata.step_id.as_deref() == Some(step_id)
                && r.metadata.tags.get("attempt") == Some(&attempt)
        });
        for record in leftovers {
            debug!("Cancelling promise {} of failed attempt", record.id);
            if let Err(e) = self.awaiter.cancel(&record.id, reason).await {
                warn!("Failed to cancel promise {}: {}", record.id, e);
            }
        }
    }

    /// Cancel every unsettled promise created for an execution
    async fn cancel_promises(&self, id: &str, reason: &str) {
        let pending = self
            .promises
            .list(None)
            .await
            .into_iter()
            .filter(|r| !r.state.is_terminal() && r.metadata.execution_id.as_deref() == Some(id));
        for record in pending {
            if let Err(e) = self.awaiter.cancel(&record.id, reason).await {
                warn!("Failed to cancel promise {}: {}", record.id, e);
            }
        }
    }

    /// Ask an execution to stop at its next step boundary
    ///
    /// An execution not driven by this process is paused in place.
    pub async fn pause(&self, id: &str) -> PipelineResult<()> {
        if let Some(control) = self.active.lock().await.get(id).cloned() {
            info!("Pause requested for execution {}", id);
            control.request_pause();
            return Ok(());
        }

        self.claim(id).await?;
        let result = match self.lock_execution(id).await {
            Ok(guard) => {
                let outcome = self.pause_detached(id).await;
                self.release(id, guard).await;
                outcome
            }
            Err(e) => Err(e),
        };
        self.unclaim(id).await;
        result
    }

    async fn pause_detached(&self, id: &str) -> PipelineResult<()> {
        let mut record = self
            .store
            .load_state(id)
            .await?
            .ok_or_else(|| PipelineError::ExecutionNotFound(id.to_string()))?;
        match record.status {
            ExecutionStatus::Paused => return Ok(()),
            status if status.is_terminal() => {
                return Err(PipelineError::NotResumable {
                    id: id.to_string(),
                    status,
                })
            }
            _ => {}
        }

        record.status = ExecutionStatus::Paused;
        record.current_step = None;
        record.touch();
        self.store.save_state(&record).await?;
        if let Ok(pipeline) = self.pipeline(&record.pipeline).await {
            if let Some(step) = next_step(&pipeline, &record) {
                self.arm_resume_events(id, step.resume_events()).await;
            }
        }
        info!("Execution {} paused", id);
        Ok(())
    }

    /// Cancel an execution: compensate its completed steps and mark it failed
    ///
    /// A running execution stops at its next step boundary or suspension
    /// point; the suspension it waits on, if any, is cancelled right away.
    pub async fn cancel(&self, id: &str, reason: &str) -> PipelineResult<()> {
        if let Some(control) = self.active.lock().await.get(id).cloned() {
            info!("Cancel requested for execution {}: {}", id, reason);
            control.request_cancel(reason);
            if let Some(promise_id) = control.suspended_on() {
                self.awaiter.cancel(&promise_id, reason).await?;
            }
            return Ok(());
        }

        let control = self.claim(id).await?;
        let result = match self.lock_execution(id).await {
            Ok(guard) => {
                let outcome = self.cancel_detached(id, reason, control).await;
                self.release(id, guard).await;
                outcome
            }
            Err(e) => Err(e),
        };
        self.unclaim(id).await;
        result
    }

    async fn cancel_detached(
        &self,
        id: &str,
        reason: &str,
        control: Arc<ExecutionControl>,
    ) -> PipelineResult<()> {
        let snapshot = self
            .store
            .load(id)
            .await?
            .ok_or_else(|| PipelineError::ExecutionNotFound(id.to_string()))?;
        if snapshot.record.status.is_terminal() {
            return Err(PipelineError::NotResumable {
                id: id.to_string(),
                status: snapshot.record.status,
            });
        }
        let pipeline = self.pipeline(&snapshot.record.pipeline).await?;
        self.promises.restore_all().await?;

        control.request_cancel(reason);
        let run = RunState {
            id: id.to_string(),
            input: snapshot.record.input.clone(),
            checkpoint_interval: snapshot.record.options.checkpoint_interval(&self.config),
            pipeline,
            record: Arc::new(Mutex::new(snapshot.record)),
            variables: Arc::new(RwLock::new(snapshot.variables)),
            control,
        };
        match self.finish_cancelled(&run, reason).await {
            PipelineError::Cancelled { .. } => Ok(()),
            other => Err(other),
        }
    }

    pub async fn list_executions(&self) -> PipelineResult<Vec<ExecutionRecord>> {
        Ok(self.store.list_records().await?)
    }

    pub async fn get_execution(&self, id: &str) -> PipelineResult<Option<ExecutionSnapshot>> {
        Ok(self.store.load(id).await?)
    }

    /// Delete a finished execution together with its promises
    pub async fn cleanup(&self, id: &str) -> PipelineResult<()> {
        if self.is_active(id).await {
            return Err(PipelineError::AlreadyRunning(id.to_string()));
        }
        let record = self
            .store
            .load_state(id)
            .await?
            .ok_or_else(|| PipelineError::ExecutionNotFound(id.to_string()))?;
        if !record.status.is_terminal() {
            return Err(PipelineError::StillActive {
                id: id.to_string(),
                status: record.status,
            });
        }

        self.registry.disarm_owner(&resume_owner(id)).await;
        let forgotten = self.promises.forget_execution(id).await?;
        self.store.delete(id).await?;
        info!(
            "Cleaned up execution {} ({} promises removed)",
            id, forgotten
        );
        Ok(())
    }

    /// Serialize an execution so another worker can continue it
    ///
    /// Refused while the execution sits in a step that is not migratable.
    pub async fn export_continuation(&self, id: &str) -> PipelineResult<Continuation> {
        if self.is_active(id).await {
            return Err(PipelineError::AlreadyRunning(id.to_string()));
        }
        let guard = self.lock_execution(id).await?;
        let result = self.build_continuation(id).await;
        self.release(id, guard).await;
        result
    }

    async fn build_continuation(&self, id: &str) -> PipelineResult<Continuation> {
        let snapshot = self
            .store
            .load(id)
            .await?
            .ok_or_else(|| PipelineError::ExecutionNotFound(id.to_string()))?;
        let record = snapshot.record;
        if record.status.is_terminal() {
            return Err(PipelineError::NotResumable {
                id: id.to_string(),
                status: record.status,
            });
        }
        if let Some(step) = &record.current_step {
            if !record.migratable {
                return Err(PipelineError::Migration(format!(
                    "execution {} is in step {} which is not migratable",
                    id, step
                )));
            }
        }

        debug!("Exported continuation of execution {}", id);
        Ok(Continuation {
            execution_id: record.id,
            pipeline: record.pipeline,
            input: record.input,
            completed_steps: record.completed_steps,
            current_step: record.current_step,
            step_failures: record.step_failures,
            errors: record.errors,
            variables: snapshot.variables,
            options: record.options,
            exported_at: Utc::now(),
        })
    }

    /// Persist a continuation as a queued execution; returns its id
    pub async fn import_continuation(&self, ticket: Continuation) -> PipelineResult<String> {
        let pipeline = self.pipeline(&ticket.pipeline).await?;
        if let Some(unknown) = ticket
            .completed_steps
            .iter()
            .find(|s| pipeline.get_step(s).is_none())
        {
            return Err(PipelineError::Migration(format!(
                "step {} is not part of pipeline {}",
                unknown, ticket.pipeline
            )));
        }
        let id = ticket.execution_id.clone();
        if self.is_active(&id).await {
            return Err(PipelineError::AlreadyRunning(id));
        }

        let mut record =
            ExecutionRecord::new(id.clone(), ticket.pipeline, ticket.input, ticket.options);
        record.completed_steps = ticket.completed_steps;
        record.step_failures = ticket.step_failures;
        record.errors = ticket.errors;
        self.store
            .checkpoint(&record, &ticket.variables)
            .await
            .map_err(|source| PipelineError::Checkpoint {
                execution_id: id.clone(),
                source,
            })?;

        if let Some(step) = next_step(&pipeline, &record) {
            self.arm_resume_events(&id, step.resume_events()).await;
        }
        info!(
            "Imported execution {} exported at {} ({} steps completed)",
            id,
            ticket.exported_at,
            record.completed_steps.len()
        );
        Ok(id)
    }

    /// Pick up work found by recovery
    ///
    /// Re-queued and queued executions are resumed in the background; paused
    /// ones get their resume-event listeners back. Returns the ids resumed.
    pub async fn adopt_recovered(&self, report: &RecoveryReport) -> Vec<String> {
        let mut resumed = Vec::new();
        let queued = report
            .active
            .iter()
            .filter(|a| a.status == ExecutionStatus::Queued)
            .map(|a| &a.id);

        for id in report.requeued.iter().chain(queued) {
            match self.resume_in_background(id).await {
                Ok(()) => resumed.push(id.clone()),
                Err(e) => warn!("Cannot adopt execution {}: {}", id, e),
            }
        }

        for paused in report
            .active
            .iter()
            .filter(|a| a.status == ExecutionStatus::Paused)
        {
            let Ok(Some(record)) = self.store.load_state(&paused.id).await else {
                continue;
            };
            match self.pipeline(&record.pipeline).await {
                Ok(pipeline) => {
                    if let Some(step) = next_step(&pipeline, &record) {
                        self.arm_resume_events(&record.id, step.resume_events()).await;
                    }
                }
                Err(e) => warn!("Cannot adopt paused execution {}: {}", record.id, e),
            }
        }
        resumed
    }
}

