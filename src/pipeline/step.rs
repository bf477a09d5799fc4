//! Step definitions and the handler contract

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;
use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use super::context::StepContext;
use super::error::{PipelineError, PipelineResult, StepResult};
use super::record::CHECKPOINT_PREFIX;
use super::retry::BackoffStrategy;

/// Work performed by one step
///
/// Handlers receive the execution input and a [`StepContext`]; outputs of
/// earlier steps are available through [`StepContext::variable`]. Handlers
/// must not capture live connections: only `(input, context)` crosses a
/// migration boundary.
#[async_trait]
pub trait StepHandler: Send + Sync {
    async fn run(&self, input: Value, ctx: StepContext) -> StepResult<Value>;

    /// Undo this step's effect after a later step failed permanently
    async fn compensate(&self, _input: Value, _output: Value, _ctx: StepContext) -> StepResult<()> {
        Ok(())
    }

    fn has_compensation(&self) -> bool {
        false
    }
}

type RunFn = Arc<dyn Fn(Value, StepContext) -> BoxFuture<'static, StepResult<Value>> + Send + Sync>;
type CompensateFn =
    Arc<dyn Fn(Value, Value, StepContext) -> BoxFuture<'static, StepResult<()>> + Send + Sync>;

/// Handler built from closures
struct FnHandler {
    run: RunFn,
    compensate: Option<CompensateFn>,
}

#[async_trait]
impl StepHandler for FnHandler {
    async fn run(&self, input: Value, ctx: StepContext) -> StepResult<Value> {
        (self.run)(input, ctx).await
    }

    async fn compensate(&self, input: Value, output: Value, ctx: StepContext) -> StepResult<()> {
        match &self.compensate {
            Some(compensate) => compensate(input, output, ctx).await,
            None => Ok(()),
        }
    }

    fn has_compensation(&self) -> bool {
        self.compensate.is_some()
    }
}

/// Distributed execution flags of a step
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DistributedOptions {
    /// The step's continuation may move to another worker
    pub migratable: bool,
    /// Events that resume the execution while it waits at this step
    pub resume_events: Vec<String>,
    /// Lease age after which a stalled run of this step is considered abandoned
    pub migration_timeout: Option<Duration>,
}

/// One step of a pipeline
#[derive(Clone)]
pub struct StepDefinition {
    pub id: String,
    pub max_retries: Option<u32>,
    pub retry_delay: Option<Duration>,
    pub backoff: Option<BackoffStrategy>,
    pub timeout: Option<Duration>,
    pub handler: Arc<dyn StepHandler>,
    pub distributed: Option<DistributedOptions>,
}

impl fmt::Debug for StepDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepDefinition")
            .field("id", &self.id)
            .field("max_retries", &self.max_retries)
            .field("retry_delay", &self.retry_delay)
            .field("timeout", &self.timeout)
            .field("compensates", &self.handler.has_compensation())
            .field("distributed", &self.distributed)
            .finish()
    }
}

impl StepDefinition {
    pub fn new(id: impl Into<String>, handler: Arc<dyn StepHandler>) -> Self {
        Self {
            id: id.into(),
            max_retries: None,
            retry_delay: None,
            backoff: None,
            timeout: None,
            handler,
            distributed: None,
        }
    }

    /// Step backed by an async closure
    pub fn from_fn<F, Fut>(id: impl Into<String>, run: F) -> Self
    where
        F: Fn(Value, StepContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = StepResult<Value>> + Send + 'static,
    {
        let run: RunFn = Arc::new(move |input, ctx| run(input, ctx).boxed());
        Self::new(
            id,
            Arc::new(FnHandler {
                run,
                compensate: None,
            }),
        )
    }

    /// Attach a compensation closure
    ///
    /// Replaces the handler's own compensation when both exist.
    pub fn with_compensation<F, Fut>(mut self, compensate: F) -> Self
    where
        F: Fn(Value, Value, StepContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = StepResult<()>> + Send + 'static,
    {
        let compensate: CompensateFn =
            Arc::new(move |input, output, ctx| compensate(input, output, ctx).boxed());
        let inner = self.handler.clone();
        let run: RunFn = Arc::new(move |input, ctx| {
            let inner = inner.clone();
            async move { inner.run(input, ctx).await }.boxed()
        });
        self.handler = Arc::new(FnHandler {
            run,
            compensate: Some(compensate),
        });
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = Some(delay);
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffStrategy) -> Self {
        self.backoff = Some(backoff);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_distributed(mut self, distributed: DistributedOptions) -> Self {
        self.distributed = Some(distributed);
        self
    }

    /// Shorthand for a migratable step
    pub fn migratable(mut self) -> Self {
        self.distributed
            .get_or_insert_with(DistributedOptions::default)
            .migratable = true;
        self
    }

    pub fn is_migratable(&self) -> bool {
        self.distributed.as_ref().is_some_and(|d| d.migratable)
    }

    pub fn resume_events(&self) -> &[String] {
        self.distributed
            .as_ref()
            .map(|d| d.resume_events.as_slice())
            .unwrap_or(&[])
    }

    pub fn migration_timeout(&self) -> Option<Duration> {
        self.distributed.as_ref().and_then(|d| d.migration_timeout)
    }
}

/// An ordered list of steps registered under a name
#[derive(Debug, Clone)]
pub struct Pipeline {
    pub name: String,
    pub steps: Vec<StepDefinition>,
}

impl Pipeline {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
        }
    }

    pub fn step(mut self, step: StepDefinition) -> Self {
        self.steps.push(step);
        self
    }

    pub fn get_step(&self, id: &str) -> Option<&StepDefinition> {
        self.steps.iter().find(|s| s.id == id)
    }

    pub fn validate(&self) -> PipelineResult<()> {
        if self.name.trim().is_empty() {
            return Err(PipelineError::Invalid("pipeline name is empty".into()));
        }
        if self.steps.is_empty() {
            return Err(PipelineError::Invalid(format!(
                "pipeline {} has no steps",
                self.name
            )));
        }

        let mut seen = HashSet::new();
        for step in &self.steps {
            if step.id.trim().is_empty() || step.id.starts_with(CHECKPOINT_PREFIX) {
                return Err(PipelineError::Invalid(format!(
                    "invalid step id '{}' in pipeline {}",
                    step.id, self.name
                )));
            }
            if !seen.insert(step.id.as_str()) {
                return Err(PipelineError::Invalid(format!(
                    "duplicate step id '{}' in pipeline {}",
                    step.id, self.name
                )));
            }
        }
        Ok(())
    }
}
