//! Pipelines of steps and the orchestrator that drives them
//!
//! A [`Pipeline`] is an ordered list of [`StepDefinition`]s registered with
//! the [`Orchestrator`] under a name. Each run is an execution whose
//! [`ExecutionRecord`] and variables are checkpointed after every step.

pub mod config;
pub mod context;
pub mod error;
pub mod orchestrator;
pub mod record;
pub mod retry;
pub mod step;
pub mod store;

pub use config::{ExecutionOptions, OrchestratorConfig};
pub use context::StepContext;
pub use error::{PipelineError, PipelineResult, StepError, StepResult};
pub use orchestrator::Orchestrator;
pub use record::{
    checkpoint_variable, Continuation, ErrorKind, ExecutionError, ExecutionRecord,
    ExecutionSnapshot, ExecutionStatus, Variables,
};
pub use retry::{BackoffStrategy, RetryPolicy};
pub use step::{DistributedOptions, Pipeline, StepDefinition, StepHandler};
pub use store::ExecutionStore;
