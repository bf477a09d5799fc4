//! Step and pipeline error types

use std::time::Duration;
use thiserror::Error;

use super::record::{ErrorKind, ExecutionStatus};
use crate::promise::PromiseError;
use crate::storage::StorageError;

pub type StepResult<T> = Result<T, StepError>;
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Failure raised by a step's `run` or `compensate`
#[derive(Error, Debug)]
pub enum StepError {
    /// Transient failure, retried while attempts remain
    #[error("{0}")]
    Failed(String),

    /// Failure that retrying cannot fix
    #[error("permanent failure: {0}")]
    Permanent(String),

    #[error("step {step_id} timed out after {after:?}")]
    Timeout { step_id: String, after: Duration },

    /// A suspension ended because no matching event arrived in time
    #[error("no event for promise {promise_id} within {after:?}")]
    SuspensionTimeout { promise_id: String, after: Duration },

    #[error("cancelled: {0}")]
    Cancelled(String),

    #[error(transparent)]
    Promise(PromiseError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl StepError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self::Permanent(message.into())
    }

    /// Whether the orchestrator may run the step again
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Failed(_) | Self::Timeout { .. } | Self::Storage(_) | Self::Other(_) => true,
            Self::Promise(e) => !matches!(e, PromiseError::Cancelled { .. }),
            Self::Permanent(_) | Self::SuspensionTimeout { .. } | Self::Cancelled(_) => false,
        }
    }

    pub fn is_suspension_timeout(&self) -> bool {
        matches!(self, Self::SuspensionTimeout { .. })
    }

    /// Category recorded in the execution's error history
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Permanent(_) => ErrorKind::Permanent,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::SuspensionTimeout { .. } => ErrorKind::SuspensionTimeout,
            Self::Cancelled(_) => ErrorKind::Cancelled,
            Self::Storage(_) => ErrorKind::Persistence,
            Self::Failed(_) | Self::Promise(_) | Self::Other(_) => ErrorKind::Transient,
        }
    }
}

impl From<PromiseError> for StepError {
    fn from(err: PromiseError) -> Self {
        match err {
            PromiseError::TimedOut { id, after } => Self::SuspensionTimeout {
                promise_id: id,
                after,
            },
            PromiseError::Cancelled { reason, .. } => Self::Cancelled(reason),
            PromiseError::Storage(e) => Self::Storage(e),
            other => Self::Promise(other),
        }
    }
}

/// Failure of an orchestrator operation
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Pipeline not registered: {0}")]
    NotRegistered(String),

    #[error("Invalid pipeline: {0}")]
    Invalid(String),

    #[error("Execution not found: {0}")]
    ExecutionNotFound(String),

    #[error("Execution {0} is already running")]
    AlreadyRunning(String),

    #[error("Execution {id} cannot be resumed while {status}")]
    NotResumable { id: String, status: ExecutionStatus },

    #[error("Execution {id} is still {status}")]
    StillActive { id: String, status: ExecutionStatus },

    #[error("Execution {execution_id} failed at step {step_id}: {message}")]
    StepFailed {
        execution_id: String,
        step_id: String,
        message: String,
    },

    #[error("Execution {execution_id} cancelled: {reason}")]
    Cancelled { execution_id: String, reason: String },

    /// A checkpoint write failed; the step is not recorded as completed
    #[error("Checkpoint of execution {execution_id} failed: {source}")]
    Checkpoint {
        execution_id: String,
        #[source]
        source: StorageError,
    },

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Promise(#[from] PromiseError),
}

impl PipelineError {
    pub fn execution_id(&self) -> Option<&str> {
        match self {
            Self::ExecutionNotFound(id) | Self::AlreadyRunning(id) => Some(id),
            Self::NotResumable { id, .. } | Self::StillActive { id, .. } => Some(id),
            Self::StepFailed { execution_id, .. }
            | Self::Cancelled { execution_id, .. }
            | Self::Checkpoint { execution_id, .. } => Some(execution_id),
            Self::NotRegistered(_)
            | Self::Invalid(_)
            | Self::Migration(_)
            | Self::Storage(_)
            | Self::Promise(_) => None,
        }
    }
}
