use std::fmt::Display;
use thiserror::Error;

pub mod codes;

pub use codes::{describe_error_code, ErrorCode};

use crate::config::ConfigError;
use crate::pipeline::{PipelineError, StepError};
use crate::promise::PromiseError;
use crate::storage::StorageError;

/// The unified error type for the durable-flow crate
#[derive(Error, Debug)]
pub enum DurableError {
    #[error("[E{code:04}] Configuration error: {message}")]
    Config {
        code: u16,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("[E{code:04}] Promise error: {message}")]
    Promise {
        code: u16,
        message: String,
        promise_id: Option<String>,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("[E{code:04}] Storage error: {message}")]
    Storage {
        code: u16,
        message: String,
        key: Option<String>,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("[E{code:04}] Step error: {message}")]
    Step {
        code: u16,
        message: String,
        step_id: Option<String>,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("[E{code:04}] Pipeline error: {message}")]
    Pipeline {
        code: u16,
        message: String,
        execution_id: Option<String>,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("[E{code:04}] {message}")]
    Other {
        code: u16,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl DurableError {
    /// Create a configuration error with default code
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            code: ErrorCode::CONFIG_GENERIC,
            message: message.into(),
            source: None,
        }
    }

    /// Create a pipeline error with a specific code
    pub fn pipeline_with_code(
        code: u16,
        message: impl Into<String>,
        execution_id: Option<String>,
    ) -> Self {
        Self::Pipeline {
            code,
            message: message.into(),
            execution_id,
            source: None,
        }
    }

    /// Create a generic other error
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other {
            code: ErrorCode::OTHER_GENERIC,
            message: message.into(),
            source: None,
        }
    }

    /// Add a source error to this error
    pub fn with_source(
        mut self,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        match &mut self {
            Self::Config { source: src, .. }
            | Self::Promise { source: src, .. }
            | Self::Storage { source: src, .. }
            | Self::Step { source: src, .. }
            | Self::Pipeline { source: src, .. }
            | Self::Other { source: src, .. } => {
                *src = Some(source.into());
            }
        }
        self
    }

    /// Numeric error code
    pub fn code(&self) -> u16 {
        match self {
            Self::Config { code, .. }
            | Self::Promise { code, .. }
            | Self::Storage { code, .. }
            | Self::Step { code, .. }
            | Self::Pipeline { code, .. }
            | Self::Other { code, .. } => *code,
        }
    }

    /// Message shown to operators, without the source chain
    pub fn user_message(&self) -> String {
        format!("{} ({})", self, describe_error_code(self.code()))
    }

    /// Full message including every source in the chain
    pub fn developer_message(&self) -> String {
        let mut message = self.to_string();
        let mut current = std::error::Error::source(self);
        while let Some(cause) = current {
            message.push_str(&format!("\n  caused by: {}", cause));
            current = cause.source();
        }
        message
    }

    /// Process exit code for the CLI
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config { .. } => 2,
            Self::Pipeline { code, .. } if *code == ErrorCode::PIPELINE_STEP_FAILED => 3,
            Self::Pipeline { code, .. } if *code == ErrorCode::PIPELINE_CANCELLED => 4,
            _ => 1,
        }
    }
}

/// Result alias used by the public API surface
pub type DurableResult<T> = Result<T, DurableError>;

impl From<StorageError> for DurableError {
    fn from(err: StorageError) -> Self {
        let (code, key) = match &err {
            StorageError::Io(_) => (ErrorCode::STORAGE_IO_ERROR, None),
            StorageError::Serialization(_) => (ErrorCode::STORAGE_SERIALIZATION_ERROR, None),
            StorageError::Corrupted { key, .. } => (ErrorCode::STORAGE_CORRUPTED, Some(key.clone())),
            StorageError::InvalidKey(key) => (ErrorCode::STORAGE_INVALID_KEY, Some(key.clone())),
            StorageError::Lock(_) => (ErrorCode::STORAGE_LOCK_FAILED, None),
            StorageError::NotFound(_) => (ErrorCode::STORAGE_NOT_FOUND, None),
            StorageError::Conflict(_) => (ErrorCode::STORAGE_ALREADY_EXISTS, None),
            StorageError::Configuration(_) | StorageError::Unavailable(_) => {
                (ErrorCode::STORAGE_BACKEND_ERROR, None)
            }
            StorageError::Other(_) => (ErrorCode::STORAGE_GENERIC, None),
        };

        Self::Storage {
            code,
            message: err.to_string(),
            key,
            source: None,
        }
        .with_source(err)
    }
}

impl From<PromiseError> for DurableError {
    fn from(err: PromiseError) -> Self {
        let code = match &err {
            PromiseError::NotFound(_) => ErrorCode::PROMISE_NOT_FOUND,
            PromiseError::AlreadyExists(_) => ErrorCode::PROMISE_ALREADY_EXISTS,
            PromiseError::InvalidTransition { .. } => ErrorCode::PROMISE_INVALID_TRANSITION,
            PromiseError::Rejected { .. } => ErrorCode::PROMISE_REJECTED,
            PromiseError::Cancelled { .. } => ErrorCode::PROMISE_CANCELLED,
            PromiseError::TimedOut { .. } => ErrorCode::PROMISE_TIMED_OUT,
            PromiseError::Decode { .. } => ErrorCode::PROMISE_DECODE_ERROR,
            PromiseError::InvalidTrigger(_) => ErrorCode::PROMISE_INVALID_TRIGGER,
            PromiseError::Abandoned(_) | PromiseError::Storage(_) => ErrorCode::PROMISE_GENERIC,
        };
        let promise_id = err.promise_id().map(str::to_string);

        Self::Promise {
            code,
            message: err.to_string(),
            promise_id,
            source: None,
        }
        .with_source(err)
    }
}

impl From<StepError> for DurableError {
    fn from(err: StepError) -> Self {
        let code = match &err {
            StepError::Timeout { .. } => ErrorCode::STEP_TIMEOUT,
            StepError::SuspensionTimeout { .. } => ErrorCode::STEP_SUSPENSION_TIMEOUT,
            StepError::Cancelled(_) => ErrorCode::STEP_CANCELLED,
            _ => ErrorCode::STEP_GENERIC,
        };

        Self::Step {
            code,
            message: err.to_string(),
            step_id: None,
            source: None,
        }
        .with_source(err)
    }
}

impl From<PipelineError> for DurableError {
    fn from(err: PipelineError) -> Self {
        let code = match &err {
            PipelineError::NotRegistered(_) => ErrorCode::PIPELINE_NOT_FOUND,
            PipelineError::Invalid(_) => ErrorCode::PIPELINE_INVALID,
            PipelineError::ExecutionNotFound(_) => ErrorCode::PIPELINE_EXECUTION_NOT_FOUND,
            PipelineError::AlreadyRunning(_) | PipelineError::StillActive { .. } => {
                ErrorCode::PIPELINE_ALREADY_RUNNING
            }
            PipelineError::NotResumable { .. } => ErrorCode::PIPELINE_RESUME_ERROR,
            PipelineError::StepFailed { .. } => ErrorCode::PIPELINE_STEP_FAILED,
            PipelineError::Cancelled { .. } => ErrorCode::PIPELINE_CANCELLED,
            PipelineError::Checkpoint { .. } => ErrorCode::PIPELINE_CHECKPOINT_ERROR,
            PipelineError::Migration(_) => ErrorCode::PIPELINE_MIGRATION_ERROR,
            PipelineError::Storage(_) | PipelineError::Promise(_) => ErrorCode::PIPELINE_GENERIC,
        };
        let execution_id = err.execution_id().map(str::to_string);

        Self::Pipeline {
            code,
            message: err.to_string(),
            execution_id,
            source: None,
        }
        .with_source(err)
    }
}

impl From<ConfigError> for DurableError {
    fn from(err: ConfigError) -> Self {
        let code = match &err {
            ConfigError::NotFound(_) => ErrorCode::CONFIG_NOT_FOUND,
            ConfigError::Parse { .. } => ErrorCode::CONFIG_PARSE_ERROR,
            ConfigError::Invalid(_) => ErrorCode::CONFIG_INVALID_VALUE,
            ConfigError::Read { .. } => ErrorCode::CONFIG_GENERIC,
        };

        Self::Config {
            code,
            message: err.to_string(),
            source: None,
        }
        .with_source(err)
    }
}

/// Extension for attaching an error code to foreign errors
pub trait ErrorExt<T> {
    fn with_code(self, code: u16) -> Result<T, DurableError>;
}

impl<T, E: Display> ErrorExt<T> for Result<T, E> {
    fn with_code(self, code: u16) -> Result<T, DurableError> {
        self.map_err(|e| DurableError::Other {
            code,
            message: e.to_string(),
            source: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_error_conversion_keeps_code_and_key() {
        let err: DurableError = StorageError::Corrupted {
            key: "executions/abc".to_string(),
            reason: "expected value at line 1".to_string(),
        }
        .into();

        assert_eq!(err.code(), ErrorCode::STORAGE_CORRUPTED);
        match &err {
            DurableError::Storage { key, .. } => {
                assert_eq!(key.as_deref(), Some("executions/abc"))
            }
            other => panic!("unexpected variant: {other:?}"),
        }
        assert!(err.to_string().starts_with("[E3006]"));
    }

    #[test]
    fn test_pipeline_failure_exit_code() {
        let err: DurableError = PipelineError::StepFailed {
            execution_id: "exec-1".to_string(),
            step_id: "b".to_string(),
            message: "boom".to_string(),
        }
        .into();

        assert_eq!(err.exit_code(), 3);
        assert!(err.user_message().contains("Pipeline step failed permanently"));
    }

    #[test]
    fn test_developer_message_includes_chain() {
        let err: DurableError = PromiseError::NotFound("p-1".to_string()).into();
        let message = err.developer_message();
        assert!(message.contains("[E2001]"));
        assert!(message.contains("caused by"));
    }

    #[test]
    fn test_with_code() {
        let result: Result<(), &str> = Err("nope");
        let err = result.with_code(ErrorCode::RECOVERY_GENERIC).unwrap_err();
        assert_eq!(err.code(), ErrorCode::RECOVERY_GENERIC);
    }
}
