//! Error types for the promise layer

use std::time::Duration;
use thiserror::Error;

use super::types::{FailureKind, PromiseFailure, PromiseState};
use crate::storage::StorageError;

pub type PromiseResult<T> = Result<T, PromiseError>;

#[derive(Error, Debug)]
pub enum PromiseError {
    #[error("Promise not found: {0}")]
    NotFound(String),

    #[error("Promise already exists: {0}")]
    AlreadyExists(String),

    #[error("Promise {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: String,
        from: PromiseState,
        to: PromiseState,
    },

    #[error("Promise {id} rejected: {failure}")]
    Rejected { id: String, failure: PromiseFailure },

    #[error("Promise {id} cancelled: {reason}")]
    Cancelled { id: String, reason: String },

    #[error("Promise {id} timed out after {after:?}")]
    TimedOut { id: String, after: Duration },

    #[error("Promise {id} value could not be decoded: {message}")]
    Decode { id: String, message: String },

    #[error("Invalid trigger: {0}")]
    InvalidTrigger(String),

    /// The promise was dropped from the manager while someone waited on it
    #[error("Promise abandoned: {0}")]
    Abandoned(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl PromiseError {
    /// Map a persisted rejection onto the matching error kind
    pub fn from_failure(id: &str, failure: PromiseFailure) -> Self {
        match failure.kind {
            FailureKind::Cancelled => Self::Cancelled {
                id: id.to_string(),
                reason: failure.message,
            },
            FailureKind::TimedOut => Self::TimedOut {
                id: id.to_string(),
                after: failure.timeout_after().unwrap_or_default(),
            },
            FailureKind::Error => Self::Rejected {
                id: id.to_string(),
                failure,
            },
        }
    }

    pub fn promise_id(&self) -> Option<&str> {
        match self {
            Self::NotFound(id)
            | Self::AlreadyExists(id)
            | Self::Abandoned(id)
            | Self::InvalidTransition { id, .. }
            | Self::Rejected { id, .. }
            | Self::Cancelled { id, .. }
            | Self::TimedOut { id, .. }
            | Self::Decode { id, .. } => Some(id),
            Self::InvalidTrigger(_) | Self::Storage(_) => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::TimedOut { .. })
    }
}
