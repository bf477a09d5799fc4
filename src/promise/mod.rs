//! Distributed promises
//!
//! A distributed promise is a future whose pending state lives in durable
//! storage. It is created by the [`PromiseManager`], may be suspended while
//! it waits for an external event, and is settled at most once.

pub mod error;
pub mod manager;
pub mod types;

pub use error::{PromiseError, PromiseResult};
pub use manager::{
    CreateOptions, DistributedPromise, PromiseManager, PromiseResolver, RestoreSummary,
};
pub use types::{
    ConditionSpec, FailureKind, PromiseFailure, PromiseMetadata, PromiseRecord, PromiseState,
    ResumeOutcome, TriggerDescriptor,
};
