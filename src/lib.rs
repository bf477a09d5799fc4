//! # durable-flow
//!
//! A durable execution core: long-running pipelines of steps that may
//! suspend on external events, survive process restarts and resume where
//! they left off.
//!
//! ## Modules
//!
//! - `storage` - Persistence adapter, file and memory backends, locks
//! - `promise` - Distributed promises with at-most-once settlement
//! - `events` - Event registry and timers
//! - `suspension` - Suspending promises on events and deadlines
//! - `pipeline` - Steps, execution records and the orchestrator
//! - `recovery` - Startup scan and lease reclassification
//! - `runtime` - Explicit wiring of the components
//! - `workflows` - Built-in example pipelines
//! - `config` - Runtime configuration
//! - `error` - Crate-wide error type with numeric codes
//! - `app`, `cli` - The `durable-flow` binary

pub mod app;
pub mod cli;
pub mod config;
pub mod error;
pub mod events;
pub mod pipeline;
pub mod promise;
pub mod recovery;
pub mod runtime;
pub mod storage;
pub mod suspension;
pub mod workflows;

pub use error::{DurableError, DurableResult};
pub use runtime::DurableRuntime;
