//! CLI command handlers
//!
//! Thin supervisory commands; every mutation goes through the orchestrator.

pub mod args;
pub mod commands;
pub mod router;

pub use args::{Cli, Commands};
pub use router::execute_command;
