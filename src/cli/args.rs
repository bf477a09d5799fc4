//! CLI argument structures

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::pipeline::ExecutionStatus;

/// Supervise durable pipeline executions
#[derive(Parser)]
#[command(name = "durable-flow")]
#[command(about = "durable-flow - Resumable pipelines that survive restarts", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Enable verbose output (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Configuration file (defaults to $DURABLE_FLOW_CONFIG)
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Recover persisted state and resume pending work
    Start,

    /// List executions
    List {
        /// Only show executions with this status
        #[arg(long, value_enum)]
        status: Option<StatusFilter>,
    },

    /// Show one execution with its variables
    Show {
        /// Execution id
        id: String,
    },

    /// Run a built-in workflow to completion
    Run {
        /// Workflow name (see `durable-flow workflows`)
        workflow: String,

        /// Execution input as JSON
        #[arg(short, long, value_name = "JSON")]
        input: Option<String>,

        /// Use this execution id instead of a generated one
        #[arg(long)]
        id: Option<String>,
    },

    /// Continue a queued, paused or interrupted execution
    Resume {
        /// Execution id
        id: String,
    },

    /// Cancel an execution, compensating its completed steps
    Cancel {
        /// Execution id
        id: String,

        #[arg(long, default_value = "cancelled by operator")]
        reason: String,
    },

    /// Delete a finished execution and its promises
    Cleanup {
        /// Execution id
        id: String,
    },

    /// List built-in workflows
    Workflows,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StatusFilter {
    Queued,
    Running,
    Paused,
    Completed,
    Failed,
}

impl From<StatusFilter> for ExecutionStatus {
    fn from(filter: StatusFilter) -> Self {
        match filter {
            StatusFilter::Queued => ExecutionStatus::Queued,
            StatusFilter::Running => ExecutionStatus::Running,
            StatusFilter::Paused => ExecutionStatus::Paused,
            StatusFilter::Completed => ExecutionStatus::Completed,
            StatusFilter::Failed => ExecutionStatus::Failed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_run_with_input() {
        let cli = Cli::try_parse_from([
            "durable-flow",
            "-v",
            "run",
            "code-review",
            "--input",
            "{\"root\": \".\"}",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 1);
        match cli.command {
            Commands::Run { workflow, input, id } => {
                assert_eq!(workflow, "code-review");
                assert!(input.is_some());
                assert!(id.is_none());
            }
            _ => panic!("expected run"),
        }
    }
}
