//! Command routing and execution

use anyhow::Result;

use crate::cli::args::Commands;
use crate::cli::commands::*;
use crate::runtime::DurableRuntime;

/// Execute a CLI command against a wired runtime
pub async fn execute_command(runtime: &DurableRuntime, command: Commands) -> Result<()> {
    match command {
        Commands::Start => run_start_command(runtime).await,
        Commands::List { status } => run_list_command(runtime, status.map(Into::into)).await,
        Commands::Show { id } => run_show_command(runtime, &id).await,
        Commands::Run {
            workflow,
            input,
            id,
        } => run_workflow_command(runtime, &workflow, input.as_deref(), id).await,
        Commands::Resume { id } => run_resume_command(runtime, &id).await,
        Commands::Cancel { id, reason } => run_cancel_command(runtime, &id, &reason).await,
        Commands::Cleanup { id } => run_cleanup_command(runtime, &id).await,
        Commands::Workflows => run_workflows_command(),
    }
}
