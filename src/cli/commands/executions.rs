//! Inspect and manage persisted executions

use anyhow::{Context, Result};
use serde_json::json;

use crate::error::DurableError;
use crate::pipeline::ExecutionStatus;
use crate::runtime::DurableRuntime;

pub async fn run_list_command(
    runtime: &DurableRuntime,
    status: Option<ExecutionStatus>,
) -> Result<()> {
    let records = runtime
        .orchestrator()
        .list_executions()
        .await
        .map_err(DurableError::from)?;
    let records: Vec<_> = records
        .into_iter()
        .filter(|r| status.map_or(true, |s| r.status == s))
        .collect();

    if records.is_empty() {
        println!("No executions found.");
        return Ok(());
    }

    println!(
        "{:<38} {:<14} {:<10} {:<6} LAST UPDATE",
        "ID", "PIPELINE", "STATUS", "STEPS"
    );
    for record in records {
        println!(
            "{:<38} {:<14} {:<10} {:<6} {}",
            record.id,
            record.pipeline,
            record.status,
            record.completed_steps.len(),
            record.last_update.format("%Y-%m-%d %H:%M:%S")
        );
    }
    Ok(())
}

pub async fn run_show_command(runtime: &DurableRuntime, id: &str) -> Result<()> {
    let snapshot = runtime
        .orchestrator()
        .get_execution(id)
        .await
        .map_err(DurableError::from)?
        .ok_or_else(|| {
            DurableError::from(crate::pipeline::PipelineError::ExecutionNotFound(
                id.to_string(),
            ))
        })?;

    let view = json!({
        "execution": snapshot.record,
        "variables": snapshot.variables,
    });
    println!(
        "{}",
        serde_json::to_string_pretty(&view).context("Failed to render execution")?
    );
    Ok(())
}

pub async fn run_cancel_command(runtime: &DurableRuntime, id: &str, reason: &str) -> Result<()> {
    runtime
        .orchestrator()
        .cancel(id, reason)
        .await
        .map_err(DurableError::from)?;
    println!("Execution {} cancelled", id);
    Ok(())
}

pub async fn run_cleanup_command(runtime: &DurableRuntime, id: &str) -> Result<()> {
    runtime
        .orchestrator()
        .cleanup(id)
        .await
        .map_err(DurableError::from)?;
    println!("Execution {} removed", id);
    Ok(())
}
