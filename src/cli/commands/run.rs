//! Run, resume and recover executions

use anyhow::{Context, Result};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use crate::error::DurableError;
use crate::pipeline::{ExecutionOptions, ExecutionSnapshot};
use crate::runtime::DurableRuntime;

const POLL_INTERVAL: Duration = Duration::from_millis(200);

fn print_outcome(snapshot: &ExecutionSnapshot) -> Result<()> {
    println!(
        "Execution {} {} ({} steps completed)",
        snapshot.record.id,
        snapshot.status(),
        snapshot.record.completed_steps.len()
    );
    if let Some(last) = snapshot.record.completed_steps.last() {
        if let Some(output) = snapshot.output(last) {
            println!(
                "{}",
                serde_json::to_string_pretty(output).context("Failed to render output")?
            );
        }
    }
    Ok(())
}

pub async fn run_workflow_command(
    runtime: &DurableRuntime,
    workflow: &str,
    input: Option<&str>,
    id: Option<String>,
) -> Result<()> {
    let input: Value = match input {
        Some(raw) => serde_json::from_str(raw).context("--input is not valid JSON")?,
        None => Value::Null,
    };
    let mut options = ExecutionOptions::new();
    if let Some(id) = id {
        options = options.with_execution_id(id);
    }

    let snapshot = runtime
        .orchestrator()
        .execute(workflow, input, options)
        .await
        .map_err(DurableError::from)?;
    print_outcome(&snapshot)
}

pub async fn run_resume_command(runtime: &DurableRuntime, id: &str) -> Result<()> {
    runtime.recover().await?;
    let snapshot = runtime
        .orchestrator()
        .resume(id)
        .await
        .map_err(DurableError::from)?;
    print_outcome(&snapshot)
}

/// Recover, resume adoptable work and wait for it to settle
pub async fn run_start_command(runtime: &DurableRuntime) -> Result<()> {
    let report = runtime.start().await?;
    println!("Recovery: {}", report.summary());

    let orchestrator = runtime.orchestrator();
    let mut waiting: Vec<String> = report.requeued.clone();
    waiting.extend(
        report
            .active
            .iter()
            .filter(|a| a.status == crate::pipeline::ExecutionStatus::Queued)
            .map(|a| a.id.clone()),
    );

    // Background runs register themselves shortly after being spawned
    tokio::time::sleep(POLL_INTERVAL).await;
    loop {
        let mut running = 0;
        for id in &waiting {
            if orchestrator.is_active(id).await {
                running += 1;
            }
        }
        if running == 0 {
            break;
        }
        debug!("Waiting for {} executions", running);
        tokio::time::sleep(POLL_INTERVAL).await;
    }

    for id in &waiting {
        if let Some(snapshot) = orchestrator
            .get_execution(id)
            .await
            .map_err(DurableError::from)?
        {
            println!("Execution {} {}", id, snapshot.status());
        }
    }
    Ok(())
}
