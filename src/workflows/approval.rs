//! `approval`: request a change, wait for someone to grant it, apply it
//!
//! Input: `{"change": "<description>", "timeoutMs": <n>}`. The execution
//! suspends on `approval.granted` events whose `requestId` matches the
//! request; without a grant before the timeout the request is withdrawn.

use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::info;

use crate::events::{SuspensionTrigger, TriggerCondition};
use crate::pipeline::{Pipeline, StepContext, StepDefinition, StepError, StepResult};

pub const APPROVAL: &str = "approval";
pub const APPROVAL_GRANTED: &str = "approval.granted";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApprovalInput {
    change: String,
    #[serde(default)]
    timeout_ms: Option<u64>,
}

fn parse_input(input: &Value) -> StepResult<ApprovalInput> {
    serde_json::from_value(input.clone())
        .map_err(|e| StepError::permanent(format!("invalid approval input: {}", e)))
}

/// Id under which a grant for this execution must arrive
pub fn request_id(execution_id: &str) -> String {
    format!("{}-approval", execution_id)
}

pub fn pipeline() -> Pipeline {
    Pipeline::new(APPROVAL)
        .step(StepDefinition::from_fn("request", request).with_compensation(withdraw))
        .step(
            StepDefinition::from_fn("await-approval", await_approval)
                .with_max_retries(0)
                .migratable(),
        )
        .step(StepDefinition::from_fn("apply", apply))
}

async fn request(input: Value, ctx: StepContext) -> StepResult<Value> {
    let input = parse_input(&input)?;
    let id = request_id(ctx.execution_id());
    info!("Requested approval {} for: {}", id, input.change);
    Ok(json!({ "requestId": id, "change": input.change }))
}

async fn withdraw(_input: Value, output: Value, _ctx: StepContext) -> StepResult<()> {
    let id = output
        .get("requestId")
        .and_then(Value::as_str)
        .unwrap_or("unknown");
    info!("Withdrew approval request {}", id);
    Ok(())
}

async fn await_approval(input: Value, ctx: StepContext) -> StepResult<Value> {
    let input = parse_input(&input)?;
    let id = request_id(ctx.execution_id());
    let timeout = input
        .timeout_ms
        .map(Duration::from_millis)
        .unwrap_or(DEFAULT_TIMEOUT);

    let trigger = SuspensionTrigger::new(APPROVAL_GRANTED)
        .when(TriggerCondition::field_equals("/requestId", id.clone()));
    let grant: Value = ctx
        .suspend_until_event_with_timeout(timeout, vec![trigger])
        .await?;
    info!("Approval {} granted", id);
    Ok(grant)
}

async fn apply(_input: Value, ctx: StepContext) -> StepResult<Value> {
    let request = ctx
        .variable("request")
        .await
        .ok_or_else(|| StepError::permanent("request output missing"))?;
    let grant = ctx.variable("await-approval").await.unwrap_or(Value::Null);
    Ok(json!({
        "applied": request.get("change").cloned().unwrap_or(Value::Null),
        "approvedBy": grant.get("by").cloned().unwrap_or(Value::Null),
    }))
}
