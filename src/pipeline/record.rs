//! Execution records: the persisted state of one pipeline run

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::time::Duration;

use super::config::ExecutionOptions;

/// Named values accumulated by an execution; each step's output lives under its id
pub type Variables = HashMap<String, Value>;

/// Prefix of the variable holding a step's mid-step checkpoint
pub const CHECKPOINT_PREFIX: &str = "checkpoint:";

/// Variable name of a step's partial checkpoint
pub fn checkpoint_variable(step_id: &str) -> String {
    format!("{}{}", CHECKPOINT_PREFIX, step_id)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Queued,
    Running,
    Paused,
    Completed,
    Failed,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ExecutionStatus::Completed | ExecutionStatus::Failed)
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExecutionStatus::Queued => "queued",
            ExecutionStatus::Running => "running",
            ExecutionStatus::Paused => "paused",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Category of a recorded error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Transient,
    Permanent,
    Timeout,
    SuspensionTimeout,
    Compensation,
    Cancelled,
    Abandoned,
    Persistence,
}

/// One entry of an execution's error history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionError {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_id: Option<String>,
    pub attempt: u32,
    pub kind: ErrorKind,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Lightweight state of one execution; variables are stored separately
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRecord {
    pub id: String,
    /// Registered pipeline name, used to find the steps on resume
    pub pipeline: String,
    pub status: ExecutionStatus,
    /// Append-only, in execution order
    #[serde(default)]
    pub completed_steps: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_step: Option<String>,
    #[serde(default)]
    pub input: Value,
    pub start_time: DateTime<Utc>,
    /// Lease heartbeat
    pub last_update: DateTime<Utc>,
    #[serde(default)]
    pub errors: Vec<ExecutionError>,
    /// Failed attempts per step; survives restarts
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub step_failures: BTreeMap<String, u32>,
    /// Steps whose compensation already ran
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub compensated_steps: Vec<String>,
    /// Whether the current step may move to another worker
    #[serde(default)]
    pub migratable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub migration_timeout_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancel_requested: Option<String>,
    /// Process currently driving the execution (`host:pid`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker: Option<String>,
    #[serde(default)]
    pub options: ExecutionOptions,
}

impl ExecutionRecord {
    pub fn new(
        id: impl Into<String>,
        pipeline: impl Into<String>,
        input: Value,
        options: ExecutionOptions,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            pipeline: pipeline.into(),
            status: ExecutionStatus::Queued,
            completed_steps: Vec::new(),
            current_step: None,
            input,
            start_time: now,
            last_update: now,
            errors: Vec::new(),
            step_failures: BTreeMap::new(),
            compensated_steps: Vec::new(),
            migratable: false,
            migration_timeout_ms: None,
            cancel_requested: None,
            worker: None,
            options,
        }
    }

    pub fn is_completed(&self, step_id: &str) -> bool {
        self.completed_steps.iter().any(|s| s == step_id)
    }

    /// Append a step to `completed_steps`; returns false if it was already there
    pub fn mark_step_completed(&mut self, step_id: &str) -> bool {
        if self.is_completed(step_id) {
            return false;
        }
        self.completed_steps.push(step_id.to_string());
        self.step_failures.remove(step_id);
        self.current_step = None;
        self.migratable = false;
        self.migration_timeout_ms = None;
        true
    }

    /// Failed attempts recorded for a step
    pub fn failures_of(&self, step_id: &str) -> u32 {
        self.step_failures.get(step_id).copied().unwrap_or(0)
    }

    pub fn record_failure(&mut self, step_id: &str, kind: ErrorKind, message: impl Into<String>) {
        let attempt = self.failures_of(step_id);
        self.errors.push(ExecutionError {
            step_id: Some(step_id.to_string()),
            attempt,
            kind,
            message: message.into(),
            timestamp: Utc::now(),
        });
        self.step_failures
            .insert(step_id.to_string(), attempt.saturating_add(1));
    }

    pub fn record_error(
        &mut self,
        step_id: Option<&str>,
        kind: ErrorKind,
        message: impl Into<String>,
    ) {
        let attempt = step_id.map_or(0, |s| self.failures_of(s));
        self.errors.push(ExecutionError {
            step_id: step_id.map(str::to_string),
            attempt,
            kind,
            message: message.into(),
            timestamp: Utc::now(),
        });
    }

    pub fn touch(&mut self) {
        self.last_update = Utc::now();
    }

    /// Time since the last heartbeat
    pub fn lease_age(&self, now: DateTime<Utc>) -> Duration {
        (now - self.last_update).to_std().unwrap_or_default()
    }

    pub fn migration_timeout(&self) -> Option<Duration> {
        self.migration_timeout_ms.map(Duration::from_millis)
    }
}

/// Serialized continuation handed to another worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Continuation {
    pub execution_id: String,
    pub pipeline: String,
    pub input: Value,
    pub completed_steps: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_step: Option<String>,
    #[serde(default)]
    pub step_failures: BTreeMap<String, u32>,
    #[serde(default)]
    pub errors: Vec<ExecutionError>,
    pub variables: Variables,
    #[serde(default)]
    pub options: ExecutionOptions,
    pub exported_at: DateTime<Utc>,
}

/// An execution record together with its variables
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionSnapshot {
    pub record: ExecutionRecord,
    pub variables: Variables,
}

impl ExecutionSnapshot {
    pub fn status(&self) -> ExecutionStatus {
        self.record.status
    }

    /// Recorded output of a completed step
    pub fn output(&self, step_id: &str) -> Option<&Value> {
        self.variables.get(step_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_completed_steps_are_append_only() {
        let mut record = ExecutionRecord::new("e", "p", json!({}), ExecutionOptions::default());
        assert!(record.mark_step_completed("a"));
        assert!(record.mark_step_completed("b"));
        assert!(!record.mark_step_completed("a"));
        assert_eq!(record.completed_steps, vec!["a", "b"]);
    }

    #[test]
    fn test_failures_are_counted_per_step() {
        let mut record = ExecutionRecord::new("e", "p", json!({}), ExecutionOptions::default());
        record.record_failure("b", ErrorKind::Transient, "boom");
        record.record_failure("b", ErrorKind::Transient, "boom");
        assert_eq!(record.failures_of("b"), 2);
        assert_eq!(record.errors[1].attempt, 1);

        record.mark_step_completed("b");
        assert_eq!(record.failures_of("b"), 0);
        assert_eq!(record.errors.len(), 2);
    }

    #[test]
    fn test_state_record_has_no_variables_and_uses_camel_case() {
        let record = ExecutionRecord::new("e1", "p", json!({"x": 1}), ExecutionOptions::default());
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["status"], "queued");
        assert!(json.get("completedSteps").is_some());
        assert!(json.get("startTime").is_some());
        assert!(json.get("lastUpdate").is_some());
        assert!(json.get("variables").is_none());
    }
}
