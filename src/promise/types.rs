//! Persisted promise records and their state machine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Lifecycle state of a distributed promise
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromiseState {
    Pending,
    Resolved,
    Rejected,
    Suspended,
}

impl PromiseState {
    /// Resolved and rejected promises never change again
    pub fn is_terminal(&self) -> bool {
        matches!(self, PromiseState::Resolved | PromiseState::Rejected)
    }

    /// Whether `self -> next` is a legal single transition
    pub fn can_transition_to(&self, next: PromiseState) -> bool {
        use PromiseState::*;
        matches!(
            (self, next),
            (Pending, Suspended) | (Pending, Resolved) | (Pending, Rejected) | (Suspended, Pending)
        )
    }
}

impl fmt::Display for PromiseState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PromiseState::Pending => "pending",
            PromiseState::Resolved => "resolved",
            PromiseState::Rejected => "rejected",
            PromiseState::Suspended => "suspended",
        };
        f.write_str(name)
    }
}

/// Diagnostic metadata attached to a promise
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromiseMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_id: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
}

impl PromiseMetadata {
    pub fn for_task(task_id: impl Into<String>) -> Self {
        Self {
            task_id: Some(task_id.into()),
            ..Self::default()
        }
    }

    pub fn with_execution(mut self, execution_id: impl Into<String>) -> Self {
        self.execution_id = Some(execution_id.into());
        self
    }

    pub fn with_step(mut self, step_id: impl Into<String>) -> Self {
        self.step_id = Some(step_id.into());
        self
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }
}

/// Category of a rejection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Error,
    Cancelled,
    TimedOut,
}

/// Rejection payload of a promise
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromiseFailure {
    pub kind: FailureKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl PromiseFailure {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Error,
            message: message.into(),
            data: None,
        }
    }

    pub fn cancelled(reason: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Cancelled,
            message: reason.into(),
            data: None,
        }
    }

    pub fn timed_out(after: Duration) -> Self {
        Self {
            kind: FailureKind::TimedOut,
            message: format!("no matching event within {:?}", after),
            data: None,
        }
        .with_data(serde_json::json!({ "afterMs": after.as_millis() as u64 }))
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Timeout recorded by [`PromiseFailure::timed_out`]
    pub fn timeout_after(&self) -> Option<Duration> {
        self.data
            .as_ref()?
            .get("afterMs")?
            .as_u64()
            .map(Duration::from_millis)
    }
}

impl fmt::Display for PromiseFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Serializable form of a trigger condition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ConditionSpec {
    /// Payload value at a JSON pointer must equal `value`
    #[serde(rename_all = "camelCase")]
    FieldEquals { pointer: String, value: Value },
    /// In-process predicate; cannot be rebuilt after a restart
    Custom { label: String },
}

/// Serializable description of an armed trigger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerDescriptor {
    pub event_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<ConditionSpec>,
    pub once: bool,
}

impl TriggerDescriptor {
    /// Whether the trigger can be re-armed from its persisted form alone
    pub fn is_rearmable(&self) -> bool {
        !matches!(self.condition, Some(ConditionSpec::Custom { .. }))
    }
}

/// Persisted state of one distributed promise
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromiseRecord {
    pub id: String,
    pub state: PromiseState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<PromiseFailure>,
    #[serde(default)]
    pub metadata: PromiseMetadata,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub triggers: Vec<TriggerDescriptor>,
    /// Wall-clock deadline of a timed suspension
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PromiseRecord {
    /// A fresh pending record
    pub fn pending(id: impl Into<String>, metadata: PromiseMetadata) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            state: PromiseState::Pending,
            value: None,
            error: None,
            metadata,
            triggers: Vec::new(),
            deadline: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_settled(&self) -> bool {
        self.state.is_terminal()
    }

    /// Copy of this record resolved with `value`
    ///
    /// A suspended record passes through `pending` first.
    pub fn resolved(&self, value: Value) -> Option<Self> {
        self.settled(PromiseState::Resolved, Some(value), None)
    }

    /// Copy of this record rejected with `failure`
    pub fn rejected(&self, failure: PromiseFailure) -> Option<Self> {
        self.settled(PromiseState::Rejected, None, Some(failure))
    }

    fn settled(
        &self,
        state: PromiseState,
        value: Option<Value>,
        error: Option<PromiseFailure>,
    ) -> Option<Self> {
        let from = match self.state {
            PromiseState::Suspended => PromiseState::Pending,
            other => other,
        };
        if !from.can_transition_to(state) {
            return None;
        }
        let mut next = self.clone();
        next.state = state;
        next.value = value;
        next.error = error;
        next.triggers.clear();
        next.deadline = None;
        next.updated_at = Utc::now();
        Some(next)
    }

    /// Copy of this record suspended on `triggers`
    pub fn suspended(
        &self,
        triggers: Vec<TriggerDescriptor>,
        deadline: Option<DateTime<Utc>>,
    ) -> Option<Self> {
        if !matches!(self.state, PromiseState::Pending | PromiseState::Suspended) {
            return None;
        }
        let mut next = self.clone();
        next.state = PromiseState::Suspended;
        next.triggers = triggers;
        next.deadline = deadline;
        next.updated_at = Utc::now();
        Some(next)
    }
}

/// Result of [`PromiseManager::resume_promise`](super::PromiseManager::resume_promise)
#[derive(Debug, Clone, PartialEq)]
pub enum ResumeOutcome {
    /// The promise was suspended and is now resolved with the event payload
    Resumed(PromiseRecord),
    /// No promise with that id exists
    NotFound,
    /// The promise exists but was not suspended (already handled)
    NotSuspended(PromiseState),
}

impl ResumeOutcome {
    pub fn is_resumed(&self) -> bool {
        matches!(self, ResumeOutcome::Resumed(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_legal_transitions() {
        use PromiseState::*;
        assert!(Pending.can_transition_to(Suspended));
        assert!(Pending.can_transition_to(Resolved));
        assert!(Suspended.can_transition_to(Pending));
        assert!(!Suspended.can_transition_to(Resolved));
        assert!(!Resolved.can_transition_to(Pending));
        assert!(!Rejected.can_transition_to(Resolved));
    }

    #[test]
    fn test_settled_records_are_frozen() {
        let record = PromiseRecord::pending("p", PromiseMetadata::default());
        let resolved = record.resolved(json!(1)).unwrap();
        assert!(resolved.resolved(json!(2)).is_none());
        assert!(resolved.rejected(PromiseFailure::error("x")).is_none());
        assert!(resolved.suspended(vec![], None).is_none());
    }

    #[test]
    fn test_suspended_resolution_clears_triggers() {
        let record = PromiseRecord::pending("p", PromiseMetadata::default())
            .suspended(
                vec![TriggerDescriptor {
                    event_id: "e".into(),
                    condition: None,
                    once: true,
                }],
                None,
            )
            .unwrap();
        let resolved = record.resolved(json!({"ok": true})).unwrap();
        assert_eq!(resolved.state, PromiseState::Resolved);
        assert!(resolved.triggers.is_empty());
    }

    #[test]
    fn test_record_json_shape() {
        let record = PromiseRecord::pending("p1", PromiseMetadata::for_task("t1"));
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["state"], "pending");
        assert_eq!(json["metadata"]["taskId"], "t1");
        assert!(json.get("createdAt").is_some());
    }

    #[test]
    fn test_timeout_failure_keeps_duration() {
        let failure = PromiseFailure::timed_out(Duration::from_millis(50));
        assert_eq!(failure.kind, FailureKind::TimedOut);
        assert_eq!(failure.timeout_after(), Some(Duration::from_millis(50)));
    }
}
