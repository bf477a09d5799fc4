//! Suspension triggers and their conditions

use serde_json::Value;
use std::fmt;
use std::sync::Arc;

use crate::promise::{ConditionSpec, TriggerDescriptor};

/// Predicate over an event payload
pub type Predicate = Arc<dyn Fn(&Value) -> bool + Send + Sync>;

/// Condition an event payload must satisfy for a trigger to fire
#[derive(Clone)]
pub enum TriggerCondition {
    /// Value at a JSON pointer equals `value`
    FieldEquals { pointer: String, value: Value },
    /// Arbitrary in-process predicate
    Custom { label: String, predicate: Predicate },
}

impl TriggerCondition {
    pub fn field_equals(pointer: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::FieldEquals {
            pointer: pointer.into(),
            value: value.into(),
        }
    }

    pub fn custom<F>(label: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&Value) -> bool + Send + Sync + 'static,
    {
        Self::Custom {
            label: label.into(),
            predicate: Arc::new(predicate),
        }
    }

    pub fn matches(&self, payload: &Value) -> bool {
        match self {
            Self::FieldEquals { pointer, value } => payload.pointer(pointer) == Some(value),
            Self::Custom { predicate, .. } => predicate(payload),
        }
    }

    pub fn spec(&self) -> ConditionSpec {
        match self {
            Self::FieldEquals { pointer, value } => ConditionSpec::FieldEquals {
                pointer: pointer.clone(),
                value: value.clone(),
            },
            Self::Custom { label, .. } => ConditionSpec::Custom {
                label: label.clone(),
            },
        }
    }

    /// Rebuild a condition from its persisted form; custom predicates cannot be
    pub fn from_spec(spec: &ConditionSpec) -> Option<Self> {
        match spec {
            ConditionSpec::FieldEquals { pointer, value } => {
                Some(Self::field_equals(pointer.clone(), value.clone()))
            }
            ConditionSpec::Custom { .. } => None,
        }
    }
}

impl fmt::Debug for TriggerCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FieldEquals { pointer, value } => f
                .debug_struct("FieldEquals")
                .field("pointer", pointer)
                .field("value", value)
                .finish(),
            Self::Custom { label, .. } => f.debug_struct("Custom").field("label", label).finish(),
        }
    }
}

/// An (event, condition, once) tuple that can wake a suspended promise
#[derive(Debug, Clone)]
pub struct SuspensionTrigger {
    pub event_id: String,
    pub condition: Option<TriggerCondition>,
    /// Consume the trigger after its first match
    pub once: bool,
}

impl SuspensionTrigger {
    /// A one-shot trigger on `event_id`
    pub fn new(event_id: impl Into<String>) -> Self {
        Self {
            event_id: event_id.into(),
            condition: None,
            once: true,
        }
    }

    pub fn when(mut self, condition: TriggerCondition) -> Self {
        self.condition = Some(condition);
        self
    }

    /// Keep the trigger armed after it fires
    pub fn persistent(mut self) -> Self {
        self.once = false;
        self
    }

    pub fn matches(&self, payload: &Value) -> bool {
        self.condition
            .as_ref()
            .map_or(true, |condition| condition.matches(payload))
    }

    pub fn descriptor(&self) -> TriggerDescriptor {
        TriggerDescriptor {
            event_id: self.event_id.clone(),
            condition: self.condition.as_ref().map(TriggerCondition::spec),
            once: self.once,
        }
    }

    pub fn from_descriptor(descriptor: &TriggerDescriptor) -> Option<Self> {
        let condition = match &descriptor.condition {
            Some(spec) => Some(TriggerCondition::from_spec(spec)?),
            None => None,
        };
        Some(Self {
            event_id: descriptor.event_id.clone(),
            condition,
            once: descriptor.once,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_field_equals_uses_json_pointer() {
        let trigger = SuspensionTrigger::new("approval.granted")
            .when(TriggerCondition::field_equals("/request/id", "r-1"));
        assert!(trigger.matches(&json!({"request": {"id": "r-1"}})));
        assert!(!trigger.matches(&json!({"request": {"id": "r-2"}})));
        assert!(!trigger.matches(&json!({})));
    }

    #[test]
    fn test_descriptor_round_trip_for_rearmable_conditions() {
        let trigger =
            SuspensionTrigger::new("e").when(TriggerCondition::field_equals("/n", json!(3)));
        let rebuilt = SuspensionTrigger::from_descriptor(&trigger.descriptor()).unwrap();
        assert!(rebuilt.matches(&json!({"n": 3})));
        assert!(rebuilt.once);
    }

    #[test]
    fn test_custom_condition_is_not_rearmable() {
        let trigger = SuspensionTrigger::new("e")
            .when(TriggerCondition::custom("big", |v| v["n"].as_i64() > Some(10)));
        let descriptor = trigger.descriptor();
        assert!(!descriptor.is_rearmable());
        assert!(SuspensionTrigger::from_descriptor(&descriptor).is_none());
        assert!(trigger.matches(&json!({"n": 11})));
    }
}
