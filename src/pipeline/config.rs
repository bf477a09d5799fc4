//! Orchestrator defaults and per-execution options

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::retry::{BackoffStrategy, RetryPolicy};
use super::step::StepDefinition;

/// Process-wide orchestrator settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Retries per step when neither the step nor the execution sets one
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(with = "humantime_serde", default = "default_retry_delay")]
    pub retry_delay: Duration,

    #[serde(default)]
    pub backoff: BackoffStrategy,

    #[serde(default)]
    pub jitter: bool,

    /// Minimum spacing of mid-step checkpoint flushes
    #[serde(with = "humantime_serde", default = "default_checkpoint_interval")]
    pub checkpoint_interval: Duration,

    /// How often a running execution refreshes its lease
    #[serde(with = "humantime_serde", default = "default_heartbeat_interval")]
    pub heartbeat_interval: Duration,

    /// TTL of the storage lock that claims an execution
    #[serde(with = "humantime_serde", default = "default_lock_ttl")]
    pub lock_ttl: Duration,

    #[serde(default = "default_lock_retries")]
    pub lock_retries: u32,

    #[serde(with = "humantime_serde", default = "default_lock_retry_delay")]
    pub lock_retry_delay: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            retry_delay: default_retry_delay(),
            backoff: BackoffStrategy::default(),
            jitter: false,
            checkpoint_interval: default_checkpoint_interval(),
            heartbeat_interval: default_heartbeat_interval(),
            lock_ttl: default_lock_ttl(),
            lock_retries: default_lock_retries(),
            lock_retry_delay: default_lock_retry_delay(),
        }
    }
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_checkpoint_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_heartbeat_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_lock_ttl() -> Duration {
    Duration::from_secs(60)
}

fn default_lock_retries() -> u32 {
    3
}

fn default_lock_retry_delay() -> Duration {
    Duration::from_millis(200)
}

/// Per-execution overrides, persisted with the execution record
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none", with = "humantime_serde")]
    pub retry_delay: Option<Duration>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backoff: Option<BackoffStrategy>,

    #[serde(default, skip_serializing_if = "Option::is_none", with = "humantime_serde")]
    pub checkpoint_interval: Option<Duration>,

    /// Caller-chosen execution id; generated when absent
    #[serde(skip)]
    pub execution_id: Option<String>,
}

impl ExecutionOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_execution_id(mut self, id: impl Into<String>) -> Self {
        self.execution_id = Some(id.into());
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = Some(delay);
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffStrategy) -> Self {
        self.backoff = Some(backoff);
        self
    }

    pub fn with_checkpoint_interval(mut self, interval: Duration) -> Self {
        self.checkpoint_interval = Some(interval);
        self
    }

    /// Effective retry policy for a step: step settings, then these options, then defaults
    pub fn retry_policy(&self, step: &StepDefinition, defaults: &OrchestratorConfig) -> RetryPolicy {
        RetryPolicy {
            max_retries: step
                .max_retries
                .or(self.max_retries)
                .unwrap_or(defaults.max_retries),
            retry_delay: step
                .retry_delay
                .or(self.retry_delay)
                .unwrap_or(defaults.retry_delay),
            backoff: step
                .backoff
                .clone()
                .or_else(|| self.backoff.clone())
                .unwrap_or_else(|| defaults.backoff.clone()),
            jitter: defaults.jitter,
        }
    }

    pub fn checkpoint_interval(&self, defaults: &OrchestratorConfig) -> Duration {
        self.checkpoint_interval
            .unwrap_or(defaults.checkpoint_interval)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_settings_win_over_options() {
        let defaults = OrchestratorConfig::default();
        let options = ExecutionOptions::new()
            .with_max_retries(5)
            .with_retry_delay(Duration::from_millis(10));
        let step = StepDefinition::from_fn("s", |_, _| async { Ok(serde_json::Value::Null) })
            .with_max_retries(1);

        let policy = options.retry_policy(&step, &defaults);
        assert_eq!(policy.max_retries, 1);
        assert_eq!(policy.retry_delay, Duration::from_millis(10));
        assert_eq!(policy.backoff, BackoffStrategy::Fixed);
    }

    #[test]
    fn test_options_persist_without_execution_id() {
        let options = ExecutionOptions::new()
            .with_execution_id("e1")
            .with_retry_delay(Duration::from_millis(250));
        let json = serde_json::to_value(&options).unwrap();
        assert!(json.get("executionId").is_none());
        let back: ExecutionOptions = serde_json::from_value(json).unwrap();
        assert_eq!(back.retry_delay, Some(Duration::from_millis(250)));
        assert_eq!(back.execution_id, None);
    }

    #[test]
    fn test_orchestrator_config_from_toml() {
        let config: OrchestratorConfig =
            toml::from_str("max_retries = 1\nheartbeat_interval = \"500ms\"").unwrap();
        assert_eq!(config.max_retries, 1);
        assert_eq!(config.heartbeat_interval, Duration::from_millis(500));
        assert_eq!(config.lock_ttl, Duration::from_secs(60));
    }
}
