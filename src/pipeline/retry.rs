//! Retry policy with configurable backoff

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Backoff strategies for retry delays
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum BackoffStrategy {
    /// Same delay before every retry
    #[default]
    Fixed,
    /// Delay grows by `increment` per retry
    Linear {
        #[serde(with = "humantime_serde")]
        increment: Duration,
    },
    /// Delay multiplies by `base` per retry
    Exponential {
        #[serde(default = "default_exponential_base")]
        base: f64,
    },
}

fn default_exponential_base() -> f64 {
    2.0
}

/// Upper bound applied to every computed delay
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(300);

/// Retry settings resolved for one step
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Extra attempts after the first one
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub backoff: BackoffStrategy,
    /// Randomize delays by up to +/-25%
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 0,
            retry_delay: Duration::ZERO,
            backoff: BackoffStrategy::Fixed,
            jitter: false,
        }
    }
}

impl RetryPolicy {
    /// Total attempts allowed, first run included
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Whether another attempt is allowed after `failed_attempts` failures
    pub fn should_retry(&self, failed_attempts: u32) -> bool {
        failed_attempts < self.max_attempts()
    }

    /// Delay before retry number `retry` (1-based)
    pub fn delay_for(&self, retry: u32) -> Duration {
        let retry = retry.max(1);
        let delay = match &self.backoff {
            BackoffStrategy::Fixed => self.retry_delay,
            BackoffStrategy::Linear { increment } => self
                .retry_delay
                .saturating_add(increment.saturating_mul(retry - 1)),
            BackoffStrategy::Exponential { base } => {
                let multiplier = base.powi((retry - 1).min(63) as i32);
                let secs = self.retry_delay.as_secs_f64() * multiplier;
                if secs.is_finite() && secs < MAX_RETRY_DELAY.as_secs_f64() {
                    Duration::from_secs_f64(secs.max(0.0))
                } else {
                    MAX_RETRY_DELAY
                }
            }
        };
        self.apply_jitter(delay.min(MAX_RETRY_DELAY))
    }

    fn apply_jitter(&self, delay: Duration) -> Duration {
        if !self.jitter || delay.is_zero() {
            return delay;
        }
        let mut rng = rand::rng();
        let range = delay.as_secs_f64() * 0.25;
        let jitter = rng.random_range(-range..=range);
        Duration::from_secs_f64((delay.as_secs_f64() + jitter).max(0.0))
    }
}
