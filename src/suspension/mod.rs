//! Distributed await: suspend a promise until an event or a timeout
//!
//! Suspension never blocks a worker thread. The promise is marked suspended
//! and persisted, its triggers are armed in the event registry, and the
//! caller awaits the promise's settlement. Trigger callbacks settle the
//! promise through the [`PromiseManager`], which makes late or duplicate
//! deliveries harmless no-ops.

use chrono::Utc;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::events::{
    EventRegistry, FiredEvent, SuspensionTrigger, TimerService, TriggerCondition,
    TIMER_EXPIRED_EVENT, TIMER_ID_POINTER,
};
use crate::promise::{
    DistributedPromise, PromiseError, PromiseManager, PromiseRecord, PromiseResult, PromiseState,
    TriggerDescriptor,
};

/// How a timed suspension ended
#[derive(Debug, Clone, PartialEq)]
pub enum Wakeup<T> {
    /// A domain event resolved the promise
    Event(T),
    /// The timer won the race
    TimedOut { after: Duration },
}

impl<T> Wakeup<T> {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Wakeup::TimedOut { .. })
    }

    pub fn into_event(self) -> Option<T> {
        match self {
            Wakeup::Event(value) => Some(value),
            Wakeup::TimedOut { .. } => None,
        }
    }
}

/// Suspension primitive over the promise manager, event registry and timers
pub struct DistributedAwait {
    promises: Arc<PromiseManager>,
    registry: Arc<EventRegistry>,
    timers: Arc<TimerService>,
    /// Timer id per suspended promise
    deadlines: Mutex<HashMap<String, String>>,
}

impl DistributedAwait {
    pub fn new(
        promises: Arc<PromiseManager>,
        registry: Arc<EventRegistry>,
        timers: Arc<TimerService>,
    ) -> Arc<Self> {
        Arc::new(Self {
            promises,
            registry,
            timers,
            deadlines: Mutex::new(HashMap::new()),
        })
    }

    pub fn registry(&self) -> &Arc<EventRegistry> {
        &self.registry
    }

    /// Mark the promise suspended, persist that, then arm its triggers
    pub async fn suspend<T>(
        &self,
        promise: &DistributedPromise<T>,
        triggers: Vec<SuspensionTrigger>,
    ) -> PromiseResult<()> {
        if triggers.is_empty() {
            return Err(PromiseError::InvalidTrigger(format!(
                "promise {} needs at least one trigger",
                promise.id()
            )));
        }
        self.arm(promise.id(), triggers, None).await
    }

    /// Suspend and wait for the first matching event
    pub async fn suspend_for_event<T: DeserializeOwned>(
        &self,
        promise: &DistributedPromise<T>,
        triggers: Vec<SuspensionTrigger>,
    ) -> PromiseResult<T> {
        if !promise.is_settled() {
            self.suspend(promise, triggers).await?;
        }
        let outcome = promise.result().await;
        self.disarm(promise.id()).await;
        outcome
    }

    /// Suspend until a matching event or until `duration` elapses
    pub async fn suspend_for_duration<T: DeserializeOwned>(
        &self,
        promise: &DistributedPromise<T>,
        duration: Duration,
        triggers: Vec<SuspensionTrigger>,
    ) -> PromiseResult<Wakeup<T>> {
        match self.suspend_with_timeout(promise, duration, triggers).await {
            Ok(value) => Ok(Wakeup::Event(value)),
            Err(PromiseError::TimedOut { after, .. }) => Ok(Wakeup::TimedOut { after }),
            Err(e) => Err(e),
        }
    }

    /// Like [`DistributedAwait::suspend_for_duration`] but the timeout is an error
    pub async fn suspend_with_timeout<T: DeserializeOwned>(
        &self,
        promise: &DistributedPromise<T>,
        duration: Duration,
        triggers: Vec<SuspensionTrigger>,
    ) -> PromiseResult<T> {
        if !promise.is_settled() {
            self.arm(promise.id(), triggers, Some(duration)).await?;
        }
        let outcome = promise.result().await;
        self.disarm(promise.id()).await;
        outcome
    }

    /// Disarm every trigger of a promise and reject it as cancelled
    ///
    /// Returns false if the promise had already settled.
    pub async fn cancel(&self, promise_id: &str, reason: &str) -> PromiseResult<bool> {
        self.disarm(promise_id).await;
        match self.promises.cancel(promise_id, reason).await {
            Err(PromiseError::NotFound(_)) => Ok(false),
            other => other,
        }
    }

    /// Re-arm the triggers of a persisted suspended promise after a restart
    ///
    /// Returns how many triggers were armed. Custom predicates cannot be
    /// rebuilt and are skipped; the deadline timer is rescheduled for the
    /// remaining time.
    pub async fn rearm(&self, record: &PromiseRecord) -> PromiseResult<usize> {
        if record.state != PromiseState::Suspended {
            return Ok(0);
        }
        self.registry.disarm_owner(&record.id).await;

        let mut armed = 0;
        for descriptor in &record.triggers {
            if descriptor.event_id == TIMER_EXPIRED_EVENT {
                continue;
            }
            match SuspensionTrigger::from_descriptor(descriptor) {
                Some(trigger) => {
                    self.arm_trigger(&record.id, trigger).await;
                    armed += 1;
                }
                None => warn!(
                    "Cannot re-arm custom trigger on {} for promise {}",
                    descriptor.event_id, record.id
                ),
            }
        }

        if let Some(deadline) = record.deadline {
            let after = (deadline - record.updated_at).to_std().unwrap_or_default();
            let remaining = (deadline - Utc::now()).to_std().unwrap_or_default();
            self.arm_timer(&record.id, remaining, after).await;
            armed += 1;
        }

        info!("Re-armed {} trigger(s) for promise {}", armed, record.id);
        Ok(armed)
    }

    async fn arm(
        &self,
        promise_id: &str,
        triggers: Vec<SuspensionTrigger>,
        timeout: Option<Duration>,
    ) -> PromiseResult<()> {
        if let Some(bad) = triggers.iter().find(|t| t.event_id.is_empty()) {
            return Err(PromiseError::InvalidTrigger(format!("{:?}", bad)));
        }

        // A replayed suspension keeps the deadline of the original one
        let previous_deadline = match self.promises.get(promise_id).await? {
            Some(record) if record.state == PromiseState::Suspended => record.deadline,
            _ => None,
        };

        let mut descriptors: Vec<TriggerDescriptor> =
            triggers.iter().map(SuspensionTrigger::descriptor).collect();
        let deadline = match timeout {
            Some(duration) => {
                descriptors.push(TriggerDescriptor {
                    event_id: TIMER_EXPIRED_EVENT.to_string(),
                    condition: None,
                    once: true,
                });
                let span = chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::MAX);
                previous_deadline.or_else(|| Utc::now().checked_add_signed(span))
            }
            None => None,
        };

        self.promises.suspend(promise_id, descriptors, deadline).await?;
        debug!("Suspended promise {} on {} trigger(s)", promise_id, triggers.len());

        self.registry.disarm_owner(promise_id).await;
        for trigger in triggers {
            self.arm_trigger(promise_id, trigger).await;
        }
        if let Some(duration) = timeout {
            let remaining = match deadline {
                Some(at) => (at - Utc::now()).to_std().unwrap_or_default(),
                None => duration,
            };
            self.arm_timer(promise_id, remaining.min(duration), duration)
                .await;
        }
        Ok(())
    }

    async fn arm_trigger(&self, promise_id: &str, trigger: SuspensionTrigger) {
        let promises = self.promises.clone();
        let id = promise_id.to_string();
        self.registry
            .register(trigger, Some(promise_id), move |event: FiredEvent| {
                let promises = promises.clone();
                let id = id.clone();
                async move {
                    match promises.resume_promise(&id, event.payload).await {
                        Ok(outcome) => debug!("Event {} for {}: {:?}", event.event_id, id, outcome),
                        Err(e) => error!("Failed to resume promise {}: {}", id, e),
                    }
                }
            })
            .await;
    }

    /// Fire after `delay`; the promise is rejected as timed out after `after`
    async fn arm_timer(&self, promise_id: &str, delay: Duration, after: Duration) {
        let timer_id = format!("{}:deadline", promise_id);
        let promises = self.promises.clone();
        let id = promise_id.to_string();

        self.registry
            .register(
                SuspensionTrigger::new(TIMER_EXPIRED_EVENT)
                    .when(TriggerCondition::field_equals(TIMER_ID_POINTER, timer_id.clone())),
                Some(promise_id),
                move |_| {
                    let promises = promises.clone();
                    let id = id.clone();
                    async move {
                        if let Err(e) = promises.expire(&id, after).await {
                            error!("Failed to expire promise {}: {}", id, e);
                        }
                    }
                },
            )
            .await;

        self.timers.schedule_with_id(timer_id.clone(), delay).await;
        self.deadlines
            .lock()
            .await
            .insert(promise_id.to_string(), timer_id);
    }

    async fn disarm(&self, promise_id: &str) {
        self.registry.disarm_owner(promise_id).await;
        if let Some(timer_id) = self.deadlines.lock().await.remove(promise_id) {
            self.timers.cancel(&timer_id).await;
        }
    }
}
