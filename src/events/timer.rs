//! Timers expressed as ordinary events
//!
//! A timer fires `timer.expired` with `{"timerId": <id>}` through the
//! [`EventRegistry`], so a timeout races against domain events on the same
//! path.

use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, trace};
use uuid::Uuid;

use super::registry::EventRegistry;

/// Event name used by every timer
pub const TIMER_EXPIRED_EVENT: &str = "timer.expired";

/// JSON pointer of the timer id in a `timer.expired` payload
pub const TIMER_ID_POINTER: &str = "/timerId";

/// Scheduler of `timer.expired` events
pub struct TimerService {
    registry: Arc<EventRegistry>,
    scheduled: Arc<Mutex<HashMap<String, JoinHandle<()>>>>,
}

impl TimerService {
    pub fn new(registry: Arc<EventRegistry>) -> Arc<Self> {
        Arc::new(Self {
            registry,
            scheduled: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// Schedule a timer with a generated id
    pub async fn schedule(&self, delay: Duration) -> String {
        let id = format!("timer-{}", Uuid::new_v4());
        self.schedule_with_id(id.clone(), delay).await;
        id
    }

    /// Schedule a timer; an existing timer with the same id is replaced
    pub async fn schedule_with_id(&self, id: String, delay: Duration) {
        let mut scheduled = self.scheduled.lock().await;

        let registry = self.registry.clone();
        let table = self.scheduled.clone();
        let timer_id = id.clone();
        // The table lock is held until the handle is stored, so the task
        // cannot look itself up before it is registered
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if table.lock().await.remove(&timer_id).is_none() {
                return;
            }
            trace!("Timer {} expired after {:?}", timer_id, delay);
            registry
                .trigger_event(TIMER_EXPIRED_EVENT, json!({ "timerId": timer_id }))
                .await;
        });

        if let Some(previous) = scheduled.insert(id.clone(), handle) {
            previous.abort();
        }
        debug!("Scheduled timer {} in {:?}", id, delay);
    }

    /// Cancel a timer before it fires; returns false if it already fired or never existed
    pub async fn cancel(&self, id: &str) -> bool {
        match self.scheduled.lock().await.remove(id) {
            Some(handle) => {
                handle.abort();
                debug!("Cancelled timer {}", id);
                true
            }
            None => false,
        }
    }

    /// Number of timers that have not fired yet
    pub async fn pending(&self) -> usize {
        self.scheduled.lock().await.len()
    }

    /// Cancel every outstanding timer
    pub async fn shutdown(&self) {
        let mut scheduled = self.scheduled.lock().await;
        for (_, handle) in scheduled.drain() {
            handle.abort();
        }
    }
}
