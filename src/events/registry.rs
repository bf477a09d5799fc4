//! Process-wide pub/sub of named events

use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, trace};

use super::trigger::SuspensionTrigger;

/// Identifier of an armed trigger
pub type TriggerId = u64;

/// Async callback run when a trigger fires
pub type EventCallback = Arc<dyn Fn(FiredEvent) -> BoxFuture<'static, ()> + Send + Sync>;

/// Delivered to a callback when its trigger matches
#[derive(Debug, Clone)]
pub struct FiredEvent {
    pub trigger_id: TriggerId,
    pub event_id: String,
    pub payload: Value,
}

struct ArmedTrigger {
    id: TriggerId,
    trigger: SuspensionTrigger,
    owner: Option<String>,
    callback: EventCallback,
}

/// Named-event registry
///
/// The armed list sits behind one mutex. Matching a trigger and consuming a
/// `once` trigger happen in the same critical section, so concurrent
/// deliveries of one event can never both fire the same `once` trigger.
/// Callbacks run after the lock is released, in registration order.
#[derive(Default)]
pub struct EventRegistry {
    armed: Mutex<HashMap<String, Vec<ArmedTrigger>>>,
    next_id: AtomicU64,
}

impl EventRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Arm a trigger; `owner` groups triggers for [`EventRegistry::disarm_owner`]
    pub async fn register<F, Fut>(
        &self,
        trigger: SuspensionTrigger,
        owner: Option<&str>,
        callback: F,
    ) -> TriggerId
    where
        F: Fn(FiredEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let callback: EventCallback = Arc::new(move |event| callback(event).boxed());
        self.register_callback(trigger, owner, callback).await
    }

    pub async fn register_callback(
        &self,
        trigger: SuspensionTrigger,
        owner: Option<&str>,
        callback: EventCallback,
    ) -> TriggerId {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let event_id = trigger.event_id.clone();

        self.armed
            .lock()
            .await
            .entry(event_id.clone())
            .or_default()
            .push(ArmedTrigger {
                id,
                trigger,
                owner: owner.map(str::to_string),
                callback,
            });
        trace!("Armed trigger {} on {}", id, event_id);
        id
    }

    /// Subscribe a handler to every occurrence of an event
    pub async fn on<F, Fut>(&self, event_id: &str, handler: F) -> TriggerId
    where
        F: Fn(FiredEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.register(SuspensionTrigger::new(event_id).persistent(), None, handler)
            .await
    }

    /// Disarm one trigger; returns whether it was still armed
    pub async fn off(&self, id: TriggerId) -> bool {
        let mut armed = self.armed.lock().await;
        let mut removed = false;
        armed.retain(|_, triggers| {
            let before = triggers.len();
            triggers.retain(|t| t.id != id);
            removed |= triggers.len() != before;
            !triggers.is_empty()
        });
        removed
    }

    /// Disarm every trigger registered for `owner`
    pub async fn disarm_owner(&self, owner: &str) -> usize {
        let mut armed = self.armed.lock().await;
        let mut removed = 0;
        armed.retain(|_, triggers| {
            let before = triggers.len();
            triggers.retain(|t| t.owner.as_deref() != Some(owner));
            removed += before - triggers.len();
            !triggers.is_empty()
        });
        if removed > 0 {
            trace!("Disarmed {} triggers of {}", removed, owner);
        }
        removed
    }

    /// Deliver an event; returns how many triggers fired
    pub async fn trigger_event(&self, event_id: &str, payload: Value) -> usize {
        let fired: Vec<(TriggerId, EventCallback)> = {
            let mut armed = self.armed.lock().await;
            let Some(triggers) = armed.get_mut(event_id) else {
                trace!("No triggers armed for {}", event_id);
                return 0;
            };

            let mut fired = Vec::new();
            triggers.retain(|armed| {
                if !armed.trigger.matches(&payload) {
                    return true;
                }
                fired.push((armed.id, armed.callback.clone()));
                !armed.trigger.once
            });
            if triggers.is_empty() {
                armed.remove(event_id);
            }
            fired
        };

        debug!("Event {} fired {} trigger(s)", event_id, fired.len());
        for (trigger_id, callback) in &fired {
            callback(FiredEvent {
                trigger_id: *trigger_id,
                event_id: event_id.to_string(),
                payload: payload.clone(),
            })
            .await;
        }
        fired.len()
    }

    /// Alias of [`EventRegistry::trigger_event`]
    pub async fn emit(&self, event_id: &str, payload: Value) -> usize {
        self.trigger_event(event_id, payload).await
    }

    /// Number of triggers armed for an event
    pub async fn armed_count(&self, event_id: &str) -> usize {
        self.armed
            .lock()
            .await
            .get(event_id)
            .map_or(0, |triggers| triggers.len())
    }

    /// Number of triggers armed for an owner
    pub async fn owner_count(&self, owner: &str) -> usize {
        self.armed
            .lock()
            .await
            .values()
            .flatten()
            .filter(|t| t.owner.as_deref() == Some(owner))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::TriggerCondition;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    fn recorder(log: Arc<std::sync::Mutex<Vec<String>>>, name: &'static str) -> EventCallback {
        Arc::new(move |_event| {
            let log = log.clone();
            async move {
                log.lock().unwrap().push(name.to_string());
            }
            .boxed()
        })
    }

    #[tokio::test]
    async fn test_registration_order() {
        let registry = EventRegistry::new();
        let log = Arc::new(std::sync::Mutex::new(Vec::new()));

        for name in ["first", "second", "third"] {
            registry
                .register_callback(
                    SuspensionTrigger::new("e").persistent(),
                    None,
                    recorder(log.clone(), name),
                )
                .await;
        }

        assert_eq!(registry.trigger_event("e", json!({})).await, 3);
        assert_eq!(*log.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn test_non_matching_triggers_stay_armed() {
        let registry = EventRegistry::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();

        registry
            .register(
                SuspensionTrigger::new("order.paid")
                    .when(TriggerCondition::field_equals("/orderId", "o-1")),
                None,
                move |_| {
                    let counter = counter.clone();
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                    }
                },
            )
            .await;

        assert_eq!(registry.trigger_event("order.paid", json!({"orderId": "o-2"})).await, 0);
        assert_eq!(registry.armed_count("order.paid").await, 1);
        assert_eq!(registry.trigger_event("order.paid", json!({"orderId": "o-1"})).await, 1);
        assert_eq!(registry.armed_count("order.paid").await, 0);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_once_trigger_fires_exactly_once_under_concurrency() {
        let registry = EventRegistry::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();

        registry
            .register(SuspensionTrigger::new("e"), None, move |_| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
            })
            .await;

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let registry = registry.clone();
            tasks.push(tokio::spawn(async move {
                registry.trigger_event("e", json!({})).await
            }));
        }
        let mut total = 0;
        for task in tasks {
            total += task.await.unwrap();
        }

        assert_eq!(total, 1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_off_and_disarm_owner() {
        let registry = EventRegistry::new();
        let log = Arc::new(std::sync::Mutex::new(Vec::new()));

        let id = registry.on("e", |_| async {}).await;
        registry
            .register_callback(SuspensionTrigger::new("e"), Some("p1"), recorder(log.clone(), "a"))
            .await;
        registry
            .register_callback(SuspensionTrigger::new("f"), Some("p1"), recorder(log.clone(), "b"))
            .await;

        assert!(registry.off(id).await);
        assert!(!registry.off(id).await);
        assert_eq!(registry.owner_count("p1").await, 2);
        assert_eq!(registry.disarm_owner("p1").await, 2);
        assert_eq!(registry.emit("e", json!(null)).await, 0);
        assert!(log.lock().unwrap().is_empty());
    }
}
