//! Authoritative registry of distributed promises
//!
//! Every transition is computed on a copy of the record, persisted, and only
//! then published. A failed write leaves the in-memory record untouched, so
//! memory and storage never disagree.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::error::{PromiseError, PromiseResult};
use super::types::{
    PromiseFailure, PromiseMetadata, PromiseRecord, PromiseState, ResumeOutcome, TriggerDescriptor,
};
use crate::storage::{
    load_typed, save_typed, Namespace, PersistenceAdapter, StorageError, StorageKey,
};

/// Options for creating a promise
#[derive(Debug, Clone, Default)]
pub struct CreateOptions {
    /// Caller-supplied id; a v4 UUID is generated when absent
    pub id: Option<String>,
    pub metadata: PromiseMetadata,
}

impl CreateOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_metadata(mut self, metadata: PromiseMetadata) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Records loaded during a restore pass
#[derive(Debug, Default)]
pub struct RestoreSummary {
    pub restored: Vec<PromiseRecord>,
    pub quarantined: Vec<String>,
}

struct PromiseSlot {
    record: Mutex<PromiseRecord>,
    published: watch::Sender<PromiseRecord>,
}

impl PromiseSlot {
    fn new(record: PromiseRecord) -> Arc<Self> {
        let (published, _) = watch::channel(record.clone());
        Arc::new(Self {
            record: Mutex::new(record),
            published,
        })
    }
}

/// Creates, tracks and settles distributed promises
pub struct PromiseManager {
    store: Arc<dyn PersistenceAdapter>,
    slots: RwLock<HashMap<String, Arc<PromiseSlot>>>,
}

impl PromiseManager {
    pub fn new(store: Arc<dyn PersistenceAdapter>) -> Arc<Self> {
        Arc::new(Self {
            store,
            slots: RwLock::new(HashMap::new()),
        })
    }

    /// Create a pending promise and hand its resolver to `executor`
    ///
    /// The pending record is persisted before `executor` runs. Fails with
    /// [`PromiseError::AlreadyExists`] when the id is taken.
    pub async fn create_promise<T, F>(
        self: &Arc<Self>,
        executor: F,
        options: CreateOptions,
    ) -> PromiseResult<DistributedPromise<T>>
    where
        F: FnOnce(PromiseResolver<T>),
    {
        let id = options
            .id
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let key = StorageKey::promise(&id);
        key.validate()?;

        if self.store.load(&key).await?.is_some() {
            return Err(PromiseError::AlreadyExists(id));
        }

        // Claim the id under the map lock; the pending write holds only the slot's lock
        let record = PromiseRecord::pending(&id, options.metadata);
        let slot = PromiseSlot::new(record.clone());
        let held = slot.record.lock().await;
        {
            let mut slots = self.slots.write().await;
            if slots.contains_key(&id) {
                return Err(PromiseError::AlreadyExists(id));
            }
            slots.insert(id.clone(), slot.clone());
        }
        if let Err(e) = save_typed(self.store.as_ref(), &key, &record).await {
            self.slots.write().await.remove(&id);
            return Err(e.into());
        }
        drop(held);
        debug!("Created promise {}", id);

        executor(PromiseResolver::new(id.clone(), self.clone()));
        Ok(DistributedPromise::new(id, slot.published.subscribe()))
    }

    /// Create a pending promise without an executor
    pub async fn create<T>(
        self: &Arc<Self>,
        options: CreateOptions,
    ) -> PromiseResult<DistributedPromise<T>> {
        self.create_promise(|_| {}, options).await
    }

    /// Adopt an existing promise with this id or create a new pending one
    ///
    /// Used for deterministic replay: a step re-executed after a restart gets
    /// back the promise its earlier attempt created.
    pub async fn restore_or_create<T>(
        self: &Arc<Self>,
        options: CreateOptions,
    ) -> PromiseResult<DistributedPromise<T>> {
        if let Some(id) = &options.id {
            if let Some(slot) = self.slot(id).await? {
                debug!("Adopted existing promise {}", id);
                return Ok(DistributedPromise::new(id.clone(), slot.published.subscribe()));
            }
        }
        match self.create(options).await {
            Err(PromiseError::AlreadyExists(id)) => self
                .handle(&id)
                .await?
                .ok_or(PromiseError::NotFound(id)),
            other => other,
        }
    }

    /// Resolve a pending or suspended promise
    ///
    /// Returns `Ok(false)` when the promise was already settled.
    pub async fn resolve(&self, id: &str, value: Value) -> PromiseResult<bool> {
        let settled = self
            .transition(id, |record| Ok(record.resolved(value)))
            .await?;
        if settled.is_some() {
            debug!("Resolved promise {}", id);
        } else {
            debug!("Ignoring duplicate resolution of promise {}", id);
        }
        Ok(settled.is_some())
    }

    /// Reject a pending or suspended promise
    ///
    /// Returns `Ok(false)` when the promise was already settled.
    pub async fn reject(&self, id: &str, failure: PromiseFailure) -> PromiseResult<bool> {
        let settled = self
            .transition(id, |record| Ok(record.rejected(failure)))
            .await?;
        if settled.is_some() {
            debug!("Rejected promise {}", id);
        }
        Ok(settled.is_some())
    }

    /// Mark a promise suspended on `triggers`
    ///
    /// Suspending an already suspended promise replaces its trigger list.
    pub async fn suspend(
        &self,
        id: &str,
        triggers: Vec<TriggerDescriptor>,
        deadline: Option<DateTime<Utc>>,
    ) -> PromiseResult<PromiseRecord> {
        let updated = self
            .transition(id, |record| {
                record
                    .suspended(triggers, deadline)
                    .map(Some)
                    .ok_or_else(|| PromiseError::InvalidTransition {
                        id: record.id.clone(),
                        from: record.state,
                        to: PromiseState::Suspended,
                    })
            })
            .await?;
        updated.ok_or_else(|| PromiseError::NotFound(id.to_string()))
    }

    /// Feed an event payload to a suspended promise
    ///
    /// Anything other than a suspended promise is reported through the
    /// outcome, not as an error.
    pub async fn resume_promise(&self, id: &str, event_data: Value) -> PromiseResult<ResumeOutcome> {
        let Some(slot) = self.slot(id).await? else {
            return Ok(ResumeOutcome::NotFound);
        };

        let mut record = slot.record.lock().await;
        if record.state != PromiseState::Suspended {
            debug!("Promise {} is {}, not resuming", id, record.state);
            return Ok(ResumeOutcome::NotSuspended(record.state));
        }
        let next = record
            .resolved(event_data)
            .ok_or_else(|| PromiseError::InvalidTransition {
                id: id.to_string(),
                from: record.state,
                to: PromiseState::Resolved,
            })?;
        self.commit(&slot, &mut *record, next.clone()).await?;
        info!("Resumed promise {}", id);
        Ok(ResumeOutcome::Resumed(next))
    }

    /// Reject a suspended promise whose timer fired
    pub async fn expire(&self, id: &str, after: Duration) -> PromiseResult<bool> {
        let settled = self
            .transition(id, |record| {
                if record.state != PromiseState::Suspended {
                    return Ok(None);
                }
                Ok(record.rejected(PromiseFailure::timed_out(after)))
            })
            .await?;
        if settled.is_some() {
            info!("Promise {} timed out after {:?}", id, after);
        }
        Ok(settled.is_some())
    }

    /// Reject a non-terminal promise with a cancellation
    pub async fn cancel(&self, id: &str, reason: &str) -> PromiseResult<bool> {
        let settled = self
            .transition(id, |record| Ok(record.rejected(PromiseFailure::cancelled(reason))))
            .await?;
        if settled.is_some() {
            info!("Cancelled promise {}: {}", id, reason);
        }
        Ok(settled.is_some())
    }

    /// Current record of a promise (memory first, then storage)
    pub async fn get(&self, id: &str) -> PromiseResult<Option<PromiseRecord>> {
        match self.slot(id).await? {
            Some(slot) => Ok(Some(slot.record.lock().await.clone())),
            None => Ok(None),
        }
    }

    /// Typed handle onto an existing promise
    pub async fn handle<T>(&self, id: &str) -> PromiseResult<Option<DistributedPromise<T>>> {
        Ok(self
            .slot(id)
            .await?
            .map(|slot| DistributedPromise::new(id.to_string(), slot.published.subscribe())))
    }

    /// Promises currently held in memory, optionally filtered by state
    pub async fn list(&self, state: Option<PromiseState>) -> Vec<PromiseRecord> {
        let slots: Vec<Arc<PromiseSlot>> = self.slots.read().await.values().cloned().collect();
        let mut records = Vec::with_capacity(slots.len());
        for slot in slots {
            let record = slot.record.lock().await.clone();
            if state.map_or(true, |s| s == record.state) {
                records.push(record);
            }
        }
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        records
    }

    /// Remove a promise from memory and storage
    pub async fn forget(&self, id: &str) -> PromiseResult<()> {
        let slot = self.slots.read().await.get(id).cloned();
        let _held = match &slot {
            Some(slot) => Some(slot.record.lock().await),
            None => None,
        };
        self.store.delete(&StorageKey::promise(id)).await?;
        self.slots.write().await.remove(id);
        debug!("Forgot promise {}", id);
        Ok(())
    }

    /// Forget every promise created on behalf of an execution
    pub async fn forget_execution(&self, execution_id: &str) -> PromiseResult<usize> {
        self.restore_all().await?;
        let owned: Vec<String> = self
            .list(None)
            .await
            .into_iter()
            .filter(|r| r.metadata.execution_id.as_deref() == Some(execution_id))
            .map(|r| r.id)
            .collect();
        for id in &owned {
            self.forget(id).await?;
        }
        Ok(owned.len())
    }

    /// Load every persisted promise into memory
    ///
    /// Unreadable records are quarantined and skipped.
    pub async fn restore_all(&self) -> PromiseResult<RestoreSummary> {
        let mut summary = RestoreSummary::default();
        for key in self.store.list(Namespace::Promises).await? {
            match self.slot(key.id()).await {
                Ok(Some(slot)) => summary.restored.push(slot.record.lock().await.clone()),
                Ok(None) => {}
                Err(PromiseError::Storage(StorageError::Corrupted { reason, .. })) => {
                    warn!("Quarantining unreadable promise {}: {}", key.id(), reason);
                    self.store.quarantine(&key, &reason).await?;
                    summary.quarantined.push(key.id().to_string());
                }
                Err(e) => return Err(e),
            }
        }
        Ok(summary)
    }

    async fn slot(&self, id: &str) -> PromiseResult<Option<Arc<PromiseSlot>>> {
        if let Some(slot) = self.slots.read().await.get(id) {
            return Ok(Some(slot.clone()));
        }

        let key = StorageKey::promise(id);
        let Some(record) = load_typed::<PromiseRecord>(self.store.as_ref(), &key).await? else {
            return Ok(None);
        };

        let mut slots = self.slots.write().await;
        let slot = slots
            .entry(id.to_string())
            .or_insert_with(|| PromiseSlot::new(record))
            .clone();
        Ok(Some(slot))
    }

    async fn is_current(&self, id: &str, slot: &Arc<PromiseSlot>) -> bool {
        self.slots
            .read()
            .await
            .get(id)
            .is_some_and(|current| Arc::ptr_eq(current, slot))
    }

    /// Apply `change` under the promise's lock; `Ok(None)` from `change` is a no-op
    async fn transition<F>(&self, id: &str, change: F) -> PromiseResult<Option<PromiseRecord>>
    where
        F: FnOnce(&PromiseRecord) -> PromiseResult<Option<PromiseRecord>>,
    {
        let slot = self
            .slot(id)
            .await?
            .ok_or_else(|| PromiseError::NotFound(id.to_string()))?;

        let mut record = slot.record.lock().await;
        if !self.is_current(id, &slot).await {
            // Forgotten, or its creation failed, while we waited for the lock
            return Err(PromiseError::NotFound(id.to_string()));
        }
        let Some(next) = change(&*record)? else {
            return Ok(None);
        };
        self.commit(&slot, &mut *record, next.clone()).await?;
        Ok(Some(next))
    }

    async fn commit(
        &self,
        slot: &PromiseSlot,
        current: &mut PromiseRecord,
        next: PromiseRecord,
    ) -> PromiseResult<()> {
        if let Err(e) = save_typed(self.store.as_ref(), &StorageKey::promise(&next.id), &next).await {
            warn!(
                "Failed to persist promise {} ({} -> {}), keeping {}: {}",
                next.id, current.state, next.state, current.state, e
            );
            return Err(e.into());
        }
        *current = next.clone();
        slot.published.send_replace(next);
        Ok(())
    }
}

/// Typed handle onto a distributed promise
pub struct DistributedPromise<T> {
    id: String,
    updates: watch::Receiver<PromiseRecord>,
    _value: PhantomData<fn() -> T>,
}

impl<T> Clone for DistributedPromise<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            updates: self.updates.clone(),
            _value: PhantomData,
        }
    }
}

impl<T> fmt::Debug for DistributedPromise<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DistributedPromise")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish()
    }
}

impl<T> DistributedPromise<T> {
    fn new(id: String, updates: watch::Receiver<PromiseRecord>) -> Self {
        Self {
            id,
            updates,
            _value: PhantomData,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> PromiseState {
        self.updates.borrow().state
    }

    pub fn snapshot(&self) -> PromiseRecord {
        self.updates.borrow().clone()
    }

    pub fn is_settled(&self) -> bool {
        self.state().is_terminal()
    }

    /// Wait until the promise is resolved or rejected
    pub async fn settled(&self) -> PromiseResult<PromiseRecord> {
        let mut updates = self.updates.clone();
        let record = updates
            .wait_for(|record| record.is_settled())
            .await
            .map_err(|_| PromiseError::Abandoned(self.id.clone()))?;
        Ok(record.clone())
    }
}

impl<T: DeserializeOwned> DistributedPromise<T> {
    /// Wait for the outcome and decode the resolved value
    pub async fn result(&self) -> PromiseResult<T> {
        let record = self.settled().await?;
        decode_outcome(record)
    }

    /// Outcome if already settled
    pub fn try_result(&self) -> Option<PromiseResult<T>> {
        let record = self.snapshot();
        record.is_settled().then(|| decode_outcome(record))
    }
}

fn decode_outcome<T: DeserializeOwned>(record: PromiseRecord) -> PromiseResult<T> {
    match record.state {
        PromiseState::Resolved => serde_json::from_value(record.value.unwrap_or(Value::Null))
            .map_err(|e| PromiseError::Decode {
                id: record.id,
                message: e.to_string(),
            }),
        _ => {
            let failure = record
                .error
                .unwrap_or_else(|| PromiseFailure::error("rejected without reason"));
            Err(PromiseError::from_failure(&record.id, failure))
        }
    }
}

/// Settles one promise; cheap to clone and move into tasks
pub struct PromiseResolver<T> {
    id: String,
    manager: Arc<PromiseManager>,
    _value: PhantomData<fn(T)>,
}

impl<T> Clone for PromiseResolver<T> {
    fn clone(&self) -> Self {
        Self::new(self.id.clone(), self.manager.clone())
    }
}

impl<T> PromiseResolver<T> {
    fn new(id: String, manager: Arc<PromiseManager>) -> Self {
        Self {
            id,
            manager,
            _value: PhantomData,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub async fn reject(&self, failure: PromiseFailure) -> PromiseResult<bool> {
        self.manager.reject(&self.id, failure).await
    }
}

impl<T: Serialize> PromiseResolver<T> {
    pub async fn resolve(&self, value: T) -> PromiseResult<bool> {
        let value = serde_json::to_value(value).map_err(|e| PromiseError::Decode {
            id: self.id.clone(),
            message: e.to_string(),
        })?;
        self.manager.resolve(&self.id, value).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryBackend;
    use serde_json::json;

    fn manager() -> (Arc<MemoryBackend>, Arc<PromiseManager>) {
        let backend = Arc::new(MemoryBackend::new());
        let manager = PromiseManager::new(backend.clone());
        (backend, manager)
    }

    #[tokio::test]
    async fn test_pending_is_persisted_before_executor_runs() {
        let (backend, manager) = manager();
        let store = backend.clone();

        let seen = Arc::new(std::sync::Mutex::new(None));
        let seen_in_executor = seen.clone();
        let promise = manager
            .create_promise::<u32, _>(
                move |resolver| {
                    *seen_in_executor.lock().unwrap() = Some(resolver.id().to_string());
                },
                CreateOptions::new().with_id("p1"),
            )
            .await
            .unwrap();

        assert_eq!(seen.lock().unwrap().as_deref(), Some("p1"));
        assert_eq!(promise.state(), PromiseState::Pending);
        let stored = store.load(&StorageKey::promise("p1")).await.unwrap().unwrap();
        assert_eq!(stored["state"], "pending");
    }

    #[tokio::test]
    async fn test_duplicate_id_is_rejected() {
        let (_, manager) = manager();
        manager
            .create::<u32>(CreateOptions::new().with_id("dup"))
            .await
            .unwrap();
        let err = manager
            .create::<u32>(CreateOptions::new().with_id("dup"))
            .await
            .unwrap_err();
        assert!(matches!(err, PromiseError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn test_first_settlement_wins() {
        let (_, manager) = manager();
        let promise = manager
            .create::<String>(CreateOptions::new().with_id("p"))
            .await
            .unwrap();

        assert!(manager.resolve("p", json!("first")).await.unwrap());
        assert!(!manager.resolve("p", json!("second")).await.unwrap());
        assert!(!manager
            .reject("p", PromiseFailure::error("late"))
            .await
            .unwrap());

        assert_eq!(promise.result().await.unwrap(), "first");
    }

    #[tokio::test]
    async fn test_failed_write_rolls_back() {
        let (backend, manager) = manager();
        let promise = manager
            .create::<u32>(CreateOptions::new().with_id("p"))
            .await
            .unwrap();

        backend.fail_next_writes(1);
        assert!(manager.resolve("p", json!(1)).await.is_err());
        assert_eq!(promise.state(), PromiseState::Pending);
        assert_eq!(
            manager.get("p").await.unwrap().unwrap().state,
            PromiseState::Pending
        );

        assert!(manager.resolve("p", json!(2)).await.unwrap());
        assert_eq!(promise.result().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_failed_create_leaves_no_trace() {
        let (backend, manager) = manager();
        backend.fail_next_writes(1);
        assert!(manager
            .create::<u32>(CreateOptions::new().with_id("p"))
            .await
            .is_err());
        assert!(manager.get("p").await.unwrap().is_none());
        assert!(matches!(
            manager.resolve("p", json!(1)).await,
            Err(PromiseError::NotFound(_))
        ));

        // The id is free again once the write goes through
        let promise = manager
            .create::<u32>(CreateOptions::new().with_id("p"))
            .await
            .unwrap();
        assert!(manager.resolve("p", json!(3)).await.unwrap());
        assert_eq!(promise.result().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_concurrent_creates_of_one_id() {
        let (_, manager) = manager();
        let attempts: Vec<_> = (0..8)
            .map(|_| {
                let manager = manager.clone();
                tokio::spawn(async move {
                    manager
                        .create::<u32>(CreateOptions::new().with_id("shared"))
                        .await
                        .is_ok()
                })
            })
            .collect();

        let mut created = 0;
        for attempt in attempts {
            if attempt.await.unwrap() {
                created += 1;
            }
        }
        assert_eq!(created, 1);
        assert_eq!(manager.list(None).await.len(), 1);
    }

    #[tokio::test]
    async fn test_restore_or_create_adopts_persisted_record() {
        let (backend, manager) = manager();
        manager
            .create::<u32>(CreateOptions::new().with_id("replayed"))
            .await
            .unwrap();
        manager.resolve("replayed", json!(9)).await.unwrap();

        // A fresh manager over the same store stands in for a restart
        let restarted = PromiseManager::new(backend);
        let adopted = restarted
            .restore_or_create::<u32>(CreateOptions::new().with_id("replayed"))
            .await
            .unwrap();
        assert_eq!(adopted.result().await.unwrap(), 9);

        let fresh = restarted
            .restore_or_create::<u32>(CreateOptions::new().with_id("new"))
            .await
            .unwrap();
        assert_eq!(fresh.state(), PromiseState::Pending);
    }

    #[tokio::test]
    async fn test_resume_outcomes() {
        let (_, manager) = manager();
        assert_eq!(
            manager.resume_promise("missing", json!(null)).await.unwrap(),
            ResumeOutcome::NotFound
        );

        manager
            .create::<Value>(CreateOptions::new().with_id("p"))
            .await
            .unwrap();
        assert_eq!(
            manager.resume_promise("p", json!(1)).await.unwrap(),
            ResumeOutcome::NotSuspended(PromiseState::Pending)
        );

        manager.suspend("p", vec![], None).await.unwrap();
        let outcome = manager.resume_promise("p", json!({"ok": 1})).await.unwrap();
        assert!(outcome.is_resumed());
        assert_eq!(
            manager.resume_promise("p", json!(2)).await.unwrap(),
            ResumeOutcome::NotSuspended(PromiseState::Resolved)
        );
    }

    #[tokio::test]
    async fn test_restart_restores_records() {
        let backend = Arc::new(MemoryBackend::new());
        let first = PromiseManager::new(backend.clone());
        first
            .create::<u32>(CreateOptions::new().with_id("keep"))
            .await
            .unwrap();
        first.suspend("keep", vec![], None).await.unwrap();
        drop(first);

        let second = PromiseManager::new(backend.clone());
        let summary = second.restore_all().await.unwrap();
        assert_eq!(summary.restored.len(), 1);
        assert_eq!(summary.restored[0].state, PromiseState::Suspended);
        assert!(second
            .resume_promise("keep", json!(7))
            .await
            .unwrap()
            .is_resumed());
    }

    #[tokio::test]
    async fn test_cancel_surfaces_as_cancelled_error() {
        let (_, manager) = manager();
        let promise = manager
            .create::<u32>(CreateOptions::new().with_id("c"))
            .await
            .unwrap();
        assert!(manager.cancel("c", "shutdown").await.unwrap());
        assert!(matches!(
            promise.result().await,
            Err(PromiseError::Cancelled { .. })
        ));
    }
}
