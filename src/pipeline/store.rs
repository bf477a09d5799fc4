//! Persistence of execution records and their variables

use std::sync::Arc;
use tracing::{debug, warn};

use super::record::{ExecutionRecord, ExecutionSnapshot, Variables};
use crate::storage::{
    load_typed, save_typed, Namespace, PersistenceAdapter, StorageKey, StorageResult,
};

/// Reads and writes execution state through a [`PersistenceAdapter`]
///
/// Each execution is two records: the lightweight state and a separate
/// variables blob, so status polling never reads large payloads.
#[derive(Clone)]
pub struct ExecutionStore {
    adapter: Arc<dyn PersistenceAdapter>,
}

impl ExecutionStore {
    pub fn new(adapter: Arc<dyn PersistenceAdapter>) -> Self {
        Self { adapter }
    }

    pub fn adapter(&self) -> &Arc<dyn PersistenceAdapter> {
        &self.adapter
    }

    pub async fn save_state(&self, record: &ExecutionRecord) -> StorageResult<()> {
        save_typed(self.adapter.as_ref(), &StorageKey::execution(&record.id), record).await
    }

    pub async fn save_variables(&self, id: &str, variables: &Variables) -> StorageResult<()> {
        save_typed(self.adapter.as_ref(), &StorageKey::variables(id), variables).await
    }

    /// Persist variables, then state
    ///
    /// A crash between the two writes leaves variables ahead of the state,
    /// which only means a step's output is overwritten when it replays.
    pub async fn checkpoint(
        &self,
        record: &ExecutionRecord,
        variables: &Variables,
    ) -> StorageResult<()> {
        self.save_variables(&record.id, variables).await?;
        self.save_state(record).await?;
        debug!(
            "Checkpointed execution {} ({} steps completed)",
            record.id,
            record.completed_steps.len()
        );
        Ok(())
    }

    pub async fn load_state(&self, id: &str) -> StorageResult<Option<ExecutionRecord>> {
        load_typed(self.adapter.as_ref(), &StorageKey::execution(id)).await
    }

    /// Variables of an execution; empty when none were saved yet
    pub async fn load_variables(&self, id: &str) -> StorageResult<Variables> {
        Ok(load_typed(self.adapter.as_ref(), &StorageKey::variables(id))
            .await?
            .unwrap_or_default())
    }

    pub async fn load(&self, id: &str) -> StorageResult<Option<ExecutionSnapshot>> {
        let Some(record) = self.load_state(id).await? else {
            return Ok(None);
        };
        let variables = self.load_variables(id).await?;
        Ok(Some(ExecutionSnapshot { record, variables }))
    }

    /// Ids of all persisted executions
    pub async fn list_ids(&self) -> StorageResult<Vec<String>> {
        Ok(self
            .adapter
            .list(Namespace::Executions)
            .await?
            .into_iter()
            .filter_map(|key| match key {
                StorageKey::Execution(id) => Some(id),
                _ => None,
            })
            .collect())
    }

    /// Every readable execution record, oldest first; unreadable ones are skipped
    pub async fn list_records(&self) -> StorageResult<Vec<ExecutionRecord>> {
        let mut records = Vec::new();
        for id in self.list_ids().await? {
            match self.load_state(&id).await {
                Ok(Some(record)) => records.push(record),
                Ok(None) => {}
                Err(e) if e.is_corrupted() => warn!("Skipping unreadable execution {}: {}", id, e),
                Err(e) => return Err(e),
            }
        }
        records.sort_by(|a, b| a.start_time.cmp(&b.start_time).then(a.id.cmp(&b.id)));
        Ok(records)
    }

    pub async fn delete(&self, id: &str) -> StorageResult<()> {
        self.adapter.delete(&StorageKey::variables(id)).await?;
        self.adapter.delete(&StorageKey::execution(id)).await
    }

    /// Move both records of an execution out of the way
    pub async fn quarantine(&self, id: &str, reason: &str) -> StorageResult<()> {
        self.adapter
            .quarantine(&StorageKey::execution(id), reason)
            .await?;
        self.adapter
            .quarantine(&StorageKey::variables(id), reason)
            .await
    }
}
