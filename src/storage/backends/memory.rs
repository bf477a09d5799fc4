//! In-memory storage backend for testing

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::storage::{
    error::{StorageError, StorageResult},
    lock::{MemoryLockGuard, StorageLock, StorageLockGuard},
    traits::PersistenceAdapter,
    types::{HealthStatus, Namespace, StorageKey},
};

/// In-memory storage backend for testing
///
/// Records are kept as serialized JSON text so loads behave like a real
/// backend (fresh copies, corruption detection). Writes can be made to fail
/// on demand to exercise rollback paths.
#[derive(Default)]
pub struct MemoryBackend {
    records: Arc<RwLock<HashMap<StorageKey, String>>>,
    locks: Arc<RwLock<HashMap<String, StorageLock>>>,
    fail_writes: AtomicBool,
    fail_next_writes: AtomicUsize,
    writes: AtomicUsize,
}

impl MemoryBackend {
    /// Create a new memory backend
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `save`/`delete` fail until switched off
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Make the next `count` writes fail
    pub fn fail_next_writes(&self, count: usize) {
        self.fail_next_writes.store(count, Ordering::SeqCst);
    }

    /// Number of successful writes so far
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Store raw text under a key, bypassing serialization
    pub async fn insert_raw(&self, key: StorageKey, raw: impl Into<String>) {
        self.records.write().await.insert(key, raw.into());
    }

    fn check_write(&self, key: &StorageKey) -> StorageResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::unavailable(format!("write to {} rejected", key)));
        }
        let injected = self
            .fail_next_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(StorageError::unavailable(format!("write to {} rejected", key)));
        }
        Ok(())
    }
}

#[async_trait]
impl PersistenceAdapter for MemoryBackend {
    async fn save(&self, key: &StorageKey, value: &Value) -> StorageResult<()> {
        key.validate()?;
        self.check_write(key)?;
        let raw = serde_json::to_string(value)?;
        self.records.write().await.insert(key.clone(), raw);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn load(&self, key: &StorageKey) -> StorageResult<Option<Value>> {
        key.validate()?;
        let records = self.records.read().await;
        match records.get(key) {
            Some(raw) => serde_json::from_str(raw)
                .map(Some)
                .map_err(|e| StorageError::corrupted(key, e)),
            None => Ok(None),
        }
    }

    async fn delete(&self, key: &StorageKey) -> StorageResult<()> {
        key.validate()?;
        self.check_write(key)?;
        self.records.write().await.remove(key);
        Ok(())
    }

    async fn list(&self, namespace: Namespace) -> StorageResult<Vec<StorageKey>> {
        let records = self.records.read().await;
        let mut keys: Vec<StorageKey> = records
            .keys()
            .filter(|k| k.namespace() == namespace)
            .cloned()
            .collect();
        keys.sort_by_key(|k| k.to_string());
        Ok(keys)
    }

    async fn quarantine(&self, key: &StorageKey, _reason: &str) -> StorageResult<()> {
        self.records.write().await.remove(key);
        Ok(())
    }

    async fn acquire_lock(
        &self,
        key: &str,
        ttl: Duration,
    ) -> StorageResult<Box<dyn StorageLockGuard>> {
        let mut locks = self.locks.write().await;

        if let Some(existing) = locks.get(key) {
            if !existing.is_expired() {
                return Err(StorageError::conflict(format!("Lock already held: {}", key)));
            }
        }

        let lock = StorageLock::new(key.to_string(), ttl);
        locks.insert(key.to_string(), lock.clone());

        Ok(Box::new(MemoryLockGuard::new(lock, self.locks.clone())))
    }

    async fn health_check(&self) -> StorageResult<HealthStatus> {
        Ok(HealthStatus {
            healthy: !self.fail_writes.load(Ordering::SeqCst),
            backend_type: "memory".to_string(),
            latency_ms: 0,
            errors: vec![],
        })
    }

    fn backend_type(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_injected_failures_leave_previous_value() {
        let backend = MemoryBackend::new();
        let key = StorageKey::promise("p");

        backend.save(&key, &json!(1)).await.unwrap();
        backend.fail_next_writes(1);
        assert!(backend.save(&key, &json!(2)).await.is_err());
        backend.save(&key, &json!(3)).await.unwrap();

        assert_eq!(backend.load(&key).await.unwrap(), Some(json!(3)));
        assert_eq!(backend.write_count(), 2);
    }

    #[tokio::test]
    async fn test_raw_garbage_is_corrupted() {
        let backend = MemoryBackend::new();
        let key = StorageKey::execution("bad");
        backend.insert_raw(key.clone(), "not json").await;

        assert!(backend.load(&key).await.unwrap_err().is_corrupted());
    }

    #[tokio::test]
    async fn test_lock_is_exclusive_until_released() {
        let backend = MemoryBackend::new();
        let guard = backend
            .acquire_lock("k", Duration::from_secs(10))
            .await
            .unwrap();
        assert!(backend
            .acquire_lock("k", Duration::from_secs(10))
            .await
            .is_err());

        guard.release().await.unwrap();
        assert!(backend
            .acquire_lock("k", Duration::from_secs(10))
            .await
            .is_ok());
    }
}
