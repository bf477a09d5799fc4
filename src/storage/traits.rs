//! Core trait definitions for the persistence layer

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

use super::error::StorageResult;
use super::lock::StorageLockGuard;
use super::types::{HealthStatus, Namespace, StorageKey};

/// Durable key/value storage for promise and execution state
///
/// Every operation is atomic per key: a concurrent `save` and `load` of the
/// same key observe either the old or the new value, never a partial write.
#[async_trait]
pub trait PersistenceAdapter: Send + Sync {
    /// Persist a value, replacing any previous one
    async fn save(&self, key: &StorageKey, value: &Value) -> StorageResult<()>;

    /// Load a value; `Ok(None)` when the key is missing.
    ///
    /// Unreadable records surface as [`StorageError::Corrupted`](super::StorageError::Corrupted).
    async fn load(&self, key: &StorageKey) -> StorageResult<Option<Value>>;

    /// Delete a value; deleting a missing key is not an error
    async fn delete(&self, key: &StorageKey) -> StorageResult<()>;

    /// List the keys stored in a namespace, sorted
    async fn list(&self, namespace: Namespace) -> StorageResult<Vec<StorageKey>>;

    /// Move an unreadable record out of the way so later scans skip it
    async fn quarantine(&self, key: &StorageKey, reason: &str) -> StorageResult<()>;

    /// Acquire an exclusive lock, failing with a conflict if it is held and not expired
    async fn acquire_lock(
        &self,
        key: &str,
        ttl: Duration,
    ) -> StorageResult<Box<dyn StorageLockGuard>>;

    /// Check the health of the storage backend
    async fn health_check(&self) -> StorageResult<HealthStatus>;

    /// Short backend name for diagnostics
    fn backend_type(&self) -> &'static str;
}
