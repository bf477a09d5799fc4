//! Exclusive locks used to claim an execution across processes

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

use super::error::{StorageError, StorageResult};
use super::traits::PersistenceAdapter;

/// Storage lock information
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageLock {
    /// Unique lock key
    pub key: String,
    /// Lock holder identifier (`hostname:pid`)
    pub holder: String,
    /// When the lock was acquired or last refreshed
    pub acquired_at: DateTime<Utc>,
    /// Time to live for the lock
    pub ttl: Duration,
    /// Lock token for verification
    pub token: String,
}

impl StorageLock {
    /// Create a new storage lock held by this process
    pub fn new(key: String, ttl: Duration) -> Self {
        Self {
            key,
            holder: current_holder(),
            acquired_at: Utc::now(),
            ttl,
            token: Uuid::new_v4().to_string(),
        }
    }

    fn expiry(&self) -> DateTime<Utc> {
        let ttl = chrono::Duration::from_std(self.ttl).unwrap_or(chrono::Duration::MAX);
        self.acquired_at
            .checked_add_signed(ttl)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Check if the lock has expired
    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expiry()
    }

    /// Remaining time before lock expires
    pub fn remaining_ttl(&self) -> Option<Duration> {
        let remaining = self.expiry() - Utc::now();
        if remaining > chrono::Duration::zero() {
            remaining.to_std().ok()
        } else {
            None
        }
    }
}

/// Identifier of the current process, used as lock holder
pub fn current_holder() -> String {
    let host = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string());
    format!("{}:{}", host, std::process::id())
}

/// Lock guard that releases the lock when dropped
#[async_trait]
pub trait StorageLockGuard: Send + Sync {
    /// Get the lock information
    fn lock_info(&self) -> &StorageLock;

    /// Explicitly release the lock
    async fn release(self: Box<Self>) -> StorageResult<()>;

    /// Restart the TTL window (heartbeat)
    async fn refresh(&mut self) -> StorageResult<()>;

    /// Check if the lock is still held by this guard
    async fn is_valid(&self) -> StorageResult<bool>;
}

/// File-based lock guard implementation
pub struct FileLockGuard {
    lock: StorageLock,
    lock_file: PathBuf,
    released: bool,
}

impl FileLockGuard {
    /// Create a new file lock guard
    pub fn new(lock: StorageLock, lock_file: PathBuf) -> Self {
        Self {
            lock,
            lock_file,
            released: false,
        }
    }

    /// Whether the file on disk still carries our token
    fn owns_file(&self) -> bool {
        std::fs::read_to_string(&self.lock_file)
            .ok()
            .and_then(|content| serde_json::from_str::<StorageLock>(&content).ok())
            .map(|on_disk| on_disk.token == self.lock.token)
            .unwrap_or(false)
    }
}

#[async_trait]
impl StorageLockGuard for FileLockGuard {
    fn lock_info(&self) -> &StorageLock {
        &self.lock
    }

    async fn release(mut self: Box<Self>) -> StorageResult<()> {
        self.released = true;
        if !self.owns_file() {
            debug!("Lock {} was taken over, nothing to release", self.lock.key);
            return Ok(());
        }
        tokio::fs::remove_file(&self.lock_file)
            .await
            .map_err(|e| StorageError::lock(format!("Failed to release lock: {}", e)))
    }

    async fn refresh(&mut self) -> StorageResult<()> {
        if !self.owns_file() {
            return Err(StorageError::lock(format!(
                "Lock {} is no longer held by {}",
                self.lock.key, self.lock.holder
            )));
        }
        self.lock.acquired_at = Utc::now();
        let content = serde_json::to_string_pretty(&self.lock)?;
        tokio::fs::write(&self.lock_file, content).await?;
        Ok(())
    }

    async fn is_valid(&self) -> StorageResult<bool> {
        Ok(!self.lock.is_expired() && self.owns_file())
    }
}

impl Drop for FileLockGuard {
    fn drop(&mut self) {
        // Best-effort cleanup in drop
        if !self.released && self.owns_file() {
            let _ = std::fs::remove_file(&self.lock_file);
        }
    }
}

/// Lock guard for backends that keep their lock table in memory
pub struct MemoryLockGuard {
    lock: StorageLock,
    locks: Arc<RwLock<HashMap<String, StorageLock>>>,
}

impl MemoryLockGuard {
    pub fn new(lock: StorageLock, locks: Arc<RwLock<HashMap<String, StorageLock>>>) -> Self {
        Self { lock, locks }
    }
}

#[async_trait]
impl StorageLockGuard for MemoryLockGuard {
    fn lock_info(&self) -> &StorageLock {
        &self.lock
    }

    async fn release(self: Box<Self>) -> StorageResult<()> {
        let mut locks = self.locks.write().await;
        if locks.get(&self.lock.key).map(|l| &l.token) == Some(&self.lock.token) {
            locks.remove(&self.lock.key);
        }
        Ok(())
    }

    async fn refresh(&mut self) -> StorageResult<()> {
        let mut locks = self.locks.write().await;
        match locks.get_mut(&self.lock.key) {
            Some(held) if held.token == self.lock.token => {
                held.acquired_at = Utc::now();
                self.lock.acquired_at = held.acquired_at;
                Ok(())
            }
            _ => Err(StorageError::lock(format!(
                "Lock {} is no longer held",
                self.lock.key
            ))),
        }
    }

    async fn is_valid(&self) -> StorageResult<bool> {
        let locks = self.locks.read().await;
        Ok(!self.lock.is_expired()
            && locks.get(&self.lock.key).map(|l| &l.token) == Some(&self.lock.token))
    }
}

impl Drop for MemoryLockGuard {
    fn drop(&mut self) {
        // try_write avoids blocking inside async contexts; a missed release expires via TTL
        if let Ok(mut locks) = self.locks.try_write() {
            if locks.get(&self.lock.key).map(|l| &l.token) == Some(&self.lock.token) {
                locks.remove(&self.lock.key);
            }
        }
    }
}

/// Acquire a lock, retrying while it is held by someone else
pub async fn acquire_with_retry(
    adapter: &dyn PersistenceAdapter,
    key: &str,
    ttl: Duration,
    max_retries: u32,
    retry_delay: Duration,
) -> StorageResult<Box<dyn StorageLockGuard>> {
    let mut attempts = 0;

    loop {
        match adapter.acquire_lock(key, ttl).await {
            Ok(guard) => return Ok(guard),
            Err(e) if e.is_conflict() && attempts < max_retries => {
                attempts += 1;
                warn!(
                    "Lock {} busy, retrying ({}/{}) in {:?}",
                    key, attempts, max_retries, retry_delay
                );
                tokio::time::sleep(retry_delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_expiry() {
        let mut lock = StorageLock::new("k".to_string(), Duration::from_secs(60));
        assert!(!lock.is_expired());
        assert!(lock.remaining_ttl().is_some());

        lock.acquired_at = Utc::now() - chrono::Duration::seconds(120);
        assert!(lock.is_expired());
        assert!(lock.remaining_ttl().is_none());
    }

    #[test]
    fn test_huge_ttl_does_not_overflow() {
        let lock = StorageLock::new("k".to_string(), Duration::MAX);
        assert!(!lock.is_expired());
    }

    #[test]
    fn test_holder_contains_pid() {
        assert!(current_holder().ends_with(&format!(":{}", std::process::id())));
    }
}
