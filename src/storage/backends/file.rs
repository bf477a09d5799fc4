//! File-based persistence backend
//!
//! One JSON file per record. Writes go to a uniquely named temp file in the
//! same directory and are moved into place with an atomic rename, so a crash
//! never leaves a half-written record behind.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::storage::{
    config::StorageConfig,
    error::{StorageError, StorageResult},
    lock::{FileLockGuard, MemoryLockGuard, StorageLock, StorageLockGuard},
    traits::PersistenceAdapter,
    types::{HealthStatus, Namespace, StorageKey, VARIABLES_PREFIX},
};

const RECORD_EXTENSION: &str = ".json";

/// File-based storage backend
pub struct FileBackend {
    base_dir: PathBuf,
    enable_file_locks: bool,
    sync_writes: bool,
    locks: Arc<RwLock<HashMap<String, StorageLock>>>,
}

impl FileBackend {
    /// Create a new file backend
    pub async fn new(config: &StorageConfig) -> StorageResult<Self> {
        fs::create_dir_all(&config.base_dir).await?;

        Ok(Self {
            base_dir: config.base_dir.clone(),
            enable_file_locks: config.enable_file_locks,
            sync_writes: config.sync_writes,
            locks: Arc::new(RwLock::new(HashMap::new())),
        })
    }

    /// Root directory of this backend
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Path of the file backing a key
    pub fn path_for(&self, key: &StorageKey) -> StorageResult<PathBuf> {
        key.validate()?;
        Ok(self
            .base_dir
            .join(key.namespace().dir_name())
            .join(format!("{}{}", key.record_name(), RECORD_EXTENSION)))
    }

    fn lock_path(&self, key: &str) -> StorageResult<PathBuf> {
        if key.is_empty() || key.contains(['/', '\\']) || key.contains("..") {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        Ok(self.base_dir.join("locks").join(format!("{}.lock", key)))
    }

    /// Ensure the parent directory of a path exists
    async fn ensure_dir(&self, path: &Path) -> StorageResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        Ok(())
    }

    /// Write a file through a temp file and an atomic rename
    async fn write_atomic(&self, path: &Path, content: &[u8]) -> StorageResult<()> {
        self.ensure_dir(path).await?;

        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| StorageError::InvalidKey(path.display().to_string()))?;
        // Leading dot keeps in-flight temp files out of listings
        let temp_path = path.with_file_name(format!(".{}.tmp-{}", file_name, Uuid::new_v4()));

        let result = async {
            let mut file = fs::File::create(&temp_path).await?;
            file.write_all(content).await?;
            if self.sync_writes {
                file.sync_all().await?;
            }
            drop(file);
            fs::rename(&temp_path, path).await?;
            Ok::<(), std::io::Error>(())
        }
        .await;

        if let Err(e) = result {
            let _ = fs::remove_file(&temp_path).await;
            return Err(StorageError::Io(e));
        }
        Ok(())
    }

    /// Try to take over a lock file whose holder is gone
    async fn clear_stale_lock(&self, lock_file: &Path) -> StorageResult<bool> {
        let content = match fs::read_to_string(lock_file).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(true),
            Err(e) => return Err(e.into()),
        };

        let stale = match serde_json::from_str::<StorageLock>(&content) {
            Ok(existing) => existing.is_expired(),
            Err(_) => true,
        };

        if stale {
            warn!("Removing stale lock file {}", lock_file.display());
            match fs::remove_file(lock_file).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(stale)
    }
}

#[async_trait]
impl PersistenceAdapter for FileBackend {
    async fn save(&self, key: &StorageKey, value: &Value) -> StorageResult<()> {
        let path = self.path_for(key)?;
        let content = serde_json::to_vec_pretty(value)?;
        self.write_atomic(&path, &content).await?;
        debug!("Saved {} ({} bytes)", key, content.len());
        Ok(())
    }

    async fn load(&self, key: &StorageKey) -> StorageResult<Option<Value>> {
        let path = self.path_for(key)?;
        let content = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StorageError::Io(e)),
        };

        serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| StorageError::corrupted(key, e))
    }

    async fn delete(&self, key: &StorageKey) -> StorageResult<()> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    async fn list(&self, namespace: Namespace) -> StorageResult<Vec<StorageKey>> {
        let dir = self.base_dir.join(namespace.dir_name());
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(vec![]),
            Err(e) => return Err(StorageError::Io(e)),
        };

        let mut keys = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if name.starts_with('.') {
                continue;
            }
            let Some(record) = name.strip_suffix(RECORD_EXTENSION) else {
                continue;
            };

            let key = match namespace {
                Namespace::Executions => match record.strip_prefix(VARIABLES_PREFIX) {
                    Some(id) => StorageKey::variables(id),
                    None => StorageKey::execution(record),
                },
                Namespace::Promises => StorageKey::promise(record),
            };
            keys.push(key);
        }

        keys.sort_by_key(|k| k.to_string());
        Ok(keys)
    }

    async fn quarantine(&self, key: &StorageKey, reason: &str) -> StorageResult<()> {
        let path = self.path_for(key)?;
        if !path.exists() {
            return Ok(());
        }

        let stamp = chrono::Utc::now().format("%Y%m%d%H%M%S");
        let target = path.with_extension(format!("json.corrupt-{}", stamp));
        fs::rename(&path, &target).await?;
        warn!(
            "Quarantined {} to {} ({})",
            key,
            target.display(),
            reason
        );
        Ok(())
    }

    async fn acquire_lock(
        &self,
        key: &str,
        ttl: Duration,
    ) -> StorageResult<Box<dyn StorageLockGuard>> {
        if !self.enable_file_locks {
            // Process-local locking only
            let mut locks = self.locks.write().await;
            if let Some(existing) = locks.get(key) {
                if !existing.is_expired() {
                    return Err(StorageError::conflict(format!("Lock already held: {}", key)));
                }
            }
            let lock = StorageLock::new(key.to_string(), ttl);
            locks.insert(key.to_string(), lock.clone());
            return Ok(Box::new(MemoryLockGuard::new(lock, self.locks.clone())));
        }

        let lock_file = self.lock_path(key)?;
        self.ensure_dir(&lock_file).await?;

        // Two rounds: the second one after clearing a stale lock
        for _ in 0..2 {
            let lock = StorageLock::new(key.to_string(), ttl);
            let staged = lock_file.with_file_name(format!(".{}.lock-{}", key, lock.token));
            fs::write(&staged, serde_json::to_vec_pretty(&lock)?).await?;

            // hard_link publishes the complete lock file or fails if one exists
            let linked = fs::hard_link(&staged, &lock_file).await;
            let _ = fs::remove_file(&staged).await;

            match linked {
                Ok(()) => {
                    debug!("Acquired lock {} as {}", key, lock.holder);
                    return Ok(Box::new(FileLockGuard::new(lock, lock_file)));
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    if !self.clear_stale_lock(&lock_file).await? {
                        break;
                    }
                }
                Err(e) => return Err(StorageError::Io(e)),
            }
        }

        Err(StorageError::conflict(format!("Lock already held: {}", key)))
    }

    async fn health_check(&self) -> StorageResult<HealthStatus> {
        let start = std::time::Instant::now();

        let test_file = self.base_dir.join(".health_check");
        let result = fs::write(&test_file, "health_check").await;
        let _ = fs::remove_file(&test_file).await;

        let latency_ms = start.elapsed().as_millis() as u64;

        Ok(match result {
            Ok(_) => HealthStatus {
                healthy: true,
                backend_type: "file".to_string(),
                latency_ms,
                errors: vec![],
            },
            Err(e) => HealthStatus {
                healthy: false,
                backend_type: "file".to_string(),
                latency_ms,
                errors: vec![e.to_string()],
            },
        })
    }

    fn backend_type(&self) -> &'static str {
        "file"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    async fn backend(dir: &TempDir) -> FileBackend {
        FileBackend::new(&StorageConfig::file(dir.path())).await.unwrap()
    }

    #[tokio::test]
    async fn test_layout_on_disk() {
        let dir = TempDir::new().unwrap();
        let backend = backend(&dir).await;

        backend
            .save(&StorageKey::execution("e1"), &json!({"id": "e1"}))
            .await
            .unwrap();
        backend
            .save(&StorageKey::variables("e1"), &json!({"a": 1}))
            .await
            .unwrap();

        assert!(dir.path().join("executions/e1.json").exists());
        assert!(dir.path().join("executions/variables_e1.json").exists());
    }

    #[tokio::test]
    async fn test_no_temp_files_left_behind() {
        let dir = TempDir::new().unwrap();
        let backend = backend(&dir).await;
        let key = StorageKey::promise("p1");

        for i in 0..5 {
            backend.save(&key, &json!({"v": i})).await.unwrap();
        }

        let names: Vec<_> = std::fs::read_dir(dir.path().join("promises"))
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(names, vec!["p1.json".to_string()]);
        assert_eq!(backend.load(&key).await.unwrap(), Some(json!({"v": 4})));
    }

    #[tokio::test]
    async fn test_list_separates_state_and_variables() {
        let dir = TempDir::new().unwrap();
        let backend = backend(&dir).await;

        backend
            .save(&StorageKey::execution("b"), &json!({}))
            .await
            .unwrap();
        backend
            .save(&StorageKey::execution("a"), &json!({}))
            .await
            .unwrap();
        backend
            .save(&StorageKey::variables("a"), &json!({}))
            .await
            .unwrap();

        let keys = backend.list(Namespace::Executions).await.unwrap();
        assert_eq!(
            keys,
            vec![
                StorageKey::execution("a"),
                StorageKey::execution("b"),
                StorageKey::variables("a"),
            ]
        );
    }

    #[tokio::test]
    async fn test_corrupted_file_and_quarantine() {
        let dir = TempDir::new().unwrap();
        let backend = backend(&dir).await;
        let key = StorageKey::execution("broken");

        std::fs::create_dir_all(dir.path().join("executions")).unwrap();
        std::fs::write(dir.path().join("executions/broken.json"), "{\"id\": ").unwrap();

        let err = backend.load(&key).await.unwrap_err();
        assert!(err.is_corrupted());

        backend.quarantine(&key, "test").await.unwrap();
        assert_eq!(backend.load(&key).await.unwrap(), None);
        assert!(backend.list(Namespace::Executions).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_lock_conflict_and_release() {
        let dir = TempDir::new().unwrap();
        let backend = backend(&dir).await;

        let guard = backend
            .acquire_lock("execution-e1", Duration::from_secs(30))
            .await
            .unwrap();
        let second = backend
            .acquire_lock("execution-e1", Duration::from_secs(30))
            .await;
        assert!(matches!(second, Err(StorageError::Conflict(_))));

        guard.release().await.unwrap();
        let third = backend
            .acquire_lock("execution-e1", Duration::from_secs(30))
            .await;
        assert!(third.is_ok());
    }

    #[tokio::test]
    async fn test_expired_lock_is_taken_over() {
        let dir = TempDir::new().unwrap();
        let backend = backend(&dir).await;

        let stale = backend
            .acquire_lock("execution-e2", Duration::from_millis(10))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        let fresh = backend
            .acquire_lock("execution-e2", Duration::from_secs(30))
            .await
            .unwrap();
        assert!(!stale.is_valid().await.unwrap());
        assert!(fresh.is_valid().await.unwrap());

        // Dropping the stale guard must not remove the new holder's file
        drop(stale);
        assert!(fresh.is_valid().await.unwrap());
    }
}
