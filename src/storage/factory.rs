//! Storage factory for creating persistence adapters

use std::sync::Arc;
use tracing::debug;

use super::backends::{FileBackend, MemoryBackend};
use super::config::{BackendType, StorageConfig};
use super::error::StorageResult;
use super::traits::PersistenceAdapter;

/// Factory for creating storage instances
pub struct StorageFactory;

impl StorageFactory {
    /// Create storage from explicit configuration
    pub async fn from_config(config: &StorageConfig) -> StorageResult<Arc<dyn PersistenceAdapter>> {
        debug!("Creating {:?} storage backend", config.backend);
        match config.backend {
            BackendType::File => {
                let backend = FileBackend::new(config).await?;
                Ok(Arc::new(backend))
            }
            BackendType::Memory => Ok(Arc::new(MemoryBackend::new())),
        }
    }

    /// Create a file backend rooted at a directory
    pub async fn file(
        base_dir: impl Into<std::path::PathBuf>,
    ) -> StorageResult<Arc<dyn PersistenceAdapter>> {
        Self::from_config(&StorageConfig::file(base_dir)).await
    }

    /// Create an in-memory backend
    pub fn memory() -> Arc<dyn PersistenceAdapter> {
        Arc::new(MemoryBackend::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_factory_picks_backend() {
        let dir = TempDir::new().unwrap();
        let file = StorageFactory::file(dir.path()).await.unwrap();
        assert_eq!(file.backend_type(), "file");

        let memory = StorageFactory::from_config(&StorageConfig::memory())
            .await
            .unwrap();
        assert_eq!(memory.backend_type(), "memory");
        assert!(memory.health_check().await.unwrap().healthy);
    }
}
