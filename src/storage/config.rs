//! Storage configuration types

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Storage backend type
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendType {
    /// File-based storage (default)
    #[default]
    File,
    /// Memory storage (for testing)
    Memory,
}

/// Main storage configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Storage backend type
    #[serde(default)]
    pub backend: BackendType,

    /// Base directory for the file backend
    #[serde(default = "default_base_dir")]
    pub base_dir: PathBuf,

    /// Enable file-based locking
    #[serde(default = "default_true")]
    pub enable_file_locks: bool,

    /// Fsync temp files before the atomic rename
    #[serde(default = "default_true")]
    pub sync_writes: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: BackendType::default(),
            base_dir: default_base_dir(),
            enable_file_locks: true,
            sync_writes: true,
        }
    }
}

impl StorageConfig {
    /// File storage rooted at a custom directory
    pub fn file(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            ..Self::default()
        }
    }

    /// In-memory storage (tests)
    pub fn memory() -> Self {
        Self {
            backend: BackendType::Memory,
            ..Self::default()
        }
    }
}

/// Default storage directory (`~/.durable-flow`)
pub fn default_base_dir() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join(".durable-flow"))
        .unwrap_or_else(|| PathBuf::from(".durable-flow"))
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_partial_toml() {
        let config: StorageConfig = toml::from_str("backend = \"memory\"").unwrap();
        assert_eq!(config.backend, BackendType::Memory);
        assert!(config.enable_file_locks);
        assert!(config.sync_writes);
    }

    #[test]
    fn test_file_storage_at_custom_dir() {
        let config: StorageConfig =
            toml::from_str("base_dir = \"/tmp/df\"\nsync_writes = false").unwrap();
        assert_eq!(config, StorageConfig {
            sync_writes: false,
            ..StorageConfig::file("/tmp/df")
        });
    }
}
