//! Runtime configuration
//!
//! Loaded from a TOML file with three optional tables:
//!
//! ```toml
//! [storage]
//! backend = "file"
//! base_dir = "/var/lib/durable-flow"
//!
//! [recovery]
//! stale_threshold = "2m"
//!
//! [orchestrator]
//! max_retries = 5
//! retry_delay = "500ms"
//! backoff = { type = "exponential", base = 2.0 }
//! ```
//!
//! Precedence, lowest first: defaults, the file (an explicit path or
//! `DURABLE_FLOW_CONFIG`), then `DURABLE_FLOW_STORAGE_DIR`.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

use crate::pipeline::{BackoffStrategy, OrchestratorConfig};
use crate::recovery::RecoveryConfig;
use crate::storage::{BackendType, StorageConfig};

/// Path of the config file when no explicit path is given
pub const CONFIG_ENV: &str = "DURABLE_FLOW_CONFIG";
/// Overrides `storage.base_dir`
pub const STORAGE_DIR_ENV: &str = "DURABLE_FLOW_STORAGE_DIR";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    #[error("Failed to parse {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DurableConfig {
    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub recovery: RecoveryConfig,

    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
}

impl DurableConfig {
    /// Load using the process environment
    pub fn load(path: Option<&Path>) -> ConfigResult<Self> {
        Self::load_with(path, |name| std::env::var(name).ok())
    }

    /// Load with an injectable environment lookup
    pub fn load_with<F>(path: Option<&Path>, env: F) -> ConfigResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let path = path
            .map(Path::to_path_buf)
            .or_else(|| env(CONFIG_ENV).map(PathBuf::from));

        let mut config = match path {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };

        if let Some(dir) = env(STORAGE_DIR_ENV).filter(|d| !d.trim().is_empty()) {
            debug!("Storage directory overridden by {}: {}", STORAGE_DIR_ENV, dir);
            config.storage.base_dir = PathBuf::from(dir);
        }

        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                ConfigError::NotFound(path.to_path_buf())
            } else {
                ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                }
            }
        })?;
        let config = Self::from_toml(&content).map_err(|e| match e {
            ConfigError::Parse { message, .. } => ConfigError::Parse {
                path: path.to_path_buf(),
                message,
            },
            other => other,
        })?;
        debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn from_toml(content: &str) -> ConfigResult<Self> {
        toml::from_str(content).map_err(|e| ConfigError::Parse {
            path: PathBuf::new(),
            message: e.to_string(),
        })
    }

    pub fn validate(&self) -> ConfigResult<()> {
        let orchestrator = &self.orchestrator;
        if orchestrator.heartbeat_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "orchestrator.heartbeat_interval must be greater than zero".into(),
            ));
        }
        if orchestrator.lock_ttl <= orchestrator.heartbeat_interval {
            return Err(ConfigError::Invalid(format!(
                "orchestrator.lock_ttl ({:?}) must exceed heartbeat_interval ({:?})",
                orchestrator.lock_ttl, orchestrator.heartbeat_interval
            )));
        }
        if self.recovery.stale_threshold <= orchestrator.heartbeat_interval {
            return Err(ConfigError::Invalid(format!(
                "recovery.stale_threshold ({:?}) must exceed the heartbeat interval ({:?})",
                self.recovery.stale_threshold, orchestrator.heartbeat_interval
            )));
        }
        if let BackoffStrategy::Exponential { base } = orchestrator.backoff {
            if !base.is_finite() || base < 1.0 {
                return Err(ConfigError::Invalid(format!(
                    "exponential backoff base must be at least 1.0, got {}",
                    base
                )));
            }
        }
        if self.storage.backend == BackendType::File
            && self.storage.base_dir.as_os_str().is_empty()
        {
            return Err(ConfigError::Invalid("storage.base_dir is empty".into()));
        }
        Ok(())
    }
}
