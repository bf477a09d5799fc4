//! Key and status types shared by all persistence backends

use serde::{Deserialize, Serialize};
use std::fmt;

use super::error::{StorageError, StorageResult};

/// Prefix of the companion variables record stored next to an execution record
pub const VARIABLES_PREFIX: &str = "variables_";

/// Logical storage domain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Namespace {
    /// Execution state records and their variables blobs
    Executions,
    /// Distributed promise records
    Promises,
}

impl Namespace {
    /// Directory name used by file-like backends
    pub fn dir_name(&self) -> &'static str {
        match self {
            Namespace::Executions => "executions",
            Namespace::Promises => "promises",
        }
    }
}

/// Key of a single persisted record
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StorageKey {
    /// Lightweight execution state (`<id>.json`)
    Execution(String),
    /// Variables blob of an execution (`variables_<id>.json`)
    Variables(String),
    /// Distributed promise record
    Promise(String),
}

impl StorageKey {
    pub fn execution(id: impl Into<String>) -> Self {
        Self::Execution(id.into())
    }

    pub fn variables(id: impl Into<String>) -> Self {
        Self::Variables(id.into())
    }

    pub fn promise(id: impl Into<String>) -> Self {
        Self::Promise(id.into())
    }

    /// Domain this key lives in
    pub fn namespace(&self) -> Namespace {
        match self {
            StorageKey::Execution(_) | StorageKey::Variables(_) => Namespace::Executions,
            StorageKey::Promise(_) => Namespace::Promises,
        }
    }

    /// Id of the owning record
    pub fn id(&self) -> &str {
        match self {
            StorageKey::Execution(id) | StorageKey::Variables(id) | StorageKey::Promise(id) => id,
        }
    }

    /// Record name inside its namespace, without extension
    pub fn record_name(&self) -> String {
        match self {
            StorageKey::Variables(id) => format!("{}{}", VARIABLES_PREFIX, id),
            StorageKey::Execution(id) | StorageKey::Promise(id) => id.clone(),
        }
    }

    /// Reject ids that cannot be mapped safely onto a file name
    pub fn validate(&self) -> StorageResult<()> {
        let id = self.id();
        let invalid = id.is_empty()
            || id.starts_with('.')
            || id.contains(['/', '\\', '\0'])
            || id.contains("..");
        if invalid {
            return Err(StorageError::InvalidKey(self.to_string()));
        }
        // An execution id with the variables prefix would collide with a blob name
        if matches!(self, StorageKey::Execution(_) | StorageKey::Variables(_))
            && id.starts_with(VARIABLES_PREFIX)
        {
            return Err(StorageError::InvalidKey(self.to_string()));
        }
        Ok(())
    }
}

impl fmt::Display for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace().dir_name(), self.record_name())
    }
}

/// Health status of a backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub healthy: bool,
    pub backend_type: String,
    pub latency_ms: u64,
    pub errors: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_display_matches_layout() {
        assert_eq!(StorageKey::execution("e1").to_string(), "executions/e1");
        assert_eq!(
            StorageKey::variables("e1").to_string(),
            "executions/variables_e1"
        );
        assert_eq!(StorageKey::promise("p1").to_string(), "promises/p1");
    }

    #[test]
    fn test_validate_rejects_path_tricks() {
        assert!(StorageKey::execution("../etc").validate().is_err());
        assert!(StorageKey::execution("a/b").validate().is_err());
        assert!(StorageKey::promise(".hidden").validate().is_err());
        assert!(StorageKey::promise("").validate().is_err());
        assert!(StorageKey::execution("variables_x").validate().is_err());
        assert!(StorageKey::promise("variables_x").validate().is_ok());
        assert!(StorageKey::execution("exec-1:step").validate().is_ok());
    }
}
