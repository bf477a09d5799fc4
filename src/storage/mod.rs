//! Persistence layer
//!
//! Durable key/value storage for promise records, execution state and
//! execution variables, plus the exclusive locks used to claim executions.
//! The default backend keeps one JSON file per record under
//! `~/.durable-flow`.

pub mod backends;
pub mod config;
pub mod error;
pub mod factory;
pub mod lock;
pub mod traits;
pub mod types;

pub use backends::{FileBackend, MemoryBackend};
pub use config::{BackendType, StorageConfig};
pub use error::{StorageError, StorageResult};
pub use factory::StorageFactory;
pub use lock::{acquire_with_retry, StorageLock, StorageLockGuard};
pub use traits::PersistenceAdapter;
pub use types::{HealthStatus, Namespace, StorageKey};

use serde::de::DeserializeOwned;
use serde::Serialize;

/// Serialize and save a typed record
pub async fn save_typed<T: Serialize + Sync>(
    adapter: &dyn PersistenceAdapter,
    key: &StorageKey,
    value: &T,
) -> StorageResult<()> {
    let json = serde_json::to_value(value)?;
    adapter.save(key, &json).await
}

/// Load and decode a typed record
///
/// A record that parses as JSON but does not match `T` is reported as
/// corrupted, same as unparsable text.
pub async fn load_typed<T: DeserializeOwned>(
    adapter: &dyn PersistenceAdapter,
    key: &StorageKey,
) -> StorageResult<Option<T>> {
    match adapter.load(key).await? {
        Some(value) => serde_json::from_value(value)
            .map(Some)
            .map_err(|e| StorageError::corrupted(key, e)),
        None => Ok(None),
    }
}
