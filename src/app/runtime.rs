//! Runtime initialization and setup

use anyhow::{Context, Result};
use tracing::debug;

use crate::app::{config::AppConfig, logging::init_logging};
use crate::config::DurableConfig;
use crate::error::DurableError;
use crate::runtime::DurableRuntime;
use crate::workflows;

/// Initialize logging, load configuration and wire a runtime with the
/// built-in workflows registered
pub async fn initialize_app(config: &AppConfig) -> Result<DurableRuntime> {
    init_logging(config);

    let settings = DurableConfig::load(config.config_path.as_deref()).map_err(DurableError::from)?;
    debug!(
        "Using {:?} storage at {}",
        settings.storage.backend,
        settings.storage.base_dir.display()
    );

    let runtime = DurableRuntime::new(settings).await?;
    runtime
        .register_all(workflows::builtin())
        .await
        .context("Failed to register built-in workflows")?;
    Ok(runtime)
}
