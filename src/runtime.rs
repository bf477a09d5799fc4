//! Explicit wiring of the execution core
//!
//! Every component is constructed here and handed its collaborators; there
//! are no process-wide singletons, so tests can build as many independent
//! runtimes as they like.

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::DurableConfig;
use crate::events::{EventRegistry, TimerService};
use crate::pipeline::{ExecutionStore, Orchestrator, Pipeline};
use crate::promise::PromiseManager;
use crate::recovery::{RecoveryManager, RecoveryReport};
use crate::storage::{PersistenceAdapter, StorageFactory};
use crate::suspension::DistributedAwait;

pub struct DurableRuntime {
    config: DurableConfig,
    adapter: Arc<dyn PersistenceAdapter>,
    promises: Arc<PromiseManager>,
    registry: Arc<EventRegistry>,
    timers: Arc<TimerService>,
    awaiter: Arc<DistributedAwait>,
    orchestrator: Arc<Orchestrator>,
    recovery: RecoveryManager,
}

impl DurableRuntime {
    /// Build a runtime on the storage backend named by `config`
    pub async fn new(config: DurableConfig) -> Result<Self> {
        let adapter = StorageFactory::from_config(&config.storage)
            .await
            .with_context(|| {
                format!(
                    "Failed to open storage at {}",
                    config.storage.base_dir.display()
                )
            })?;
        Ok(Self::with_adapter(config, adapter))
    }

    /// Build a runtime on an already opened backend
    pub fn with_adapter(config: DurableConfig, adapter: Arc<dyn PersistenceAdapter>) -> Self {
        let promises = PromiseManager::new(adapter.clone());
        let registry = EventRegistry::new();
        let timers = TimerService::new(registry.clone());
        let awaiter = DistributedAwait::new(promises.clone(), registry.clone(), timers.clone());
        let store = ExecutionStore::new(adapter.clone());
        let orchestrator = Orchestrator::new(
            store.clone(),
            promises.clone(),
            awaiter.clone(),
            config.orchestrator.clone(),
        );
        let recovery = RecoveryManager::new(
            store,
            promises.clone(),
            awaiter.clone(),
            config.recovery.clone(),
        );
        debug!("Runtime wired on {:?} storage", config.storage.backend);

        Self {
            config,
            adapter,
            promises,
            registry,
            timers,
            awaiter,
            orchestrator,
            recovery,
        }
    }

    pub fn config(&self) -> &DurableConfig {
        &self.config
    }

    pub fn adapter(&self) -> &Arc<dyn PersistenceAdapter> {
        &self.adapter
    }

    pub fn promises(&self) -> &Arc<PromiseManager> {
        &self.promises
    }

    pub fn registry(&self) -> &Arc<EventRegistry> {
        &self.registry
    }

    pub fn timers(&self) -> &Arc<TimerService> {
        &self.timers
    }

    pub fn awaiter(&self) -> &Arc<DistributedAwait> {
        &self.awaiter
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    pub async fn register_all(&self, pipelines: Vec<Pipeline>) -> Result<()> {
        for pipeline in pipelines {
            let name = pipeline.name.clone();
            self.orchestrator
                .register(pipeline)
                .await
                .with_context(|| format!("Failed to register pipeline {}", name))?;
        }
        Ok(())
    }

    /// Scan storage without resuming anything
    pub async fn recover(&self) -> Result<RecoveryReport> {
        self.recovery
            .recover()
            .await
            .context("Recovery scan failed")
    }

    /// Recover and resume the work found
    ///
    /// Pipelines must be registered first; executions of unknown pipelines
    /// are left in place.
    pub async fn start(&self) -> Result<RecoveryReport> {
        let report = self.recover().await?;
        let resumed = self.orchestrator.adopt_recovered(&report).await;
        info!("Runtime started, {} executions resumed", resumed.len());
        Ok(report)
    }

    pub async fn shutdown(&self) {
        self.timers.shutdown().await;
        debug!("Runtime stopped");
    }
}
