//! Startup recovery
//!
//! Run once when a process starts, before new work is accepted:
//!
//! 1. Promise records are loaded and suspended promises get their triggers
//!    (and deadline timers) armed again.
//! 2. Every persisted execution is classified by its lease. A running
//!    execution whose `last_update` is older than the stale threshold (or
//!    the step's own migration timeout) belonged to a dead worker: it is
//!    re-queued when its current step is migratable and failed as abandoned
//!    otherwise.
//! 3. Unreadable records are quarantined; the scan always runs to the end.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::pipeline::{ErrorKind, ExecutionRecord, ExecutionStatus, ExecutionStore, PipelineResult};
use crate::promise::{PromiseManager, PromiseState};
use crate::storage::StorageError;
use crate::suspension::DistributedAwait;

/// Error recorded on executions whose worker disappeared
pub const ABANDONED_MESSAGE: &str = "abandoned - lease expired";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryConfig {
    /// Lease age after which a running execution is considered orphaned
    #[serde(with = "humantime_serde", default = "default_stale_threshold")]
    pub stale_threshold: Duration,

    /// Rename unreadable records out of the way instead of only skipping them
    #[serde(default = "default_quarantine")]
    pub quarantine_corrupt: bool,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            stale_threshold: default_stale_threshold(),
            quarantine_corrupt: default_quarantine(),
        }
    }
}

fn default_stale_threshold() -> Duration {
    Duration::from_secs(60)
}

fn default_quarantine() -> bool {
    true
}

/// An execution left alone by recovery
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActiveExecution {
    pub id: String,
    pub pipeline: String,
    pub status: ExecutionStatus,
}

/// What a recovery pass found and did
#[derive(Debug, Clone, Default, Serialize)]
pub struct RecoveryReport {
    pub promises_restored: usize,
    /// Triggers armed again across all suspended promises
    pub triggers_rearmed: usize,
    pub quarantined_promises: Vec<String>,
    /// Stale migratable executions put back in the queue
    pub requeued: Vec<String>,
    /// Stale executions failed as abandoned
    pub abandoned: Vec<String>,
    /// Queued, paused and freshly running executions
    pub active: Vec<ActiveExecution>,
    /// Completed or failed executions
    pub finished: usize,
    pub quarantined_executions: Vec<String>,
}

impl RecoveryReport {
    pub fn summary(&self) -> String {
        format!(
            "{} promises restored ({} triggers re-armed), {} executions requeued, {} abandoned, {} active, {} finished, {} records quarantined",
            self.promises_restored,
            self.triggers_rearmed,
            self.requeued.len(),
            self.abandoned.len(),
            self.active.len(),
            self.finished,
            self.quarantined_promises.len() + self.quarantined_executions.len()
        )
    }
}

pub struct RecoveryManager {
    store: ExecutionStore,
    promises: Arc<PromiseManager>,
    awaiter: Arc<DistributedAwait>,
    config: RecoveryConfig,
}

impl RecoveryManager {
    pub fn new(
        store: ExecutionStore,
        promises: Arc<PromiseManager>,
        awaiter: Arc<DistributedAwait>,
        config: RecoveryConfig,
    ) -> Self {
        Self {
            store,
            promises,
            awaiter,
            config,
        }
    }

    pub async fn recover(&self) -> PipelineResult<RecoveryReport> {
        let mut report = RecoveryReport::default();
        self.recover_promises(&mut report).await?;

        for id in self.store.list_ids().await? {
            self.recover_execution(&id, &mut report).await;
        }

        info!("Recovery finished: {}", report.summary());
        Ok(report)
    }

    async fn recover_promises(&self, report: &mut RecoveryReport) -> PipelineResult<()> {
        let summary = self.promises.restore_all().await?;
        report.promises_restored = summary.restored.len();
        report.quarantined_promises = summary.quarantined;

        for record in summary
            .restored
            .iter()
            .filter(|r| r.state == PromiseState::Suspended)
        {
            match self.awaiter.rearm(record).await {
                Ok(armed) => report.triggers_rearmed += armed,
                Err(e) => error!("Failed to re-arm promise {}: {}", record.id, e),
            }
        }
        Ok(())
    }

    async fn recover_execution(&self, id: &str, report: &mut RecoveryReport) {
        let record = match self.store.load_state(id).await {
            Ok(Some(record)) => record,
            Ok(None) => return,
            Err(e) => {
                self.handle_unreadable(id, e, report).await;
                return;
            }
        };

        if record.status.is_terminal() {
            report.finished += 1;
            return;
        }
        if let Err(e) = self.store.load_variables(id).await {
            self.handle_unreadable(id, e, report).await;
            return;
        }

        if record.status == ExecutionStatus::Running && self.is_stale(&record) {
            self.reclaim(record, report).await;
            return;
        }

        debug!("Execution {} is {}", id, record.status);
        report.active.push(ActiveExecution {
            id: record.id,
            pipeline: record.pipeline,
            status: record.status,
        });
    }

    fn is_stale(&self, record: &ExecutionRecord) -> bool {
        let threshold = record
            .migration_timeout()
            .unwrap_or(self.config.stale_threshold);
        record.lease_age(Utc::now()) > threshold
    }

    /// Take over the execution of a dead worker
    async fn reclaim(&self, mut record: ExecutionRecord, report: &mut RecoveryReport) {
        let age = record.lease_age(Utc::now());
        let requeue = record.migratable;

        if requeue {
            record.status = ExecutionStatus::Queued;
            record.worker = None;
        } else {
            let step = record.current_step.clone();
            record.record_error(step.as_deref(), ErrorKind::Abandoned, ABANDONED_MESSAGE);
            record.status = ExecutionStatus::Failed;
        }
        record.touch();

        if let Err(e) = self.store.save_state(&record).await {
            error!("Failed to reclassify execution {}: {}", record.id, e);
            return;
        }

        if requeue {
            info!(
                "Requeued execution {} (lease expired {:?} ago)",
                record.id, age
            );
            report.requeued.push(record.id);
        } else {
            warn!(
                "Execution {} abandoned at step {} (lease expired {:?} ago)",
                record.id,
                record.current_step.as_deref().unwrap_or("-"),
                age
            );
            report.abandoned.push(record.id);
        }
    }

    async fn handle_unreadable(&self, id: &str, err: StorageError, report: &mut RecoveryReport) {
        if !err.is_corrupted() {
            error!("Failed to read execution {}: {}", id, err);
            return;
        }
        if !self.config.quarantine_corrupt {
            warn!("Skipping unreadable execution {}: {}", id, err);
            return;
        }
        warn!("Quarantining unreadable execution {}: {}", id, err);
        match self.store.quarantine(id, &err.to_string()).await {
            Ok(()) => report.quarantined_executions.push(id.to_string()),
            Err(e) => error!("Failed to quarantine execution {}: {}", id, e),
        }
    }
}
