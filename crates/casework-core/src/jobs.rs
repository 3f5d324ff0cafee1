// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Asynchronous job execution for batch migration.
//!
//! Batch parts are processed by jobs picked up from the `jobs` table by a
//! polling [`JobExecutor`]. Handlers are a closed set registered by type; a
//! job row is deleted only after its handler returns `Ok`, so execution is
//! at-least-once. Migration failures are not handler failures: the handler
//! records the failed batch part and completes normally, which is what keeps
//! one bad instance from poisoning the rest of the batch.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::batch::part_results;
use crate::config::EngineConfig;
use crate::document::CaseInstanceMigrationDocument;
use crate::error::{EngineError, Result};
use crate::history::HistoricCaseInstanceMigrator;
use crate::migrator::CaseInstanceMigrator;
use crate::persistence::{JobRecord, Persistence, batch_part_result, batch_status};

/// The closed set of job handler types the engine schedules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobHandlerType {
    /// Migrate one running case instance as part of a batch.
    CaseMigration,
    /// Migrate one ended case instance as part of a batch.
    HistoricCaseMigration,
    /// Check whether all parts of a batch have completed.
    BatchStatusCheck,
}

impl JobHandlerType {
    /// Stable identifier persisted in the `jobs` table.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CaseMigration => "case-migration",
            Self::HistoricCaseMigration => "historic-case-migration",
            Self::BatchStatusCheck => "batch-status-check",
        }
    }

    /// Parse a persisted handler type identifier.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "case-migration" => Some(Self::CaseMigration),
            "historic-case-migration" => Some(Self::HistoricCaseMigration),
            "batch-status-check" => Some(Self::BatchStatusCheck),
            _ => None,
        }
    }
}

/// Payload of a per-instance migration job.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationJobPayload {
    /// The batch part this job reports its outcome to.
    pub batch_part_id: String,
}

/// Executes one kind of job.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// The type this handler is registered for.
    fn handler_type(&self) -> JobHandlerType;

    /// Execute a job. An `Err` leaves the job row in place for a retry;
    /// business failures must be recorded on the batch part instead.
    async fn execute(&self, job: &JobRecord) -> Result<()>;
}

/// Shared plumbing for the two per-instance migration handlers.
async fn run_migration_part<F, Fut>(
    persistence: &dyn Persistence,
    job: &JobRecord,
    migrate: F,
) -> Result<()>
where
    F: FnOnce(String, CaseInstanceMigrationDocument) -> Fut,
    Fut: std::future::Future<Output = Result<()>>,
{
    let batch_id = job.batch_id.as_deref().ok_or_else(|| EngineError::InvalidDocument {
        details: "migration job is missing its batch id".to_string(),
    })?;
    let case_instance_id = job.scope_id.clone().ok_or_else(|| EngineError::InvalidDocument {
        details: "migration job is missing its case instance id".to_string(),
    })?;
    let payload: MigrationJobPayload = serde_json::from_str(&job.payload)?;

    let batch = persistence
        .get_batch(batch_id)
        .await?
        .ok_or_else(|| EngineError::BatchNotFound {
            batch_id: batch_id.to_string(),
        })?;
    let document = CaseInstanceMigrationDocument::from_json(&batch.migration_document)?;

    let now = Utc::now();
    match migrate(case_instance_id.clone(), document).await {
        Ok(()) => {
            persistence
                .complete_batch_part(
                    &payload.batch_part_id,
                    batch_part_result::SUCCESS,
                    None,
                    None,
                    now,
                )
                .await
        }
        Err(err) => {
            // Per-instance failure: record it and keep the batch going.
            warn!(
                case_instance_id = %case_instance_id,
                batch_id = %batch_id,
                error = %err,
                "Batch migration part failed"
            );
            let message = err.to_string();
            let stacktrace = format!("{:?}", err);
            persistence
                .complete_batch_part(
                    &payload.batch_part_id,
                    batch_part_result::FAIL,
                    Some(message.as_str()),
                    Some(stacktrace.as_str()),
                    now,
                )
                .await
        }
    }
}

/// Migrates one running case instance for a batch part.
pub struct CaseMigrationJobHandler {
    persistence: Arc<dyn Persistence>,
    migrator: Arc<CaseInstanceMigrator>,
}

impl CaseMigrationJobHandler {
    /// Create a handler backed by the given migrator.
    pub fn new(persistence: Arc<dyn Persistence>, migrator: Arc<CaseInstanceMigrator>) -> Self {
        Self {
            persistence,
            migrator,
        }
    }
}

#[async_trait]
impl JobHandler for CaseMigrationJobHandler {
    fn handler_type(&self) -> JobHandlerType {
        JobHandlerType::CaseMigration
    }

    async fn execute(&self, job: &JobRecord) -> Result<()> {
        let migrator = Arc::clone(&self.migrator);
        run_migration_part(self.persistence.as_ref(), job, |case_instance_id, document| async move {
            migrator.migrate(&case_instance_id, &document).await
        })
        .await
    }
}

/// Migrates one ended case instance for a batch part.
pub struct HistoricCaseMigrationJobHandler {
    persistence: Arc<dyn Persistence>,
    migrator: Arc<HistoricCaseInstanceMigrator>,
}

impl HistoricCaseMigrationJobHandler {
    /// Create a handler backed by the given historic migrator.
    pub fn new(
        persistence: Arc<dyn Persistence>,
        migrator: Arc<HistoricCaseInstanceMigrator>,
    ) -> Self {
        Self {
            persistence,
            migrator,
        }
    }
}

#[async_trait]
impl JobHandler for HistoricCaseMigrationJobHandler {
    fn handler_type(&self) -> JobHandlerType {
        JobHandlerType::HistoricCaseMigration
    }

    async fn execute(&self, job: &JobRecord) -> Result<()> {
        let migrator = Arc::clone(&self.migrator);
        run_migration_part(self.persistence.as_ref(), job, |case_instance_id, document| async move {
            migrator.migrate(&case_instance_id, &document).await
        })
        .await
    }
}

/// Completes a batch once every part has reported, or reschedules itself.
pub struct BatchStatusCheckJobHandler {
    persistence: Arc<dyn Persistence>,
    recheck_interval: Duration,
}

impl BatchStatusCheckJobHandler {
    /// Create a handler that rechecks unfinished batches after `recheck_interval`.
    pub fn new(persistence: Arc<dyn Persistence>, recheck_interval: Duration) -> Self {
        Self {
            persistence,
            recheck_interval,
        }
    }
}

#[async_trait]
impl JobHandler for BatchStatusCheckJobHandler {
    fn handler_type(&self) -> JobHandlerType {
        JobHandlerType::BatchStatusCheck
    }

    async fn execute(&self, job: &JobRecord) -> Result<()> {
        let batch_id = job.batch_id.as_deref().ok_or_else(|| EngineError::InvalidDocument {
            details: "status check job is missing its batch id".to_string(),
        })?;

        let Some(batch) = self.persistence.get_batch(batch_id).await? else {
            // Batch was deleted while the job was queued; nothing to do.
            debug!(batch_id, "Status check for a deleted batch, dropping");
            return Ok(());
        };
        if batch.status == batch_status::COMPLETED {
            return Ok(());
        }

        let results = part_results(self.persistence.as_ref(), batch_id).await?;
        if results.waiting == 0 {
            info!(
                batch_id,
                successful = results.successful,
                failed = results.failed,
                "All batch parts completed, completing batch"
            );
            return self.persistence.complete_batch(batch_id, Utc::now()).await;
        }

        debug!(
            batch_id,
            waiting = results.waiting,
            "Batch still has waiting parts, rescheduling status check"
        );
        let interval = chrono::Duration::from_std(self.recheck_interval)
            .unwrap_or_else(|_| chrono::Duration::seconds(5));
        self.persistence
            .insert_job(&JobRecord {
                id: Uuid::new_v4().to_string(),
                handler_type: JobHandlerType::BatchStatusCheck.as_str().to_string(),
                payload: "{}".to_string(),
                batch_id: Some(batch_id.to_string()),
                scope_id: None,
                due_time: Utc::now() + interval,
                create_time: Utc::now(),
            })
            .await
    }
}

/// Polls the job table and dispatches due jobs to registered handlers.
pub struct JobExecutor {
    persistence: Arc<dyn Persistence>,
    handlers: HashMap<JobHandlerType, Arc<dyn JobHandler>>,
    poll_interval: Duration,
    batch_size: i64,
}

impl JobExecutor {
    /// Create an executor with no handlers registered.
    pub fn new(persistence: Arc<dyn Persistence>, config: &EngineConfig) -> Self {
        Self {
            persistence,
            handlers: HashMap::new(),
            poll_interval: config.job_poll_interval,
            batch_size: config.job_batch_size,
        }
    }

    /// Register a handler for its declared type, replacing any previous one.
    pub fn register(&mut self, handler: Arc<dyn JobHandler>) {
        self.handlers.insert(handler.handler_type(), handler);
    }

    /// Run the polling loop until `shutdown` is notified.
    pub async fn run(self, shutdown: Arc<Notify>) {
        info!(
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            batch_size = self.batch_size,
            "Job executor started"
        );
        loop {
            if let Err(err) = self.poll_once().await {
                error!(error = %err, "Job poll failed");
            }

            tokio::select! {
                _ = shutdown.notified() => {
                    info!("Job executor shutting down");
                    break;
                }
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }

    /// Execute one round of due jobs. Exposed so embedders without a
    /// background task can drive execution themselves.
    pub async fn poll_once(&self) -> Result<()> {
        let due = self
            .persistence
            .list_due_jobs(Utc::now(), self.batch_size)
            .await?;

        for job in due {
            let Some(handler_type) = JobHandlerType::parse(&job.handler_type) else {
                // An unknown type would be retried forever; drop it.
                warn!(job_id = %job.id, handler_type = %job.handler_type, "Unknown job handler type, deleting job");
                self.persistence.delete_job(&job.id).await?;
                continue;
            };
            let Some(handler) = self.handlers.get(&handler_type) else {
                warn!(job_id = %job.id, handler_type = %job.handler_type, "No handler registered, deleting job");
                self.persistence.delete_job(&job.id).await?;
                continue;
            };

            debug!(job_id = %job.id, handler_type = %job.handler_type, "Executing job");
            match handler.execute(&job).await {
                Ok(()) => self.persistence.delete_job(&job.id).await?,
                Err(err) => {
                    // Leave the row in place; a later poll retries it.
                    error!(job_id = %job.id, error = %err, "Job execution failed");
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handler_type_round_trip() {
        for handler_type in [
            JobHandlerType::CaseMigration,
            JobHandlerType::HistoricCaseMigration,
            JobHandlerType::BatchStatusCheck,
        ] {
            assert_eq!(JobHandlerType::parse(handler_type.as_str()), Some(handler_type));
        }
        assert_eq!(JobHandlerType::parse("async-job"), None);
    }

    #[test]
    fn test_payload_serialization() {
        let payload = MigrationJobPayload {
            batch_part_id: "part-1".to_string(),
        };
        let json = serde_json::to_string(&payload).unwrap();
        assert_eq!(json, r#"{"batchPartId":"part-1"}"#);
        let back: MigrationJobPayload = serde_json::from_str(&json).unwrap();
        assert_eq!(back.batch_part_id, "part-1");
    }
}
