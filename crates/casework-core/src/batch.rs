// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Batch migration orchestration.
//!
//! A batch snapshots the target case instances at creation time, records one
//! batch part per instance and schedules one migration job per part plus a
//! deferred status check job. The parts are independent: each records its own
//! success or failure, and the batch completes when every part has reported.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::document::CaseInstanceMigrationDocument;
use crate::error::{EngineError, Result};
use crate::jobs::{JobHandlerType, MigrationJobPayload};
use crate::persistence::{
    BatchPartRecord, BatchRecord, BatchType, JobRecord, Persistence, batch_part_result,
    batch_part_status, batch_status,
};

/// Counts of batch parts by outcome.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchPartCounts {
    /// Parts that have not reported yet.
    pub waiting: u64,
    /// Parts that migrated their instance successfully.
    pub successful: u64,
    /// Parts whose instance failed to migrate.
    pub failed: u64,
}

impl BatchPartCounts {
    /// Total number of parts in the batch.
    pub fn total(&self) -> u64 {
        self.waiting + self.successful + self.failed
    }
}

/// Outcome of one batch part.
#[derive(Debug, Clone)]
pub struct BatchPartDetail {
    /// The batch part id.
    pub id: String,
    /// The case instance the part migrated.
    pub case_instance_id: String,
    /// Part status, waiting or completed.
    pub status: String,
    /// Migration result once completed.
    pub result: Option<String>,
    /// Failure message, present for failed parts.
    pub message: Option<String>,
}

/// Point-in-time view of a batch and its parts.
#[derive(Debug, Clone)]
pub struct BatchMigrationResult {
    /// The batch id.
    pub batch_id: String,
    /// Batch type identifier.
    pub batch_type: String,
    /// Batch status, in progress or completed.
    pub status: String,
    /// Part counts by outcome.
    pub counts: BatchPartCounts,
    /// Per-part outcomes, in creation order.
    pub parts: Vec<BatchPartDetail>,
}

impl BatchMigrationResult {
    /// Whether every part has reported.
    pub fn is_completed(&self) -> bool {
        self.status == batch_status::COMPLETED
    }
}

pub(crate) async fn part_results(
    persistence: &dyn Persistence,
    batch_id: &str,
) -> Result<BatchPartCounts> {
    let parts = persistence.list_batch_parts(batch_id).await?;
    let mut counts = BatchPartCounts::default();
    for part in &parts {
        if part.status == batch_part_status::WAITING {
            counts.waiting += 1;
        } else if part.result.as_deref() == Some(batch_part_result::SUCCESS) {
            counts.successful += 1;
        } else {
            counts.failed += 1;
        }
    }
    Ok(counts)
}

/// Creates and inspects batch migrations.
pub struct BatchMigrationOrchestrator {
    persistence: Arc<dyn Persistence>,
    config: EngineConfig,
}

impl BatchMigrationOrchestrator {
    /// Create an orchestrator over the given persistence backend.
    pub fn new(persistence: Arc<dyn Persistence>, config: EngineConfig) -> Self {
        Self {
            persistence,
            config,
        }
    }

    /// Start a batch migration of all running instances of a case definition.
    ///
    /// Returns the batch id. The instance set is snapshotted now; instances
    /// started afterwards are not part of the batch.
    #[instrument(skip(self, document), fields(source_case_definition_id = %source_case_definition_id))]
    pub async fn batch_migrate(
        &self,
        source_case_definition_id: &str,
        document: &CaseInstanceMigrationDocument,
    ) -> Result<String> {
        self.create_batch(source_case_definition_id, document, BatchType::CaseMigration)
            .await
    }

    /// Start a batch migration of all ended instances of a case definition.
    /// Running instances are not selected.
    #[instrument(skip(self, document), fields(source_case_definition_id = %source_case_definition_id))]
    pub async fn batch_migrate_historic(
        &self,
        source_case_definition_id: &str,
        document: &CaseInstanceMigrationDocument,
    ) -> Result<String> {
        self.create_batch(
            source_case_definition_id,
            document,
            BatchType::HistoricCaseMigration,
        )
        .await
    }

    /// Start a batch migration selecting the source definition by key,
    /// version and tenant instead of id.
    pub async fn batch_migrate_by_key(
        &self,
        key: &str,
        version: i32,
        tenant_id: &str,
        document: &CaseInstanceMigrationDocument,
    ) -> Result<String> {
        let definition_id = self.resolve_source(key, version, tenant_id).await?;
        self.create_batch(&definition_id, document, BatchType::CaseMigration)
            .await
    }

    /// Key-selected variant of [`batch_migrate_historic`](Self::batch_migrate_historic).
    pub async fn batch_migrate_historic_by_key(
        &self,
        key: &str,
        version: i32,
        tenant_id: &str,
        document: &CaseInstanceMigrationDocument,
    ) -> Result<String> {
        let definition_id = self.resolve_source(key, version, tenant_id).await?;
        self.create_batch(&definition_id, document, BatchType::HistoricCaseMigration)
            .await
    }

    async fn resolve_source(&self, key: &str, version: i32, tenant_id: &str) -> Result<String> {
        let found = self
            .persistence
            .find_case_definition(key, version, tenant_id)
            .await?;
        if let Some(definition) = found {
            return Ok(definition.id);
        }
        if self.config.default_tenant_fallback && tenant_id != self.config.default_tenant_id
            && let Some(definition) = self
                .persistence
                .find_case_definition(key, version, &self.config.default_tenant_id)
                .await?
        {
            return Ok(definition.id);
        }
        Err(EngineError::CaseDefinitionKeyNotFound {
            key: key.to_string(),
            version,
            tenant_id: tenant_id.to_string(),
        })
    }

    async fn create_batch(
        &self,
        source_case_definition_id: &str,
        document: &CaseInstanceMigrationDocument,
        batch_type: BatchType,
    ) -> Result<String> {
        self.persistence
            .get_case_definition(source_case_definition_id)
            .await?
            .ok_or_else(|| EngineError::CaseDefinitionNotFound {
                case_definition_id: source_case_definition_id.to_string(),
            })?;

        let ended = matches!(batch_type, BatchType::HistoricCaseMigration);
        let instance_ids = self
            .persistence
            .list_case_instance_ids_by_definition(source_case_definition_id, Some(ended))
            .await?;

        let now = Utc::now();
        let batch_id = Uuid::new_v4().to_string();
        self.persistence
            .insert_batch(&BatchRecord {
                id: batch_id.clone(),
                batch_type: batch_type.as_str().to_string(),
                status: batch_status::IN_PROGRESS.to_string(),
                migration_document: document.to_json()?,
                create_time: now,
                complete_time: None,
            })
            .await?;

        let handler_type = match batch_type {
            BatchType::CaseMigration => JobHandlerType::CaseMigration,
            BatchType::HistoricCaseMigration => JobHandlerType::HistoricCaseMigration,
        };

        for case_instance_id in &instance_ids {
            let part_id = Uuid::new_v4().to_string();
            self.persistence
                .insert_batch_part(&BatchPartRecord {
                    id: part_id.clone(),
                    batch_id: batch_id.clone(),
                    scope_id: case_instance_id.clone(),
                    status: batch_part_status::WAITING.to_string(),
                    result: None,
                    message: None,
                    stacktrace: None,
                    create_time: now,
                    complete_time: None,
                })
                .await?;

            let payload = serde_json::to_string(&MigrationJobPayload {
                batch_part_id: part_id,
            })?;
            self.persistence
                .insert_job(&JobRecord {
                    id: Uuid::new_v4().to_string(),
                    handler_type: handler_type.as_str().to_string(),
                    payload,
                    batch_id: Some(batch_id.clone()),
                    scope_id: Some(case_instance_id.clone()),
                    due_time: now,
                    create_time: now,
                })
                .await?;
        }

        // The status check runs deferred so the per-instance jobs get a head
        // start; it reschedules itself until every part has reported.
        let delay = chrono::Duration::from_std(self.config.batch_status_check_interval)
            .unwrap_or_else(|_| chrono::Duration::seconds(5));
        self.persistence
            .insert_job(&JobRecord {
                id: Uuid::new_v4().to_string(),
                handler_type: JobHandlerType::BatchStatusCheck.as_str().to_string(),
                payload: "{}".to_string(),
                batch_id: Some(batch_id.clone()),
                scope_id: None,
                due_time: now + delay,
                create_time: now,
            })
            .await?;

        info!(
            batch_id = %batch_id,
            batch_type = %batch_type.as_str(),
            parts = instance_ids.len(),
            "Batch migration created"
        );
        Ok(batch_id)
    }

    /// Current state of a batch and its parts.
    pub async fn get_results(&self, batch_id: &str) -> Result<BatchMigrationResult> {
        let batch = self
            .persistence
            .get_batch(batch_id)
            .await?
            .ok_or_else(|| EngineError::BatchNotFound {
                batch_id: batch_id.to_string(),
            })?;

        let parts = self.persistence.list_batch_parts(batch_id).await?;
        let mut counts = BatchPartCounts::default();
        let mut details = Vec::with_capacity(parts.len());
        for part in parts {
            if part.status == batch_part_status::WAITING {
                counts.waiting += 1;
            } else if part.result.as_deref() == Some(batch_part_result::SUCCESS) {
                counts.successful += 1;
            } else {
                counts.failed += 1;
            }
            details.push(BatchPartDetail {
                id: part.id,
                case_instance_id: part.scope_id,
                status: part.status,
                result: part.result,
                message: part.message,
            });
        }

        Ok(BatchMigrationResult {
            batch_id: batch.id,
            batch_type: batch.batch_type,
            status: batch.status,
            counts,
            parts: details,
        })
    }

    /// Cancel the remaining work of a batch by deleting its queued jobs.
    /// Parts already completed keep their results.
    pub async fn cancel(&self, batch_id: &str) -> Result<()> {
        self.persistence
            .get_batch(batch_id)
            .await?
            .ok_or_else(|| EngineError::BatchNotFound {
                batch_id: batch_id.to_string(),
            })?;
        self.persistence.delete_jobs_for_batch(batch_id).await?;
        self.persistence.complete_batch(batch_id, Utc::now()).await
    }

    /// Remove a batch, its parts and any queued jobs.
    pub async fn delete(&self, batch_id: &str) -> Result<()> {
        self.persistence.delete_jobs_for_batch(batch_id).await?;
        self.persistence.delete_batch(batch_id).await
    }
}
