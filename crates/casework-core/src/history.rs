// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Migration of ended case instances.
//!
//! Ended cases carry no runtime state, so migrating one is a pointer rewrite:
//! the case row, its plan item rows and its task rows move to the destination
//! definition. Sentries, subscriptions and jobs are never touched.

use std::sync::Arc;

use tracing::{info, instrument};

use crate::config::EngineConfig;
use crate::definition::CaseModel;
use crate::document::CaseInstanceMigrationDocument;
use crate::error::{EngineError, Result};
use crate::persistence::{HistoricMigrationPlan, Persistence};
use crate::validator;

/// Applies migration documents to ended case instances.
pub struct HistoricCaseInstanceMigrator {
    persistence: Arc<dyn Persistence>,
    config: EngineConfig,
}

impl HistoricCaseInstanceMigrator {
    /// Create a historic migrator over the given persistence backend.
    pub fn new(persistence: Arc<dyn Persistence>, config: EngineConfig) -> Self {
        Self {
            persistence,
            config,
        }
    }

    /// Migrate one ended case instance to the document's destination
    /// definition. Rejects instances that are still running.
    #[instrument(skip(self, document), fields(case_instance_id = %case_instance_id))]
    pub async fn migrate(
        &self,
        case_instance_id: &str,
        document: &CaseInstanceMigrationDocument,
    ) -> Result<()> {
        let instance = self
            .persistence
            .get_case_instance(case_instance_id)
            .await?
            .ok_or_else(|| EngineError::CaseInstanceNotFound {
                case_instance_id: case_instance_id.to_string(),
            })?;

        if instance.end_time.is_none() {
            return Err(EngineError::HistoricCaseNotEnded {
                case_instance_id: case_instance_id.to_string(),
            });
        }

        let destination = validator::resolve_destination(
            self.persistence.as_ref(),
            document,
            &self.config,
            &instance.tenant_id,
        )
        .await?
        .ok_or_else(|| EngineError::MigrationValidationFailed {
            messages: vec![validator::destination_not_found_message(document)],
        })?;

        if instance.tenant_id != destination.tenant_id {
            let fallback_allowed = self.config.default_tenant_fallback
                && destination.tenant_id == self.config.default_tenant_id;
            if !fallback_allowed {
                return Err(EngineError::TenantMismatch {
                    instance_tenant_id: instance.tenant_id.clone(),
                    definition_tenant_id: destination.tenant_id.clone(),
                });
            }
        }

        let destination_model = CaseModel::from_json(&destination.model)?;

        let mut updated_instance = instance;
        updated_instance.case_definition_id = destination.id.clone();
        updated_instance.case_definition_key = destination.key.clone();
        updated_instance.case_definition_version = destination.version;
        updated_instance.case_definition_deployment_id = destination.deployment_id.clone();
        if destination_model.name.is_some() {
            updated_instance.name = destination_model.name.clone();
        }

        let mut plan_items = self
            .persistence
            .list_plan_item_instances(case_instance_id, true)
            .await?;
        for item in &mut plan_items {
            item.case_definition_id = destination.id.clone();
            if let Some(model_item) = destination_model.find_by_element_id(&item.element_id) {
                item.name = model_item.name.clone();
            }
        }

        let mut tasks = self.persistence.list_tasks(case_instance_id).await?;
        for task in &mut tasks {
            task.scope_definition_id = destination.id.clone();
        }

        let plan = HistoricMigrationPlan {
            case_instance: Some(updated_instance),
            plan_items,
            tasks,
        };

        info!(
            destination_id = %destination.id,
            plan_items = plan.plan_items.len(),
            tasks = plan.tasks.len(),
            "Applying historic case instance migration"
        );

        self.persistence.apply_historic_migration(&plan).await
    }
}
