// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Read-only validation of migration documents.
//!
//! The validator resolves the destination definition and checks that a
//! migration document can be applied to a case instance. Semantic problems are
//! reported as messages, never thrown; only infrastructure failures surface as
//! errors.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::debug;

use crate::config::EngineConfig;
use crate::definition::CaseModel;
use crate::document::{CaseInstanceMigrationDocument, MappingOperation};
use crate::error::{EngineError, Result};
use crate::persistence::{
    CaseDefinitionRecord, Persistence, PlanItemInstanceRecord, PlanItemInstanceState,
};

/// Outcome of validating a migration document against a case instance.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    messages: Vec<String>,
}

impl ValidationResult {
    /// Whether any validation message was recorded.
    pub fn has_errors(&self) -> bool {
        !self.messages.is_empty()
    }

    /// The recorded validation messages, in check order.
    pub fn messages(&self) -> &[String] {
        &self.messages
    }

    /// Consume the result into its messages.
    pub fn into_messages(self) -> Vec<String> {
        self.messages
    }

    pub(crate) fn push(&mut self, message: String) {
        self.messages.push(message);
    }
}

/// Validates migration documents without mutating any state.
pub struct MigrationValidator {
    persistence: Arc<dyn Persistence>,
    config: EngineConfig,
}

impl MigrationValidator {
    /// Create a validator over the given persistence backend.
    pub fn new(persistence: Arc<dyn Persistence>, config: EngineConfig) -> Self {
        Self {
            persistence,
            config,
        }
    }

    /// Validate `document` against the case instance.
    ///
    /// Returns a [`ValidationResult`]; `has_errors()` is true iff the document
    /// cannot be applied. Errors are only returned for infrastructure
    /// failures (unreachable storage, missing case instance).
    pub async fn validate(
        &self,
        document: &CaseInstanceMigrationDocument,
        case_instance_id: &str,
    ) -> Result<ValidationResult> {
        let instance = self
            .persistence
            .get_case_instance(case_instance_id)
            .await?
            .ok_or_else(|| EngineError::CaseInstanceNotFound {
                case_instance_id: case_instance_id.to_string(),
            })?;

        let mut result = ValidationResult::default();

        let destination = resolve_destination(
            self.persistence.as_ref(),
            document,
            &self.config,
            &instance.tenant_id,
        )
        .await?;

        let Some(destination) = destination else {
            // Without a destination no further checks are possible.
            result.push(destination_not_found_message(document));
            return Ok(result);
        };

        debug!(
            case_instance_id,
            destination_id = %destination.id,
            "Validating migration document"
        );

        let model = CaseModel::from_json(&destination.model)?;
        let items = self
            .persistence
            .list_plan_item_instances(case_instance_id, false)
            .await?;

        validate_resolved(document, &model, &items, &mut result);

        Ok(result)
    }
}

/// The message emitted when the destination definition cannot be resolved.
pub(crate) fn destination_not_found_message(document: &CaseInstanceMigrationDocument) -> String {
    match (&document.destination.id, &document.destination.key) {
        (Some(id), _) => format!(
            "Cannot find the case definition to migrate to, with [id:'{}']",
            id
        ),
        (None, Some(key)) => format!(
            "Cannot find the case definition to migrate to, with [key:'{}', version:{}, tenant:'{}']",
            key,
            document.destination.version.unwrap_or_default(),
            document.destination.tenant_id.as_deref().unwrap_or("")
        ),
        (None, None) => "Cannot find the case definition to migrate to, with [id:'']".to_string(),
    }
}

/// Resolve the destination definition of a document, applying the
/// default-tenant fallback when configured.
pub(crate) async fn resolve_destination(
    persistence: &dyn Persistence,
    document: &CaseInstanceMigrationDocument,
    config: &EngineConfig,
    instance_tenant_id: &str,
) -> Result<Option<CaseDefinitionRecord>> {
    if let Some(ref id) = document.destination.id {
        return persistence.get_case_definition(id).await;
    }

    let Some(ref key) = document.destination.key else {
        return Err(EngineError::InvalidDocument {
            details: "destination case definition reference is required".to_string(),
        });
    };
    let version = document.destination.version.ok_or_else(|| {
        EngineError::InvalidDocument {
            details: "destination case definition version is required with a key".to_string(),
        }
    })?;
    let tenant_id = document
        .destination
        .tenant_id
        .as_deref()
        .unwrap_or(instance_tenant_id);

    let found = persistence
        .find_case_definition(key, version, tenant_id)
        .await?;
    if found.is_some() {
        return Ok(found);
    }

    if config.default_tenant_fallback && tenant_id != config.default_tenant_id {
        return persistence
            .find_case_definition(key, version, &config.default_tenant_id)
            .await;
    }

    Ok(None)
}

/// Run the semantic checks against an already-resolved destination model.
pub(crate) fn validate_resolved(
    document: &CaseInstanceMigrationDocument,
    model: &CaseModel,
    items: &[PlanItemInstanceRecord],
    result: &mut ValidationResult,
) {
    for mapping in &document.mappings {
        for definition_id in &mapping.plan_item_definition_ids {
            // Terminate targets the source instances, so a definition removed
            // from the destination is still a valid terminate target as long
            // as the case instance has it.
            let resolved = if mapping.operation == MappingOperation::Terminate {
                model.contains_definition(definition_id)
                    || items
                        .iter()
                        .any(|item| item.plan_item_definition_id == *definition_id)
            } else {
                model.contains_definition(definition_id)
            };
            if !resolved {
                result.push(format!(
                    "Invalid mapping for {} plan item definition '{}' cannot be found in the case definition",
                    mapping.operation, definition_id
                ));
            }
        }
    }

    // Instances covered by a terminate mapping, including everything nested
    // below a terminated stage instance.
    let terminated_ids = document.definition_ids_for(MappingOperation::Terminate);
    let mut covered: HashSet<&str> = items
        .iter()
        .filter(|item| terminated_ids.contains(&item.plan_item_definition_id.as_str()))
        .map(|item| item.id.as_str())
        .collect();
    loop {
        let mut grew = false;
        for item in items {
            if !covered.contains(item.id.as_str())
                && item
                    .stage_instance_id
                    .as_deref()
                    .is_some_and(|stage| covered.contains(stage))
            {
                covered.insert(item.id.as_str());
                grew = true;
            }
        }
        if !grew {
            break;
        }
    }

    for item in items {
        let live = PlanItemInstanceState::parse(&item.state)
            .is_some_and(|state| !state.is_terminal());
        if !live {
            continue;
        }
        if model.contains_element(&item.element_id) {
            continue;
        }
        if covered.contains(item.id.as_str()) {
            continue;
        }
        result.push(format!(
            "Plan item instance '{}' for plan item definition '{}' is not mapped and element '{}' does not exist in the case definition",
            item.id, item.plan_item_definition_id, item.element_id
        ));
    }
}
