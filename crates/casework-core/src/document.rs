// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Migration document model and builder.
//!
//! A [`CaseInstanceMigrationDocument`] is a declarative, serializable description
//! of a desired migration: the destination definition reference, ordered
//! plan-item-definition mappings, and case variable overrides. No business
//! validation happens here; the validator and migrator own that.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{EngineError, Result};

/// Schema version written into every serialized document.
pub const DOCUMENT_SCHEMA_VERSION: i32 = 1;

/// Mapping operation applied to plan item definitions during migration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MappingOperation {
    /// Create (or transition) an instance in the ACTIVE state, materializing its work.
    Activate,
    /// Terminate the matching live instances, descendants first.
    Terminate,
    /// Create (or regress) an instance in the AVAILABLE state.
    MoveToAvailable,
    /// Create an instance in the WAITING_FOR_REPETITION holding state.
    WaitingForRepetition,
    /// Terminate any waiting-for-repetition instance; creates nothing.
    RemoveWaitingForRepetition,
}

impl fmt::Display for MappingOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Activate => "activate",
            Self::Terminate => "terminate",
            Self::MoveToAvailable => "moveToAvailable",
            Self::WaitingForRepetition => "waitingForRepetition",
            Self::RemoveWaitingForRepetition => "removeWaitingForRepetition",
        };
        f.write_str(s)
    }
}

/// Reference to the destination case definition, by id or by key/version/tenant.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaseDefinitionRef {
    /// Destination definition id; takes precedence when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Destination definition key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    /// Destination definition version.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<i32>,
    /// Tenant the key lookup is scoped to; defaults to the instance's tenant.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
}

impl CaseDefinitionRef {
    fn is_empty(&self) -> bool {
        self.id.is_none() && self.key.is_none()
    }
}

/// One mapping entry: an operation applied to a set of plan item definition ids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanItemDefinitionMapping {
    /// The operation to apply.
    pub operation: MappingOperation,
    /// Plan item definition ids this mapping targets.
    pub plan_item_definition_ids: Vec<String>,
    /// Assignee for tasks materialized by an activate mapping.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_assignee: Option<String>,
    /// Owner for tasks materialized by an activate mapping.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_owner: Option<String>,
}

impl PlanItemDefinitionMapping {
    /// Mapping that activates the given plan item definitions.
    pub fn activate(ids: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self::new(MappingOperation::Activate, ids)
    }

    /// Mapping that terminates the given plan item definitions.
    pub fn terminate(ids: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self::new(MappingOperation::Terminate, ids)
    }

    /// Mapping that moves the given plan item definitions to AVAILABLE.
    pub fn move_to_available(ids: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self::new(MappingOperation::MoveToAvailable, ids)
    }

    /// Mapping that creates WAITING_FOR_REPETITION holding instances.
    pub fn waiting_for_repetition(ids: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self::new(MappingOperation::WaitingForRepetition, ids)
    }

    /// Mapping that removes WAITING_FOR_REPETITION holding instances.
    pub fn remove_waiting_for_repetition(
        ids: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self::new(MappingOperation::RemoveWaitingForRepetition, ids)
    }

    fn new(operation: MappingOperation, ids: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            operation,
            plan_item_definition_ids: ids.into_iter().map(Into::into).collect(),
            new_assignee: None,
            new_owner: None,
        }
    }

    /// Set the assignee for materialized tasks.
    pub fn with_assignee(mut self, assignee: impl Into<String>) -> Self {
        self.new_assignee = Some(assignee.into());
        self
    }

    /// Set the owner for materialized tasks.
    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.new_owner = Some(owner.into());
        self
    }
}

/// Declarative migration document: destination + mappings + variable overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaseInstanceMigrationDocument {
    /// Document schema version.
    pub schema_version: i32,
    /// Destination case definition reference.
    pub destination: CaseDefinitionRef,
    /// Ordered plan-item-definition mappings.
    #[serde(default)]
    pub mappings: Vec<PlanItemDefinitionMapping>,
    /// Case variables written to the instance's scope during migration.
    #[serde(default)]
    pub case_instance_variables: HashMap<String, Value>,
}

impl CaseInstanceMigrationDocument {
    /// Start building a document.
    pub fn builder() -> CaseInstanceMigrationDocumentBuilder {
        CaseInstanceMigrationDocumentBuilder::default()
    }

    /// Serialize the document to its JSON wire form.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse a document from its JSON wire form.
    ///
    /// Rejects documents with an unknown schema version or no destination.
    pub fn from_json(json: &str) -> Result<Self> {
        let document: Self = serde_json::from_str(json)?;
        if document.schema_version != DOCUMENT_SCHEMA_VERSION {
            return Err(EngineError::InvalidDocument {
                details: format!(
                    "unsupported document schema version {}",
                    document.schema_version
                ),
            });
        }
        if document.destination.is_empty() {
            return Err(EngineError::InvalidDocument {
                details: "destination case definition reference is required".to_string(),
            });
        }
        Ok(document)
    }

    /// Plan item definition ids mapped with the given operation, in document order.
    pub fn definition_ids_for(&self, operation: MappingOperation) -> Vec<&str> {
        let mut seen = Vec::new();
        for mapping in self.mappings.iter().filter(|m| m.operation == operation) {
            for id in &mapping.plan_item_definition_ids {
                if !seen.contains(&id.as_str()) {
                    seen.push(id.as_str());
                }
            }
        }
        seen
    }

    /// The mapping entry covering a definition id for the given operation, if any.
    pub fn mapping_for(
        &self,
        operation: MappingOperation,
        definition_id: &str,
    ) -> Option<&PlanItemDefinitionMapping> {
        self.mappings.iter().find(|m| {
            m.operation == operation
                && m.plan_item_definition_ids
                    .iter()
                    .any(|id| id == definition_id)
        })
    }
}

/// Fluent builder for [`CaseInstanceMigrationDocument`].
#[derive(Debug, Default)]
pub struct CaseInstanceMigrationDocumentBuilder {
    destination: CaseDefinitionRef,
    mappings: Vec<PlanItemDefinitionMapping>,
    case_instance_variables: HashMap<String, Value>,
}

impl CaseInstanceMigrationDocumentBuilder {
    /// Migrate to the case definition with this id.
    pub fn to_case_definition_id(mut self, id: impl Into<String>) -> Self {
        self.destination.id = Some(id.into());
        self
    }

    /// Migrate to the case definition with this key and version.
    pub fn to_case_definition(mut self, key: impl Into<String>, version: i32) -> Self {
        self.destination.key = Some(key.into());
        self.destination.version = Some(version);
        self
    }

    /// Scope a key-based destination lookup to this tenant.
    pub fn with_tenant_id(mut self, tenant_id: impl Into<String>) -> Self {
        self.destination.tenant_id = Some(tenant_id.into());
        self
    }

    /// Add a mapping entry. Duplicate (operation, definition id) pairs are
    /// idempotent: the id is dropped from the later entry rather than repeated.
    pub fn add_mapping(mut self, mapping: PlanItemDefinitionMapping) -> Self {
        let mut mapping = mapping;
        mapping.plan_item_definition_ids.retain(|id| {
            !self.mappings.iter().any(|m| {
                m.operation == mapping.operation && m.plan_item_definition_ids.contains(id)
            })
        });
        if !mapping.plan_item_definition_ids.is_empty() {
            self.mappings.push(mapping);
        }
        self
    }

    /// Override a case variable during migration.
    pub fn with_variable(mut self, name: impl Into<String>, value: Value) -> Self {
        self.case_instance_variables.insert(name.into(), value);
        self
    }

    /// Build the document. The destination reference is mandatory.
    pub fn build(self) -> Result<CaseInstanceMigrationDocument> {
        if self.destination.is_empty() {
            return Err(EngineError::InvalidDocument {
                details: "destination case definition reference is required".to_string(),
            });
        }
        Ok(CaseInstanceMigrationDocument {
            schema_version: DOCUMENT_SCHEMA_VERSION,
            destination: self.destination,
            mappings: self.mappings,
            case_instance_variables: self.case_instance_variables,
        })
    }
}
