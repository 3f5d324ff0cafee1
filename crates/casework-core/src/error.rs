// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for casework-core.
//!
//! Provides a unified error type for migration, batch, and persistence failures.

use std::fmt;

/// Result type using EngineError
pub type Result<T> = std::result::Result<T, EngineError>;

/// Engine errors that can occur while validating or applying a migration.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum EngineError {
    /// The destination case definition could not be resolved by id.
    CaseDefinitionNotFound {
        /// The case definition id that was not found.
        case_definition_id: String,
    },

    /// The destination case definition could not be resolved by key/version/tenant.
    CaseDefinitionKeyNotFound {
        /// The case definition key.
        key: String,
        /// The requested version.
        version: i32,
        /// The tenant the lookup was scoped to.
        tenant_id: String,
    },

    /// The case instance was not found in the database.
    CaseInstanceNotFound {
        /// The case instance id that was not found.
        case_instance_id: String,
    },

    /// The case instance has already ended; only the historic migrator may touch it.
    CaseInstanceEnded {
        /// The ended case instance id.
        case_instance_id: String,
    },

    /// The case instance and the destination definition live in different tenants.
    TenantMismatch {
        /// Tenant of the case instance.
        instance_tenant_id: String,
        /// Tenant of the destination case definition.
        definition_tenant_id: String,
    },

    /// The migration document failed validation against the destination definition.
    MigrationValidationFailed {
        /// Validation messages, one per problem.
        messages: Vec<String>,
    },

    /// Historic migration was requested for a case instance that is still running.
    HistoricCaseNotEnded {
        /// The still-running case instance id.
        case_instance_id: String,
    },

    /// The batch was not found.
    BatchNotFound {
        /// The batch id that was not found.
        batch_id: String,
    },

    /// The migration document is structurally invalid (bad JSON, missing destination).
    InvalidDocument {
        /// Details of the problem.
        details: String,
    },

    /// Database operation failed.
    DatabaseError {
        /// The operation that failed.
        operation: String,
        /// Error details.
        details: String,
    },
}

impl EngineError {
    /// Get the error code string for this error type.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::CaseDefinitionNotFound { .. } => "CASE_DEFINITION_NOT_FOUND",
            Self::CaseDefinitionKeyNotFound { .. } => "CASE_DEFINITION_NOT_FOUND",
            Self::CaseInstanceNotFound { .. } => "CASE_INSTANCE_NOT_FOUND",
            Self::CaseInstanceEnded { .. } => "CASE_INSTANCE_ENDED",
            Self::TenantMismatch { .. } => "TENANT_MISMATCH",
            Self::MigrationValidationFailed { .. } => "MIGRATION_VALIDATION_FAILED",
            Self::HistoricCaseNotEnded { .. } => "HISTORIC_CASE_NOT_ENDED",
            Self::BatchNotFound { .. } => "BATCH_NOT_FOUND",
            Self::InvalidDocument { .. } => "INVALID_DOCUMENT",
            Self::DatabaseError { .. } => "DATABASE_ERROR",
        }
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CaseDefinitionNotFound { case_definition_id } => {
                write!(
                    f,
                    "Cannot find the case definition to migrate to, with [id:'{}']",
                    case_definition_id
                )
            }
            Self::CaseDefinitionKeyNotFound {
                key,
                version,
                tenant_id,
            } => {
                write!(
                    f,
                    "Cannot find the case definition to migrate to, with [key:'{}', version:{}, tenant:'{}']",
                    key, version, tenant_id
                )
            }
            Self::CaseInstanceNotFound { case_instance_id } => {
                write!(f, "Case instance '{}' not found", case_instance_id)
            }
            Self::CaseInstanceEnded { case_instance_id } => {
                write!(
                    f,
                    "Case instance '{}' has already ended and cannot be migrated at runtime",
                    case_instance_id
                )
            }
            Self::TenantMismatch {
                instance_tenant_id,
                definition_tenant_id,
            } => {
                write!(
                    f,
                    "Tenant mismatch between Case Instance ('{}') and Case Definition ('{}') to migrate to",
                    instance_tenant_id, definition_tenant_id
                )
            }
            Self::MigrationValidationFailed { messages } => {
                write!(f, "Migration document validation failed: {}", messages.join("; "))
            }
            Self::HistoricCaseNotEnded { .. } => {
                write!(f, "Historic case instance has not ended")
            }
            Self::BatchNotFound { batch_id } => {
                write!(f, "Batch '{}' not found", batch_id)
            }
            Self::InvalidDocument { details } => {
                write!(f, "Invalid migration document: {}", details)
            }
            Self::DatabaseError { operation, details } => {
                write!(f, "Database error during '{}': {}", operation, details)
            }
        }
    }
}

impl std::error::Error for EngineError {}

impl From<sqlx::Error> for EngineError {
    fn from(err: sqlx::Error) -> Self {
        EngineError::DatabaseError {
            operation: "query".to_string(),
            details: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::InvalidDocument {
            details: err.to_string(),
        }
    }
}
