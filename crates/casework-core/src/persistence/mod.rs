// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Persistence interfaces and backends for casework-core.
//!
//! This module defines the persistence abstraction, the record types shared by
//! all backends, and the atomic migration-plan types the migrators hand to the
//! backend for all-or-nothing application.

pub mod sqlite;

pub use self::sqlite::SqlitePersistence;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::EngineError;

/// Case definition record from the persistence layer.
///
/// Definitions are immutable once deployed; `model` holds the serialized
/// [`CaseModel`](crate::definition::CaseModel).
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CaseDefinitionRecord {
    /// Unique definition id.
    pub id: String,
    /// Definition key, shared across versions.
    pub key: String,
    /// Version within the key.
    pub version: i32,
    /// Tenant the definition is deployed under (empty = default tenant).
    pub tenant_id: String,
    /// Display name.
    pub name: Option<String>,
    /// Deployment this definition came from.
    pub deployment_id: Option<String>,
    /// Serialized structural model (JSON).
    pub model: String,
    /// When the definition was deployed.
    pub create_time: DateTime<Utc>,
}

/// Case instance record from the persistence layer.
///
/// `end_time == None` means the instance is running. Migration rewrites the
/// definition pointer columns in place; the row is never replaced.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CaseInstanceRecord {
    /// Unique case instance id.
    pub id: String,
    /// Current case definition id.
    pub case_definition_id: String,
    /// Denormalized definition key.
    pub case_definition_key: String,
    /// Denormalized definition version.
    pub case_definition_version: i32,
    /// Denormalized deployment id.
    pub case_definition_deployment_id: Option<String>,
    /// Tenant the instance runs in.
    pub tenant_id: String,
    /// Caller-supplied business key.
    pub business_key: Option<String>,
    /// Display name.
    pub name: Option<String>,
    /// Current state (active, completed, terminated).
    pub state: String,
    /// When the instance started.
    pub start_time: DateTime<Utc>,
    /// When the instance ended; `None` while running.
    pub end_time: Option<DateTime<Utc>>,
}

/// Plan item instance record from the persistence layer.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PlanItemInstanceRecord {
    /// Unique plan item instance id.
    pub id: String,
    /// Owning case instance.
    pub case_instance_id: String,
    /// Case definition this instance is scoped to.
    pub case_definition_id: String,
    /// Element id of the modeled occurrence.
    pub element_id: String,
    /// Plan item definition id used for mapping.
    pub plan_item_definition_id: String,
    /// Owning stage instance; `None` for plan-model roots.
    pub stage_instance_id: Option<String>,
    /// Whether this instance is itself a stage.
    pub is_stage: bool,
    /// Lifecycle state, see [`PlanItemInstanceState`].
    pub state: String,
    /// Display name, re-derived from the model on migration.
    pub name: Option<String>,
    /// When the instance was created.
    pub create_time: DateTime<Utc>,
    /// When the instance reached a terminal state.
    pub ended_time: Option<DateTime<Utc>>,
}

/// Lifecycle state of a plan item instance.
///
/// `AVAILABLE -> ACTIVE -> {COMPLETED, TERMINATED}` with
/// `WAITING_FOR_REPETITION` as a pre-AVAILABLE holding state and `TERMINATED`
/// reachable from any non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanItemInstanceState {
    /// Waiting for its entry criterion.
    Available,
    /// Actively executing.
    Active,
    /// Finished successfully. Terminal.
    Completed,
    /// Terminated without completing. Terminal.
    Terminated,
    /// Holding state for the next repetition of a repeating plan item.
    WaitingForRepetition,
}

impl PlanItemInstanceState {
    /// Storage string for this state.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Available => "available",
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Terminated => "terminated",
            Self::WaitingForRepetition => "waiting_for_repetition",
        }
    }

    /// Parse a storage string.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "available" => Some(Self::Available),
            "active" => Some(Self::Active),
            "completed" => Some(Self::Completed),
            "terminated" => Some(Self::Terminated),
            "waiting_for_repetition" => Some(Self::WaitingForRepetition),
            _ => None,
        }
    }

    /// Whether this state is terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Terminated)
    }
}

/// One satisfied part of a multi-part AND-sentry.
///
/// Exactly one of `on_part_id` / `if_part_id` is set. Part ids are
/// position-derived in the model and not stable across definition versions.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SentryPartInstanceRecord {
    /// Unique row id.
    pub id: String,
    /// Owning case instance.
    pub case_instance_id: String,
    /// Plan item instance whose criterion this part belongs to.
    pub plan_item_instance_id: String,
    /// Satisfied on-part id, if event-based.
    pub on_part_id: Option<String>,
    /// Satisfied if-part id, if condition-based.
    pub if_part_id: Option<String>,
}

/// A pending wait for an external trigger.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct EventSubscriptionRecord {
    /// Unique subscription id.
    pub id: String,
    /// Scope id (the case instance id).
    pub scope_id: String,
    /// Case definition the subscription is scoped to.
    pub scope_definition_id: String,
    /// Event type (e.g. "userEventListener", "timer").
    pub event_type: String,
    /// Event name, if named.
    pub event_name: Option<String>,
    /// Backend configuration; the engine stores the plan item instance id here.
    pub configuration: Option<String>,
}

/// Runtime task record, scoped to a plan item instance.
///
/// Ended tasks (`end_time` set) are the historic task rows.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TaskRecord {
    /// Unique task id.
    pub id: String,
    /// Owning case instance.
    pub case_instance_id: String,
    /// Plan item instance the task belongs to.
    pub plan_item_instance_id: String,
    /// Case definition the task is scoped to; tracks the instance's definition.
    pub scope_definition_id: String,
    /// Display name.
    pub name: Option<String>,
    /// Assignee.
    pub assignee: Option<String>,
    /// Owner.
    pub owner: Option<String>,
    /// Current state (created, completed, terminated).
    pub state: String,
    /// When the task was created.
    pub create_time: DateTime<Utc>,
    /// When the task ended.
    pub end_time: Option<DateTime<Utc>>,
}

/// One case variable, JSON-encoded.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct VariableRecord {
    /// Owning case instance.
    pub case_instance_id: String,
    /// Variable name.
    pub name: String,
    /// JSON-encoded value.
    pub value: String,
}

/// Asynchronous bulk-operation envelope.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct BatchRecord {
    /// Unique batch id.
    pub id: String,
    /// Batch type, see [`BatchType`].
    pub batch_type: String,
    /// Batch status, see [`batch_status`].
    pub status: String,
    /// Serialized migration document, shared by all parts.
    pub migration_document: String,
    /// When the batch was created.
    pub create_time: DateTime<Utc>,
    /// When the status job observed all parts done.
    pub complete_time: Option<DateTime<Utc>>,
}

/// One per-target-instance unit of work within a batch.
///
/// The part set is snapshotted at batch creation and never re-evaluated. A
/// part transitions `waiting -> completed` exactly once and is then immutable.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct BatchPartRecord {
    /// Unique part id.
    pub id: String,
    /// Owning batch.
    pub batch_id: String,
    /// Target case instance id.
    pub scope_id: String,
    /// Part status (waiting, completed).
    pub status: String,
    /// Outcome (success, fail); set when completed.
    pub result: Option<String>,
    /// Failure message, if failed.
    pub message: Option<String>,
    /// Failure stacktrace/chain, if failed.
    pub stacktrace: Option<String>,
    /// When the part was created.
    pub create_time: DateTime<Utc>,
    /// When the part completed.
    pub complete_time: Option<DateTime<Utc>>,
}

/// Batch kinds known to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchType {
    /// Runtime case instance migration.
    CaseMigration,
    /// Historic (ended) case instance migration.
    HistoricCaseMigration,
}

impl BatchType {
    /// Storage string for this batch type.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CaseMigration => "case-migration",
            Self::HistoricCaseMigration => "historic-case-migration",
        }
    }
}

/// Batch status values.
pub mod batch_status {
    /// Parts are still being processed (or not yet observed done).
    pub const IN_PROGRESS: &str = "in_progress";
    /// The status job observed all parts completed.
    pub const COMPLETED: &str = "completed";
}

/// Batch part status values.
pub mod batch_part_status {
    /// The part's job has not finished yet.
    pub const WAITING: &str = "waiting";
    /// The part's job finished (successfully or not).
    pub const COMPLETED: &str = "completed";
}

/// Batch part result values.
pub mod batch_part_result {
    /// The migration committed.
    pub const SUCCESS: &str = "success";
    /// The migration failed; the instance is unchanged.
    pub const FAIL: &str = "fail";
}

/// Task state values.
pub mod task_state {
    /// The task is open.
    pub const CREATED: &str = "created";
    /// The task completed normally.
    pub const COMPLETED: &str = "completed";
    /// The task was force-closed without completion side effects.
    pub const TERMINATED: &str = "terminated";
}

/// Case instance state values.
pub mod case_state {
    /// The case instance is running.
    pub const ACTIVE: &str = "active";
    /// The case instance completed.
    pub const COMPLETED: &str = "completed";
    /// The case instance was terminated.
    pub const TERMINATED: &str = "terminated";
}

/// Queued asynchronous job.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct JobRecord {
    /// Unique job id.
    pub id: String,
    /// Handler type string, see [`JobHandlerType`](crate::jobs::JobHandlerType).
    pub handler_type: String,
    /// JSON payload handed to the handler.
    pub payload: String,
    /// Owning batch, if any.
    pub batch_id: Option<String>,
    /// Target scope (case instance id), if any.
    pub scope_id: Option<String>,
    /// When the job becomes executable.
    pub due_time: DateTime<Utc>,
    /// When the job was enqueued.
    pub create_time: DateTime<Utc>,
}

/// Atomic rewrite of one case instance, produced by the runtime migrator.
///
/// A backend must apply the whole plan in a single transaction: any failure
/// leaves the case instance unchanged on its original definition.
#[derive(Debug, Clone, Default)]
pub struct CaseMigrationPlan {
    /// Rewritten case instance row.
    pub case_instance: Option<CaseInstanceRecord>,
    /// Plan item instance upserts (retained rewrites, terminations, creations).
    pub plan_items: Vec<PlanItemInstanceRecord>,
    /// Task upserts (repointed, terminated, created).
    pub tasks: Vec<TaskRecord>,
    /// Sentry part upserts (re-linked part ids).
    pub sentry_parts: Vec<SentryPartInstanceRecord>,
    /// Sentry part rows to drop (no destination counterpart, or consumed).
    pub sentry_part_deletes: Vec<String>,
    /// Event subscription upserts (repointed, created).
    pub event_subscriptions: Vec<EventSubscriptionRecord>,
    /// Event subscription rows to drop (owning plan item terminated).
    pub event_subscription_deletes: Vec<String>,
    /// Variable overrides.
    pub variables: Vec<VariableRecord>,
}

/// Atomic pointer rewrite of one ended case instance, produced by the
/// historic migrator. Touches only definition pointers, never lifecycle state.
#[derive(Debug, Clone, Default)]
pub struct HistoricMigrationPlan {
    /// Rewritten case instance row.
    pub case_instance: Option<CaseInstanceRecord>,
    /// Plan item instance pointer rewrites.
    pub plan_items: Vec<PlanItemInstanceRecord>,
    /// Task pointer rewrites.
    pub tasks: Vec<TaskRecord>,
}

/// Persistence interface used by the migrators, orchestrator, and job executor.
#[allow(missing_docs)]
#[async_trait]
pub trait Persistence: Send + Sync {
    // ------------------------------------------------------------------
    // Case definitions
    // ------------------------------------------------------------------

    async fn insert_case_definition(
        &self,
        definition: &CaseDefinitionRecord,
    ) -> Result<(), EngineError>;

    async fn get_case_definition(
        &self,
        case_definition_id: &str,
    ) -> Result<Option<CaseDefinitionRecord>, EngineError>;

    /// Resolve a definition by key + version within a tenant.
    async fn find_case_definition(
        &self,
        key: &str,
        version: i32,
        tenant_id: &str,
    ) -> Result<Option<CaseDefinitionRecord>, EngineError>;

    // ------------------------------------------------------------------
    // Case instances and their runtime entities
    // ------------------------------------------------------------------

    async fn insert_case_instance(&self, instance: &CaseInstanceRecord)
    -> Result<(), EngineError>;

    async fn get_case_instance(
        &self,
        case_instance_id: &str,
    ) -> Result<Option<CaseInstanceRecord>, EngineError>;

    /// Case instance ids currently on a definition. `ended` filters to ended
    /// (`Some(true)`) or running (`Some(false)`) instances; `None` returns all.
    async fn list_case_instance_ids_by_definition(
        &self,
        case_definition_id: &str,
        ended: Option<bool>,
    ) -> Result<Vec<String>, EngineError>;

    async fn insert_plan_item_instance(
        &self,
        instance: &PlanItemInstanceRecord,
    ) -> Result<(), EngineError>;

    /// Plan item instances of a case, in creation order. `include_ended`
    /// includes completed/terminated instances.
    async fn list_plan_item_instances(
        &self,
        case_instance_id: &str,
        include_ended: bool,
    ) -> Result<Vec<PlanItemInstanceRecord>, EngineError>;

    async fn insert_sentry_part_instance(
        &self,
        part: &SentryPartInstanceRecord,
    ) -> Result<(), EngineError>;

    async fn list_sentry_part_instances(
        &self,
        case_instance_id: &str,
    ) -> Result<Vec<SentryPartInstanceRecord>, EngineError>;

    async fn insert_event_subscription(
        &self,
        subscription: &EventSubscriptionRecord,
    ) -> Result<(), EngineError>;

    async fn list_event_subscriptions(
        &self,
        scope_id: &str,
    ) -> Result<Vec<EventSubscriptionRecord>, EngineError>;

    async fn insert_task(&self, task: &TaskRecord) -> Result<(), EngineError>;

    /// Tasks of a case instance, ended ones included.
    async fn list_tasks(&self, case_instance_id: &str) -> Result<Vec<TaskRecord>, EngineError>;

    async fn upsert_variable(&self, variable: &VariableRecord) -> Result<(), EngineError>;

    async fn list_variables(
        &self,
        case_instance_id: &str,
    ) -> Result<Vec<VariableRecord>, EngineError>;

    // ------------------------------------------------------------------
    // Atomic migration application
    // ------------------------------------------------------------------

    /// Apply a runtime migration plan in a single transaction.
    async fn apply_case_migration(&self, plan: &CaseMigrationPlan) -> Result<(), EngineError>;

    /// Apply a historic pointer-rewrite plan in a single transaction.
    async fn apply_historic_migration(
        &self,
        plan: &HistoricMigrationPlan,
    ) -> Result<(), EngineError>;

    // ------------------------------------------------------------------
    // Batches
    // ------------------------------------------------------------------

    async fn insert_batch(&self, batch: &BatchRecord) -> Result<(), EngineError>;

    async fn get_batch(&self, batch_id: &str) -> Result<Option<BatchRecord>, EngineError>;

    /// Flip a batch to completed with the given completion time.
    async fn complete_batch(
        &self,
        batch_id: &str,
        complete_time: DateTime<Utc>,
    ) -> Result<(), EngineError>;

    async fn insert_batch_part(&self, part: &BatchPartRecord) -> Result<(), EngineError>;

    async fn list_batch_parts(
        &self,
        batch_id: &str,
    ) -> Result<Vec<BatchPartRecord>, EngineError>;

    /// Complete a part exactly once; waiting parts only.
    async fn complete_batch_part(
        &self,
        batch_part_id: &str,
        result: &str,
        message: Option<&str>,
        stacktrace: Option<&str>,
        complete_time: DateTime<Utc>,
    ) -> Result<(), EngineError>;

    /// Delete a batch with its parts and queued jobs. Committed migrations are
    /// not undone.
    async fn delete_batch(&self, batch_id: &str) -> Result<(), EngineError>;

    // ------------------------------------------------------------------
    // Jobs
    // ------------------------------------------------------------------

    async fn insert_job(&self, job: &JobRecord) -> Result<(), EngineError>;

    /// Jobs due at or before `now`, oldest due first.
    async fn list_due_jobs(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<JobRecord>, EngineError>;

    async fn delete_job(&self, job_id: &str) -> Result<(), EngineError>;

    /// Remove all queued jobs of a batch (cancellation: not-yet-started parts
    /// never start).
    async fn delete_jobs_for_batch(&self, batch_id: &str) -> Result<(), EngineError>;

    /// Force a batch's timer jobs executable now, without waiting for the
    /// timer. Used by tests and operators.
    async fn move_timer_jobs_to_executable(
        &self,
        batch_id: &str,
        now: DateTime<Utc>,
    ) -> Result<(), EngineError>;

    async fn health_check_db(&self) -> Result<bool, EngineError>;
}
