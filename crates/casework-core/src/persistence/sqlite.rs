// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! SQLite-backed persistence implementation.

use std::path::Path;

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;

use crate::error::EngineError;

use super::{
    BatchPartRecord, BatchRecord, CaseDefinitionRecord, CaseInstanceRecord, CaseMigrationPlan,
    EventSubscriptionRecord, HistoricMigrationPlan, JobRecord, Persistence,
    PlanItemInstanceRecord, SentryPartInstanceRecord, TaskRecord, VariableRecord,
    batch_part_status,
};

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations/sqlite");

/// SQLite-backed persistence provider.
#[derive(Clone)]
pub struct SqlitePersistence {
    pool: SqlitePool,
}

impl SqlitePersistence {
    /// Create a new SQLite persistence provider from an existing pool.
    ///
    /// The caller is responsible for running migrations on the pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create and initialize a persistence provider from a database file path.
    ///
    /// Creates parent directories and the database file as needed, connects
    /// with sensible defaults, and runs all migrations.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self, EngineError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| EngineError::DatabaseError {
                operation: "create_dir".to_string(),
                details: format!("Failed to create directory {:?}: {}", parent, e),
            })?;
        }

        let path_str = path.to_string_lossy();
        let url = format!("sqlite:{}?mode=rwc", path_str);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await
            .map_err(|e| EngineError::DatabaseError {
                operation: "connect".to_string(),
                details: format!("Failed to connect to SQLite at {:?}: {}", path, e),
            })?;

        Self::migrate_and_wrap(pool).await
    }

    /// Create an in-memory persistence provider with migrations applied.
    ///
    /// Each in-memory database is private to its connection, so the pool is
    /// limited to a single connection.
    pub async fn in_memory() -> Result<Self, EngineError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| EngineError::DatabaseError {
                operation: "connect".to_string(),
                details: format!("Failed to open in-memory SQLite: {}", e),
            })?;

        Self::migrate_and_wrap(pool).await
    }

    async fn migrate_and_wrap(pool: SqlitePool) -> Result<Self, EngineError> {
        MIGRATOR
            .run(&pool)
            .await
            .map_err(|e| EngineError::DatabaseError {
                operation: "migrate".to_string(),
                details: format!("Failed to run migrations: {}", e),
            })?;

        Ok(Self { pool })
    }

    async fn upsert_plan_item_tx(
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        item: &PlanItemInstanceRecord,
    ) -> Result<(), EngineError> {
        sqlx::query(
            r#"
            INSERT INTO plan_item_instances
                (id, case_instance_id, case_definition_id, element_id,
                 plan_item_definition_id, stage_instance_id, is_stage, state,
                 name, create_time, ended_time)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                case_definition_id = excluded.case_definition_id,
                element_id = excluded.element_id,
                plan_item_definition_id = excluded.plan_item_definition_id,
                stage_instance_id = excluded.stage_instance_id,
                state = excluded.state,
                name = excluded.name,
                ended_time = excluded.ended_time
            "#,
        )
        .bind(&item.id)
        .bind(&item.case_instance_id)
        .bind(&item.case_definition_id)
        .bind(&item.element_id)
        .bind(&item.plan_item_definition_id)
        .bind(&item.stage_instance_id)
        .bind(item.is_stage)
        .bind(&item.state)
        .bind(&item.name)
        .bind(item.create_time)
        .bind(item.ended_time)
        .execute(&mut **tx)
        .await?;

        Ok(())
    }

    async fn upsert_task_tx(
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        task: &TaskRecord,
    ) -> Result<(), EngineError> {
        sqlx::query(
            r#"
            INSERT INTO tasks
                (id, case_instance_id, plan_item_instance_id, scope_definition_id,
                 name, assignee, owner, state, create_time, end_time)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                scope_definition_id = excluded.scope_definition_id,
                name = excluded.name,
                assignee = excluded.assignee,
                owner = excluded.owner,
                state = excluded.state,
                end_time = excluded.end_time
            "#,
        )
        .bind(&task.id)
        .bind(&task.case_instance_id)
        .bind(&task.plan_item_instance_id)
        .bind(&task.scope_definition_id)
        .bind(&task.name)
        .bind(&task.assignee)
        .bind(&task.owner)
        .bind(&task.state)
        .bind(task.create_time)
        .bind(task.end_time)
        .execute(&mut **tx)
        .await?;

        Ok(())
    }

    async fn update_case_instance_tx(
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        instance: &CaseInstanceRecord,
    ) -> Result<(), EngineError> {
        sqlx::query(
            r#"
            UPDATE case_instances
            SET case_definition_id = ?,
                case_definition_key = ?,
                case_definition_version = ?,
                case_definition_deployment_id = ?,
                name = ?
            WHERE id = ?
            "#,
        )
        .bind(&instance.case_definition_id)
        .bind(&instance.case_definition_key)
        .bind(instance.case_definition_version)
        .bind(&instance.case_definition_deployment_id)
        .bind(&instance.name)
        .bind(&instance.id)
        .execute(&mut **tx)
        .await?;

        Ok(())
    }
}

#[async_trait::async_trait]
impl Persistence for SqlitePersistence {
    async fn insert_case_definition(
        &self,
        definition: &CaseDefinitionRecord,
    ) -> Result<(), EngineError> {
        sqlx::query(
            r#"
            INSERT INTO case_definitions
                (id, key, version, tenant_id, name, deployment_id, model, create_time)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&definition.id)
        .bind(&definition.key)
        .bind(definition.version)
        .bind(&definition.tenant_id)
        .bind(&definition.name)
        .bind(&definition.deployment_id)
        .bind(&definition.model)
        .bind(definition.create_time)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_case_definition(
        &self,
        case_definition_id: &str,
    ) -> Result<Option<CaseDefinitionRecord>, EngineError> {
        let record = sqlx::query_as::<_, CaseDefinitionRecord>(
            r#"
            SELECT id, key, version, tenant_id, name, deployment_id, model, create_time
            FROM case_definitions
            WHERE id = ?
            "#,
        )
        .bind(case_definition_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn find_case_definition(
        &self,
        key: &str,
        version: i32,
        tenant_id: &str,
    ) -> Result<Option<CaseDefinitionRecord>, EngineError> {
        let record = sqlx::query_as::<_, CaseDefinitionRecord>(
            r#"
            SELECT id, key, version, tenant_id, name, deployment_id, model, create_time
            FROM case_definitions
            WHERE key = ? AND version = ? AND tenant_id = ?
            "#,
        )
        .bind(key)
        .bind(version)
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn insert_case_instance(
        &self,
        instance: &CaseInstanceRecord,
    ) -> Result<(), EngineError> {
        sqlx::query(
            r#"
            INSERT INTO case_instances
                (id, case_definition_id, case_definition_key, case_definition_version,
                 case_definition_deployment_id, tenant_id, business_key, name, state,
                 start_time, end_time)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&instance.id)
        .bind(&instance.case_definition_id)
        .bind(&instance.case_definition_key)
        .bind(instance.case_definition_version)
        .bind(&instance.case_definition_deployment_id)
        .bind(&instance.tenant_id)
        .bind(&instance.business_key)
        .bind(&instance.name)
        .bind(&instance.state)
        .bind(instance.start_time)
        .bind(instance.end_time)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_case_instance(
        &self,
        case_instance_id: &str,
    ) -> Result<Option<CaseInstanceRecord>, EngineError> {
        let record = sqlx::query_as::<_, CaseInstanceRecord>(
            r#"
            SELECT id, case_definition_id, case_definition_key, case_definition_version,
                   case_definition_deployment_id, tenant_id, business_key, name, state,
                   start_time, end_time
            FROM case_instances
            WHERE id = ?
            "#,
        )
        .bind(case_instance_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn list_case_instance_ids_by_definition(
        &self,
        case_definition_id: &str,
        ended: Option<bool>,
    ) -> Result<Vec<String>, EngineError> {
        let rows: Vec<(String,)> = match ended {
            Some(true) => {
                sqlx::query_as(
                    r#"
                    SELECT id FROM case_instances
                    WHERE case_definition_id = ? AND end_time IS NOT NULL
                    ORDER BY start_time
                    "#,
                )
                .bind(case_definition_id)
                .fetch_all(&self.pool)
                .await?
            }
            Some(false) => {
                sqlx::query_as(
                    r#"
                    SELECT id FROM case_instances
                    WHERE case_definition_id = ? AND end_time IS NULL
                    ORDER BY start_time
                    "#,
                )
                .bind(case_definition_id)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as(
                    r#"
                    SELECT id FROM case_instances
                    WHERE case_definition_id = ?
                    ORDER BY start_time
                    "#,
                )
                .bind(case_definition_id)
                .fetch_all(&self.pool)
                .await?
            }
        };

        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    async fn insert_plan_item_instance(
        &self,
        instance: &PlanItemInstanceRecord,
    ) -> Result<(), EngineError> {
        sqlx::query(
            r#"
            INSERT INTO plan_item_instances
                (id, case_instance_id, case_definition_id, element_id,
                 plan_item_definition_id, stage_instance_id, is_stage, state,
                 name, create_time, ended_time)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&instance.id)
        .bind(&instance.case_instance_id)
        .bind(&instance.case_definition_id)
        .bind(&instance.element_id)
        .bind(&instance.plan_item_definition_id)
        .bind(&instance.stage_instance_id)
        .bind(instance.is_stage)
        .bind(&instance.state)
        .bind(&instance.name)
        .bind(instance.create_time)
        .bind(instance.ended_time)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_plan_item_instances(
        &self,
        case_instance_id: &str,
        include_ended: bool,
    ) -> Result<Vec<PlanItemInstanceRecord>, EngineError> {
        let records = if include_ended {
            sqlx::query_as::<_, PlanItemInstanceRecord>(
                r#"
                SELECT id, case_instance_id, case_definition_id, element_id,
                       plan_item_definition_id, stage_instance_id, is_stage, state,
                       name, create_time, ended_time
                FROM plan_item_instances
                WHERE case_instance_id = ?
                ORDER BY create_time, id
                "#,
            )
            .bind(case_instance_id)
            .fetch_all(&self.pool)
            .await?
        } else {
            sqlx::query_as::<_, PlanItemInstanceRecord>(
                r#"
                SELECT id, case_instance_id, case_definition_id, element_id,
                       plan_item_definition_id, stage_instance_id, is_stage, state,
                       name, create_time, ended_time
                FROM plan_item_instances
                WHERE case_instance_id = ? AND ended_time IS NULL
                ORDER BY create_time, id
                "#,
            )
            .bind(case_instance_id)
            .fetch_all(&self.pool)
            .await?
        };

        Ok(records)
    }

    async fn insert_sentry_part_instance(
        &self,
        part: &SentryPartInstanceRecord,
    ) -> Result<(), EngineError> {
        sqlx::query(
            r#"
            INSERT INTO sentry_part_instances
                (id, case_instance_id, plan_item_instance_id, on_part_id, if_part_id)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&part.id)
        .bind(&part.case_instance_id)
        .bind(&part.plan_item_instance_id)
        .bind(&part.on_part_id)
        .bind(&part.if_part_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_sentry_part_instances(
        &self,
        case_instance_id: &str,
    ) -> Result<Vec<SentryPartInstanceRecord>, EngineError> {
        let records = sqlx::query_as::<_, SentryPartInstanceRecord>(
            r#"
            SELECT id, case_instance_id, plan_item_instance_id, on_part_id, if_part_id
            FROM sentry_part_instances
            WHERE case_instance_id = ?
            ORDER BY id
            "#,
        )
        .bind(case_instance_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    async fn insert_event_subscription(
        &self,
        subscription: &EventSubscriptionRecord,
    ) -> Result<(), EngineError> {
        sqlx::query(
            r#"
            INSERT INTO event_subscriptions
                (id, scope_id, scope_definition_id, event_type, event_name, configuration)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&subscription.id)
        .bind(&subscription.scope_id)
        .bind(&subscription.scope_definition_id)
        .bind(&subscription.event_type)
        .bind(&subscription.event_name)
        .bind(&subscription.configuration)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_event_subscriptions(
        &self,
        scope_id: &str,
    ) -> Result<Vec<EventSubscriptionRecord>, EngineError> {
        let records = sqlx::query_as::<_, EventSubscriptionRecord>(
            r#"
            SELECT id, scope_id, scope_definition_id, event_type, event_name, configuration
            FROM event_subscriptions
            WHERE scope_id = ?
            ORDER BY id
            "#,
        )
        .bind(scope_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    async fn insert_task(&self, task: &TaskRecord) -> Result<(), EngineError> {
        sqlx::query(
            r#"
            INSERT INTO tasks
                (id, case_instance_id, plan_item_instance_id, scope_definition_id,
                 name, assignee, owner, state, create_time, end_time)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&task.id)
        .bind(&task.case_instance_id)
        .bind(&task.plan_item_instance_id)
        .bind(&task.scope_definition_id)
        .bind(&task.name)
        .bind(&task.assignee)
        .bind(&task.owner)
        .bind(&task.state)
        .bind(task.create_time)
        .bind(task.end_time)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_tasks(&self, case_instance_id: &str) -> Result<Vec<TaskRecord>, EngineError> {
        let records = sqlx::query_as::<_, TaskRecord>(
            r#"
            SELECT id, case_instance_id, plan_item_instance_id, scope_definition_id,
                   name, assignee, owner, state, create_time, end_time
            FROM tasks
            WHERE case_instance_id = ?
            ORDER BY create_time, id
            "#,
        )
        .bind(case_instance_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    async fn upsert_variable(&self, variable: &VariableRecord) -> Result<(), EngineError> {
        sqlx::query(
            r#"
            INSERT INTO case_variables (case_instance_id, name, value)
            VALUES (?, ?, ?)
            ON CONFLICT(case_instance_id, name) DO UPDATE SET value = excluded.value
            "#,
        )
        .bind(&variable.case_instance_id)
        .bind(&variable.name)
        .bind(&variable.value)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_variables(
        &self,
        case_instance_id: &str,
    ) -> Result<Vec<VariableRecord>, EngineError> {
        let records = sqlx::query_as::<_, VariableRecord>(
            r#"
            SELECT case_instance_id, name, value
            FROM case_variables
            WHERE case_instance_id = ?
            ORDER BY name
            "#,
        )
        .bind(case_instance_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    async fn apply_case_migration(&self, plan: &CaseMigrationPlan) -> Result<(), EngineError> {
        let mut tx = self.pool.begin().await?;

        if let Some(ref instance) = plan.case_instance {
            Self::update_case_instance_tx(&mut tx, instance).await?;
        }

        for item in &plan.plan_items {
            Self::upsert_plan_item_tx(&mut tx, item).await?;
        }

        for task in &plan.tasks {
            Self::upsert_task_tx(&mut tx, task).await?;
        }

        for part in &plan.sentry_parts {
            sqlx::query(
                r#"
                INSERT INTO sentry_part_instances
                    (id, case_instance_id, plan_item_instance_id, on_part_id, if_part_id)
                VALUES (?, ?, ?, ?, ?)
                ON CONFLICT(id) DO UPDATE SET
                    on_part_id = excluded.on_part_id,
                    if_part_id = excluded.if_part_id
                "#,
            )
            .bind(&part.id)
            .bind(&part.case_instance_id)
            .bind(&part.plan_item_instance_id)
            .bind(&part.on_part_id)
            .bind(&part.if_part_id)
            .execute(&mut *tx)
            .await?;
        }

        for part_id in &plan.sentry_part_deletes {
            sqlx::query("DELETE FROM sentry_part_instances WHERE id = ?")
                .bind(part_id)
                .execute(&mut *tx)
                .await?;
        }

        for subscription in &plan.event_subscriptions {
            sqlx::query(
                r#"
                INSERT INTO event_subscriptions
                    (id, scope_id, scope_definition_id, event_type, event_name, configuration)
                VALUES (?, ?, ?, ?, ?, ?)
                ON CONFLICT(id) DO UPDATE SET
                    scope_definition_id = excluded.scope_definition_id,
                    event_type = excluded.event_type,
                    event_name = excluded.event_name,
                    configuration = excluded.configuration
                "#,
            )
            .bind(&subscription.id)
            .bind(&subscription.scope_id)
            .bind(&subscription.scope_definition_id)
            .bind(&subscription.event_type)
            .bind(&subscription.event_name)
            .bind(&subscription.configuration)
            .execute(&mut *tx)
            .await?;
        }

        for subscription_id in &plan.event_subscription_deletes {
            sqlx::query("DELETE FROM event_subscriptions WHERE id = ?")
                .bind(subscription_id)
                .execute(&mut *tx)
                .await?;
        }

        for variable in &plan.variables {
            sqlx::query(
                r#"
                INSERT INTO case_variables (case_instance_id, name, value)
                VALUES (?, ?, ?)
                ON CONFLICT(case_instance_id, name) DO UPDATE SET value = excluded.value
                "#,
            )
            .bind(&variable.case_instance_id)
            .bind(&variable.name)
            .bind(&variable.value)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        Ok(())
    }

    async fn apply_historic_migration(
        &self,
        plan: &HistoricMigrationPlan,
    ) -> Result<(), EngineError> {
        let mut tx = self.pool.begin().await?;

        if let Some(ref instance) = plan.case_instance {
            Self::update_case_instance_tx(&mut tx, instance).await?;
        }

        for item in &plan.plan_items {
            Self::upsert_plan_item_tx(&mut tx, item).await?;
        }

        for task in &plan.tasks {
            Self::upsert_task_tx(&mut tx, task).await?;
        }

        tx.commit().await?;

        Ok(())
    }

    async fn insert_batch(&self, batch: &BatchRecord) -> Result<(), EngineError> {
        sqlx::query(
            r#"
            INSERT INTO batches
                (id, batch_type, status, migration_document, create_time, complete_time)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&batch.id)
        .bind(&batch.batch_type)
        .bind(&batch.status)
        .bind(&batch.migration_document)
        .bind(batch.create_time)
        .bind(batch.complete_time)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_batch(&self, batch_id: &str) -> Result<Option<BatchRecord>, EngineError> {
        let record = sqlx::query_as::<_, BatchRecord>(
            r#"
            SELECT id, batch_type, status, migration_document, create_time, complete_time
            FROM batches
            WHERE id = ?
            "#,
        )
        .bind(batch_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn complete_batch(
        &self,
        batch_id: &str,
        complete_time: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        sqlx::query(
            r#"
            UPDATE batches
            SET status = 'completed', complete_time = ?
            WHERE id = ? AND status = 'in_progress'
            "#,
        )
        .bind(complete_time)
        .bind(batch_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn insert_batch_part(&self, part: &BatchPartRecord) -> Result<(), EngineError> {
        sqlx::query(
            r#"
            INSERT INTO batch_parts
                (id, batch_id, scope_id, status, result, message, stacktrace,
                 create_time, complete_time)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&part.id)
        .bind(&part.batch_id)
        .bind(&part.scope_id)
        .bind(&part.status)
        .bind(&part.result)
        .bind(&part.message)
        .bind(&part.stacktrace)
        .bind(part.create_time)
        .bind(part.complete_time)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_batch_parts(
        &self,
        batch_id: &str,
    ) -> Result<Vec<BatchPartRecord>, EngineError> {
        let records = sqlx::query_as::<_, BatchPartRecord>(
            r#"
            SELECT id, batch_id, scope_id, status, result, message, stacktrace,
                   create_time, complete_time
            FROM batch_parts
            WHERE batch_id = ?
            ORDER BY create_time, id
            "#,
        )
        .bind(batch_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    async fn complete_batch_part(
        &self,
        batch_part_id: &str,
        result: &str,
        message: Option<&str>,
        stacktrace: Option<&str>,
        complete_time: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        sqlx::query(
            r#"
            UPDATE batch_parts
            SET status = ?, result = ?, message = ?, stacktrace = ?, complete_time = ?
            WHERE id = ? AND status = 'waiting'
            "#,
        )
        .bind(batch_part_status::COMPLETED)
        .bind(result)
        .bind(message)
        .bind(stacktrace)
        .bind(complete_time)
        .bind(batch_part_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete_batch(&self, batch_id: &str) -> Result<(), EngineError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM jobs WHERE batch_id = ?")
            .bind(batch_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM batch_parts WHERE batch_id = ?")
            .bind(batch_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM batches WHERE id = ?")
            .bind(batch_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(())
    }

    async fn insert_job(&self, job: &JobRecord) -> Result<(), EngineError> {
        sqlx::query(
            r#"
            INSERT INTO jobs
                (id, handler_type, payload, batch_id, scope_id, due_time, create_time)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&job.id)
        .bind(&job.handler_type)
        .bind(&job.payload)
        .bind(&job.batch_id)
        .bind(&job.scope_id)
        .bind(job.due_time)
        .bind(job.create_time)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_due_jobs(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<JobRecord>, EngineError> {
        let records = sqlx::query_as::<_, JobRecord>(
            r#"
            SELECT id, handler_type, payload, batch_id, scope_id, due_time, create_time
            FROM jobs
            WHERE due_time <= ?
            ORDER BY due_time, create_time
            LIMIT ?
            "#,
        )
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    async fn delete_job(&self, job_id: &str) -> Result<(), EngineError> {
        sqlx::query("DELETE FROM jobs WHERE id = ?")
            .bind(job_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn delete_jobs_for_batch(&self, batch_id: &str) -> Result<(), EngineError> {
        sqlx::query("DELETE FROM jobs WHERE batch_id = ?")
            .bind(batch_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn move_timer_jobs_to_executable(
        &self,
        batch_id: &str,
        now: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        sqlx::query("UPDATE jobs SET due_time = ? WHERE batch_id = ?")
            .bind(now)
            .bind(batch_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn health_check_db(&self) -> Result<bool, EngineError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(true)
    }
}
