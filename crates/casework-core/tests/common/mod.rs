// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for casework-core integration tests.
//!
//! Provides TestContext for setting up an in-memory database, seeding
//! definitions and case instances, and driving job execution deterministically.

#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use casework_core::condition::VariableConditionEvaluator;
use casework_core::config::EngineConfig;
use casework_core::definition::{
    CaseModel, CriterionModel, IfPartModel, OnPartModel, PlanItemModel, PlanItemType,
};
use casework_core::history::HistoricCaseInstanceMigrator;
use casework_core::jobs::{
    BatchStatusCheckJobHandler, CaseMigrationJobHandler, HistoricCaseMigrationJobHandler,
    JobExecutor,
};
use casework_core::migrator::{CaseInstanceMigrator, PositionalSentryPartMatcher};
use casework_core::persistence::{
    CaseDefinitionRecord, CaseInstanceRecord, Persistence, PlanItemInstanceRecord,
    SentryPartInstanceRecord, SqlitePersistence, TaskRecord, case_state, task_state,
};

/// Test context over an in-memory database.
pub struct TestContext {
    pub persistence: Arc<SqlitePersistence>,
    pub config: EngineConfig,
}

/// Initialize test logging once; `RUST_LOG` controls verbosity.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

impl TestContext {
    /// Create a context with a fresh in-memory database and default config.
    pub async fn new() -> Self {
        init_tracing();
        let persistence = Arc::new(
            SqlitePersistence::in_memory()
                .await
                .expect("in-memory database"),
        );
        Self {
            persistence,
            config: EngineConfig::default(),
        }
    }

    pub fn persistence(&self) -> Arc<dyn Persistence> {
        Arc::clone(&self.persistence) as Arc<dyn Persistence>
    }

    /// Build a migrator with the default evaluator and matcher.
    pub fn migrator(&self) -> CaseInstanceMigrator {
        CaseInstanceMigrator::new(
            self.persistence(),
            self.config.clone(),
            Arc::new(VariableConditionEvaluator),
            Arc::new(PositionalSentryPartMatcher),
        )
    }

    /// Build a historic migrator.
    pub fn historic_migrator(&self) -> HistoricCaseInstanceMigrator {
        HistoricCaseInstanceMigrator::new(self.persistence(), self.config.clone())
    }

    /// Build a job executor with all three handlers registered, for driving
    /// batch jobs deterministically via `poll_once`.
    pub fn job_executor(&self) -> JobExecutor {
        let mut executor = JobExecutor::new(self.persistence(), &self.config);
        executor.register(Arc::new(CaseMigrationJobHandler::new(
            self.persistence(),
            Arc::new(self.migrator()),
        )));
        executor.register(Arc::new(HistoricCaseMigrationJobHandler::new(
            self.persistence(),
            Arc::new(self.historic_migrator()),
        )));
        executor.register(Arc::new(BatchStatusCheckJobHandler::new(
            self.persistence(),
            self.config.batch_status_check_interval,
        )));
        executor
    }

    /// Deploy a case definition and return its id.
    pub async fn deploy_definition(
        &self,
        key: &str,
        version: i32,
        tenant_id: &str,
        model: &CaseModel,
    ) -> String {
        let id = Uuid::new_v4().to_string();
        self.persistence
            .insert_case_definition(&CaseDefinitionRecord {
                id: id.clone(),
                key: key.to_string(),
                version,
                tenant_id: tenant_id.to_string(),
                name: model.name.clone(),
                deployment_id: Some(format!("deploy-{}", version)),
                model: model.to_json().expect("serializable model"),
                create_time: Utc::now(),
            })
            .await
            .expect("insert definition");
        id
    }

    /// Start a case instance on a definition. `end_time` marks it as ended.
    pub async fn start_case(
        &self,
        case_definition_id: &str,
        tenant_id: &str,
        end_time: Option<DateTime<Utc>>,
    ) -> String {
        let definition = self
            .persistence
            .get_case_definition(case_definition_id)
            .await
            .expect("get definition")
            .expect("definition exists");

        let id = Uuid::new_v4().to_string();
        let state = if end_time.is_some() {
            case_state::COMPLETED
        } else {
            case_state::ACTIVE
        };
        self.persistence
            .insert_case_instance(&CaseInstanceRecord {
                id: id.clone(),
                case_definition_id: definition.id.clone(),
                case_definition_key: definition.key.clone(),
                case_definition_version: definition.version,
                case_definition_deployment_id: definition.deployment_id.clone(),
                tenant_id: tenant_id.to_string(),
                business_key: None,
                name: definition.name.clone(),
                state: state.to_string(),
                start_time: Utc::now(),
                end_time,
            })
            .await
            .expect("insert case instance");
        id
    }

    /// Seed a plan item instance and return its id.
    pub async fn add_plan_item(
        &self,
        case_instance_id: &str,
        case_definition_id: &str,
        element_id: &str,
        plan_item_definition_id: &str,
        state: &str,
        stage_instance_id: Option<&str>,
        is_stage: bool,
    ) -> String {
        let id = Uuid::new_v4().to_string();
        let ended = matches!(state, "completed" | "terminated");
        self.persistence
            .insert_plan_item_instance(&PlanItemInstanceRecord {
                id: id.clone(),
                case_instance_id: case_instance_id.to_string(),
                case_definition_id: case_definition_id.to_string(),
                element_id: element_id.to_string(),
                plan_item_definition_id: plan_item_definition_id.to_string(),
                stage_instance_id: stage_instance_id.map(str::to_string),
                is_stage,
                state: state.to_string(),
                name: None,
                create_time: Utc::now(),
                ended_time: ended.then(Utc::now),
            })
            .await
            .expect("insert plan item instance");
        id
    }

    /// Seed an open task for a plan item instance and return its id.
    pub async fn add_task(
        &self,
        case_instance_id: &str,
        plan_item_instance_id: &str,
        scope_definition_id: &str,
        state: &str,
    ) -> String {
        let id = Uuid::new_v4().to_string();
        let ended = state != task_state::CREATED;
        self.persistence
            .insert_task(&TaskRecord {
                id: id.clone(),
                case_instance_id: case_instance_id.to_string(),
                plan_item_instance_id: plan_item_instance_id.to_string(),
                scope_definition_id: scope_definition_id.to_string(),
                name: None,
                assignee: None,
                owner: None,
                state: state.to_string(),
                create_time: Utc::now(),
                end_time: ended.then(Utc::now),
            })
            .await
            .expect("insert task");
        id
    }

    /// Record a satisfied sentry on-part for a plan item instance.
    pub async fn add_sentry_on_part(
        &self,
        case_instance_id: &str,
        plan_item_instance_id: &str,
        on_part_id: &str,
    ) -> String {
        let id = Uuid::new_v4().to_string();
        self.persistence
            .insert_sentry_part_instance(&SentryPartInstanceRecord {
                id: id.clone(),
                case_instance_id: case_instance_id.to_string(),
                plan_item_instance_id: plan_item_instance_id.to_string(),
                on_part_id: Some(on_part_id.to_string()),
                if_part_id: None,
            })
            .await
            .expect("insert sentry part");
        id
    }
}

/// A human task plan item without entry criteria.
pub fn human_task(element_id: &str, definition_id: &str) -> PlanItemModel {
    PlanItemModel {
        element_id: element_id.to_string(),
        definition_id: definition_id.to_string(),
        name: Some(definition_id.to_string()),
        item_type: PlanItemType::HumanTask,
        stage_element_id: None,
        repetition: false,
        entry_criteria: vec![],
    }
}

/// A stage plan item.
pub fn stage(element_id: &str, definition_id: &str) -> PlanItemModel {
    PlanItemModel {
        element_id: element_id.to_string(),
        definition_id: definition_id.to_string(),
        name: Some(definition_id.to_string()),
        item_type: PlanItemType::Stage,
        stage_element_id: None,
        repetition: false,
        entry_criteria: vec![],
    }
}

/// Nest a plan item under a stage element.
pub fn in_stage(mut item: PlanItemModel, stage_element_id: &str) -> PlanItemModel {
    item.stage_element_id = Some(stage_element_id.to_string());
    item
}

/// Attach an on-part to a plan item's entry criterion, creating the criterion
/// if it does not exist yet.
pub fn with_on_part_criterion(
    mut item: PlanItemModel,
    criterion_id: &str,
    on_part_id: &str,
    source_element_id: &str,
) -> PlanItemModel {
    let on_part = OnPartModel {
        id: on_part_id.to_string(),
        source_element_id: source_element_id.to_string(),
        standard_event: "complete".to_string(),
    };
    if let Some(criterion) = item
        .entry_criteria
        .iter_mut()
        .find(|c| c.id == criterion_id)
    {
        criterion.on_parts.push(on_part);
    } else {
        item.entry_criteria.push(CriterionModel {
            id: criterion_id.to_string(),
            on_parts: vec![on_part],
            if_part: None,
        });
    }
    item
}

/// Attach an entry criterion with only an if-part to a plan item.
pub fn with_if_part_criterion(
    mut item: PlanItemModel,
    criterion_id: &str,
    if_part_id: &str,
    condition: &str,
) -> PlanItemModel {
    item.entry_criteria.push(CriterionModel {
        id: criterion_id.to_string(),
        on_parts: vec![],
        if_part: Some(IfPartModel {
            id: if_part_id.to_string(),
            condition: condition.to_string(),
        }),
    });
    item
}

/// Build a case model from plan items.
pub fn case_model(key: &str, plan_items: Vec<PlanItemModel>) -> CaseModel {
    CaseModel {
        key: key.to_string(),
        name: Some(format!("{} case", key)),
        plan_items,
    }
}
