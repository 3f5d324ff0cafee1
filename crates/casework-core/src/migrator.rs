// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Runtime case instance migration.
//!
//! [`CaseInstanceMigrator`] applies a validated migration document to one live
//! case instance: it rewrites the plan item tree, re-links satisfied sentry
//! parts, re-nests stages against the destination model, applies variable
//! overrides, and re-evaluates if-part sentries exactly once. The whole
//! rewrite is computed in memory and handed to the persistence backend as a
//! single [`CaseMigrationPlan`], so any failure leaves the case instance
//! unchanged on its original definition.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::condition::ConditionEvaluator;
use crate::config::EngineConfig;
use crate::definition::{CaseModel, CriterionModel, PlanItemModel, PlanItemType};
use crate::document::{CaseInstanceMigrationDocument, MappingOperation, PlanItemDefinitionMapping};
use crate::error::{EngineError, Result};
use crate::persistence::{
    CaseMigrationPlan, EventSubscriptionRecord, Persistence, PlanItemInstanceRecord,
    PlanItemInstanceState, SentryPartInstanceRecord, TaskRecord, VariableRecord, task_state,
};
use crate::tree::PlanItemTree;
use crate::validator::{self, ValidationResult};

/// Strategy for locating the destination counterpart of a satisfied sentry
/// part. Part ids are position-derived and not stable across versions, so the
/// mapping rule is pluggable.
pub trait SentryPartMatcher: Send + Sync {
    /// Destination on-part id for a satisfied source on-part, or `None` when
    /// the part has no counterpart and must be dropped.
    fn match_on_part(
        &self,
        source: &CaseModel,
        destination: &CaseModel,
        element_id: &str,
        source_on_part_id: &str,
    ) -> Option<String>;

    /// Destination if-part id for a satisfied source if-part.
    fn match_if_part(
        &self,
        source: &CaseModel,
        destination: &CaseModel,
        element_id: &str,
        source_if_part_id: &str,
    ) -> Option<String>;
}

/// Default matcher: same criterion index on the owning plan item, same part
/// index within that criterion.
#[derive(Debug, Default, Clone)]
pub struct PositionalSentryPartMatcher;

impl PositionalSentryPartMatcher {
    fn source_position(
        source: &CaseModel,
        element_id: &str,
        on_part_id: &str,
    ) -> Option<(usize, usize)> {
        let item = source.find_by_element_id(element_id)?;
        for (criterion_index, criterion) in item.entry_criteria.iter().enumerate() {
            if let Some(part_index) = criterion.on_parts.iter().position(|p| p.id == on_part_id) {
                return Some((criterion_index, part_index));
            }
        }
        None
    }

    fn source_if_criterion(
        source: &CaseModel,
        element_id: &str,
        if_part_id: &str,
    ) -> Option<usize> {
        let item = source.find_by_element_id(element_id)?;
        item.entry_criteria
            .iter()
            .position(|c| c.if_part.as_ref().is_some_and(|p| p.id == if_part_id))
    }
}

impl SentryPartMatcher for PositionalSentryPartMatcher {
    fn match_on_part(
        &self,
        source: &CaseModel,
        destination: &CaseModel,
        element_id: &str,
        source_on_part_id: &str,
    ) -> Option<String> {
        let (criterion_index, part_index) =
            Self::source_position(source, element_id, source_on_part_id)?;
        let item = destination.find_by_element_id(element_id)?;
        let criterion = item.entry_criteria.get(criterion_index)?;
        criterion
            .on_parts
            .get(part_index)
            .map(|part| part.id.clone())
    }

    fn match_if_part(
        &self,
        source: &CaseModel,
        destination: &CaseModel,
        element_id: &str,
        source_if_part_id: &str,
    ) -> Option<String> {
        let criterion_index = Self::source_if_criterion(source, element_id, source_if_part_id)?;
        let item = destination.find_by_element_id(element_id)?;
        let criterion = item.entry_criteria.get(criterion_index)?;
        criterion.if_part.as_ref().map(|part| part.id.clone())
    }
}

/// Applies migration documents to live case instances.
pub struct CaseInstanceMigrator {
    persistence: Arc<dyn Persistence>,
    config: EngineConfig,
    condition_evaluator: Arc<dyn ConditionEvaluator>,
    sentry_matcher: Arc<dyn SentryPartMatcher>,
}

impl CaseInstanceMigrator {
    /// Create a migrator over the given persistence backend.
    pub fn new(
        persistence: Arc<dyn Persistence>,
        config: EngineConfig,
        condition_evaluator: Arc<dyn ConditionEvaluator>,
        sentry_matcher: Arc<dyn SentryPartMatcher>,
    ) -> Self {
        Self {
            persistence,
            config,
            condition_evaluator,
            sentry_matcher,
        }
    }

    /// Migrate one live case instance to the document's destination definition.
    ///
    /// Two-phase: the document is re-validated first, and any validation error
    /// aborts before mutation. The rewrite itself commits atomically.
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

        if instance.end_time.is_some() {
            return Err(EngineError::CaseInstanceEnded {
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
        .ok_or_else(|| destination_not_found_error(document))?;

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

        let source_definition = self
            .persistence
            .get_case_definition(&instance.case_definition_id)
            .await?
            .ok_or_else(|| EngineError::CaseDefinitionNotFound {
                case_definition_id: instance.case_definition_id.clone(),
            })?;

        let source_model = CaseModel::from_json(&source_definition.model)?;
        let destination_model = CaseModel::from_json(&destination.model)?;

        let all_items = self
            .persistence
            .list_plan_item_instances(case_instance_id, true)
            .await?;

        // Phase one: re-validate before any mutation.
        let mut validation = ValidationResult::default();
        let live_items: Vec<_> = all_items
            .iter()
            .filter(|item| {
                PlanItemInstanceState::parse(&item.state).is_some_and(|s| !s.is_terminal())
            })
            .cloned()
            .collect();
        validator::validate_resolved(document, &destination_model, &live_items, &mut validation);
        if validation.has_errors() {
            return Err(EngineError::MigrationValidationFailed {
                messages: validation.into_messages(),
            });
        }

        let sentry_parts = self
            .persistence
            .list_sentry_part_instances(case_instance_id)
            .await?;
        let subscriptions = self
            .persistence
            .list_event_subscriptions(case_instance_id)
            .await?;
        let tasks = self.persistence.list_tasks(case_instance_id).await?;
        let variables = self.persistence.list_variables(case_instance_id).await?;

        let now = Utc::now();
        let mut ctx = MigrationContext {
            case_instance_id: case_instance_id.to_string(),
            destination_definition_id: destination.id.clone(),
            tree: PlanItemTree::from_records(all_items),
            tasks,
            subscriptions,
            sentry_parts,
            sentry_part_deletes: Vec::new(),
            subscription_deletes: Vec::new(),
            variables: variable_map(&variables),
            now,
        };

        // Phase two: compute the rewrite.
        self.terminate_mapped(document, &mut ctx);
        self.rewrite_retained(&destination_model, &mut ctx);
        self.materialize_mapped(document, &destination_model, &mut ctx)?;
        self.relink_sentry_parts(&source_model, &destination_model, &mut ctx)?;
        self.renest_stages(&destination_model, &mut ctx);
        let variable_overrides = self.apply_variable_overrides(document, &mut ctx)?;
        self.reevaluate_if_parts(&destination_model, &mut ctx)?;

        let mut updated_instance = instance.clone();
        updated_instance.case_definition_id = destination.id.clone();
        updated_instance.case_definition_key = destination.key.clone();
        updated_instance.case_definition_version = destination.version;
        updated_instance.case_definition_deployment_id = destination.deployment_id.clone();
        if destination_model.name.is_some() {
            updated_instance.name = destination_model.name.clone();
        }

        let plan = CaseMigrationPlan {
            case_instance: Some(updated_instance),
            plan_items: ctx.tree.into_records(),
            tasks: ctx.tasks,
            sentry_parts: ctx.sentry_parts,
            sentry_part_deletes: ctx.sentry_part_deletes,
            event_subscriptions: ctx.subscriptions,
            event_subscription_deletes: ctx.subscription_deletes,
            variables: variable_overrides,
        };

        info!(
            destination_id = %destination.id,
            plan_items = plan.plan_items.len(),
            tasks = plan.tasks.len(),
            "Applying case instance migration"
        );

        self.persistence.apply_case_migration(&plan).await
    }

    /// Terminate instances matched by terminate mappings, descendants first.
    fn terminate_mapped(&self, document: &CaseInstanceMigrationDocument, ctx: &mut MigrationContext) {
        let terminate_ids: Vec<String> = document
            .definition_ids_for(MappingOperation::Terminate)
            .into_iter()
            .map(str::to_string)
            .collect();
        if terminate_ids.is_empty() {
            return;
        }

        for id in ctx.tree.live_ids() {
            let Some(item) = ctx.tree.get(&id) else { continue };
            if !terminate_ids.contains(&item.plan_item_definition_id) {
                continue;
            }
            if item.is_stage {
                for descendant in ctx.tree.descendants_deepest_first(&id) {
                    ctx.terminate_instance(&descendant);
                }
            }
            ctx.terminate_instance(&id);
        }
    }

    /// Rewrite definition pointers on every row; re-derive names for retained
    /// live items from the destination model (names can legitimately change).
    fn rewrite_retained(&self, destination_model: &CaseModel, ctx: &mut MigrationContext) {
        let destination_id = ctx.destination_definition_id.clone();

        let ids: Vec<String> = ctx.tree.ids().map(str::to_string).collect();
        for id in ids {
            let Some(item) = ctx.tree.get_mut(&id) else { continue };
            item.case_definition_id = destination_id.clone();
            let live = PlanItemInstanceState::parse(&item.state)
                .is_some_and(|state| !state.is_terminal());
            if live && let Some(model_item) = destination_model.find_by_element_id(&item.element_id)
            {
                item.name = model_item.name.clone();
            }
        }

        for task in &mut ctx.tasks {
            task.scope_definition_id = destination_id.clone();
        }
        for subscription in &mut ctx.subscriptions {
            subscription.scope_definition_id = destination_id.clone();
        }
    }

    /// Create or transition instances for activate / move-to-available /
    /// waiting-for-repetition mappings; drop waiting instances for
    /// remove-waiting-for-repetition mappings.
    fn materialize_mapped(
        &self,
        document: &CaseInstanceMigrationDocument,
        destination_model: &CaseModel,
        ctx: &mut MigrationContext,
    ) -> Result<()> {
        for operation in [
            MappingOperation::Activate,
            MappingOperation::MoveToAvailable,
            MappingOperation::WaitingForRepetition,
        ] {
            let definition_ids: Vec<String> = document
                .definition_ids_for(operation)
                .into_iter()
                .map(str::to_string)
                .collect();
            for definition_id in definition_ids {
                let mapping = document.mapping_for(operation, &definition_id).cloned();
                self.materialize_one(
                    operation,
                    &definition_id,
                    mapping.as_ref(),
                    destination_model,
                    ctx,
                )?;
            }
        }

        for definition_id in document.definition_ids_for(MappingOperation::RemoveWaitingForRepetition)
        {
            let waiting: Vec<String> = ctx
                .tree
                .live_by_definition_id(definition_id)
                .into_iter()
                .filter(|item| item.state == PlanItemInstanceState::WaitingForRepetition.as_str())
                .map(|item| item.id.clone())
                .collect();
            for id in waiting {
                ctx.terminate_instance(&id);
            }
        }

        Ok(())
    }

    fn materialize_one(
        &self,
        operation: MappingOperation,
        definition_id: &str,
        mapping: Option<&PlanItemDefinitionMapping>,
        destination_model: &CaseModel,
        ctx: &mut MigrationContext,
    ) -> Result<()> {
        let model_item = destination_model
            .find_by_definition_id(definition_id)
            .ok_or_else(|| EngineError::MigrationValidationFailed {
                messages: vec![format!(
                    "Invalid mapping for {} plan item definition '{}' cannot be found in the case definition",
                    operation, definition_id
                )],
            })?
            .clone();

        let target_state = match operation {
            MappingOperation::Activate => PlanItemInstanceState::Active,
            MappingOperation::MoveToAvailable => PlanItemInstanceState::Available,
            MappingOperation::WaitingForRepetition => PlanItemInstanceState::WaitingForRepetition,
            _ => return Ok(()),
        };

        let existing: Vec<String> = ctx
            .tree
            .live_by_definition_id(definition_id)
            .into_iter()
            .map(|item| item.id.clone())
            .collect();

        if !existing.is_empty() {
            // Repetition can leave several live instances per definition; the
            // mapping transitions every one of them. At most one waiting
            // instance may exist per definition and owning stage.
            let mut waiting_stages: HashSet<Option<String>> = HashSet::new();
            for existing_id in &existing {
                let Some(item) = ctx.tree.get(existing_id) else { continue };
                let current_state = item.state.clone();
                let stage = item.stage_instance_id.clone();
                if target_state == PlanItemInstanceState::WaitingForRepetition
                    && !waiting_stages.insert(stage)
                {
                    ctx.terminate_instance(existing_id);
                    continue;
                }
                if current_state == target_state.as_str() {
                    continue;
                }
                if let Some(item) = ctx.tree.get_mut(existing_id) {
                    item.state = target_state.as_str().to_string();
                }
                match target_state {
                    PlanItemInstanceState::Active => {
                        self.materialize_runtime_entities(&model_item, existing_id, mapping, ctx);
                    }
                    PlanItemInstanceState::Available
                    | PlanItemInstanceState::WaitingForRepetition => {
                        // Regressing out of ACTIVE force-closes the work in flight.
                        ctx.cancel_tasks_of(existing_id);
                    }
                    _ => {}
                }
            }
            return Ok(());
        }

        let instance_id = ctx.create_instance(&model_item, target_state);
        if target_state == PlanItemInstanceState::Active {
            self.materialize_runtime_entities(&model_item, &instance_id, mapping, ctx);
        }
        Ok(())
    }

    /// Create the dependent runtime entities of a freshly activated plan item,
    /// as if it had been entered normally.
    fn materialize_runtime_entities(
        &self,
        model_item: &PlanItemModel,
        plan_item_instance_id: &str,
        mapping: Option<&PlanItemDefinitionMapping>,
        ctx: &mut MigrationContext,
    ) {
        match model_item.item_type {
            PlanItemType::HumanTask => {
                let has_live_task = ctx.tasks.iter().any(|task| {
                    task.plan_item_instance_id == plan_item_instance_id
                        && task.state == task_state::CREATED
                });
                if has_live_task {
                    return;
                }
                ctx.tasks.push(TaskRecord {
                    id: Uuid::new_v4().to_string(),
                    case_instance_id: ctx.case_instance_id.clone(),
                    plan_item_instance_id: plan_item_instance_id.to_string(),
                    scope_definition_id: ctx.destination_definition_id.clone(),
                    name: model_item.name.clone(),
                    assignee: mapping.and_then(|m| m.new_assignee.clone()),
                    owner: mapping.and_then(|m| m.new_owner.clone()),
                    state: task_state::CREATED.to_string(),
                    create_time: ctx.now,
                    end_time: None,
                });
            }
            PlanItemType::UserEventListener | PlanItemType::TimerEventListener => {
                let event_type = if model_item.item_type == PlanItemType::UserEventListener {
                    "userEventListener"
                } else {
                    "timer"
                };
                ctx.subscriptions.push(EventSubscriptionRecord {
                    id: Uuid::new_v4().to_string(),
                    scope_id: ctx.case_instance_id.clone(),
                    scope_definition_id: ctx.destination_definition_id.clone(),
                    event_type: event_type.to_string(),
                    event_name: model_item.name.clone(),
                    configuration: Some(plan_item_instance_id.to_string()),
                });
            }
            PlanItemType::Stage | PlanItemType::Milestone => {}
        }
    }

    /// Re-link satisfied sentry parts to their destination counterparts; drop
    /// parts without one and regress dependents whose sentry is no longer
    /// satisfiable.
    fn relink_sentry_parts(
        &self,
        source_model: &CaseModel,
        destination_model: &CaseModel,
        ctx: &mut MigrationContext,
    ) -> Result<()> {
        let mut kept = Vec::new();
        let mut seen: HashSet<(String, String)> = HashSet::new();
        let mut lost_owners: HashSet<String> = HashSet::new();

        let parts = std::mem::take(&mut ctx.sentry_parts);
        for mut part in parts {
            let owner_live = ctx
                .tree
                .get(&part.plan_item_instance_id)
                .and_then(|item| PlanItemInstanceState::parse(&item.state))
                .is_some_and(|state| !state.is_terminal());
            if !owner_live {
                ctx.sentry_part_deletes.push(part.id.clone());
                continue;
            }

            let element_id = ctx
                .tree
                .get(&part.plan_item_instance_id)
                .map(|item| item.element_id.clone())
                .unwrap_or_default();

            let remapped = if let Some(ref on_part_id) = part.on_part_id {
                self.sentry_matcher
                    .match_on_part(source_model, destination_model, &element_id, on_part_id)
                    .map(|new_id| (new_id, true))
            } else if let Some(ref if_part_id) = part.if_part_id {
                self.sentry_matcher
                    .match_if_part(source_model, destination_model, &element_id, if_part_id)
                    .map(|new_id| (new_id, false))
            } else {
                None
            };

            match remapped {
                Some((new_id, is_on_part)) => {
                    let key = (part.plan_item_instance_id.clone(), new_id.clone());
                    if !seen.insert(key) {
                        // One part instance per (plan item instance, part id).
                        ctx.sentry_part_deletes.push(part.id.clone());
                        continue;
                    }
                    if is_on_part {
                        part.on_part_id = Some(new_id);
                    } else {
                        part.if_part_id = Some(new_id);
                    }
                    kept.push(part);
                }
                None => {
                    debug!(
                        part_id = %part.id,
                        plan_item_instance_id = %part.plan_item_instance_id,
                        "Dropping sentry part with no destination counterpart"
                    );
                    lost_owners.insert(part.plan_item_instance_id.clone());
                    ctx.sentry_part_deletes.push(part.id.clone());
                }
            }
        }
        ctx.sentry_parts = kept;

        // Dropping a part may leave the dependent's sentry unsatisfied; the
        // dependent must regress out of ACTIVE rather than stay active.
        for owner_id in lost_owners {
            let Some(item) = ctx.tree.get(&owner_id) else { continue };
            if item.state != PlanItemInstanceState::Active.as_str() {
                continue;
            }
            let Some(model_item) = destination_model.find_by_element_id(&item.element_id) else {
                continue;
            };
            if model_item.entry_criteria.is_empty() {
                continue;
            }
            let mut satisfied = false;
            for criterion in &model_item.entry_criteria {
                if self.criterion_satisfied(criterion, &owner_id, ctx)? {
                    satisfied = true;
                    break;
                }
            }
            if !satisfied {
                if let Some(item) = ctx.tree.get_mut(&owner_id) {
                    item.state = PlanItemInstanceState::Available.as_str().to_string();
                }
                ctx.cancel_tasks_of(&owner_id);
            }
        }

        Ok(())
    }

    /// Recompute stage containment against the destination model, creating
    /// missing ancestor stage instances so children always reference a live
    /// stage.
    fn renest_stages(&self, destination_model: &CaseModel, ctx: &mut MigrationContext) {
        for id in ctx.tree.live_ids() {
            let Some(item) = ctx.tree.get(&id) else { continue };
            let Some(model_item) = destination_model.find_by_element_id(&item.element_id) else {
                continue;
            };
            let parent = model_item
                .stage_element_id
                .clone()
                .and_then(|stage_element| {
                    self.ensure_stage_instance(&stage_element, destination_model, ctx)
                });
            if let Some(item) = ctx.tree.get_mut(&id) {
                item.stage_instance_id = parent;
            }
        }
    }

    fn ensure_stage_instance(
        &self,
        stage_element_id: &str,
        destination_model: &CaseModel,
        ctx: &mut MigrationContext,
    ) -> Option<String> {
        if let Some(stage) = ctx.tree.find_live_stage_by_element(stage_element_id) {
            return Some(stage.id.clone());
        }

        // Containment referring to an element outside the model nests at the root.
        let model_item = destination_model.find_by_element_id(stage_element_id)?.clone();

        let parent = model_item
            .stage_element_id
            .clone()
            .and_then(|grandparent| {
                self.ensure_stage_instance(&grandparent, destination_model, ctx)
            });

        let id = ctx.create_instance(&model_item, PlanItemInstanceState::Active);
        if let Some(item) = ctx.tree.get_mut(&id) {
            item.stage_instance_id = parent;
        }
        Some(id)
    }

    fn apply_variable_overrides(
        &self,
        document: &CaseInstanceMigrationDocument,
        ctx: &mut MigrationContext,
    ) -> Result<Vec<VariableRecord>> {
        let mut records = Vec::new();
        for (name, value) in &document.case_instance_variables {
            ctx.variables.insert(name.clone(), value.clone());
            records.push(VariableRecord {
                case_instance_id: ctx.case_instance_id.clone(),
                name: name.clone(),
                value: serde_json::to_string(value)?,
            });
        }
        Ok(records)
    }

    /// Re-evaluate if-part sentries exactly once, for all AVAILABLE instances,
    /// in definition order; a satisfied sentry activates its plan item within
    /// the same transaction and consumes its part instances.
    fn reevaluate_if_parts(
        &self,
        destination_model: &CaseModel,
        ctx: &mut MigrationContext,
    ) -> Result<()> {
        for model_item in destination_model.plan_items.clone() {
            if model_item.entry_criteria.is_empty() {
                continue;
            }
            let available: Vec<String> = ctx
                .tree
                .iter()
                .filter(|item| {
                    item.element_id == model_item.element_id
                        && item.state == PlanItemInstanceState::Available.as_str()
                })
                .map(|item| item.id.clone())
                .collect();

            for instance_id in available {
                let mut satisfied = false;
                for criterion in &model_item.entry_criteria {
                    if self.criterion_satisfied(criterion, &instance_id, ctx)? {
                        satisfied = true;
                        break;
                    }
                }

                if satisfied {
                    debug!(
                        plan_item_instance_id = %instance_id,
                        element_id = %model_item.element_id,
                        "Entry criterion satisfied after migration, activating"
                    );
                    if let Some(item) = ctx.tree.get_mut(&instance_id) {
                        item.state = PlanItemInstanceState::Active.as_str().to_string();
                    }
                    ctx.consume_sentry_parts(&instance_id);
                    self.materialize_runtime_entities(&model_item, &instance_id, None, ctx);
                }
            }
        }
        Ok(())
    }

    /// Whether a criterion is satisfied for a plan item instance: every
    /// on-part has a part instance, and the if-part is either recorded as
    /// satisfied or its condition evaluates to true.
    fn criterion_satisfied(
        &self,
        criterion: &CriterionModel,
        plan_item_instance_id: &str,
        ctx: &MigrationContext,
    ) -> Result<bool> {
        for on_part in &criterion.on_parts {
            let satisfied = ctx.sentry_parts.iter().any(|part| {
                part.plan_item_instance_id == plan_item_instance_id
                    && part.on_part_id.as_deref() == Some(on_part.id.as_str())
            });
            if !satisfied {
                return Ok(false);
            }
        }
        if let Some(ref if_part) = criterion.if_part {
            let recorded = ctx.sentry_parts.iter().any(|part| {
                part.plan_item_instance_id == plan_item_instance_id
                    && part.if_part_id.as_deref() == Some(if_part.id.as_str())
            });
            if !recorded
                && !self
                    .condition_evaluator
                    .evaluate(&if_part.condition, &ctx.variables)?
            {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

fn destination_not_found_error(document: &CaseInstanceMigrationDocument) -> EngineError {
    match (&document.destination.id, &document.destination.key) {
        (Some(id), _) => EngineError::CaseDefinitionNotFound {
            case_definition_id: id.clone(),
        },
        (None, Some(key)) => EngineError::CaseDefinitionKeyNotFound {
            key: key.clone(),
            version: document.destination.version.unwrap_or_default(),
            tenant_id: document.destination.tenant_id.clone().unwrap_or_default(),
        },
        (None, None) => EngineError::InvalidDocument {
            details: "destination case definition reference is required".to_string(),
        },
    }
}

fn variable_map(records: &[VariableRecord]) -> HashMap<String, Value> {
    records
        .iter()
        .filter_map(|record| {
            serde_json::from_str(&record.value)
                .ok()
                .map(|value| (record.name.clone(), value))
        })
        .collect()
}

/// Working state of one migration computation.
struct MigrationContext {
    case_instance_id: String,
    destination_definition_id: String,
    tree: PlanItemTree,
    tasks: Vec<TaskRecord>,
    subscriptions: Vec<EventSubscriptionRecord>,
    sentry_parts: Vec<SentryPartInstanceRecord>,
    sentry_part_deletes: Vec<String>,
    subscription_deletes: Vec<String>,
    variables: HashMap<String, Value>,
    now: DateTime<Utc>,
}

impl MigrationContext {
    /// Terminate one instance: terminal state, force-closed tasks (no
    /// completion side effects), cancelled sentry parts and subscriptions.
    fn terminate_instance(&mut self, plan_item_instance_id: &str) {
        let already_terminal = self
            .tree
            .get(plan_item_instance_id)
            .and_then(|item| PlanItemInstanceState::parse(&item.state))
            .is_none_or(|state| state.is_terminal());
        if already_terminal {
            return;
        }

        if let Some(item) = self.tree.get_mut(plan_item_instance_id) {
            item.state = PlanItemInstanceState::Terminated.as_str().to_string();
            item.ended_time = Some(self.now);
        }

        self.cancel_tasks_of(plan_item_instance_id);

        let cancelled_parts: Vec<String> = self
            .sentry_parts
            .iter()
            .filter(|part| part.plan_item_instance_id == plan_item_instance_id)
            .map(|part| part.id.clone())
            .collect();
        self.sentry_parts
            .retain(|part| part.plan_item_instance_id != plan_item_instance_id);
        self.sentry_part_deletes.extend(cancelled_parts);

        let cancelled_subscriptions: Vec<String> = self
            .subscriptions
            .iter()
            .filter(|sub| sub.configuration.as_deref() == Some(plan_item_instance_id))
            .map(|sub| sub.id.clone())
            .collect();
        self.subscriptions
            .retain(|sub| sub.configuration.as_deref() != Some(plan_item_instance_id));
        self.subscription_deletes.extend(cancelled_subscriptions);
    }

    /// Force-close the live tasks of a plan item instance without invoking
    /// normal completion side effects.
    fn cancel_tasks_of(&mut self, plan_item_instance_id: &str) {
        let now = self.now;
        for task in self
            .tasks
            .iter_mut()
            .filter(|task| task.plan_item_instance_id == plan_item_instance_id)
        {
            if task.state == task_state::CREATED {
                task.state = task_state::TERMINATED.to_string();
                task.end_time = Some(now);
            }
        }
    }

    /// Create a plan item instance for a destination model item. Stage
    /// containment is resolved later by the re-nesting pass.
    fn create_instance(
        &mut self,
        model_item: &PlanItemModel,
        state: PlanItemInstanceState,
    ) -> String {
        let id = Uuid::new_v4().to_string();
        self.tree.insert(PlanItemInstanceRecord {
            id: id.clone(),
            case_instance_id: self.case_instance_id.clone(),
            case_definition_id: self.destination_definition_id.clone(),
            element_id: model_item.element_id.clone(),
            plan_item_definition_id: model_item.definition_id.clone(),
            stage_instance_id: None,
            is_stage: model_item.is_stage(),
            state: state.as_str().to_string(),
            name: model_item.name.clone(),
            create_time: self.now,
            ended_time: None,
        });
        id
    }

    /// Drop the satisfied part instances of an activating plan item; a fired
    /// sentry consumes its parts.
    fn consume_sentry_parts(&mut self, plan_item_instance_id: &str) {
        let consumed: Vec<String> = self
            .sentry_parts
            .iter()
            .filter(|part| part.plan_item_instance_id == plan_item_instance_id)
            .map(|part| part.id.clone())
            .collect();
        self.sentry_parts
            .retain(|part| part.plan_item_instance_id != plan_item_instance_id);
        self.sentry_part_deletes.extend(consumed);
    }
}
