// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-memory case model resolved from a deployed case definition.
//!
//! Definition parsing and deployment are external; the engine only needs the
//! structural shape of a deployed definition: the plan items in definition
//! order, stage containment, and the entry criteria (sentries) that gate them.
//! The model is stored as JSON on the `case_definitions` row and round-trips
//! losslessly through serde.

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// Kind of plan item a definition describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PlanItemType {
    /// A stage containing other plan items.
    Stage,
    /// A human task backed by a runtime task row.
    HumanTask,
    /// A milestone.
    Milestone,
    /// A listener waiting for a user event.
    UserEventListener,
    /// A listener waiting for a timer.
    TimerEventListener,
}

/// One on-part (event trigger) of an entry criterion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OnPartModel {
    /// Sentry on-part id. Position-derived; not stable across definition versions.
    pub id: String,
    /// Element id of the plan item whose lifecycle event triggers this part.
    pub source_element_id: String,
    /// The lifecycle event name (e.g. "complete", "occur").
    pub standard_event: String,
}

/// The if-part (condition trigger) of an entry criterion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IfPartModel {
    /// Sentry if-part id.
    pub id: String,
    /// Condition expression, evaluated through the engine's condition evaluator.
    pub condition: String,
}

/// An entry criterion: an AND-sentry of on-parts and an optional if-part.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CriterionModel {
    /// Sentry id.
    pub id: String,
    /// Event-based parts; all must be satisfied.
    #[serde(default)]
    pub on_parts: Vec<OnPartModel>,
    /// Optional condition part.
    #[serde(default)]
    pub if_part: Option<IfPartModel>,
}

/// One modeled plan item occurrence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanItemModel {
    /// Element id of this occurrence (`<planItem id=...>`).
    pub element_id: String,
    /// Id of the referenced plan item definition.
    pub definition_id: String,
    /// Display name.
    #[serde(default)]
    pub name: Option<String>,
    /// Kind of plan item.
    pub item_type: PlanItemType,
    /// Element id of the owning stage; `None` for plan-model roots.
    #[serde(default)]
    pub stage_element_id: Option<String>,
    /// Whether this plan item may repeat.
    #[serde(default)]
    pub repetition: bool,
    /// Entry criteria gating activation.
    #[serde(default)]
    pub entry_criteria: Vec<CriterionModel>,
}

impl PlanItemModel {
    /// Whether this plan item is a stage.
    pub fn is_stage(&self) -> bool {
        self.item_type == PlanItemType::Stage
    }
}

/// Structural model of a deployed case definition.
///
/// `plan_items` is ordered: iteration order is definition order, which the
/// migrator relies on for classification and if-part re-evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaseModel {
    /// Case definition key.
    pub key: String,
    /// Display name of the case.
    #[serde(default)]
    pub name: Option<String>,
    /// Plan items in definition order.
    pub plan_items: Vec<PlanItemModel>,
}

impl CaseModel {
    /// Parse a model from its serialized JSON form.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| EngineError::InvalidDocument {
            details: format!("cannot parse case model: {}", e),
        })
    }

    /// Serialize the model to JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Find a plan item by its element id.
    pub fn find_by_element_id(&self, element_id: &str) -> Option<&PlanItemModel> {
        self.plan_items.iter().find(|p| p.element_id == element_id)
    }

    /// Find the first plan item occurrence referencing a definition id.
    pub fn find_by_definition_id(&self, definition_id: &str) -> Option<&PlanItemModel> {
        self.plan_items
            .iter()
            .find(|p| p.definition_id == definition_id)
    }

    /// Whether any plan item occurrence uses this element id.
    pub fn contains_element(&self, element_id: &str) -> bool {
        self.find_by_element_id(element_id).is_some()
    }

    /// Whether any plan item occurrence references this definition id.
    pub fn contains_definition(&self, definition_id: &str) -> bool {
        self.find_by_definition_id(definition_id).is_some()
    }
}
