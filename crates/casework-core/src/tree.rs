// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Arena of plan item instances for one case instance.
//!
//! The migrator works on a snapshot of the plan item tree rather than on live
//! rows: instances are indexed by id and stage containment is resolved by
//! index, so recursive operations (descendant termination, re-nesting) never
//! chase stale references.

use std::collections::HashMap;

use crate::persistence::{PlanItemInstanceRecord, PlanItemInstanceState};

/// Snapshot of a case instance's plan item instances, indexed by id.
#[derive(Debug, Default)]
pub struct PlanItemTree {
    items: HashMap<String, PlanItemInstanceRecord>,
    /// Child ids per stage instance id.
    children: HashMap<String, Vec<String>>,
    /// Ids in insertion (creation) order, for deterministic iteration.
    order: Vec<String>,
}

impl PlanItemTree {
    /// Build a tree from the persisted rows.
    pub fn from_records(records: Vec<PlanItemInstanceRecord>) -> Self {
        let mut tree = Self::default();
        for record in records {
            if let Some(parent) = record.stage_instance_id.clone() {
                tree.children.entry(parent).or_default().push(record.id.clone());
            }
            tree.order.push(record.id.clone());
            tree.items.insert(record.id.clone(), record);
        }
        tree
    }

    /// Get an instance by id.
    pub fn get(&self, id: &str) -> Option<&PlanItemInstanceRecord> {
        self.items.get(id)
    }

    /// Get a mutable instance by id.
    pub fn get_mut(&mut self, id: &str) -> Option<&mut PlanItemInstanceRecord> {
        self.items.get_mut(id)
    }

    /// Insert a new instance into the arena.
    pub fn insert(&mut self, record: PlanItemInstanceRecord) {
        if let Some(parent) = record.stage_instance_id.clone() {
            self.children.entry(parent).or_default().push(record.id.clone());
        }
        self.order.push(record.id.clone());
        self.items.insert(record.id.clone(), record);
    }

    /// All instance ids in creation order.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    /// All instances in creation order.
    pub fn iter(&self) -> impl Iterator<Item = &PlanItemInstanceRecord> {
        self.order.iter().filter_map(|id| self.items.get(id))
    }

    /// Ids of instances that are not in a terminal state.
    pub fn live_ids(&self) -> Vec<String> {
        self.order
            .iter()
            .filter(|id| {
                self.items
                    .get(*id)
                    .and_then(|item| PlanItemInstanceState::parse(&item.state))
                    .is_some_and(|state| !state.is_terminal())
            })
            .cloned()
            .collect()
    }

    /// Direct child ids of a stage instance.
    pub fn children_of(&self, stage_instance_id: &str) -> &[String] {
        self.children
            .get(stage_instance_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// All descendant ids of a stage instance, deepest first, so callers can
    /// terminate bottom-up.
    pub fn descendants_deepest_first(&self, stage_instance_id: &str) -> Vec<String> {
        let mut result = Vec::new();
        self.collect_descendants(stage_instance_id, &mut result);
        result.reverse();
        result
    }

    fn collect_descendants(&self, stage_instance_id: &str, out: &mut Vec<String>) {
        for child in self.children_of(stage_instance_id).to_vec() {
            out.push(child.clone());
            self.collect_descendants(&child, out);
        }
    }

    /// Find the live stage instance for a stage element id, if one exists.
    pub fn find_live_stage_by_element(&self, element_id: &str) -> Option<&PlanItemInstanceRecord> {
        self.iter().find(|item| {
            item.is_stage
                && item.element_id == element_id
                && PlanItemInstanceState::parse(&item.state)
                    .is_some_and(|state| !state.is_terminal())
        })
    }

    /// Live instances referencing a plan item definition id.
    pub fn live_by_definition_id(&self, definition_id: &str) -> Vec<&PlanItemInstanceRecord> {
        self.iter()
            .filter(|item| {
                item.plan_item_definition_id == definition_id
                    && PlanItemInstanceState::parse(&item.state)
                        .is_some_and(|state| !state.is_terminal())
            })
            .collect()
    }

    /// Consume the arena into its records, creation order preserved.
    pub fn into_records(mut self) -> Vec<PlanItemInstanceRecord> {
        self.order
            .iter()
            .filter_map(|id| self.items.remove(id))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn item(id: &str, stage: Option<&str>, is_stage: bool, state: &str) -> PlanItemInstanceRecord {
        PlanItemInstanceRecord {
            id: id.to_string(),
            case_instance_id: "case-1".to_string(),
            case_definition_id: "def-1".to_string(),
            element_id: format!("planItem-{}", id),
            plan_item_definition_id: format!("def-{}", id),
            stage_instance_id: stage.map(str::to_string),
            is_stage,
            state: state.to_string(),
            name: None,
            create_time: Utc::now(),
            ended_time: None,
        }
    }

    #[test]
    fn test_descendants_deepest_first() {
        let tree = PlanItemTree::from_records(vec![
            item("s1", None, true, "active"),
            item("s2", Some("s1"), true, "active"),
            item("a", Some("s2"), false, "active"),
            item("b", Some("s1"), false, "available"),
        ]);

        let descendants = tree.descendants_deepest_first("s1");
        assert_eq!(descendants.len(), 3);
        // "a" is nested below "s2", so it must come before "s2"
        let pos_a = descendants.iter().position(|id| id == "a").unwrap();
        let pos_s2 = descendants.iter().position(|id| id == "s2").unwrap();
        assert!(pos_a < pos_s2);
    }

    #[test]
    fn test_live_ids_excludes_terminal() {
        let tree = PlanItemTree::from_records(vec![
            item("a", None, false, "active"),
            item("b", None, false, "terminated"),
            item("c", None, false, "completed"),
            item("d", None, false, "waiting_for_repetition"),
        ]);

        let live = tree.live_ids();
        assert_eq!(live, vec!["a".to_string(), "d".to_string()]);
    }

    #[test]
    fn test_find_live_stage_by_element() {
        let mut terminated = item("s1", None, true, "terminated");
        terminated.element_id = "planItemStage".to_string();
        let mut active = item("s2", None, true, "active");
        active.element_id = "planItemStage".to_string();

        let tree = PlanItemTree::from_records(vec![terminated, active]);
        let found = tree.find_live_stage_by_element("planItemStage").unwrap();
        assert_eq!(found.id, "s2");
    }

    #[test]
    fn test_into_records_preserves_order() {
        let tree = PlanItemTree::from_records(vec![
            item("a", None, false, "active"),
            item("b", None, false, "active"),
        ]);
        let records = tree.into_records();
        assert_eq!(records[0].id, "a");
        assert_eq!(records[1].id, "b");
    }
}
