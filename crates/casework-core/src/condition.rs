// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Condition evaluation seam for if-part sentries.
//!
//! Full expression evaluation belongs to the surrounding engine; migration
//! only needs a yes/no answer for each if-part when re-evaluating sentries.
//! Embedders plug in their expression engine through [`ConditionEvaluator`].

use std::collections::HashMap;

use serde_json::Value;

use crate::error::Result;

/// Evaluates an if-part condition against the case instance's variables.
pub trait ConditionEvaluator: Send + Sync {
    /// Evaluate `condition` to a boolean. Variables are the case instance's
    /// current scope, including any overrides applied by the migration.
    fn evaluate(&self, condition: &str, variables: &HashMap<String, Value>) -> Result<bool>;
}

/// Default evaluator: resolves `${name}` (or a bare variable name) against the
/// case variables and treats `true`/`false` as literals.
///
/// Truthiness: booleans as-is, numbers when non-zero, strings when non-empty
/// and not `"false"`, null/missing as false, arrays/objects as true.
#[derive(Debug, Default, Clone)]
pub struct VariableConditionEvaluator;

impl VariableConditionEvaluator {
    fn truthy(value: &Value) -> bool {
        match value {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
            Value::String(s) => !s.is_empty() && s != "false",
            Value::Array(_) | Value::Object(_) => true,
        }
    }
}

impl ConditionEvaluator for VariableConditionEvaluator {
    fn evaluate(&self, condition: &str, variables: &HashMap<String, Value>) -> Result<bool> {
        let condition = condition.trim();
        match condition {
            "" | "true" => return Ok(true),
            "false" => return Ok(false),
            _ => {}
        }

        let name = condition
            .strip_prefix("${")
            .and_then(|rest| rest.strip_suffix('}'))
            .unwrap_or(condition)
            .trim();

        Ok(variables.get(name).map(Self::truthy).unwrap_or(false))
    }
}
