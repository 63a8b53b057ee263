//! PF-024: Filter tree evaluation over grid records.

use crate::core::action::FilterTree;
use crate::core::types::{ActionSpec, GridRecord};
use crate::error::BackendError;

/// Whether `record` satisfies `tree`.
pub fn matches(tree: &FilterTree, record: &GridRecord) -> bool {
    match tree {
        FilterTree::Eq(c) => record.get(&c.field) == Some(c.value.as_str()),
        FilterTree::Contains(c) => record
            .get(&c.field)
            .is_some_and(|v| v.contains(c.value.as_str())),
        FilterTree::Exists(c) => record.get(&c.field).is_some_and(|v| !v.is_empty()),
        FilterTree::And(items) => items.iter().all(|t| matches(t, record)),
        FilterTree::Or(items) => items.iter().any(|t| matches(t, record)),
        FilterTree::Not(inner) => !matches(inner, record),
    }
}

/// Decode the optional `filter` parameter of an action.
pub fn from_spec(spec: &ActionSpec) -> Result<Option<FilterTree>, BackendError> {
    match spec.parameters.get("filter") {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(value) => serde_json::from_value(value.clone())
            .map(Some)
            .map_err(|e| BackendError::invalid(&spec.action, format!("bad filter: {}", e))),
    }
}
