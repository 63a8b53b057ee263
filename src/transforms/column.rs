//! PF-025: Column metadata transformations.

use super::target_column;
use crate::core::types::{ActionSpec, GridContent};
use crate::error::BackendError;

pub fn rename(content: &mut GridContent, spec: &ActionSpec) -> Result<(), BackendError> {
    let id = target_column(content, spec)?;
    let name = spec
        .param_str("new_column_name")
        .filter(|n| !n.trim().is_empty())
        .ok_or_else(|| BackendError::invalid(&spec.action, "missing new_column_name"))?
        .to_string();
    if let Some(column) = content.column_mut(&id) {
        column.name = name;
    }
    Ok(())
}

pub fn delete(content: &mut GridContent, spec: &ActionSpec) -> Result<(), BackendError> {
    let id = target_column(content, spec)?;
    content.columns.retain(|c| c.id != id);
    for record in &mut content.records {
        record.values.shift_remove(&id);
    }
    Ok(())
}
