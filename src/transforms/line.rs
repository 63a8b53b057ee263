//! PF-023: Line deletion.

use super::filter;
use crate::core::types::{ActionSpec, GridContent};
use crate::error::BackendError;

/// Delete `row_id`, or every line matching `filter` when no row is given.
pub fn delete_lines(content: &mut GridContent, spec: &ActionSpec) -> Result<(), BackendError> {
    let row = spec.parameters.get("row_id").and_then(|v| v.as_u64());
    let tree = filter::from_spec(spec)?;
    let before = content.records.len();
    match (row, tree) {
        (Some(id), _) => content.records.retain(|r| r.tdp_id != id),
        (None, Some(tree)) => content.records.retain(|r| !filter::matches(&tree, r)),
        (None, None) => {
            return Err(BackendError::invalid(
                &spec.action,
                "needs row_id or filter",
            ))
        }
    }
    log::debug!("delete_lines: {} line(s) removed", before - content.records.len());
    Ok(())
}
