//! PF-021: Case and whitespace transformations.

use super::rewrite_cells;
use crate::core::types::{ActionSpec, GridContent};
use crate::error::BackendError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Case {
    Upper,
    Lower,
    Trim,
}

pub fn apply(content: &mut GridContent, spec: &ActionSpec, case: Case) -> Result<(), BackendError> {
    let changed = rewrite_cells(content, spec, |value| {
        let new = match case {
            Case::Upper => value.to_uppercase(),
            Case::Lower => value.to_lowercase(),
            Case::Trim => value.trim().to_string(),
        };
        (new != value).then_some(new)
    })?;
    log::debug!("{}: {} cell(s) changed", spec.action, changed);
    Ok(())
}
