//! Built-in transformations executed by the local backend.
//!
//! Each handler mutates a [`GridContent`] in place from one [`ActionSpec`]:
//! 1. Resolve the targeted column (column and cell scope)
//! 2. Resolve the targeted rows (`row_id` for cell/line scope, `filter` otherwise)
//! 3. Rewrite the matching values or lines

pub mod column;
pub mod filter;
pub mod line;
pub mod replace;
pub mod text;

use crate::core::types::{
    ActionSpec, ColumnMetadata, ColumnPatch, DatasetParameters, GridContent, GridRecord,
};
use crate::error::BackendError;
use indexmap::IndexMap;

/// Action names the local backend can execute.
pub const SUPPORTED_ACTIONS: [&str; 8] = [
    "uppercase",
    "lowercase",
    "trim",
    "replace_on_value",
    "fillemptywithdefault",
    "delete_lines",
    "rename_column",
    "delete_column",
];

/// Encodings the dataset parser accepts.
pub const SUPPORTED_ENCODINGS: [&str; 5] =
    ["UTF-8", "UTF-16", "ISO-8859-1", "US-ASCII", "windows-1252"];

/// Grid column id for a position.
pub fn column_id(index: usize) -> String {
    format!("{:04}", index)
}

/// Parse raw CSV with the dataset parameters. The first line is the header.
pub fn parse_dataset(
    raw: &str,
    parameters: &DatasetParameters,
    overrides: &IndexMap<String, ColumnPatch>,
) -> Result<GridContent, BackendError> {
    let delimiter = separator_byte(&parameters.separator)?;
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(false)
        .flexible(true)
        .from_reader(raw.as_bytes());

    let mut rows = reader.records();
    let header = match rows.next() {
        Some(r) => r.map_err(|e| BackendError::Parse(e.to_string()))?,
        None => return Ok(GridContent::default()),
    };

    let mut columns: Vec<ColumnMetadata> = header
        .iter()
        .enumerate()
        .map(|(i, name)| ColumnMetadata {
            id: column_id(i),
            name: name.trim().to_string(),
            column_type: "string".to_string(),
            domain: String::new(),
        })
        .collect();
    for column in &mut columns {
        if let Some(patch) = overrides.get(&column.id) {
            apply_patch(column, patch);
        }
    }

    let mut records = Vec::new();
    for (tdp_id, row) in rows.enumerate() {
        let row = row.map_err(|e| BackendError::Parse(e.to_string()))?;
        let values = columns
            .iter()
            .enumerate()
            .map(|(i, c)| (c.id.clone(), row.get(i).unwrap_or("").to_string()))
            .collect();
        records.push(GridRecord {
            tdp_id: tdp_id as u64,
            values,
        });
    }

    Ok(GridContent { columns, records })
}

fn separator_byte(separator: &str) -> Result<u8, BackendError> {
    let sep = match separator {
        "\\t" | "tab" => "\t",
        other => other,
    };
    match sep.as_bytes() {
        [b] => Ok(*b),
        _ => Err(BackendError::Rejected(format!(
            "separator must be a single byte, got '{}'",
            separator
        ))),
    }
}

/// Validate parsing parameters before they are stored.
pub fn validate_parameters(parameters: &DatasetParameters) -> Result<(), BackendError> {
    separator_byte(&parameters.separator)?;
    if !SUPPORTED_ENCODINGS
        .iter()
        .any(|e| e.eq_ignore_ascii_case(&parameters.encoding))
    {
        return Err(BackendError::Rejected(format!(
            "unsupported encoding '{}'",
            parameters.encoding
        )));
    }
    Ok(())
}

/// Apply a column metadata patch.
pub fn apply_patch(column: &mut ColumnMetadata, patch: &ColumnPatch) {
    if let Some(ref t) = patch.column_type {
        column.column_type = t.clone();
    }
    if let Some(ref d) = patch.domain {
        column.domain = d.clone();
    }
}

/// Execute one action against the content.
pub fn apply_action(content: &mut GridContent, spec: &ActionSpec) -> Result<(), BackendError> {
    match spec.action.as_str() {
        "uppercase" => text::apply(content, spec, text::Case::Upper),
        "lowercase" => text::apply(content, spec, text::Case::Lower),
        "trim" => text::apply(content, spec, text::Case::Trim),
        "replace_on_value" => replace::replace_on_value(content, spec),
        "fillemptywithdefault" => replace::fill_empty(content, spec),
        "delete_lines" => line::delete_lines(content, spec),
        "rename_column" => column::rename(content, spec),
        "delete_column" => column::delete(content, spec),
        other => Err(BackendError::UnknownAction(other.to_string())),
    }
}

/// Column id an action targets; it must exist in the content.
pub(crate) fn target_column(content: &GridContent, spec: &ActionSpec) -> Result<String, BackendError> {
    let id = spec
        .param_str("column_id")
        .ok_or_else(|| BackendError::invalid(&spec.action, "missing column_id"))?;
    if content.column(id).is_none() {
        return Err(BackendError::invalid(
            &spec.action,
            format!("unknown column '{}'", id),
        ));
    }
    Ok(id.to_string())
}

fn row_id(spec: &ActionSpec) -> Option<u64> {
    spec.parameters.get("row_id").and_then(|v| v.as_u64())
}

/// Rewrite every targeted cell of the action's column with `f`.
///
/// Cell scope targets `row_id` only; other scopes target every row matching
/// the optional filter.
pub(crate) fn rewrite_cells<F>(
    content: &mut GridContent,
    spec: &ActionSpec,
    mut f: F,
) -> Result<usize, BackendError>
where
    F: FnMut(&str) -> Option<String>,
{
    let column = target_column(content, spec)?;
    let filter = filter::from_spec(spec)?;
    let only_row = match spec.param_str("scope") {
        Some("cell") => Some(
            row_id(spec).ok_or_else(|| BackendError::invalid(&spec.action, "cell scope needs row_id"))?,
        ),
        _ => None,
    };

    let mut changed = 0;
    for record in &mut content.records {
        if only_row.is_some_and(|id| id != record.tdp_id) {
            continue;
        }
        if let Some(ref tree) = filter {
            if !filter::matches(tree, record) {
                continue;
            }
        }
        if let Some(value) = record.values.get_mut(&column) {
            if let Some(new) = f(value) {
                *value = new;
                changed += 1;
            }
        }
    }
    Ok(changed)
}

#[cfg(test)]
pub(crate) fn sample_content() -> GridContent {
    parse_dataset(
        "id,firstname,city\n1,Ronald,Paris\n2,john,  Lyon \n3,Ronald,\n",
        &DatasetParameters::default(),
        &IndexMap::new(),
    )
    .unwrap()
}
