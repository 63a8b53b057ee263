//! PF-008: Script and config parsing and validation.
//!
//! Validates structural constraints before anything touches a backend:
//! - Version must be "1.0"
//! - The start dataset (or preparation) must be declared
//! - Datasets carry exactly one source and supported parameters
//! - Appended actions exist and carry the selection their scope needs

use super::action::Scope;
use super::types::*;
use crate::transforms;
use std::path::Path;

/// Validation error.
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

fn error(errors: &mut Vec<ValidationError>, message: String) {
    errors.push(ValidationError { message });
}

/// Validate a config. Returns a list of errors (empty = valid).
pub fn validate_config(config: &PlaygroundConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    if !config.home_folder.as_str().starts_with('/') {
        error(
            &mut errors,
            format!(
                "home_folder must be an absolute folder path, got \"{}\"",
                config.home_folder
            ),
        );
    }
    if config.draft_suffix.trim().is_empty() {
        error(&mut errors, "draft_suffix must not be empty".to_string());
    }
    errors
}

/// Parse a playground script file from disk.
pub fn parse_script_file(path: &Path) -> Result<PlaygroundScript, String> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("failed to read {}: {}", path.display(), e))?;
    parse_script(&content)
}

/// Parse a playground script from a string.
pub fn parse_script(yaml: &str) -> Result<PlaygroundScript, String> {
    serde_yaml_ng::from_str(yaml).map_err(|e| format!("YAML parse error: {}", e))
}

/// Validate a parsed script. Returns a list of errors (empty = valid).
pub fn validate_script(script: &PlaygroundScript) -> Vec<ValidationError> {
    let mut errors = validate_config(&script.config);

    if script.version != "1.0" {
        error(
            &mut errors,
            format!("version must be \"1.0\", got \"{}\"", script.version),
        );
    }
    if script.name.trim().is_empty() {
        error(&mut errors, "name must not be empty".to_string());
    }

    for (id, dataset) in &script.datasets {
        validate_dataset(id, dataset, &mut errors);
    }

    match (&script.preparation, script.start_dataset()) {
        (Some(_), _) => {}
        (None, None) => error(
            &mut errors,
            "script declares no dataset and no preparation".to_string(),
        ),
        (None, Some(id)) => {
            if !script.datasets.contains_key(id) {
                error(&mut errors, format!("start dataset '{}' is not declared", id));
            }
        }
    }

    for (i, op) in script.operations.iter().enumerate() {
        validate_op(i, op, &mut errors);
    }

    errors
}

fn validate_dataset(id: &DatasetId, dataset: &ScriptDataset, errors: &mut Vec<ValidationError>) {
    match (&dataset.csv, &dataset.path) {
        (Some(_), Some(_)) => error(
            errors,
            format!("dataset '{}' has both csv and path", id),
        ),
        (None, None) => error(errors, format!("dataset '{}' has no csv or path", id)),
        _ => {}
    }
    if dataset.name.trim().is_empty() {
        error(errors, format!("dataset '{}' has no name", id));
    }
    if let Err(e) = transforms::validate_parameters(&dataset.parameters) {
        error(errors, format!("dataset '{}': {}", id, e));
    }
}

fn validate_op(index: usize, op: &ScriptOp, errors: &mut Vec<ValidationError>) {
    let at = format!("operation {} ({})", index + 1, op.kind());
    match op {
        ScriptOp::Append {
            action,
            scope,
            columns,
            row,
            ..
        } => {
            if !transforms::SUPPORTED_ACTIONS.contains(&action.as_str()) {
                error(errors, format!("{}: unknown action '{}'", at, action));
            }
            match scope {
                Scope::Column if columns.is_empty() => {
                    error(errors, format!("{}: column scope needs columns", at))
                }
                Scope::Line if row.is_none() => {
                    error(errors, format!("{}: line scope needs a row", at))
                }
                Scope::Cell if row.is_none() || columns.len() != 1 => error(
                    errors,
                    format!("{}: cell scope needs a row and exactly one column", at),
                ),
                _ => {}
            }
        }
        ScriptOp::Rename { name } | ScriptOp::Save { name, .. } => {
            if name.trim().is_empty() {
                error(errors, format!("{}: name must not be empty", at));
            }
        }
        ScriptOp::DatasetParams {
            separator,
            encoding,
        } => {
            if separator.is_none() && encoding.is_none() {
                error(errors, format!("{}: nothing to change", at));
            }
        }
        ScriptOp::ChangeColumn {
            column_type,
            domain,
            ..
        } => {
            if column_type.is_none() && domain.is_none() {
                error(errors, format!("{}: needs a type or a domain", at));
            }
        }
        ScriptOp::Move { from, to } => {
            if *from < 0 || *to < 0 {
                error(errors, format!("{}: positions must not be negative", at));
            }
        }
        _ => {}
    }
}

/// Raw CSV text of a script dataset. Paths resolve against `base_dir`.
pub fn dataset_text(dataset: &ScriptDataset, base_dir: &Path) -> Result<String, String> {
    match (&dataset.csv, &dataset.path) {
        (Some(csv), _) => Ok(csv.clone()),
        (None, Some(path)) => {
            let path = base_dir.join(path);
            std::fs::read_to_string(&path)
                .map_err(|e| format!("failed to read {}: {}", path.display(), e))
        }
        (None, None) => Err(format!("dataset '{}' has no csv or path", dataset.name)),
    }
}
