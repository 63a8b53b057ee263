//! PF-022: Value replacement: `replace_on_value` and `fillemptywithdefault`.

use super::rewrite_cells;
use crate::core::types::{ActionSpec, GridContent};
use crate::error::BackendError;
use regex::Regex;

/// How `cell_value.token` is matched against a cell.
#[derive(Debug, Clone)]
enum Matcher {
    Equals(String),
    Contains(String),
    StartsWith(String),
    EndsWith(String),
    Regex(Regex),
}

impl Matcher {
    fn from_spec(spec: &ActionSpec) -> Result<Self, BackendError> {
        let cell_value = spec
            .parameters
            .get("cell_value")
            .ok_or_else(|| BackendError::invalid(&spec.action, "missing cell_value"))?;
        let token = cell_value
            .get("token")
            .and_then(|t| t.as_str())
            .unwrap_or("")
            .to_string();
        let operator = cell_value
            .get("operator")
            .and_then(|o| o.as_str())
            .unwrap_or("equals");
        match operator {
            "equals" => Ok(Matcher::Equals(token)),
            "contains" => Ok(Matcher::Contains(token)),
            "starts_with" => Ok(Matcher::StartsWith(token)),
            "ends_with" => Ok(Matcher::EndsWith(token)),
            "regex" => Regex::new(&token)
                .map(Matcher::Regex)
                .map_err(|e| BackendError::invalid(&spec.action, format!("bad regex: {}", e))),
            other => Err(BackendError::invalid(
                &spec.action,
                format!("unknown operator '{}'", other),
            )),
        }
    }

    /// Replacement for `value`, or None when it does not match.
    fn replace(&self, value: &str, with: &str) -> Option<String> {
        match self {
            Matcher::Equals(t) => (value == t).then(|| with.to_string()),
            Matcher::Contains(t) => {
                (!t.is_empty() && value.contains(t.as_str())).then(|| value.replace(t.as_str(), with))
            }
            Matcher::StartsWith(t) => value
                .strip_prefix(t.as_str())
                .map(|rest| format!("{}{}", with, rest)),
            Matcher::EndsWith(t) => value
                .strip_suffix(t.as_str())
                .map(|rest| format!("{}{}", rest, with)),
            Matcher::Regex(re) => re
                .is_match(value)
                .then(|| re.replace_all(value, with).into_owned()),
        }
    }
}

pub fn replace_on_value(content: &mut GridContent, spec: &ActionSpec) -> Result<(), BackendError> {
    let matcher = Matcher::from_spec(spec)?;
    let with = spec.param_str("replace_value").unwrap_or("").to_string();
    let changed = rewrite_cells(content, spec, |value| matcher.replace(value, &with))?;
    log::debug!("replace_on_value: {} cell(s) changed", changed);
    Ok(())
}

pub fn fill_empty(content: &mut GridContent, spec: &ActionSpec) -> Result<(), BackendError> {
    let default = spec
        .param_str("default_value")
        .ok_or_else(|| BackendError::invalid(&spec.action, "missing default_value"))?
        .to_string();
    rewrite_cells(content, spec, |value| {
        value.trim().is_empty().then(|| default.clone())
    })?;
    Ok(())
}
