//! PF-003: Typed actions, scope completion and cell edits.
//!
//! An [`Action`] carries exactly the fields its scope needs and flattens to the
//! wire [`ActionSpec`] the backend understands:
//! - column scope: `scope`, `column_id`, `column_name`, optional `row_id`
//! - line scope: `scope`, `row_id`
//! - cell scope: `scope`, `row_id`, `column_id`, `column_name`
//!
//! Every scope may carry a `filter` tree merged from the grid's active filters.

use super::types::{ActionSpec, ColumnRef, GridRecord, Parameters};
use crate::error::{ActionError, PlaygroundError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Parameters the user cannot edit but that must survive an update.
pub const IMPLICIT_PARAMETERS: [&str; 5] = ["scope", "column_id", "column_name", "row_id", "filter"];

/// Target granularity of an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    Column,
    Line,
    Cell,
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Column => write!(f, "column"),
            Scope::Line => write!(f, "line"),
            Scope::Cell => write!(f, "cell"),
        }
    }
}

// ============================================================================
// Filter trees
// ============================================================================

/// Leaf condition on one column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldCondition {
    pub field: String,

    #[serde(default)]
    pub value: String,
}

/// Filter tree merged into action parameters when applying on filters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterTree {
    Eq(FieldCondition),
    Contains(FieldCondition),
    Exists(FieldCondition),
    And(Vec<FilterTree>),
    Or(Vec<FilterTree>),
    Not(Box<FilterTree>),
}

impl FilterTree {
    /// Conjunction of `self` and `other`, flattening nested `and`.
    pub fn and(self, other: FilterTree) -> FilterTree {
        match (self, other) {
            (FilterTree::And(mut a), FilterTree::And(b)) => {
                a.extend(b);
                FilterTree::And(a)
            }
            (FilterTree::And(mut a), other) => {
                a.push(other);
                FilterTree::And(a)
            }
            (this, other) => FilterTree::And(vec![this, other]),
        }
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    pub fn from_value(value: &Value) -> Option<FilterTree> {
        serde_json::from_value(value.clone()).ok()
    }
}

// ============================================================================
// Actions
// ============================================================================

/// Transformation on a whole column (optionally remembering the selected line).
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnAction {
    pub name: String,
    pub column: ColumnRef,
    pub row_id: Option<u64>,
    pub parameters: Parameters,
    pub filter: Option<FilterTree>,
}

/// Transformation on one line.
#[derive(Debug, Clone, PartialEq)]
pub struct LineAction {
    pub name: String,
    pub row_id: u64,
    pub parameters: Parameters,
    pub filter: Option<FilterTree>,
}

/// Transformation on one cell.
#[derive(Debug, Clone, PartialEq)]
pub struct CellAction {
    pub name: String,
    pub row_id: u64,
    pub column: ColumnRef,
    pub parameters: Parameters,
    pub filter: Option<FilterTree>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Column(ColumnAction),
    Line(LineAction),
    Cell(CellAction),
}

impl Action {
    pub fn column(name: impl Into<String>, column: ColumnRef, row_id: Option<u64>) -> Self {
        Action::Column(ColumnAction {
            name: name.into(),
            column,
            row_id,
            parameters: Parameters::new(),
            filter: None,
        })
    }

    pub fn line(name: impl Into<String>, row_id: u64) -> Self {
        Action::Line(LineAction {
            name: name.into(),
            row_id,
            parameters: Parameters::new(),
            filter: None,
        })
    }

    pub fn cell(name: impl Into<String>, row_id: u64, column: ColumnRef) -> Self {
        Action::Cell(CellAction {
            name: name.into(),
            row_id,
            column,
            parameters: Parameters::new(),
            filter: None,
        })
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters_mut().insert(key.into(), value.into());
        self
    }

    pub fn with_parameters(mut self, parameters: &Parameters) -> Self {
        for (k, v) in parameters {
            self.parameters_mut().insert(k.clone(), v.clone());
        }
        self
    }

    /// Restrict the action to `filter`, narrowing any filter already set.
    pub fn with_filter(mut self, filter: FilterTree) -> Self {
        let slot = match &mut self {
            Action::Column(a) => &mut a.filter,
            Action::Line(a) => &mut a.filter,
            Action::Cell(a) => &mut a.filter,
        };
        *slot = Some(match slot.take() {
            Some(existing) => existing.and(filter),
            None => filter,
        });
        self
    }

    pub fn name(&self) -> &str {
        match self {
            Action::Column(a) => &a.name,
            Action::Line(a) => &a.name,
            Action::Cell(a) => &a.name,
        }
    }

    pub fn scope(&self) -> Scope {
        match self {
            Action::Column(_) => Scope::Column,
            Action::Line(_) => Scope::Line,
            Action::Cell(_) => Scope::Cell,
        }
    }

    /// Column to focus once the action is applied.
    pub fn column_id(&self) -> Option<&str> {
        match self {
            Action::Column(a) => Some(&a.column.id),
            Action::Cell(a) => Some(&a.column.id),
            Action::Line(_) => None,
        }
    }

    fn parameters_mut(&mut self) -> &mut Parameters {
        match self {
            Action::Column(a) => &mut a.parameters,
            Action::Line(a) => &mut a.parameters,
            Action::Cell(a) => &mut a.parameters,
        }
    }

    /// Flatten into the wire form.
    pub fn to_spec(&self) -> ActionSpec {
        let mut params = Parameters::new();
        let (name, extra, filter) = match self {
            Action::Column(a) => {
                params.insert("column_id".into(), Value::from(a.column.id.clone()));
                params.insert("column_name".into(), Value::from(a.column.name.clone()));
                if let Some(row) = a.row_id {
                    params.insert("row_id".into(), Value::from(row));
                }
                (&a.name, &a.parameters, &a.filter)
            }
            Action::Line(a) => {
                params.insert("row_id".into(), Value::from(a.row_id));
                (&a.name, &a.parameters, &a.filter)
            }
            Action::Cell(a) => {
                params.insert("row_id".into(), Value::from(a.row_id));
                params.insert("column_id".into(), Value::from(a.column.id.clone()));
                params.insert("column_name".into(), Value::from(a.column.name.clone()));
                (&a.name, &a.parameters, &a.filter)
            }
        };
        for (k, v) in extra {
            params.insert(k.clone(), v.clone());
        }
        params.insert("scope".into(), Value::from(self.scope().to_string()));
        if let Some(f) = filter {
            params.insert("filter".into(), f.to_value());
        }
        ActionSpec::new(name.clone(), params)
    }
}

// ============================================================================
// Selection and scope completion
// ============================================================================

/// The grid selection an applier completes parameters from.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Selection {
    pub columns: Vec<ColumnRef>,
    pub line: Option<u64>,
    /// Restrict the transformation to the rows matching `filter`
    pub apply_on_filters: bool,
    pub filter: Option<FilterTree>,
}

impl Selection {
    pub fn column(column: ColumnRef) -> Self {
        Self {
            columns: vec![column],
            ..Self::default()
        }
    }

    pub fn line(row_id: u64) -> Self {
        Self {
            line: Some(row_id),
            ..Self::default()
        }
    }

    fn active_filter(&self) -> Option<&FilterTree> {
        if self.apply_on_filters {
            self.filter.as_ref()
        } else {
            None
        }
    }
}

/// Build one action per selected target for a transformation and scope.
pub fn complete_params(
    transformation: &str,
    scope: Scope,
    selection: &Selection,
    params: &Parameters,
) -> Result<Vec<Action>, ActionError> {
    let actions = match scope {
        Scope::Column => {
            if selection.columns.is_empty() {
                return Err(ActionError::MissingSelection(scope));
            }
            selection
                .columns
                .iter()
                .map(|c| Action::column(transformation, c.clone(), selection.line))
                .collect::<Vec<_>>()
        }
        Scope::Line => {
            let row = selection.line.ok_or(ActionError::MissingSelection(scope))?;
            vec![Action::line(transformation, row)]
        }
        Scope::Cell => {
            let row = selection.line.ok_or(ActionError::MissingSelection(scope))?;
            let column = selection
                .columns
                .first()
                .ok_or(ActionError::MissingSelection(scope))?;
            vec![Action::cell(transformation, row, column.clone())]
        }
    };

    Ok(actions
        .into_iter()
        .map(|action| {
            let action = action.with_parameters(params);
            match selection.active_filter() {
                Some(filter) => action.with_filter(filter.clone()),
                None => action,
            }
        })
        .collect())
}

/// Reusable applier bound to a transformation and a scope.
#[derive(Debug, Clone)]
pub struct StepApplier {
    pub transformation: String,
    pub scope: Scope,
    pub selection: Selection,
}

impl StepApplier {
    pub fn new(transformation: impl Into<String>, scope: Scope, selection: Selection) -> Self {
        Self {
            transformation: transformation.into(),
            scope,
            selection,
        }
    }

    pub fn actions(&self, params: &Parameters) -> Result<Vec<Action>, ActionError> {
        complete_params(&self.transformation, self.scope, &self.selection, params)
    }

    /// Complete `params` against the bound selection and append the result.
    pub async fn apply(
        &self,
        playground: &super::playground::Playground,
        params: &Parameters,
    ) -> Result<super::playground::AppendOutcome, PlaygroundError> {
        let actions = self.actions(params)?;
        playground.append_step(actions).await
    }
}

// ============================================================================
// Cell edits
// ============================================================================

/// Build the `replace_on_value` action behind a grid cell edit.
///
/// With `update_all` the replacement targets every cell of the column holding
/// the same value, otherwise only the edited cell.
pub fn edit_cell_action(
    row: &GridRecord,
    column: &ColumnRef,
    new_value: &str,
    update_all: bool,
    selection: &Selection,
) -> Result<Action, ActionError> {
    let token = row
        .get(&column.id)
        .ok_or_else(|| ActionError::MissingCell(column.id.clone()))?;
    let cell_value = serde_json::json!({ "token": token, "operator": "equals" });

    let action = if update_all {
        Action::column("replace_on_value", column.clone(), Some(row.tdp_id))
    } else {
        Action::cell("replace_on_value", row.tdp_id, column.clone())
    };
    let mut action = action
        .with_parameter("cell_value", cell_value)
        .with_parameter("replace_value", new_value);
    if let Some(filter) = selection.active_filter() {
        action = action.with_filter(filter.clone());
    }
    Ok(action)
}

// ============================================================================
// Update helpers
// ============================================================================

/// Carry the implicit parameters of `original` into `new`.
pub fn copy_implicit_parameters(original: &Parameters, new: &mut Parameters) {
    for key in IMPLICIT_PARAMETERS {
        if let Some(v) = original.get(key) {
            new.insert(key.to_string(), v.clone());
        }
    }
}

/// True when the parameter maps differ (key order is ignored).
pub fn parameters_changed(original: &Parameters, new: &Parameters) -> bool {
    original != new
}
