//! Error types shared by the gateways and the orchestrator.

use crate::core::action::Scope;
use crate::core::session::SessionState;
use crate::core::types::{DatasetId, PreparationId};

/// Failure reported by a preparation or dataset backend.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BackendError {
    #[error("{kind} '{id}' not found")]
    NotFound { kind: &'static str, id: String },

    #[error("backend rejected the request: {0}")]
    Rejected(String),

    #[error("unknown action '{0}'")]
    UnknownAction(String),

    #[error("invalid parameters for '{action}': {reason}")]
    InvalidParameters { action: String, reason: String },

    #[error("storage error: {0}")]
    Storage(String),

    #[error("parse error: {0}")]
    Parse(String),
}

impl BackendError {
    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    pub fn invalid(action: &str, reason: impl Into<String>) -> Self {
        Self::InvalidParameters {
            action: action.to_string(),
            reason: reason.into(),
        }
    }
}

/// Failure building actions from a grid selection.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ActionError {
    #[error("{0} scope needs a selection")]
    MissingSelection(Scope),

    #[error("column '{0}' has no value in this row")]
    MissingCell(String),
}

/// Failure of a playground operation.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PlaygroundError {
    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Action(#[from] ActionError),

    #[error("no dataset loaded")]
    NoDataset,

    #[error("no preparation loaded")]
    NoPreparation,

    #[error("preparation '{0}' is not the one loaded")]
    ForeignPreparation(PreparationId),

    #[error("dataset '{0}' has no records")]
    EmptyDataset(DatasetId),

    #[error("append needs at least one action")]
    EmptyActions,

    #[error("session is {0}, expected loaded")]
    Busy(SessionState),

    #[error("unknown column '{0}'")]
    UnknownColumn(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pf007_backend_error_display() {
        let e = BackendError::not_found("step", "blake3:dead");
        assert_eq!(e.to_string(), "step 'blake3:dead' not found");
    }

    #[test]
    fn test_pf007_playground_error_from_backend() {
        let e: PlaygroundError = BackendError::Rejected("boom".to_string()).into();
        assert_eq!(e.to_string(), "backend rejected the request: boom");
    }

    #[test]
    fn test_pf007_missing_selection_display() {
        let e = ActionError::MissingSelection(Scope::Line);
        assert_eq!(e.to_string(), "line scope needs a selection");
    }
}
