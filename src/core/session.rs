//! PF-005: Explicit playground session state and the loading guard.

use super::history::UndoRedoStack;
use super::recipe::RecipeModel;
use super::types::{DatasetMetadata, GridContent, Preparation, PreparationId};
use crate::error::PlaygroundError;
use crate::gateway::PlaygroundView;
use std::fmt;

/// Lifecycle of one playground session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SessionState {
    #[default]
    Unloaded,
    Loading,
    Loaded,
    Mutating,
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Unloaded => "unloaded",
            SessionState::Loading => "loading",
            SessionState::Loaded => "loaded",
            SessionState::Mutating => "mutating",
            SessionState::Closed => "closed",
        };
        write!(f, "{}", s)
    }
}

/// Everything the orchestrator knows about the current dataset/preparation.
#[derive(Debug, Clone, Default)]
pub struct PlaygroundSession {
    pub state: SessionState,
    pub dataset: Option<DatasetMetadata>,
    pub preparation: Option<Preparation>,
    /// Displayed name (preparation name, or dataset name without one)
    pub name: String,
    pub recipe: RecipeModel,
    pub history: UndoRedoStack,
    pub grid: Option<GridContent>,
}

impl PlaygroundSession {
    pub fn preparation_id(&self) -> Option<&PreparationId> {
        self.preparation.as_ref().map(|p| &p.id)
    }

    pub fn is_draft(&self) -> bool {
        self.preparation.as_ref().is_some_and(|p| p.draft)
    }

    /// Move Loaded -> Mutating, rejecting any other state.
    pub(crate) fn begin_mutation(&mut self) -> Result<(), PlaygroundError> {
        match self.state {
            SessionState::Loaded => {
                self.state = SessionState::Mutating;
                Ok(())
            }
            other => Err(PlaygroundError::Busy(other)),
        }
    }

    pub(crate) fn end_mutation(&mut self) {
        if self.state == SessionState::Mutating {
            self.state = SessionState::Loaded;
        }
    }

    /// Drop everything tied to the previous dataset/preparation.
    pub(crate) fn reset(&mut self) {
        self.dataset = None;
        self.preparation = None;
        self.name.clear();
        self.recipe.reset();
        self.history.clear();
        self.grid = None;
    }
}

/// Shows the loader on creation and hides it when dropped, on every exit path.
pub struct LoadingGuard<'a> {
    view: &'a dyn PlaygroundView,
}

impl<'a> LoadingGuard<'a> {
    pub fn start(view: &'a dyn PlaygroundView) -> Self {
        view.loading_start();
        Self { view }
    }
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        self.view.loading_stop();
    }
}
