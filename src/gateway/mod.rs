//! PF-010: Collaborator interfaces for the backends and the view.
//!
//! The orchestrator only talks to these traits. [`local::LocalGateway`]
//! implements both backends in-process.

pub mod local;
pub mod store;

use crate::core::types::{
    ActionSpec, ColumnPatch, DatasetId, DatasetMetadata, DatasetParameters, FolderId, GridContent,
    Preparation, PreparationDetails, PreparationId, SampleType, StepId, Version,
};
pub use crate::error::BackendError;
use crate::error::PlaygroundError;
use async_trait::async_trait;

/// Preparation CRUD, step mutations and content retrieval.
#[async_trait]
pub trait PreparationGateway: Send + Sync {
    async fn create(
        &self,
        dataset_id: &DatasetId,
        name: &str,
        folder_id: &FolderId,
    ) -> Result<PreparationId, BackendError>;

    /// Authoritative step chain.
    async fn get_details(&self, id: &PreparationId) -> Result<PreparationDetails, BackendError>;

    async fn set_name(&self, id: &PreparationId, name: &str) -> Result<Preparation, BackendError>;

    async fn move_preparation(
        &self,
        id: &PreparationId,
        from: &FolderId,
        to: &FolderId,
        name: &str,
    ) -> Result<(), BackendError>;

    async fn delete(&self, id: &PreparationId) -> Result<(), BackendError>;

    /// Append one step per action on top of the current head.
    async fn append_steps(
        &self,
        id: &PreparationId,
        actions: &[ActionSpec],
    ) -> Result<(), BackendError>;

    async fn update_step(
        &self,
        id: &PreparationId,
        step: &StepId,
        action: &ActionSpec,
    ) -> Result<(), BackendError>;

    /// Reorder `step` to directly follow `parent`.
    async fn move_step(
        &self,
        id: &PreparationId,
        step: &StepId,
        parent: &StepId,
    ) -> Result<(), BackendError>;

    async fn remove_step(&self, id: &PreparationId, step: &StepId) -> Result<(), BackendError>;

    async fn copy_steps(
        &self,
        id: &PreparationId,
        from: &PreparationId,
    ) -> Result<(), BackendError>;

    async fn set_head(&self, id: &PreparationId, step: &StepId) -> Result<(), BackendError>;

    async fn get_content(
        &self,
        id: &PreparationId,
        version: &Version,
        sample: SampleType,
    ) -> Result<GridContent, BackendError>;

    async fn list_preparations(&self) -> Result<Vec<Preparation>, BackendError>;

    /// Content at `current` as it would be if `step` ran `action`. Nothing is
    /// committed.
    async fn preview_update(
        &self,
        id: &PreparationId,
        current: &StepId,
        step: &StepId,
        action: &ActionSpec,
        sample: SampleType,
    ) -> Result<GridContent, BackendError>;
}

/// Dataset metadata, content and parsing parameters.
#[async_trait]
pub trait DatasetGateway: Send + Sync {
    async fn get_metadata(&self, id: &DatasetId) -> Result<DatasetMetadata, BackendError>;

    async fn get_content(
        &self,
        id: &DatasetId,
        sample: SampleType,
    ) -> Result<GridContent, BackendError>;

    async fn update_parameters(
        &self,
        id: &DatasetId,
        parameters: &DatasetParameters,
    ) -> Result<(), BackendError>;

    async fn update_column(
        &self,
        id: &DatasetId,
        column_id: &str,
        patch: &ColumnPatch,
    ) -> Result<(), BackendError>;
}

/// Onboarding signals raised by step counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tour {
    /// First step of a preparation
    Playground,
    /// Third step of a preparation
    Recipe,
}

/// Renderer sink for grid and recipe updates.
pub trait PlaygroundView: Send + Sync {
    fn loading_start(&self) {}
    fn loading_stop(&self) {}
    fn show_grid(&self, _content: &GridContent, _focus: Option<&str>) {}
    fn show_preview(&self, _content: &GridContent) {}
    fn show_recipe(&self) {}
    fn hide_recipe(&self) {}
    fn tour(&self, _tour: Tour) {}
    fn load_failed(&self, _error: &PlaygroundError) {}
    fn closed(&self) {}
}

/// View that ignores every signal.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullView;

impl PlaygroundView for NullView {}

/// Test view recording every signal it receives.
#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct RecordingView {
    events: std::sync::Mutex<Vec<String>>,
    depth: std::sync::atomic::AtomicI64,
}

#[cfg(test)]
impl RecordingView {
    fn push(&self, event: String) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }

    pub(crate) fn events(&self) -> Vec<String> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub(crate) fn count(&self, prefix: &str) -> usize {
        self.events().iter().filter(|e| e.starts_with(prefix)).count()
    }

    pub(crate) fn loading_depth(&self) -> i64 {
        self.depth.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[cfg(test)]
impl PlaygroundView for RecordingView {
    fn loading_start(&self) {
        self.depth.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        self.push("loading_start".to_string());
    }

    fn loading_stop(&self) {
        self.depth.fetch_sub(1, std::sync::atomic::Ordering::SeqCst);
        self.push("loading_stop".to_string());
    }

    fn show_grid(&self, content: &GridContent, focus: Option<&str>) {
        self.push(format!(
            "show_grid:{}:{}",
            content.records.len(),
            focus.unwrap_or("-")
        ));
    }

    fn show_preview(&self, content: &GridContent) {
        self.push(format!("show_preview:{}", content.records.len()));
    }

    fn show_recipe(&self) {
        self.push("show_recipe".to_string());
    }

    fn hide_recipe(&self) {
        self.push("hide_recipe".to_string());
    }

    fn tour(&self, tour: Tour) {
        self.push(format!("tour:{:?}", tour));
    }

    fn load_failed(&self, error: &PlaygroundError) {
        self.push(format!("load_failed:{}", error));
    }

    fn closed(&self) {
        self.push("closed".to_string());
    }
}
