//! PF-012: Local backend store holding the step DAG.
//!
//! Persisted as `store.yaml` inside a state directory (atomic temp + rename).
//! The step map only grows, so any head ever produced stays addressable.

use crate::core::types::{
    ActionSpec, ColumnPatch, DatasetId, DatasetParameters, FolderId, PreparationId, StepId,
};
use crate::error::BackendError;
use crate::tripwire::hasher;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// A dataset held by the local backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredDataset {
    pub name: String,

    /// Raw CSV text, header line first
    pub raw: String,

    #[serde(default)]
    pub parameters: DatasetParameters,

    /// Column metadata changes keyed by column id
    #[serde(default)]
    pub columns: IndexMap<String, ColumnPatch>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredPreparation {
    pub name: String,
    pub dataset_id: DatasetId,
    pub folder_id: FolderId,
    pub head: StepId,
}

/// One node of the step DAG. The root has neither parent nor action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredStep {
    #[serde(default)]
    pub parent: Option<StepId>,

    #[serde(default)]
    pub action: Option<ActionSpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Store {
    pub schema: String,

    pub generator: String,

    #[serde(default)]
    pub next_preparation: u64,

    #[serde(default)]
    pub datasets: IndexMap<DatasetId, StoredDataset>,

    #[serde(default)]
    pub preparations: IndexMap<PreparationId, StoredPreparation>,

    #[serde(default)]
    pub steps: IndexMap<StepId, StoredStep>,
}

impl Default for Store {
    fn default() -> Self {
        new_store()
    }
}

/// Create an empty store holding only the root step.
pub fn new_store() -> Store {
    let mut steps = IndexMap::new();
    steps.insert(
        hasher::root_step_id(),
        StoredStep {
            parent: None,
            action: None,
        },
    );
    Store {
        schema: "1.0".to_string(),
        generator: format!("prepflow {}", env!("CARGO_PKG_VERSION")),
        next_preparation: 1,
        datasets: IndexMap::new(),
        preparations: IndexMap::new(),
        steps,
    }
}

impl Store {
    pub fn preparation(&self, id: &PreparationId) -> Result<&StoredPreparation, BackendError> {
        self.preparations
            .get(id)
            .ok_or_else(|| BackendError::not_found("preparation", id))
    }

    pub fn preparation_mut(
        &mut self,
        id: &PreparationId,
    ) -> Result<&mut StoredPreparation, BackendError> {
        self.preparations
            .get_mut(id)
            .ok_or_else(|| BackendError::not_found("preparation", id))
    }

    pub fn dataset(&self, id: &DatasetId) -> Result<&StoredDataset, BackendError> {
        self.datasets
            .get(id)
            .ok_or_else(|| BackendError::not_found("dataset", id))
    }

    pub fn dataset_mut(&mut self, id: &DatasetId) -> Result<&mut StoredDataset, BackendError> {
        self.datasets
            .get_mut(id)
            .ok_or_else(|| BackendError::not_found("dataset", id))
    }

    /// Steps from the root (exclusive) to `head` (inclusive), in order.
    pub fn chain(&self, head: &StepId) -> Result<Vec<(StepId, ActionSpec)>, BackendError> {
        let mut chain = Vec::new();
        let mut current = head.clone();
        loop {
            let node = self
                .steps
                .get(&current)
                .ok_or_else(|| BackendError::not_found("step", &current))?;
            match (&node.parent, &node.action) {
                (Some(parent), Some(action)) => {
                    chain.push((current.clone(), action.clone()));
                    current = parent.clone();
                }
                _ => break,
            }
            if chain.len() > self.steps.len() {
                return Err(BackendError::Storage("step chain has a cycle".to_string()));
            }
        }
        chain.reverse();
        Ok(chain)
    }

    /// Insert the chain for `actions` starting at the root; returns its head.
    pub fn rebuild(&mut self, actions: &[ActionSpec]) -> StepId {
        let mut parent = hasher::root_step_id();
        for action in actions {
            let id = hasher::step_id(&parent, action);
            self.steps.entry(id.clone()).or_insert_with(|| StoredStep {
                parent: Some(parent.clone()),
                action: Some(action.clone()),
            });
            parent = id;
        }
        parent
    }

    /// Actions of a preparation's current chain.
    pub fn actions(&self, id: &PreparationId) -> Result<Vec<ActionSpec>, BackendError> {
        let head = &self.preparation(id)?.head;
        Ok(self.chain(head)?.into_iter().map(|(_, a)| a).collect())
    }
}

/// Derive the store file path within the state directory.
pub fn store_file_path(state_dir: &Path) -> PathBuf {
    state_dir.join("store.yaml")
}

/// Load the store. Returns None if the file doesn't exist.
pub fn load_store(state_dir: &Path) -> Result<Option<Store>, String> {
    let path = store_file_path(state_dir);
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(&path)
        .map_err(|e| format!("cannot read {}: {}", path.display(), e))?;
    let store: Store = serde_yaml_ng::from_str(&content)
        .map_err(|e| format!("invalid store file {}: {}", path.display(), e))?;
    Ok(Some(store))
}

/// Save the store atomically (write to temp, then rename).
pub fn save_store(state_dir: &Path, store: &Store) -> Result<(), String> {
    std::fs::create_dir_all(state_dir)
        .map_err(|e| format!("cannot create dir {}: {}", state_dir.display(), e))?;
    let path = store_file_path(state_dir);

    let yaml = serde_yaml_ng::to_string(store).map_err(|e| format!("serialize error: {}", e))?;

    let tmp_path = path.with_extension("yaml.tmp");
    std::fs::write(&tmp_path, &yaml)
        .map_err(|e| format!("cannot write {}: {}", tmp_path.display(), e))?;
    std::fs::rename(&tmp_path, &path).map_err(|e| {
        format!(
            "cannot rename {} -> {}: {}",
            tmp_path.display(),
            path.display(),
            e
        )
    })?;

    Ok(())
}
