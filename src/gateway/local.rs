//! PF-011: In-process backend implementing both gateways over a [`Store`].
//!
//! Steps are content-addressed: every chain edit re-hashes the chain from the
//! root, so ids change whenever a step or an upstream step changes, and an
//! unchanged prefix keeps its ids.

use super::store::{self, Store, StoredDataset, StoredPreparation};
use super::{BackendError, DatasetGateway, PreparationGateway};
use crate::core::types::{
    ActionSpec, ColumnPatch, DatasetId, DatasetMetadata, DatasetParameters, FolderId, GridContent,
    Preparation, PreparationDetails, PreparationId, SampleType, StepId, Version, HEAD_SAMPLE_SIZE,
};
use crate::transforms;
use crate::tripwire::hasher;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

pub struct LocalGateway {
    store: RwLock<Store>,
    state_dir: Option<PathBuf>,
}

impl Default for LocalGateway {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl LocalGateway {
    /// Backend that never touches the filesystem.
    pub fn in_memory() -> Self {
        Self {
            store: RwLock::new(store::new_store()),
            state_dir: None,
        }
    }

    /// Backend persisted in `state_dir`, loading any existing store.
    pub fn open(state_dir: &Path) -> Result<Self, String> {
        let store = store::load_store(state_dir)?.unwrap_or_else(store::new_store);
        log::debug!(
            "opened store at {} ({} preparation(s), {} step(s))",
            state_dir.display(),
            store.preparations.len(),
            store.steps.len()
        );
        Ok(Self {
            store: RwLock::new(store),
            state_dir: Some(state_dir.to_path_buf()),
        })
    }

    /// Register (or replace) a dataset from raw CSV.
    pub async fn add_dataset(
        &self,
        id: &DatasetId,
        name: &str,
        raw: &str,
        parameters: DatasetParameters,
    ) -> Result<DatasetMetadata, BackendError> {
        transforms::validate_parameters(&parameters)?;
        let mut store = self.store.write().await;
        store.datasets.insert(
            id.clone(),
            StoredDataset {
                name: name.to_string(),
                raw: raw.to_string(),
                parameters,
                columns: Default::default(),
            },
        );
        self.persist(&store)?;
        metadata(&store, id)
    }

    fn persist(&self, store: &Store) -> Result<(), BackendError> {
        match self.state_dir {
            Some(ref dir) => store::save_store(dir, store).map_err(BackendError::Storage),
            None => Ok(()),
        }
    }

    /// Replace a preparation's chain with `actions` and move its head to the tip.
    ///
    /// The whole chain is run against the dataset first; a chain that cannot
    /// be executed leaves the store untouched.
    fn rewrite_chain(
        &self,
        store: &mut Store,
        id: &PreparationId,
        actions: &[ActionSpec],
    ) -> Result<StepId, BackendError> {
        let dataset_id = store.preparation(id)?.dataset_id.clone();
        let mut content = parse(store.dataset(&dataset_id)?)?;
        for action in actions {
            transforms::apply_action(&mut content, action)?;
        }
        let head = store.rebuild(actions);
        store.preparation_mut(id)?.head = head.clone();
        self.persist(store)?;
        Ok(head)
    }
}

fn metadata(store: &Store, id: &DatasetId) -> Result<DatasetMetadata, BackendError> {
    let dataset = store.dataset(id)?;
    let content = parse(dataset)?;
    Ok(DatasetMetadata {
        id: id.clone(),
        name: dataset.name.clone(),
        parameters: dataset.parameters.clone(),
        records: content.records.len(),
    })
}

fn parse(dataset: &StoredDataset) -> Result<GridContent, BackendError> {
    transforms::parse_dataset(&dataset.raw, &dataset.parameters, &dataset.columns)
}

fn sample(mut content: GridContent, sample: SampleType) -> GridContent {
    if sample == SampleType::Head {
        content.records.truncate(HEAD_SAMPLE_SIZE);
    }
    content
}

fn to_preparation(id: &PreparationId, stored: &StoredPreparation) -> Preparation {
    Preparation {
        id: id.clone(),
        name: stored.name.clone(),
        dataset_id: stored.dataset_id.clone(),
        folder_id: stored.folder_id.clone(),
        draft: false,
    }
}

fn position(
    chain: &[(StepId, ActionSpec)],
    step: &StepId,
) -> Result<usize, BackendError> {
    chain
        .iter()
        .position(|(id, _)| id == step)
        .ok_or_else(|| BackendError::not_found("step", step))
}

#[async_trait]
impl PreparationGateway for LocalGateway {
    async fn create(
        &self,
        dataset_id: &DatasetId,
        name: &str,
        folder_id: &FolderId,
    ) -> Result<PreparationId, BackendError> {
        let mut store = self.store.write().await;
        store.dataset(dataset_id)?;
        let id = PreparationId::new(format!("prep-{:04}", store.next_preparation));
        store.next_preparation += 1;
        store.preparations.insert(
            id.clone(),
            StoredPreparation {
                name: name.to_string(),
                dataset_id: dataset_id.clone(),
                folder_id: folder_id.clone(),
                head: hasher::root_step_id(),
            },
        );
        self.persist(&store)?;
        log::info!("created preparation {} ('{}')", id, name);
        Ok(id)
    }

    async fn get_details(&self, id: &PreparationId) -> Result<PreparationDetails, BackendError> {
        let store = self.store.read().await;
        let stored = store.preparation(id)?;
        let chain = store.chain(&stored.head)?;
        let mut steps = vec![hasher::root_step_id()];
        let mut actions = Vec::with_capacity(chain.len());
        for (step, action) in chain {
            steps.push(step);
            actions.push(action);
        }
        Ok(PreparationDetails {
            preparation: to_preparation(id, stored),
            steps,
            actions,
            inactive: Vec::new(),
        })
    }

    async fn set_name(&self, id: &PreparationId, name: &str) -> Result<Preparation, BackendError> {
        if name.trim().is_empty() {
            return Err(BackendError::Rejected("preparation name is empty".to_string()));
        }
        let mut store = self.store.write().await;
        let stored = store.preparation_mut(id)?;
        stored.name = name.to_string();
        let preparation = to_preparation(id, stored);
        self.persist(&store)?;
        Ok(preparation)
    }

    async fn move_preparation(
        &self,
        id: &PreparationId,
        from: &FolderId,
        to: &FolderId,
        name: &str,
    ) -> Result<(), BackendError> {
        let mut store = self.store.write().await;
        let stored = store.preparation_mut(id)?;
        if &stored.folder_id != from {
            return Err(BackendError::Rejected(format!(
                "preparation {} is not in folder {}",
                id, from
            )));
        }
        stored.folder_id = to.clone();
        stored.name = name.to_string();
        self.persist(&store)
    }

    async fn delete(&self, id: &PreparationId) -> Result<(), BackendError> {
        let mut store = self.store.write().await;
        store
            .preparations
            .shift_remove(id)
            .ok_or_else(|| BackendError::not_found("preparation", id))?;
        self.persist(&store)?;
        log::info!("deleted preparation {}", id);
        Ok(())
    }

    async fn append_steps(
        &self,
        id: &PreparationId,
        actions: &[ActionSpec],
    ) -> Result<(), BackendError> {
        let mut store = self.store.write().await;
        let mut chain = store.actions(id)?;
        for action in actions {
            if !transforms::SUPPORTED_ACTIONS.contains(&action.action.as_str()) {
                return Err(BackendError::UnknownAction(action.action.clone()));
            }
        }
        chain.extend(actions.iter().cloned());
        self.rewrite_chain(&mut store, id, &chain)?;
        Ok(())
    }

    async fn update_step(
        &self,
        id: &PreparationId,
        step: &StepId,
        action: &ActionSpec,
    ) -> Result<(), BackendError> {
        let mut store = self.store.write().await;
        let head = store.preparation(id)?.head.clone();
        let chain = store.chain(&head)?;
        let index = position(&chain, step)?;
        let mut actions: Vec<ActionSpec> = chain.into_iter().map(|(_, a)| a).collect();
        actions[index] = action.clone();
        self.rewrite_chain(&mut store, id, &actions)?;
        Ok(())
    }

    async fn move_step(
        &self,
        id: &PreparationId,
        step: &StepId,
        parent: &StepId,
    ) -> Result<(), BackendError> {
        let mut store = self.store.write().await;
        let head = store.preparation(id)?.head.clone();
        let mut chain = store.chain(&head)?;
        let index = position(&chain, step)?;
        let moved = chain.remove(index);
        let insert_at = if parent == &hasher::root_step_id() {
            0
        } else {
            position(&chain, parent)? + 1
        };
        chain.insert(insert_at, moved);
        let actions: Vec<ActionSpec> = chain.into_iter().map(|(_, a)| a).collect();
        self.rewrite_chain(&mut store, id, &actions)?;
        Ok(())
    }

    async fn remove_step(&self, id: &PreparationId, step: &StepId) -> Result<(), BackendError> {
        let mut store = self.store.write().await;
        let head = store.preparation(id)?.head.clone();
        let mut chain = store.chain(&head)?;
        let index = position(&chain, step)?;
        chain.remove(index);
        let actions: Vec<ActionSpec> = chain.into_iter().map(|(_, a)| a).collect();
        self.rewrite_chain(&mut store, id, &actions)?;
        Ok(())
    }

    async fn copy_steps(
        &self,
        id: &PreparationId,
        from: &PreparationId,
    ) -> Result<(), BackendError> {
        let mut store = self.store.write().await;
        let mut actions = store.actions(id)?;
        actions.extend(store.actions(from)?);
        self.rewrite_chain(&mut store, id, &actions)?;
        Ok(())
    }

    async fn set_head(&self, id: &PreparationId, step: &StepId) -> Result<(), BackendError> {
        let mut store = self.store.write().await;
        if !store.steps.contains_key(step) {
            return Err(BackendError::not_found("step", step));
        }
        store.preparation_mut(id)?.head = step.clone();
        self.persist(&store)
    }

    async fn get_content(
        &self,
        id: &PreparationId,
        version: &Version,
        sample_type: SampleType,
    ) -> Result<GridContent, BackendError> {
        let store = self.store.read().await;
        let stored = store.preparation(id)?;
        let target = match version {
            Version::Head => &stored.head,
            Version::Step(step) => step,
        };
        let mut content = parse(store.dataset(&stored.dataset_id)?)?;
        for (_, action) in store.chain(target)? {
            transforms::apply_action(&mut content, &action)?;
        }
        Ok(sample(content, sample_type))
    }

    async fn list_preparations(&self) -> Result<Vec<Preparation>, BackendError> {
        let store = self.store.read().await;
        Ok(store
            .preparations
            .iter()
            .map(|(id, p)| to_preparation(id, p))
            .collect())
    }

    async fn preview_update(
        &self,
        id: &PreparationId,
        current: &StepId,
        step: &StepId,
        action: &ActionSpec,
        sample_type: SampleType,
    ) -> Result<GridContent, BackendError> {
        let store = self.store.read().await;
        let stored = store.preparation(id)?;
        position(&store.chain(&stored.head)?, step)?;
        let mut content = parse(store.dataset(&stored.dataset_id)?)?;
        // a step past `current` leaves the previewed records untouched
        for (step_id, spec) in store.chain(current)? {
            let spec = if &step_id == step { action } else { &spec };
            transforms::apply_action(&mut content, spec)?;
        }
        Ok(sample(content, sample_type))
    }
}

#[async_trait]
impl DatasetGateway for LocalGateway {
    async fn get_metadata(&self, id: &DatasetId) -> Result<DatasetMetadata, BackendError> {
        let store = self.store.read().await;
        metadata(&store, id)
    }

    async fn get_content(
        &self,
        id: &DatasetId,
        sample_type: SampleType,
    ) -> Result<GridContent, BackendError> {
        let store = self.store.read().await;
        Ok(sample(parse(store.dataset(id)?)?, sample_type))
    }

    async fn update_parameters(
        &self,
        id: &DatasetId,
        parameters: &DatasetParameters,
    ) -> Result<(), BackendError> {
        transforms::validate_parameters(parameters)?;
        let mut store = self.store.write().await;
        store.dataset_mut(id)?.parameters = parameters.clone();
        self.persist(&store)
    }

    async fn update_column(
        &self,
        id: &DatasetId,
        column_id: &str,
        patch: &ColumnPatch,
    ) -> Result<(), BackendError> {
        let mut store = self.store.write().await;
        let content = parse(store.dataset(id)?)?;
        if content.column(column_id).is_none() {
            return Err(BackendError::not_found("column", column_id));
        }
        let dataset = store.dataset_mut(id)?;
        let entry = dataset.columns.entry(column_id.to_string()).or_default();
        if patch.column_type.is_some() {
            entry.column_type = patch.column_type.clone();
        }
        if patch.domain.is_some() {
            entry.domain = patch.domain.clone();
        }
        self.persist(&store)
    }
}
