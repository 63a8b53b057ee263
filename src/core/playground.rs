//! PF-006: Playground orchestrator running loader-guarded step transactions.
//!
//! Every mutation runs as one transaction holding the session lock:
//! lock → loader → resolve/create preparation → capture head → backend mutation
//! → recipe refresh → grid load → capture new head → history → journal.
//! The loader is released by a guard, so it is hidden on every exit path.

use super::action::{self, Action, Selection};
use super::history::{HistoryEntry, HistoryTarget};
use super::recipe::RecipeModel;
use super::session::{LoadingGuard, PlaygroundSession, SessionState};
use super::types::*;
use crate::error::{BackendError, PlaygroundError};
use crate::gateway::local::LocalGateway;
use crate::gateway::{DatasetGateway, PlaygroundView, PreparationGateway, Tour};
use crate::transforms;
use crate::tripwire::drift::{self, DriftFinding};
use crate::tripwire::eventlog::EventJournal;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};

/// Result of an operation that may be skipped as a no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationOutcome {
    Applied,
    Unchanged,
}

/// What an append produced, including the step-count signals.
#[derive(Debug, Clone, PartialEq)]
pub struct AppendOutcome {
    pub step_count: usize,
    pub head: StepId,
    /// The preparation had no step before this append
    pub first_step: bool,
    pub tour: Option<Tour>,
}

/// Step count that triggers the recipe tour.
const RECIPE_TOUR_STEP: usize = 3;

pub struct Playground {
    preparations: Arc<dyn PreparationGateway>,
    datasets: Arc<dyn DatasetGateway>,
    view: Arc<dyn PlaygroundView>,
    config: PlaygroundConfig,
    journal: Option<EventJournal>,
    session: Mutex<PlaygroundSession>,
}

/// Session lock plus loader for the duration of one mutation.
struct Transaction<'a> {
    session: MutexGuard<'a, PlaygroundSession>,
    _loading: LoadingGuard<'a>,
}

impl Deref for Transaction<'_> {
    type Target = PlaygroundSession;

    fn deref(&self) -> &PlaygroundSession {
        &self.session
    }
}

impl DerefMut for Transaction<'_> {
    fn deref_mut(&mut self) -> &mut PlaygroundSession {
        &mut self.session
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        self.session.end_mutation();
    }
}

/// Step at `index` (initial for None, last when out of range).
fn resolve_step(recipe: &RecipeModel, index: Option<usize>) -> Step {
    recipe
        .get_step(index, true)
        .unwrap_or_else(|| recipe.last_step())
        .clone()
}

impl Playground {
    pub fn new(
        preparations: Arc<dyn PreparationGateway>,
        datasets: Arc<dyn DatasetGateway>,
        view: Arc<dyn PlaygroundView>,
        config: PlaygroundConfig,
    ) -> Self {
        let journal = config
            .journal_dir
            .as_ref()
            .map(|dir| EventJournal::new(dir.clone()));
        Self {
            preparations,
            datasets,
            view,
            config,
            journal,
            session: Mutex::new(PlaygroundSession::default()),
        }
    }

    /// Playground backed by one in-process gateway for both backends.
    pub fn local(
        gateway: Arc<LocalGateway>,
        view: Arc<dyn PlaygroundView>,
        config: PlaygroundConfig,
    ) -> Self {
        Self::new(gateway.clone(), gateway, view, config)
    }

    pub fn config(&self) -> &PlaygroundConfig {
        &self.config
    }

    /// Snapshot of the current session for readers.
    pub async fn session(&self) -> PlaygroundSession {
        self.session.lock().await.clone()
    }

    // ========================================================================
    // Loading
    // ========================================================================

    /// Open a dataset without a preparation. History is cleared.
    pub async fn load_dataset(&self, dataset_id: &DatasetId) -> Result<(), PlaygroundError> {
        let mut session = self.session.lock().await;
        let _loading = LoadingGuard::start(self.view.as_ref());
        session.state = SessionState::Loading;

        match self.fetch_dataset(dataset_id).await {
            Ok((metadata, content)) => {
                session.reset();
                self.enter_dataset(&mut session, metadata, content);
                session.state = SessionState::Loaded;
                log::info!("loaded dataset {}", dataset_id);
                Ok(())
            }
            Err(e) => Err(self.fail_load(&mut session, e)),
        }
    }

    /// Open an existing preparation at its head. No-op if it is already open.
    pub async fn load_preparation(&self, id: &PreparationId) -> Result<(), PlaygroundError> {
        let mut session = self.session.lock().await;
        if session.state == SessionState::Loaded && session.preparation_id() == Some(id) {
            return Ok(());
        }
        let _loading = LoadingGuard::start(self.view.as_ref());
        session.state = SessionState::Loading;

        let loaded = async {
            let details = self.preparations.get_details(id).await?;
            let (metadata, content) = tokio::try_join!(
                self.datasets.get_metadata(&details.preparation.dataset_id),
                self.preparations
                    .get_content(id, &Version::Head, self.config.sample_type),
            )?;
            Ok::<_, BackendError>((details, metadata, content))
        }
        .await;

        match loaded {
            Ok((details, metadata, content)) => {
                session.reset();
                session.recipe.refresh(&details);
                session.name = details.preparation.name.clone();
                session.preparation = Some(details.preparation);
                session.dataset = Some(metadata);
                self.view.show_recipe();
                self.view.show_grid(&content, None);
                session.grid = Some(content);
                session.state = SessionState::Loaded;
                log::info!("loaded preparation {} ({} steps)", id, session.recipe.len());
                Ok(())
            }
            Err(e) => Err(self.fail_load(&mut session, e.into())),
        }
    }

    async fn fetch_dataset(
        &self,
        dataset_id: &DatasetId,
    ) -> Result<(DatasetMetadata, GridContent), PlaygroundError> {
        let (metadata, content) = tokio::try_join!(
            self.datasets.get_metadata(dataset_id),
            self.datasets.get_content(dataset_id, self.config.sample_type),
        )?;
        if content.records.is_empty() {
            return Err(PlaygroundError::EmptyDataset(dataset_id.clone()));
        }
        Ok((metadata, content))
    }

    fn enter_dataset(
        &self,
        session: &mut PlaygroundSession,
        metadata: DatasetMetadata,
        content: GridContent,
    ) {
        session.name = metadata.name.clone();
        session.dataset = Some(metadata);
        self.view.hide_recipe();
        self.view.show_grid(&content, None);
        session.grid = Some(content);
    }

    fn fail_load(&self, session: &mut PlaygroundSession, error: PlaygroundError) -> PlaygroundError {
        log::warn!("load failed: {}", error);
        session.reset();
        session.state = SessionState::Unloaded;
        self.view.load_failed(&error);
        error
    }

    // ========================================================================
    // Transaction plumbing
    // ========================================================================

    async fn begin(&self) -> Result<Transaction<'_>, PlaygroundError> {
        let session = self.session.lock().await;
        self.transaction(session)
    }

    fn transaction<'a>(
        &'a self,
        mut session: MutexGuard<'a, PlaygroundSession>,
    ) -> Result<Transaction<'a>, PlaygroundError> {
        let loading = LoadingGuard::start(self.view.as_ref());
        session.begin_mutation()?;
        Ok(Transaction {
            session,
            _loading: loading,
        })
    }

    fn record(&self, preparation: &PreparationId, event: SessionEvent) {
        if let Some(ref journal) = self.journal {
            journal.record(preparation, event);
        }
    }

    /// Current preparation, creating a draft named after the dataset if none.
    async fn ensure_preparation(
        &self,
        session: &mut PlaygroundSession,
    ) -> Result<PreparationId, PlaygroundError> {
        if let Some(id) = session.preparation_id() {
            return Ok(id.clone());
        }
        let dataset = session.dataset.clone().ok_or(PlaygroundError::NoDataset)?;
        let name = format!("{}{}", dataset.name, self.config.draft_suffix);
        let id = self
            .preparations
            .create(&dataset.id, &name, &self.config.home_folder)
            .await?;
        log::info!("created draft preparation {} for dataset {}", id, dataset.id);
        session.preparation = Some(Preparation {
            id: id.clone(),
            name: name.clone(),
            dataset_id: dataset.id,
            folder_id: self.config.home_folder.clone(),
            draft: true,
        });
        session.name = name.clone();
        self.record(
            &id,
            SessionEvent::PreparationCreated {
                preparation: id.clone(),
                name,
                draft: true,
            },
        );
        Ok(id)
    }

    fn current_preparation(session: &PlaygroundSession) -> Result<PreparationId, PlaygroundError> {
        session
            .preparation_id()
            .cloned()
            .ok_or(PlaygroundError::NoPreparation)
    }

    /// Targets built for another preparation must not touch this session.
    fn ensure_current(
        session: &PlaygroundSession,
        preparation: &PreparationId,
    ) -> Result<(), PlaygroundError> {
        match session.preparation_id() {
            Some(current) if current == preparation => Ok(()),
            Some(_) => Err(PlaygroundError::ForeignPreparation(preparation.clone())),
            None => Err(PlaygroundError::NoPreparation),
        }
    }

    async fn refresh_recipe(
        &self,
        session: &mut PlaygroundSession,
        id: &PreparationId,
    ) -> Result<(), PlaygroundError> {
        let details = self.preparations.get_details(id).await?;
        session.recipe.refresh(&details);
        Ok(())
    }

    async fn show_head(
        &self,
        session: &mut PlaygroundSession,
        id: &PreparationId,
        focus: Option<&str>,
    ) -> Result<(), PlaygroundError> {
        let content = self
            .preparations
            .get_content(id, &Version::Head, self.config.sample_type)
            .await?;
        self.view.show_grid(&content, focus);
        session.grid = Some(content);
        Ok(())
    }

    /// Render content at `step` and make it the last active step.
    async fn load_step_locked(
        &self,
        session: &mut PlaygroundSession,
        id: &PreparationId,
        step: &Step,
        focus: Option<&str>,
    ) -> Result<(), PlaygroundError> {
        let content = self
            .preparations
            .get_content(id, &Version::Step(step.id.clone()), self.config.sample_type)
            .await?;
        self.view.show_grid(&content, focus);
        session.grid = Some(content);
        session.recipe.disable_steps_after(&step.id);
        Ok(())
    }

    fn push_head_history(
        session: &mut PlaygroundSession,
        label: &str,
        id: &PreparationId,
        (before, undo_focus): (StepId, Option<String>),
        (after, redo_focus): (StepId, Option<String>),
    ) {
        session.history.add_action(HistoryEntry {
            label: label.to_string(),
            undo: HistoryTarget::Head {
                preparation_id: id.clone(),
                step_id: before,
                focus: undo_focus,
            },
            redo: HistoryTarget::Head {
                preparation_id: id.clone(),
                step_id: after,
                focus: redo_focus,
            },
        });
    }

    // ========================================================================
    // Step mutations
    // ========================================================================

    /// Append one step per action (multi-column batches included).
    pub async fn append_step(&self, actions: Vec<Action>) -> Result<AppendOutcome, PlaygroundError> {
        if actions.is_empty() {
            return Err(PlaygroundError::EmptyActions);
        }
        let mut tx = self.begin().await?;
        let id = self.ensure_preparation(&mut tx).await?;

        let specs: Vec<ActionSpec> = actions.iter().map(Action::to_spec).collect();
        let focus = actions[0].column_id().map(str::to_string);
        self.preparations.append_steps(&id, &specs).await?;
        self.refresh_recipe(&mut tx, &id).await?;
        self.show_head(&mut tx, &id, focus.as_deref()).await?;

        let step_count = tx.recipe.len();
        let previous_count = step_count.saturating_sub(specs.len());
        let before = resolve_step(&tx.recipe, previous_count.checked_sub(1)).id;
        let head = tx.recipe.last_step().id.clone();
        Self::push_head_history(
            &mut tx,
            "append",
            &id,
            (before, None),
            (head.clone(), focus),
        );

        let first_step = previous_count == 0;
        if first_step {
            self.view.show_recipe();
        }
        let tour = if !self.config.tours {
            None
        } else if first_step {
            Some(Tour::Playground)
        } else if previous_count < RECIPE_TOUR_STEP && step_count >= RECIPE_TOUR_STEP {
            Some(Tour::Recipe)
        } else {
            None
        };
        if let Some(t) = tour {
            self.view.tour(t);
        }

        self.record(
            &id,
            SessionEvent::StepsAppended {
                preparation: id.clone(),
                head: head.clone(),
                actions: specs.iter().map(|s| s.action.clone()).collect(),
            },
        );
        log::info!("appended {} step(s) to {}", specs.len(), id);
        Ok(AppendOutcome {
            step_count,
            head,
            first_step,
            tour,
        })
    }

    /// Change a step's parameters. Skipped when nothing changed.
    ///
    /// The grid is reloaded at the previous active-threshold position, so
    /// editing an earlier step shows that step's new output.
    pub async fn update_step(
        &self,
        step: &Step,
        parameters: Parameters,
    ) -> Result<MutationOutcome, PlaygroundError> {
        let mut parameters = parameters;
        action::copy_implicit_parameters(&step.parameters, &mut parameters);
        if !action::parameters_changed(&step.parameters, &parameters) {
            log::debug!("update of {} skipped: parameters unchanged", step.id);
            return Ok(MutationOutcome::Unchanged);
        }

        let mut tx = self.begin().await?;
        let id = Self::current_preparation(&tx)?;
        let previous_head = tx.recipe.last_step().id.clone();
        let threshold = tx.recipe.active_threshold_index();

        let spec = ActionSpec::new(step.action.clone(), parameters);
        let focus = spec.param_str("column_id").map(str::to_string);
        self.preparations.update_step(&id, &step.id, &spec).await?;
        self.refresh_recipe(&mut tx, &id).await?;
        let active = resolve_step(&tx.recipe, threshold);
        self.load_step_locked(&mut tx, &id, &active, focus.as_deref())
            .await?;

        let head = tx.recipe.last_step().id.clone();
        Self::push_head_history(
            &mut tx,
            "update",
            &id,
            (previous_head, None),
            (head.clone(), focus),
        );
        self.record(
            &id,
            SessionEvent::StepUpdated {
                preparation: id.clone(),
                step: step.id.clone(),
                head,
            },
        );
        Ok(MutationOutcome::Applied)
    }

    /// Records at the last active step as they would look with `step` updated
    /// to `parameters`. Inactive steps and unchanged parameters preview nothing.
    pub async fn preview_update(
        &self,
        step: &Step,
        parameters: Parameters,
    ) -> Result<Option<GridContent>, PlaygroundError> {
        let mut parameters = parameters;
        action::copy_implicit_parameters(&step.parameters, &mut parameters);
        if step.inactive || !action::parameters_changed(&step.parameters, &parameters) {
            return Ok(None);
        }

        let session = self.session.lock().await;
        let id = Self::current_preparation(&session)?;
        let current = session.recipe.last_active_step().id.clone();
        let spec = ActionSpec::new(step.action.clone(), parameters);
        let content = self
            .preparations
            .preview_update(&id, &current, &step.id, &spec, self.config.sample_type)
            .await?;
        self.view.show_preview(&content);
        Ok(Some(content))
    }

    /// Move the step at `previous` to `next`. Out-of-range or equal positions
    /// are no-ops.
    pub async fn update_step_order(
        &self,
        previous: i64,
        next: i64,
    ) -> Result<MutationOutcome, PlaygroundError> {
        if previous == next {
            return Ok(MutationOutcome::Unchanged);
        }
        let session = self.session.lock().await;
        let len = session.recipe.len() as i64;
        if next < 0 || next >= len || previous < 0 || previous >= len {
            log::debug!("reorder {} -> {} ignored ({} steps)", previous, next, len);
            return Ok(MutationOutcome::Unchanged);
        }
        let mut tx = self.transaction(session)?;
        let id = Self::current_preparation(&tx)?;

        let (from, to) = (previous as usize, next as usize);
        let moved = tx.recipe.steps()[from].clone();
        // positions are read before the move: going up the new parent sits
        // just before `to`, going down it is the step currently at `to`
        let parent = if to < from {
            tx.recipe.step_before(to).id.clone()
        } else {
            tx.recipe.steps()[to].id.clone()
        };
        let previous_head = tx.recipe.last_step().id.clone();
        let focus = moved.column_id().map(str::to_string);

        self.preparations.move_step(&id, &moved.id, &parent).await?;
        self.refresh_recipe(&mut tx, &id).await?;
        self.show_head(&mut tx, &id, focus.as_deref()).await?;

        let head = tx.recipe.last_step().id.clone();
        Self::push_head_history(
            &mut tx,
            "reorder",
            &id,
            (previous_head, focus.clone()),
            (head, focus),
        );
        self.record(
            &id,
            SessionEvent::StepMoved {
                preparation: id.clone(),
                step: moved.id,
                parent,
            },
        );
        Ok(MutationOutcome::Applied)
    }

    pub async fn remove_step(&self, step: &Step) -> Result<(), PlaygroundError> {
        let mut tx = self.begin().await?;
        let id = Self::current_preparation(&tx)?;
        let previous_head = tx.recipe.last_step().id.clone();

        self.preparations.remove_step(&id, &step.id).await?;
        self.refresh_recipe(&mut tx, &id).await?;
        self.show_head(&mut tx, &id, None).await?;

        let head = tx.recipe.last_step().id.clone();
        Self::push_head_history(
            &mut tx,
            "remove",
            &id,
            (previous_head, step.column_id().map(str::to_string)),
            (head, None),
        );
        self.record(
            &id,
            SessionEvent::StepRemoved {
                preparation: id.clone(),
                step: step.id.clone(),
            },
        );
        Ok(())
    }

    /// Copy every step of `reference` onto the current preparation.
    pub async fn copy_steps(&self, reference: &PreparationId) -> Result<(), PlaygroundError> {
        let mut tx = self.begin().await?;
        let existing_head = tx
            .preparation
            .is_some()
            .then(|| tx.recipe.last_step().id.clone());
        let id = self.ensure_preparation(&mut tx).await?;

        self.preparations.copy_steps(&id, reference).await?;
        self.refresh_recipe(&mut tx, &id).await?;
        self.show_head(&mut tx, &id, None).await?;

        let before = existing_head.unwrap_or_else(|| tx.recipe.initial_step().id.clone());
        let head = tx.recipe.last_step().id.clone();
        Self::push_head_history(&mut tx, "copy", &id, (before, None), (head.clone(), None));
        if !tx.recipe.is_empty() {
            self.view.show_recipe();
        }
        self.record(
            &id,
            SessionEvent::StepsCopied {
                preparation: id.clone(),
                from: reference.clone(),
                head,
            },
        );
        Ok(())
    }

    /// Disable `step` and everything after it, or re-enable up to it.
    pub async fn toggle_step(&self, step: &Step) -> Result<(), PlaygroundError> {
        let mut tx = self.begin().await?;
        let id = Self::current_preparation(&tx)?;
        let current = tx
            .recipe
            .steps()
            .iter()
            .find(|s| s.id == step.id)
            .cloned()
            .ok_or_else(|| BackendError::not_found("step", &step.id))?;
        let target = if current.inactive {
            current
        } else {
            tx.recipe.previous_step(&current.id).clone()
        };
        self.load_step_locked(&mut tx, &id, &target, None).await
    }

    /// Render the grid at `step`, making it the last active one.
    pub async fn load_step(&self, step: &Step) -> Result<(), PlaygroundError> {
        let mut tx = self.begin().await?;
        let id = Self::current_preparation(&tx)?;
        self.load_step_locked(&mut tx, &id, step, None).await
    }

    // ========================================================================
    // Head and history
    // ========================================================================

    /// Point the preparation head at `head` and resynchronize recipe and grid.
    pub async fn set_preparation_head(
        &self,
        preparation: &PreparationId,
        head: &StepId,
        focus: Option<&str>,
    ) -> Result<(), PlaygroundError> {
        let mut tx = self.begin().await?;
        self.set_head_locked(&mut tx, preparation, head, focus).await
    }

    async fn set_head_locked(
        &self,
        session: &mut PlaygroundSession,
        preparation: &PreparationId,
        head: &StepId,
        focus: Option<&str>,
    ) -> Result<(), PlaygroundError> {
        Self::ensure_current(session, preparation)?;
        self.preparations.set_head(preparation, head).await?;

        if session.recipe.has_disabled_tail() {
            // the step to render depends on the refreshed structure
            let threshold = session.recipe.active_threshold_index();
            self.refresh_recipe(session, preparation).await?;
            let step = resolve_step(&session.recipe, threshold);
            self.load_step_locked(session, preparation, &step, focus)
                .await?;
        } else {
            let (details, content) = tokio::try_join!(
                self.preparations.get_details(preparation),
                self.preparations
                    .get_content(preparation, &Version::Head, self.config.sample_type),
            )?;
            session.recipe.refresh(&details);
            self.view.show_grid(&content, focus);
            session.grid = Some(content);
        }

        self.record(
            preparation,
            SessionEvent::HeadMoved {
                preparation: preparation.clone(),
                head: head.clone(),
            },
        );
        Ok(())
    }

    /// Replay the most recent undoable entry.
    pub async fn undo(&self) -> Result<MutationOutcome, PlaygroundError> {
        let mut tx = self.begin().await?;
        let Some(entry) = tx.history.next_undo().cloned() else {
            return Ok(MutationOutcome::Unchanged);
        };
        self.apply_target_locked(&mut tx, &entry.undo).await?;
        tx.history.commit_undo();
        log::info!("undo '{}'", entry.label);
        Ok(MutationOutcome::Applied)
    }

    /// Replay the next redoable entry.
    pub async fn redo(&self) -> Result<MutationOutcome, PlaygroundError> {
        let mut tx = self.begin().await?;
        let Some(entry) = tx.history.next_redo().cloned() else {
            return Ok(MutationOutcome::Unchanged);
        };
        self.apply_target_locked(&mut tx, &entry.redo).await?;
        tx.history.commit_redo();
        log::info!("redo '{}'", entry.label);
        Ok(MutationOutcome::Applied)
    }

    /// Execute any stored history target directly, without moving the cursor.
    pub async fn apply_history_target(&self, target: &HistoryTarget) -> Result<(), PlaygroundError> {
        let mut tx = self.begin().await?;
        self.apply_target_locked(&mut tx, target).await
    }

    async fn apply_target_locked(
        &self,
        session: &mut PlaygroundSession,
        target: &HistoryTarget,
    ) -> Result<(), PlaygroundError> {
        match target {
            HistoryTarget::Head {
                preparation_id,
                step_id,
                focus,
            } => {
                self.set_head_locked(session, preparation_id, step_id, focus.as_deref())
                    .await
            }
            HistoryTarget::Name {
                preparation_id,
                name,
            } => {
                Self::ensure_current(session, preparation_id)?;
                let from = session.name.clone();
                let renamed = self.preparations.set_name(preparation_id, name).await?;
                session.name = renamed.name.clone();
                session.preparation = Some(renamed);
                self.record(
                    preparation_id,
                    SessionEvent::PreparationRenamed {
                        preparation: preparation_id.clone(),
                        from,
                        to: name.clone(),
                    },
                );
                Ok(())
            }
        }
    }

    // ========================================================================
    // Preparation lifecycle
    // ========================================================================

    /// Rename the current preparation, or create a named one if none exists.
    /// Only a rename is recorded in history.
    pub async fn create_or_update_preparation(&self, name: &str) -> Result<(), PlaygroundError> {
        let mut tx = self.begin().await?;
        match tx.preparation.clone() {
            Some(existing) => {
                let renamed = self.preparations.set_name(&existing.id, name).await?;
                tx.name = renamed.name.clone();
                tx.preparation = Some(renamed);
                tx.history.add_action(HistoryEntry {
                    label: "rename".to_string(),
                    undo: HistoryTarget::Name {
                        preparation_id: existing.id.clone(),
                        name: existing.name.clone(),
                    },
                    redo: HistoryTarget::Name {
                        preparation_id: existing.id.clone(),
                        name: name.to_string(),
                    },
                });
                self.record(
                    &existing.id,
                    SessionEvent::PreparationRenamed {
                        preparation: existing.id.clone(),
                        from: existing.name,
                        to: name.to_string(),
                    },
                );
            }
            None => {
                let dataset = tx.dataset.clone().ok_or(PlaygroundError::NoDataset)?;
                let id = self
                    .preparations
                    .create(&dataset.id, name, &self.config.home_folder)
                    .await?;
                tx.preparation = Some(Preparation {
                    id: id.clone(),
                    name: name.to_string(),
                    dataset_id: dataset.id,
                    folder_id: self.config.home_folder.clone(),
                    draft: false,
                });
                tx.name = name.to_string();
                self.refresh_recipe(&mut tx, &id).await?;
                self.record(
                    &id,
                    SessionEvent::PreparationCreated {
                        preparation: id.clone(),
                        name: name.to_string(),
                        draft: false,
                    },
                );
            }
        }
        Ok(())
    }

    /// Move the current preparation into `folder` under `name`; it stops being a draft.
    pub async fn save_preparation(&self, folder: &FolderId, name: &str) -> Result<(), PlaygroundError> {
        let mut tx = self.begin().await?;
        let mut preparation = tx.preparation.clone().ok_or(PlaygroundError::NoPreparation)?;
        self.preparations
            .move_preparation(&preparation.id, &preparation.folder_id, folder, name)
            .await?;
        preparation.folder_id = folder.clone();
        preparation.name = name.to_string();
        preparation.draft = false;
        tx.name = name.to_string();
        self.record(
            &preparation.id,
            SessionEvent::PreparationMoved {
                preparation: preparation.id.clone(),
                folder: folder.clone(),
                name: name.to_string(),
            },
        );
        tx.preparation = Some(preparation);
        Ok(())
    }

    /// Tear the session down. A draft without steps is deleted.
    pub async fn close(&self) -> Result<(), PlaygroundError> {
        let mut session = self.session.lock().await;
        let _loading = LoadingGuard::start(self.view.as_ref());

        let mut result = Ok(());
        if let Some(preparation) = session.preparation.clone() {
            if preparation.draft && session.recipe.is_empty() {
                match self.preparations.delete(&preparation.id).await {
                    Ok(()) => self.record(
                        &preparation.id,
                        SessionEvent::PreparationDeleted {
                            preparation: preparation.id.clone(),
                        },
                    ),
                    Err(e) => {
                        log::warn!("cannot delete empty draft {}: {}", preparation.id, e);
                        result = Err(e.into());
                    }
                }
            }
        }

        session.reset();
        session.state = SessionState::Closed;
        self.view.closed();
        result
    }

    // ========================================================================
    // Dataset operations
    // ========================================================================

    /// Change parsing parameters and reload at the re-resolved active step.
    pub async fn change_dataset_parameters(
        &self,
        parameters: DatasetParameters,
    ) -> Result<(), PlaygroundError> {
        let mut tx = self.begin().await?;
        let dataset = tx.dataset.clone().ok_or(PlaygroundError::NoDataset)?;

        match tx.preparation_id().cloned() {
            Some(id) => {
                let threshold = tx.recipe.active_threshold_index();
                self.datasets
                    .update_parameters(&dataset.id, &parameters)
                    .await?;
                tx.dataset = Some(self.datasets.get_metadata(&dataset.id).await?);
                self.refresh_recipe(&mut tx, &id).await?;
                let step = resolve_step(&tx.recipe, threshold);
                self.load_step_locked(&mut tx, &id, &step, None).await?;
            }
            None => {
                self.datasets
                    .update_parameters(&dataset.id, &parameters)
                    .await?;
                let (metadata, content) = self.fetch_dataset(&dataset.id).await?;
                tx.reset();
                self.enter_dataset(&mut tx, metadata, content);
            }
        }
        log::info!(
            "dataset {} parameters changed (separator '{}', encoding {})",
            dataset.id,
            parameters.separator,
            parameters.encoding
        );
        Ok(())
    }

    /// Change a column's type/domain optimistically; rolled back if the backend rejects it.
    pub async fn change_column_type(
        &self,
        column_id: &str,
        patch: ColumnPatch,
    ) -> Result<(), PlaygroundError> {
        let mut tx = self.begin().await?;
        let dataset = tx.dataset.clone().ok_or(PlaygroundError::NoDataset)?;

        let original = {
            let grid = tx.grid.as_mut().ok_or(PlaygroundError::NoDataset)?;
            let column = grid
                .column_mut(column_id)
                .ok_or_else(|| PlaygroundError::UnknownColumn(column_id.to_string()))?;
            let original = column.clone();
            transforms::apply_patch(column, &patch);
            self.view.show_grid(grid, Some(column_id));
            original
        };

        if let Err(e) = self
            .datasets
            .update_column(&dataset.id, column_id, &patch)
            .await
        {
            log::warn!("column {} change rejected, rolling back: {}", column_id, e);
            if let Some(grid) = tx.grid.as_mut() {
                if let Some(column) = grid.column_mut(column_id) {
                    *column = original;
                }
                self.view.show_grid(grid, Some(column_id));
            }
            return Err(e.into());
        }
        Ok(())
    }

    // ========================================================================
    // Convenience appliers
    // ========================================================================

    /// Append the `replace_on_value` action for a grid cell edit.
    pub async fn edit_cell(
        &self,
        row: &GridRecord,
        column: &ColumnRef,
        new_value: &str,
        update_all: bool,
        selection: &Selection,
    ) -> Result<AppendOutcome, PlaygroundError> {
        let action = action::edit_cell_action(row, column, new_value, update_all, selection)?;
        self.append_step(vec![action]).await
    }

    /// Compare the recipe mirror and the grid against fresh backend state.
    pub async fn verify(&self) -> Result<Vec<DriftFinding>, PlaygroundError> {
        let session = self.session.lock().await;
        let id = Self::current_preparation(&session)?;
        let details = self.preparations.get_details(&id).await?;
        let mut findings = drift::detect_drift(&session.recipe, &details);
        if let Some(grid) = session.grid.as_ref() {
            let version = Version::Step(session.recipe.last_active_step().id.clone());
            let fresh = self
                .preparations
                .get_content(&id, &version, self.config.sample_type)
                .await?;
            findings.extend(drift::detect_content_drift(grid, &fresh));
        }
        Ok(findings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::action::{Scope, StepApplier};
    use crate::gateway::RecordingView;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    const CSV: &str = "id,firstname,city\n1,Ronald,Paris\n2,john,Lyon\n3,Ronald,\n";

    /// Local gateway that counts step mutations and can reject column updates.
    #[derive(Default)]
    struct CountingGateway {
        inner: LocalGateway,
        mutations: AtomicUsize,
        reject_columns: AtomicBool,
    }

    impl CountingGateway {
        fn bump(&self) {
            self.mutations.fetch_add(1, Ordering::SeqCst);
        }

        fn mutations(&self) -> usize {
            self.mutations.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl PreparationGateway for CountingGateway {
        async fn create(
            &self,
            dataset_id: &DatasetId,
            name: &str,
            folder_id: &FolderId,
        ) -> Result<PreparationId, BackendError> {
            self.inner.create(dataset_id, name, folder_id).await
        }
        async fn get_details(&self, id: &PreparationId) -> Result<PreparationDetails, BackendError> {
            self.inner.get_details(id).await
        }
        async fn set_name(&self, id: &PreparationId, name: &str) -> Result<Preparation, BackendError> {
            self.inner.set_name(id, name).await
        }
        async fn move_preparation(
            &self,
            id: &PreparationId,
            from: &FolderId,
            to: &FolderId,
            name: &str,
        ) -> Result<(), BackendError> {
            self.inner.move_preparation(id, from, to, name).await
        }
        async fn delete(&self, id: &PreparationId) -> Result<(), BackendError> {
            self.inner.delete(id).await
        }
        async fn append_steps(
            &self,
            id: &PreparationId,
            actions: &[ActionSpec],
        ) -> Result<(), BackendError> {
            self.bump();
            self.inner.append_steps(id, actions).await
        }
        async fn update_step(
            &self,
            id: &PreparationId,
            step: &StepId,
            action: &ActionSpec,
        ) -> Result<(), BackendError> {
            self.bump();
            self.inner.update_step(id, step, action).await
        }
        async fn move_step(
            &self,
            id: &PreparationId,
            step: &StepId,
            parent: &StepId,
        ) -> Result<(), BackendError> {
            self.bump();
            self.inner.move_step(id, step, parent).await
        }
        async fn remove_step(&self, id: &PreparationId, step: &StepId) -> Result<(), BackendError> {
            self.bump();
            self.inner.remove_step(id, step).await
        }
        async fn copy_steps(
            &self,
            id: &PreparationId,
            from: &PreparationId,
        ) -> Result<(), BackendError> {
            self.bump();
            self.inner.copy_steps(id, from).await
        }
        async fn set_head(&self, id: &PreparationId, step: &StepId) -> Result<(), BackendError> {
            self.inner.set_head(id, step).await
        }
        async fn get_content(
            &self,
            id: &PreparationId,
            version: &Version,
            sample: SampleType,
        ) -> Result<GridContent, BackendError> {
            PreparationGateway::get_content(&self.inner, id, version, sample).await
        }
        async fn list_preparations(&self) -> Result<Vec<Preparation>, BackendError> {
            self.inner.list_preparations().await
        }
        async fn preview_update(
            &self,
            id: &PreparationId,
            current: &StepId,
            step: &StepId,
            action: &ActionSpec,
            sample: SampleType,
        ) -> Result<GridContent, BackendError> {
            self.inner.preview_update(id, current, step, action, sample).await
        }
    }

    #[async_trait]
    impl DatasetGateway for CountingGateway {
        async fn get_metadata(&self, id: &DatasetId) -> Result<DatasetMetadata, BackendError> {
            self.inner.get_metadata(id).await
        }
        async fn get_content(
            &self,
            id: &DatasetId,
            sample: SampleType,
        ) -> Result<GridContent, BackendError> {
            DatasetGateway::get_content(&self.inner, id, sample).await
        }
        async fn update_parameters(
            &self,
            id: &DatasetId,
            parameters: &DatasetParameters,
        ) -> Result<(), BackendError> {
            self.inner.update_parameters(id, parameters).await
        }
        async fn update_column(
            &self,
            id: &DatasetId,
            column_id: &str,
            patch: &ColumnPatch,
        ) -> Result<(), BackendError> {
            if self.reject_columns.load(Ordering::SeqCst) {
                return Err(BackendError::Rejected("column locked".to_string()));
            }
            self.inner.update_column(id, column_id, patch).await
        }
    }

    struct Fixture {
        playground: Arc<Playground>,
        gateway: Arc<CountingGateway>,
        view: Arc<RecordingView>,
    }

    async fn fixture_with(csv: &str, config: PlaygroundConfig) -> Fixture {
        let gateway = Arc::new(CountingGateway::default());
        gateway
            .inner
            .add_dataset(&DatasetId::new("ds-1"), "customers", csv, DatasetParameters::default())
            .await
            .unwrap();
        let view = Arc::new(RecordingView::default());
        let playground = Arc::new(Playground::new(
            gateway.clone(),
            gateway.clone(),
            view.clone(),
            config,
        ));
        playground.load_dataset(&DatasetId::new("ds-1")).await.unwrap();
        Fixture {
            playground,
            gateway,
            view,
        }
    }

    async fn fixture() -> Fixture {
        fixture_with(CSV, PlaygroundConfig::default()).await
    }

    fn column(id: &str) -> ColumnRef {
        ColumnRef::new(id, "")
    }

    fn upper(id: &str) -> Action {
        Action::column("uppercase", column(id), None)
    }

    async fn grid_column(pg: &Playground, id: &str) -> Vec<String> {
        let session = pg.session().await;
        session
            .grid
            .map(|g| g.column_values(id).into_iter().map(String::from).collect())
            .unwrap_or_default()
    }

    #[tokio::test]
    async fn test_pf006_append_then_undo_then_redo() {
        let f = fixture().await;
        let pg = &f.playground;

        let outcome = pg.append_step(vec![upper("0001")]).await.unwrap();
        assert_eq!(outcome.step_count, 1);
        assert!(outcome.first_step);
        assert_eq!(pg.session().await.recipe.len(), 1);
        assert_eq!(grid_column(pg, "0001").await, vec!["RONALD", "JOHN", "RONALD"]);

        assert_eq!(pg.undo().await.unwrap(), MutationOutcome::Applied);
        assert_eq!(pg.session().await.recipe.len(), 0);
        assert_eq!(grid_column(pg, "0001").await, vec!["Ronald", "john", "Ronald"]);

        assert_eq!(pg.redo().await.unwrap(), MutationOutcome::Applied);
        let session = pg.session().await;
        assert_eq!(session.recipe.len(), 1);
        assert_eq!(session.recipe.last_step().id, outcome.head);
        assert_eq!(f.view.loading_depth(), 0);
    }

    #[tokio::test]
    async fn test_pf006_draft_created_once() {
        let f = fixture().await;
        f.playground.append_step(vec![upper("0001")]).await.unwrap();
        f.playground.append_step(vec![upper("0002")]).await.unwrap();

        let preparations = f.gateway.list_preparations().await.unwrap();
        assert_eq!(preparations.len(), 1);
        assert_eq!(preparations[0].name, "customers Preparation");
        let session = f.playground.session().await;
        assert!(session.is_draft());
        assert_eq!(session.recipe.len(), 2);
    }

    #[tokio::test]
    async fn test_pf006_batched_append_undo_targets_pre_batch_head() {
        let f = fixture().await;
        let pg = &f.playground;
        pg.append_step(vec![upper("0000")]).await.unwrap();
        pg.append_step(vec![upper("0001"), upper("0002")]).await.unwrap();
        assert_eq!(pg.session().await.recipe.len(), 3);

        pg.undo().await.unwrap();
        assert_eq!(pg.session().await.recipe.len(), 1);
    }

    #[tokio::test]
    async fn test_pf006_tour_signals() {
        let f = fixture().await;
        let pg = &f.playground;
        let first = pg.append_step(vec![upper("0000")]).await.unwrap();
        let second = pg.append_step(vec![upper("0001")]).await.unwrap();
        let third = pg.append_step(vec![upper("0002")]).await.unwrap();
        assert_eq!(first.tour, Some(Tour::Playground));
        assert_eq!(second.tour, None);
        assert_eq!(third.tour, Some(Tour::Recipe));
        assert_eq!(f.view.count("show_recipe"), 1);
    }

    #[tokio::test]
    async fn test_pf006_tours_disabled() {
        let config = PlaygroundConfig {
            tours: false,
            ..PlaygroundConfig::default()
        };
        let f = fixture_with(CSV, config).await;
        let outcome = f.playground.append_step(vec![upper("0000")]).await.unwrap();
        assert!(outcome.first_step);
        assert_eq!(outcome.tour, None);
        assert_eq!(f.view.count("tour"), 0);
    }

    #[tokio::test]
    async fn test_pf006_empty_actions_rejected() {
        let f = fixture().await;
        let err = f.playground.append_step(vec![]).await.unwrap_err();
        assert_eq!(err, PlaygroundError::EmptyActions);
        assert_eq!(f.gateway.mutations(), 0);
    }

    #[tokio::test]
    async fn test_pf006_update_unchanged_is_noop() {
        let f = fixture().await;
        let pg = &f.playground;
        let fill = Action::column("fillemptywithdefault", column("0002"), None)
            .with_parameter("default_value", "Nantes");
        pg.append_step(vec![fill]).await.unwrap();
        let step = pg.session().await.recipe.steps()[0].clone();
        let mutations = f.gateway.mutations();
        let history = pg.session().await.history.len();

        let mut params = Parameters::new();
        params.insert("default_value".into(), "Nantes".into());
        let outcome = pg.update_step(&step, params).await.unwrap();

        assert_eq!(outcome, MutationOutcome::Unchanged);
        assert_eq!(f.gateway.mutations(), mutations);
        assert_eq!(pg.session().await.history.len(), history);
    }

    #[tokio::test]
    async fn test_pf006_update_reloads_at_threshold_and_undoes() {
        let f = fixture().await;
        let pg = &f.playground;
        let fill = Action::column("fillemptywithdefault", column("0002"), None)
            .with_parameter("default_value", "Nantes");
        pg.append_step(vec![fill, upper("0001")]).await.unwrap();
        let step = pg.session().await.recipe.steps()[0].clone();

        let mut params = Parameters::new();
        params.insert("default_value".into(), "Lille".into());
        assert_eq!(
            pg.update_step(&step, params).await.unwrap(),
            MutationOutcome::Applied
        );
        let session = pg.session().await;
        assert_eq!(session.recipe.len(), 2);
        assert!(!session.recipe.has_disabled_tail());
        assert_eq!(session.recipe.steps()[0].parameters["default_value"], "Lille");
        assert_eq!(session.recipe.steps()[0].column_id(), Some("0002"));
        assert_eq!(grid_column(pg, "0002").await[2], "Lille");

        pg.undo().await.unwrap();
        let session = pg.session().await;
        assert_eq!(session.recipe.steps()[0].parameters["default_value"], "Nantes");
        assert_eq!(grid_column(pg, "0002").await[2], "Nantes");
    }

    #[tokio::test]
    async fn test_pf006_preview_update() {
        let f = fixture().await;
        let pg = &f.playground;
        let fill = Action::column("fillemptywithdefault", column("0002"), None)
            .with_parameter("default_value", "Nantes");
        pg.append_step(vec![fill, upper("0002")]).await.unwrap();
        let steps = pg.session().await.recipe.steps().to_vec();
        let mutations = f.gateway.mutations();

        let mut params = Parameters::new();
        params.insert("default_value".into(), "Lille".into());
        let preview = pg
            .preview_update(&steps[0], params.clone())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(preview.column_values("0002"), vec!["PARIS", "LYON", "LILLE"]);
        assert_eq!(f.view.count("show_preview"), 1);
        assert_eq!(grid_column(pg, "0002").await[2], "NANTES");
        assert_eq!(f.gateway.mutations(), mutations);
        assert_eq!(pg.session().await.history.len(), 1);

        let mut same = Parameters::new();
        same.insert("default_value".into(), "Nantes".into());
        assert_eq!(pg.preview_update(&steps[0], same).await.unwrap(), None);

        // with the upper step disabled the preview stops at the fill
        pg.toggle_step(&steps[1]).await.unwrap();
        let steps = pg.session().await.recipe.steps().to_vec();
        let preview = pg
            .preview_update(&steps[0], params.clone())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(preview.column_values("0002"), vec!["Paris", "Lyon", "Lille"]);
        assert_eq!(pg.preview_update(&steps[1], params).await.unwrap(), None);
        assert_eq!(f.view.count("show_preview"), 2);
        assert!(pg.verify().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_pf006_reorder_boundaries_are_noops() {
        let f = fixture().await;
        let pg = &f.playground;
        pg.append_step(vec![upper("0000"), upper("0001"), upper("0002")])
            .await
            .unwrap();
        let before = f.gateway.mutations();
        let starts = f.view.count("loading_start");

        for (p, n) in [(1, 1), (0, -1), (2, 3), (5, 0)] {
            assert_eq!(
                pg.update_step_order(p, n).await.unwrap(),
                MutationOutcome::Unchanged
            );
        }
        assert_eq!(f.gateway.mutations(), before);
        assert_eq!(f.view.count("loading_start"), starts);
    }

    #[tokio::test]
    async fn test_pf006_reorder_up_and_down() {
        let f = fixture().await;
        let pg = &f.playground;
        pg.append_step(vec![upper("0000"), upper("0001"), upper("0002")])
            .await
            .unwrap();
        let cols = |s: &PlaygroundSession| -> Vec<String> {
            s.recipe
                .steps()
                .iter()
                .map(|st| st.column_id().unwrap_or("").to_string())
                .collect()
        };

        pg.update_step_order(2, 0).await.unwrap();
        assert_eq!(cols(&pg.session().await), vec!["0002", "0000", "0001"]);

        pg.update_step_order(0, 2).await.unwrap();
        assert_eq!(cols(&pg.session().await), vec!["0000", "0001", "0002"]);

        pg.update_step_order(2, 1).await.unwrap();
        assert_eq!(cols(&pg.session().await), vec!["0000", "0002", "0001"]);

        pg.undo().await.unwrap();
        assert_eq!(cols(&pg.session().await), vec!["0000", "0001", "0002"]);
    }

    #[tokio::test]
    async fn test_pf006_remove_and_undo() {
        let f = fixture().await;
        let pg = &f.playground;
        pg.append_step(vec![upper("0001")]).await.unwrap();
        let step = pg.session().await.recipe.steps()[0].clone();

        pg.remove_step(&step).await.unwrap();
        assert!(pg.session().await.recipe.is_empty());
        assert_eq!(grid_column(pg, "0001").await[0], "Ronald");

        pg.undo().await.unwrap();
        assert_eq!(pg.session().await.recipe.len(), 1);
        assert_eq!(grid_column(pg, "0001").await[0], "RONALD");
    }

    #[tokio::test]
    async fn test_pf006_toggle_step_moves_threshold() {
        let f = fixture().await;
        let pg = &f.playground;
        pg.append_step(vec![upper("0001"), Action::column("lowercase", column("0001"), None)])
            .await
            .unwrap();
        let steps = pg.session().await.recipe.steps().to_vec();
        let mutations = f.gateway.mutations();

        // disable the first step: everything becomes inactive, grid at the initial step
        pg.toggle_step(&steps[0]).await.unwrap();
        let session = pg.session().await;
        assert!(session.recipe.steps().iter().all(|s| s.inactive));
        assert_eq!(grid_column(pg, "0001").await[0], "Ronald");

        // re-enable up through the first step only
        pg.toggle_step(&session.recipe.steps()[0]).await.unwrap();
        let session = pg.session().await;
        assert!(!session.recipe.steps()[0].inactive);
        assert!(session.recipe.steps()[1].inactive);
        assert_eq!(grid_column(pg, "0001").await[0], "RONALD");
        assert_eq!(f.gateway.mutations(), mutations);
    }

    #[tokio::test]
    async fn test_pf006_undo_with_disabled_tail_keeps_threshold() {
        let f = fixture().await;
        let pg = &f.playground;
        pg.append_step(vec![upper("0000"), upper("0001")]).await.unwrap();
        pg.append_step(vec![upper("0002")]).await.unwrap();
        let steps = pg.session().await.recipe.steps().to_vec();
        pg.toggle_step(&steps[1]).await.unwrap();
        assert_eq!(pg.session().await.recipe.active_threshold_index(), Some(0));

        pg.undo().await.unwrap();
        let session = pg.session().await;
        assert_eq!(session.recipe.len(), 2);
        assert_eq!(session.recipe.active_threshold_index(), Some(0));
        assert!(session.recipe.steps()[1].inactive);
    }

    #[tokio::test]
    async fn test_pf006_two_renames_with_undo() {
        let f = fixture().await;
        let pg = &f.playground;
        pg.create_or_update_preparation("A").await.unwrap();
        assert!(pg.session().await.history.is_empty());

        pg.create_or_update_preparation("B").await.unwrap();
        pg.create_or_update_preparation("C").await.unwrap();
        let session = pg.session().await;
        assert_eq!(session.name, "C");
        assert!(!session.is_draft());

        let first = session.history.entries()[0].clone();
        assert_eq!(
            first.undo,
            HistoryTarget::Name {
                preparation_id: session.preparation_id().cloned().unwrap(),
                name: "A".to_string(),
            }
        );

        pg.undo().await.unwrap();
        assert_eq!(pg.session().await.name, "B");

        pg.apply_history_target(&first.undo).await.unwrap();
        assert_eq!(pg.session().await.name, "A");
        let listed = f.gateway.list_preparations().await.unwrap();
        assert_eq!(listed[0].name, "A");
    }

    #[tokio::test]
    async fn test_pf006_new_mutation_discards_redo() {
        let f = fixture().await;
        let pg = &f.playground;
        pg.append_step(vec![upper("0000")]).await.unwrap();
        pg.append_step(vec![upper("0001")]).await.unwrap();
        pg.undo().await.unwrap();
        assert!(pg.session().await.history.can_redo());

        pg.append_step(vec![upper("0002")]).await.unwrap();
        let session = pg.session().await;
        assert!(!session.history.can_redo());
        assert_eq!(pg.redo().await.unwrap(), MutationOutcome::Unchanged);
    }

    #[tokio::test]
    async fn test_pf006_rejected_append_keeps_recipe() {
        let f = fixture().await;
        let pg = &f.playground;
        pg.append_step(vec![upper("0000")]).await.unwrap();
        let head = pg.session().await.recipe.last_step().id.clone();

        let err = pg.append_step(vec![upper("0099")]).await.unwrap_err();
        assert!(matches!(
            err,
            PlaygroundError::Backend(BackendError::InvalidParameters { .. })
        ));
        let session = pg.session().await;
        assert_eq!(session.recipe.len(), 1);
        assert_eq!(session.recipe.last_step().id, head);
        assert_eq!(session.history.len(), 1);
        assert_eq!(f.view.loading_depth(), 0);

        // undo still removes exactly the one committed step
        pg.undo().await.unwrap();
        assert!(pg.session().await.recipe.is_empty());
        assert!(pg.verify().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_pf006_targets_of_other_preparation_rejected() {
        let f = fixture().await;
        let pg = &f.playground;
        pg.append_step(vec![upper("0001")]).await.unwrap();
        let first = pg.session().await.history.entries()[0].clone();
        let old = pg.session().await.preparation_id().cloned().unwrap();
        pg.close().await.unwrap();

        pg.load_dataset(&DatasetId::new("ds-1")).await.unwrap();
        pg.append_step(vec![upper("0002"), upper("0000")]).await.unwrap();
        let current = pg.session().await.preparation_id().cloned().unwrap();
        assert_ne!(current, old);

        let err = pg.apply_history_target(&first.undo).await.unwrap_err();
        assert_eq!(err, PlaygroundError::ForeignPreparation(old.clone()));
        let err = pg
            .set_preparation_head(&old, &crate::tripwire::hasher::root_step_id(), None)
            .await
            .unwrap_err();
        assert_eq!(err, PlaygroundError::ForeignPreparation(old.clone()));

        let session = pg.session().await;
        assert_eq!(session.preparation_id(), Some(&current));
        assert_eq!(session.recipe.len(), 2);
        assert_eq!(f.gateway.get_details(&old).await.unwrap().steps.len(), 2);
        assert!(pg.verify().await.unwrap().is_empty());
        assert_eq!(f.view.loading_depth(), 0);
    }

    type Snapshot = (Vec<(String, Parameters)>, Vec<Vec<String>>);

    async fn snapshot(pg: &Playground) -> Snapshot {
        let session = pg.session().await;
        let steps: Vec<(String, Parameters)> = session
            .recipe
            .steps()
            .iter()
            .map(|s| (s.action.clone(), s.parameters.clone()))
            .collect();
        let grid: Vec<Vec<String>> = session
            .grid
            .as_ref()
            .map(|g| {
                g.columns
                    .iter()
                    .map(|c| g.column_values(&c.id).into_iter().map(String::from).collect())
                    .collect()
            })
            .unwrap_or_default();
        (steps, grid)
    }

    #[tokio::test]
    async fn test_pf006_round_trip_sequence() {
        let f = fixture().await;
        let pg = &f.playground;
        let mut states = vec![snapshot(pg).await];

        let fill = Action::column("fillemptywithdefault", column("0002"), None)
            .with_parameter("default_value", "Nantes");
        pg.append_step(vec![fill]).await.unwrap();
        states.push(snapshot(pg).await);
        pg.append_step(vec![upper("0001")]).await.unwrap();
        states.push(snapshot(pg).await);
        pg.append_step(vec![Action::column("lowercase", column("0002"), None)])
            .await
            .unwrap();
        states.push(snapshot(pg).await);

        let step = pg.session().await.recipe.steps()[0].clone();
        let mut params = Parameters::new();
        params.insert("default_value".into(), "Lille".into());
        pg.update_step(&step, params).await.unwrap();
        states.push(snapshot(pg).await);

        pg.update_step_order(2, 0).await.unwrap();
        states.push(snapshot(pg).await);

        let step = pg.session().await.recipe.steps()[1].clone();
        pg.remove_step(&step).await.unwrap();
        states.push(snapshot(pg).await);

        let ops = states.len() - 1;
        assert_eq!(pg.session().await.history.len(), ops);
        for window in states.windows(2) {
            assert_ne!(window[0], window[1]);
        }

        for expected in states.iter().rev().skip(1) {
            assert_eq!(pg.undo().await.unwrap(), MutationOutcome::Applied);
            assert_eq!(&snapshot(pg).await, expected);
        }
        assert_eq!(pg.undo().await.unwrap(), MutationOutcome::Unchanged);

        for expected in states.iter().skip(1) {
            assert_eq!(pg.redo().await.unwrap(), MutationOutcome::Applied);
            assert_eq!(&snapshot(pg).await, expected);
        }
        assert_eq!(pg.redo().await.unwrap(), MutationOutcome::Unchanged);
        assert!(pg.verify().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_pf006_cell_edit() {
        let f = fixture().await;
        let pg = &f.playground;
        let row = pg.session().await.grid.unwrap().records[0].clone();
        pg.edit_cell(&row, &column("0001"), "Donald", false, &Selection::default())
            .await
            .unwrap();

        let step = pg.session().await.recipe.steps()[0].clone();
        assert_eq!(step.action, "replace_on_value");
        assert_eq!(step.parameters["scope"], "cell");
        assert_eq!(step.parameters["row_id"], 0);
        assert_eq!(grid_column(pg, "0001").await, vec!["Donald", "john", "Ronald"]);
    }

    #[tokio::test]
    async fn test_pf006_cell_edit_update_all() {
        let f = fixture().await;
        let pg = &f.playground;
        let row = pg.session().await.grid.unwrap().records[0].clone();
        pg.edit_cell(&row, &column("0001"), "Donald", true, &Selection::default())
            .await
            .unwrap();
        assert_eq!(grid_column(pg, "0001").await, vec!["Donald", "john", "Donald"]);
    }

    #[tokio::test]
    async fn test_pf006_step_applier() {
        let f = fixture().await;
        let selection = Selection {
            columns: vec![column("0001"), column("0002")],
            ..Selection::default()
        };
        let applier = StepApplier::new("uppercase", Scope::Column, selection);
        let outcome = applier
            .apply(&f.playground, &Parameters::new())
            .await
            .unwrap();
        assert_eq!(outcome.step_count, 2);
        assert_eq!(grid_column(&f.playground, "0002").await[0], "PARIS");
    }

    #[tokio::test]
    async fn test_pf006_dataset_parameters_reresolve_threshold() {
        let csv = "name;city\nron;paris\nann;lyon\n";
        let f = fixture_with(csv, PlaygroundConfig::default()).await;
        let pg = &f.playground;
        pg.append_step(vec![upper("0000"), Action::column("lowercase", column("0000"), None)])
            .await
            .unwrap();
        let steps = pg.session().await.recipe.steps().to_vec();
        pg.toggle_step(&steps[1]).await.unwrap();
        assert_eq!(grid_column(pg, "0000").await[0], "RON;PARIS");

        let params = DatasetParameters {
            separator: ";".to_string(),
            ..DatasetParameters::default()
        };
        pg.change_dataset_parameters(params).await.unwrap();

        let session = pg.session().await;
        assert_eq!(session.grid.as_ref().unwrap().columns.len(), 2);
        assert_eq!(session.recipe.active_threshold_index(), Some(0));
        assert!(session.recipe.steps()[1].inactive);
        assert_eq!(grid_column(pg, "0000").await, vec!["RON", "ANN"]);
        assert_eq!(grid_column(pg, "0001").await, vec!["paris", "lyon"]);
        assert_eq!(session.dataset.unwrap().parameters.separator, ";");
    }

    #[tokio::test]
    async fn test_pf006_dataset_parameters_without_preparation() {
        let csv = "name;city\nron;paris\n";
        let f = fixture_with(csv, PlaygroundConfig::default()).await;
        let params = DatasetParameters {
            separator: ";".to_string(),
            ..DatasetParameters::default()
        };
        f.playground.change_dataset_parameters(params).await.unwrap();
        let session = f.playground.session().await;
        assert!(session.preparation.is_none());
        assert_eq!(session.grid.unwrap().columns.len(), 2);
    }

    #[tokio::test]
    async fn test_pf006_column_type_rollback() {
        let f = fixture().await;
        f.gateway.reject_columns.store(true, Ordering::SeqCst);
        let patch = ColumnPatch {
            column_type: Some("integer".to_string()),
            domain: None,
        };
        let err = f
            .playground
            .change_column_type("0000", patch)
            .await
            .unwrap_err();
        assert!(matches!(err, PlaygroundError::Backend(BackendError::Rejected(_))));

        let session = f.playground.session().await;
        assert_eq!(session.grid.unwrap().columns[0].column_type, "string");
        assert_eq!(f.view.count("show_grid"), 3);
        assert_eq!(f.view.loading_depth(), 0);
    }

    #[tokio::test]
    async fn test_pf006_column_type_applied() {
        let f = fixture().await;
        let patch = ColumnPatch {
            column_type: Some("integer".to_string()),
            domain: Some("ID".to_string()),
        };
        f.playground.change_column_type("0000", patch).await.unwrap();
        let column = f.playground.session().await.grid.unwrap().columns[0].clone();
        assert_eq!(column.column_type, "integer");
        assert_eq!(column.domain, "ID");

        let err = f
            .playground
            .change_column_type("0042", ColumnPatch::default())
            .await
            .unwrap_err();
        assert_eq!(err, PlaygroundError::UnknownColumn("0042".to_string()));
    }

    #[tokio::test]
    async fn test_pf006_failed_mutation_clears_loader() {
        let f = fixture().await;
        let pg = &f.playground;
        let err = pg
            .append_step(vec![Action::column("explode", column("0000"), None)])
            .await
            .unwrap_err();
        assert_eq!(
            err,
            PlaygroundError::Backend(BackendError::UnknownAction("explode".to_string()))
        );
        assert_eq!(f.view.loading_depth(), 0);
        assert_eq!(pg.session().await.state, SessionState::Loaded);
        pg.append_step(vec![upper("0000")]).await.unwrap();
    }

    #[tokio::test]
    async fn test_pf006_load_failure_reported() {
        let f = fixture().await;
        let err = f
            .playground
            .load_dataset(&DatasetId::new("missing"))
            .await
            .unwrap_err();
        assert!(matches!(err, PlaygroundError::Backend(BackendError::NotFound { .. })));
        assert_eq!(f.view.count("load_failed"), 1);
        let session = f.playground.session().await;
        assert_eq!(session.state, SessionState::Unloaded);
        assert!(session.dataset.is_none());
        assert_eq!(f.view.loading_depth(), 0);
    }

    #[tokio::test]
    async fn test_pf006_empty_dataset_rejected() {
        let gateway = Arc::new(LocalGateway::in_memory());
        let ds = DatasetId::new("empty");
        gateway
            .add_dataset(&ds, "empty", "id,name\n", DatasetParameters::default())
            .await
            .unwrap();
        let view = Arc::new(RecordingView::default());
        let pg = Playground::local(gateway, view.clone(), PlaygroundConfig::default());

        let err = pg.load_dataset(&ds).await.unwrap_err();
        assert_eq!(err, PlaygroundError::EmptyDataset(ds));
        assert_eq!(pg.session().await.state, SessionState::Unloaded);
        let err = pg.append_step(vec![upper("0000")]).await.unwrap_err();
        assert_eq!(err, PlaygroundError::Busy(SessionState::Unloaded));
        assert_eq!(view.loading_depth(), 0);
    }

    #[tokio::test]
    async fn test_pf006_load_preparation() {
        let f = fixture().await;
        f.playground.append_step(vec![upper("0001")]).await.unwrap();
        let id = f.playground.session().await.preparation_id().cloned().unwrap();

        let view = Arc::new(RecordingView::default());
        let other = Playground::new(
            f.gateway.clone(),
            f.gateway.clone(),
            view.clone(),
            PlaygroundConfig::default(),
        );
        other.load_preparation(&id).await.unwrap();
        let session = other.session().await;
        assert_eq!(session.recipe.len(), 1);
        assert_eq!(session.dataset.unwrap().name, "customers");
        assert!(!session.preparation.unwrap().draft);
        assert_eq!(view.count("show_recipe"), 1);

        // already open: nothing reloaded
        other.load_preparation(&id).await.unwrap();
        assert_eq!(view.count("loading_start"), 1);
    }

    #[tokio::test]
    async fn test_pf006_copy_steps_creates_preparation() {
        let f = fixture().await;
        f.playground.append_step(vec![upper("0001")]).await.unwrap();
        let reference = f.playground.session().await.preparation_id().cloned().unwrap();
        f.playground.close().await.unwrap();

        f.playground.load_dataset(&DatasetId::new("ds-1")).await.unwrap();
        f.playground.copy_steps(&reference).await.unwrap();
        let session = f.playground.session().await;
        assert_eq!(session.recipe.len(), 1);
        assert_ne!(session.preparation_id(), Some(&reference));

        f.playground.undo().await.unwrap();
        assert!(f.playground.session().await.recipe.is_empty());
    }

    #[tokio::test]
    async fn test_pf006_close_deletes_empty_draft() {
        let f = fixture().await;
        let pg = &f.playground;
        pg.append_step(vec![upper("0001")]).await.unwrap();
        pg.undo().await.unwrap();
        pg.close().await.unwrap();

        assert!(f.gateway.list_preparations().await.unwrap().is_empty());
        let session = pg.session().await;
        assert_eq!(session.state, SessionState::Closed);
        assert!(session.history.is_empty());
        assert_eq!(f.view.count("closed"), 1);
    }

    #[tokio::test]
    async fn test_pf006_close_keeps_saved_preparation() {
        let f = fixture().await;
        let pg = &f.playground;
        pg.append_step(vec![upper("0001")]).await.unwrap();
        pg.save_preparation(&FolderId::new("/sales"), "Customers clean")
            .await
            .unwrap();
        assert!(!pg.session().await.is_draft());
        pg.undo().await.unwrap();
        pg.close().await.unwrap();

        let listed = f.gateway.list_preparations().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].folder_id.as_str(), "/sales");
        assert_eq!(
            pg.append_step(vec![upper("0000")]).await.unwrap_err(),
            PlaygroundError::Busy(SessionState::Closed)
        );
    }

    #[tokio::test]
    async fn test_pf006_verify_reports_no_drift() {
        let f = fixture().await;
        let pg = &f.playground;
        pg.append_step(vec![upper("0000"), upper("0001")]).await.unwrap();
        pg.update_step_order(1, 0).await.unwrap();
        pg.undo().await.unwrap();
        assert!(pg.verify().await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_pf006_concurrent_appends_serialize() {
        let f = fixture().await;
        let a = {
            let pg = f.playground.clone();
            tokio::spawn(async move { pg.append_step(vec![upper("0000")]).await })
        };
        let b = {
            let pg = f.playground.clone();
            tokio::spawn(async move { pg.append_step(vec![upper("0001")]).await })
        };
        a.await.unwrap().unwrap();
        b.await.unwrap().unwrap();

        assert_eq!(f.gateway.list_preparations().await.unwrap().len(), 1);
        let session = f.playground.session().await;
        assert_eq!(session.recipe.len(), 2);
        assert_eq!(session.history.len(), 2);
        assert!(f.playground.verify().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_pf006_journal_records_events() {
        let dir = tempfile::tempdir().unwrap();
        let config = PlaygroundConfig {
            journal_dir: Some(dir.path().to_path_buf()),
            ..PlaygroundConfig::default()
        };
        let f = fixture_with(CSV, config).await;
        f.playground.append_step(vec![upper("0001")]).await.unwrap();
        f.playground.undo().await.unwrap();
        let id = f.playground.session().await.preparation_id().cloned().unwrap();

        let events = crate::tripwire::eventlog::read_events(dir.path(), &id).unwrap();
        assert_eq!(events.len(), 3);
        assert!(matches!(events[0].event, SessionEvent::PreparationCreated { draft: true, .. }));
        assert!(matches!(events[1].event, SessionEvent::StepsAppended { .. }));
        assert!(matches!(events[2].event, SessionEvent::HeadMoved { .. }));
    }
}
