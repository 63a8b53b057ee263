//! PF-002: Recipe model, the client mirror of a preparation's step chain.
//!
//! Holds the ordered steps after the synthetic initial step and the active
//! threshold. Deactivation is a threshold, not a per-step toggle: every step
//! after the last active one is inactive.

use super::types::{PreparationDetails, Step, StepId};

#[derive(Debug, Clone, PartialEq)]
pub struct RecipeModel {
    initial: Step,
    steps: Vec<Step>,
    /// Number of leading active steps
    active_len: usize,
}

impl Default for RecipeModel {
    fn default() -> Self {
        Self {
            initial: Step::initial(StepId::new("")),
            steps: Vec::new(),
            active_len: 0,
        }
    }
}

impl RecipeModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a model from backend details.
    pub fn from_details(details: &PreparationDetails) -> Self {
        let mut model = Self::default();
        model.refresh(details);
        model
    }

    /// Replace the whole chain from authoritative details.
    ///
    /// The first step the backend flags inactive fixes the threshold.
    pub fn refresh(&mut self, details: &PreparationDetails) {
        let root = details.root().cloned().unwrap_or_else(|| StepId::new(""));
        self.initial = Step::initial(root);
        self.steps = details
            .steps
            .iter()
            .skip(1)
            .zip(details.actions.iter())
            .map(|(id, spec)| Step {
                id: id.clone(),
                action: spec.action.clone(),
                parameters: spec.parameters.clone(),
                inactive: false,
            })
            .collect();
        self.active_len = self
            .steps
            .iter()
            .position(|s| details.inactive.contains(&s.id))
            .unwrap_or(self.steps.len());
        self.apply_threshold();
    }

    /// Drop every step (no preparation).
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn initial_step(&self) -> &Step {
        &self.initial
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Chain head, or the initial step when empty.
    pub fn last_step(&self) -> &Step {
        self.steps.last().unwrap_or(&self.initial)
    }

    /// Last step not flagged inactive.
    pub fn last_active_step(&self) -> &Step {
        match self.active_threshold_index() {
            Some(i) => &self.steps[i],
            None => &self.initial,
        }
    }

    /// Index of the last active step. `None` means the initial step.
    pub fn active_threshold_index(&self) -> Option<usize> {
        self.active_len.checked_sub(1)
    }

    pub fn has_disabled_tail(&self) -> bool {
        self.active_len < self.steps.len()
    }

    pub fn step_index(&self, id: &StepId) -> Option<usize> {
        self.steps.iter().position(|s| &s.id == id)
    }

    /// Step preceding `id`, or the initial step if it is first (or unknown).
    pub fn previous_step(&self, id: &StepId) -> &Step {
        match self.step_index(id) {
            Some(i) if i > 0 => &self.steps[i - 1],
            _ => &self.initial,
        }
    }

    /// Positional lookup. `None` is the initial step; past the end falls back
    /// to the last step when `default_last` is set.
    pub fn get_step(&self, index: Option<usize>, default_last: bool) -> Option<&Step> {
        match index {
            None => Some(&self.initial),
            Some(i) if i < self.steps.len() => Some(&self.steps[i]),
            Some(_) if default_last => Some(self.last_step()),
            Some(_) => None,
        }
    }

    /// Step that would become the parent of something inserted at `index`.
    pub fn step_before(&self, index: usize) -> &Step {
        if index == 0 {
            &self.initial
        } else if index >= self.steps.len() {
            self.last_step()
        } else {
            &self.steps[index - 1]
        }
    }

    /// Activate up to and including `id`; deactivate everything after it.
    /// The initial step id deactivates the whole chain.
    pub fn disable_steps_after(&mut self, id: &StepId) {
        if id == &self.initial.id {
            self.active_len = 0;
        } else if let Some(i) = self.step_index(id) {
            self.active_len = i + 1;
        } else {
            return;
        }
        self.apply_threshold();
    }

    fn apply_threshold(&mut self) {
        let active_len = self.active_len;
        for (i, step) in self.steps.iter_mut().enumerate() {
            step.inactive = i >= active_len;
        }
    }
}
