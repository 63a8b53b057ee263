//! PF-032: Recipe drift detection. Compares the client recipe to fresh backend details.
//!
//! After every orchestrated operation the recipe must match what a fresh
//! `get_details` returns, and the grid must match the backend content at the
//! last active step. A finding means the mirror went stale.

use super::hasher;
use crate::core::recipe::RecipeModel;
use crate::core::types::{GridContent, PreparationDetails, StepId};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriftKind {
    RootMismatch,
    StepCount,
    StepId,
    Action,
    Parameters,
    Content,
}

/// A single drift finding.
#[derive(Debug, Clone, PartialEq)]
pub struct DriftFinding {
    pub kind: DriftKind,
    /// Position in the recipe (None for chain-level findings)
    pub position: Option<usize>,
    pub expected: String,
    pub actual: String,
}

impl fmt::Display for DriftFinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.position {
            Some(i) => write!(
                f,
                "{:?} at step {}: backend {} / recipe {}",
                self.kind, i, self.expected, self.actual
            ),
            None => write!(
                f,
                "{:?}: backend {} / recipe {}",
                self.kind, self.expected, self.actual
            ),
        }
    }
}

fn finding(kind: DriftKind, position: Option<usize>, expected: &str, actual: &str) -> DriftFinding {
    DriftFinding {
        kind,
        position,
        expected: expected.to_string(),
        actual: actual.to_string(),
    }
}

/// Compare `recipe` against authoritative `details`.
pub fn detect_drift(recipe: &RecipeModel, details: &PreparationDetails) -> Vec<DriftFinding> {
    let mut findings = Vec::new();

    let root = details.root().map(StepId::as_str).unwrap_or("");
    if recipe.initial_step().id.as_str() != root {
        findings.push(finding(
            DriftKind::RootMismatch,
            None,
            root,
            recipe.initial_step().id.as_str(),
        ));
    }

    let expected_len = details.steps.len().saturating_sub(1);
    if recipe.len() != expected_len {
        findings.push(finding(
            DriftKind::StepCount,
            None,
            &expected_len.to_string(),
            &recipe.len().to_string(),
        ));
    }

    let backend = details.steps.iter().skip(1).zip(details.actions.iter());
    for (i, (step, (id, spec))) in recipe.steps().iter().zip(backend).enumerate() {
        if &step.id != id {
            findings.push(finding(DriftKind::StepId, Some(i), id.as_str(), step.id.as_str()));
        }
        if step.action != spec.action {
            findings.push(finding(DriftKind::Action, Some(i), &spec.action, &step.action));
        } else if step.parameters != spec.parameters {
            findings.push(finding(
                DriftKind::Parameters,
                Some(i),
                &serde_json::to_string(&spec.parameters).unwrap_or_default(),
                &serde_json::to_string(&step.parameters).unwrap_or_default(),
            ));
        }
    }

    findings
}

/// Compare the grid on screen with fresh backend content by fingerprint.
pub fn detect_content_drift(shown: &GridContent, fresh: &GridContent) -> Option<DriftFinding> {
    let expected = hasher::content_hash(fresh);
    let actual = hasher::content_hash(shown);
    (expected != actual).then(|| finding(DriftKind::Content, None, &expected, &actual))
}
