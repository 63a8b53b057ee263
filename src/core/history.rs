//! PF-004: Linear undo/redo history of immutable head snapshots.
//!
//! Each entry captures the step ids (or names) it restores at the time the
//! mutation ran. Replaying an entry never re-derives positions from the
//! current recipe.

use super::types::{PreparationId, StepId};

/// State an undo or redo restores.
#[derive(Debug, Clone, PartialEq)]
pub enum HistoryTarget {
    /// Point the preparation head at `step_id` and focus `focus`.
    Head {
        preparation_id: PreparationId,
        step_id: StepId,
        focus: Option<String>,
    },
    /// Rename the preparation back (or forward) to `name`.
    Name {
        preparation_id: PreparationId,
        name: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    pub label: String,
    pub undo: HistoryTarget,
    pub redo: HistoryTarget,
}

/// Linear history. Entries before the cursor can be undone, entries at or
/// after it can be redone.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UndoRedoStack {
    entries: Vec<HistoryEntry>,
    cursor: usize,
}

impl UndoRedoStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push an entry, discarding any forward (redo) history.
    pub fn add_action(&mut self, entry: HistoryEntry) {
        if self.cursor < self.entries.len() {
            log::debug!(
                "discarding {} redo entr(ies) after '{}'",
                self.entries.len() - self.cursor,
                entry.label
            );
        }
        self.entries.truncate(self.cursor);
        self.entries.push(entry);
        self.cursor = self.entries.len();
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.cursor = 0;
    }

    pub fn can_undo(&self) -> bool {
        self.cursor > 0
    }

    pub fn can_redo(&self) -> bool {
        self.cursor < self.entries.len()
    }

    /// Entry the next undo replays.
    pub fn next_undo(&self) -> Option<&HistoryEntry> {
        self.cursor.checked_sub(1).and_then(|i| self.entries.get(i))
    }

    /// Entry the next redo replays.
    pub fn next_redo(&self) -> Option<&HistoryEntry> {
        self.entries.get(self.cursor)
    }

    /// Record that the next undo was replayed successfully.
    pub fn commit_undo(&mut self) {
        if self.can_undo() {
            self.cursor -= 1;
        }
    }

    /// Record that the next redo was replayed successfully.
    pub fn commit_redo(&mut self) {
        if self.can_redo() {
            self.cursor += 1;
        }
    }

    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
