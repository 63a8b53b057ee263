//! Prepflow: data-preparation recipe orchestration.
//!
//! A preparation is a chain of content-addressed steps applied to a dataset.
//! The playground keeps a client-side recipe mirror in sync with the backend,
//! records every mutation as an immutable head snapshot for undo/redo, and
//! reloads the grid after each change.

pub mod cli;
pub mod core;
pub mod error;
pub mod gateway;
pub mod transforms;
pub mod tripwire;
