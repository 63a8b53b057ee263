//! Core playground logic: types, actions, recipe mirror, history, orchestration.

pub mod action;
pub mod history;
pub mod parser;
pub mod playground;
pub mod recipe;
pub mod session;
pub mod types;
