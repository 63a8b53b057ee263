//! Tripwire: step hashing, the session journal and recipe drift checks.

pub mod drift;
pub mod eventlog;
pub mod hasher;
