//! PF-030: BLAKE3 hashing for content-addressed step ids and grid fingerprints.

use crate::core::types::{ActionSpec, GridContent, StepId};

const ROOT_SEED: &str = "prepflow:root";

/// Hash a string. Returns `"blake3:{hex}"`.
pub fn hash_string(s: &str) -> String {
    format!("blake3:{}", blake3::hash(s.as_bytes()).to_hex())
}

/// Compute a composite hash from multiple components.
pub fn composite_hash(components: &[&str]) -> String {
    let mut hasher = blake3::Hasher::new();
    for c in components {
        hasher.update(c.as_bytes());
        hasher.update(b"\0");
    }
    format!("blake3:{}", hasher.finalize().to_hex())
}

/// Id of the initial no-op step every chain starts from.
pub fn root_step_id() -> StepId {
    StepId(hash_string(ROOT_SEED))
}

/// Id of a step: derived from its parent id and its action.
pub fn step_id(parent: &StepId, action: &ActionSpec) -> StepId {
    let body = serde_json::to_string(action).unwrap_or_default();
    StepId(composite_hash(&[parent.as_str(), &body]))
}

/// Fingerprint of the effective data (columns and records), ignoring step ids.
pub fn content_hash(content: &GridContent) -> String {
    let mut hasher = blake3::Hasher::new();
    for column in &content.columns {
        hasher.update(column.id.as_bytes());
        hasher.update(b"\0");
        hasher.update(column.name.as_bytes());
        hasher.update(b"\0");
        hasher.update(column.column_type.as_bytes());
        hasher.update(b"\n");
    }
    for record in &content.records {
        hasher.update(&record.tdp_id.to_le_bytes());
        for (k, v) in &record.values {
            hasher.update(k.as_bytes());
            hasher.update(b"=");
            hasher.update(v.as_bytes());
            hasher.update(b"\0");
        }
        hasher.update(b"\n");
    }
    format!("blake3:{}", hasher.finalize().to_hex())
}
