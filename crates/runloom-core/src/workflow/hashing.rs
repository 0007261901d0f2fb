//! Input hashing and cache key construction.

use runloom_types::workflow::CacheScope;
use serde_json::Value;
use uuid::Uuid;

use crate::service::hash::{ContentHasher, hash_value};

/// Hash of a step's resolved input object. Key order does not matter.
pub fn compute_input_hash(hasher: &dyn ContentHasher, input: &Value) -> String {
    hash_value(hasher, input)
}

/// Hash stamped on step rows at run creation, before any dependency output
/// exists. Replaced by the execution-time hash once the step runs.
pub fn provisional_input_hash(hasher: &dyn ContentHasher, trigger_payload: &Value) -> String {
    hash_value(hasher, trigger_payload)
}

/// Separates the components of a cache key. Workflow names and step ids
/// may not contain it.
pub const KEY_SEPARATOR: char = ':';

/// Cache key for `(workflow, step, input_hash)`.
///
/// `run_only` keys also carry the run id, so an entry is never visible to
/// another run. `global` keys are shared by every run.
pub fn cache_key(
    workflow_name: &str,
    step_id: &str,
    input_hash: &str,
    scope: CacheScope,
    run_id: Uuid,
) -> String {
    match scope {
        CacheScope::Global => format!("{workflow_name}:{step_id}:{input_hash}"),
        CacheScope::RunOnly => format!("{workflow_name}:{step_id}:run-{run_id}:{input_hash}"),
    }
}
