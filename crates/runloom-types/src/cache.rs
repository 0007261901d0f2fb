//! Step cache records.
//!
//! A cache entry memoizes a step's successful result under an opaque cache key
//! derived from `(workflow_name, step_id, input_hash)`. There is no TTL;
//! invalidation is explicit, by step or by workflow.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::workflow::CacheScope;

/// A persisted step cache entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub cache_key: String,
    pub workflow_name: String,
    pub step_id: String,
    pub input_hash: String,
    pub artifact_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    pub scope: CacheScope,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Parameters for an upsert into the step cache.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheWrite {
    pub cache_key: String,
    pub workflow_name: String,
    pub step_id: String,
    pub input_hash: String,
    pub artifact_ids: Vec<String>,
    pub data: Option<Value>,
    pub scope: CacheScope,
}

impl CacheWrite {
    /// Materialize the entry this write produces at `now`, keeping
    /// `created_at` from a previous entry when overwriting.
    pub fn into_entry(self, previous: Option<&CacheEntry>, now: DateTime<Utc>) -> CacheEntry {
        CacheEntry {
            cache_key: self.cache_key,
            workflow_name: self.workflow_name,
            step_id: self.step_id,
            input_hash: self.input_hash,
            artifact_ids: self.artifact_ids,
            data: self.data,
            scope: self.scope,
            created_at: previous.map(|p| p.created_at).unwrap_or(now),
            updated_at: now,
        }
    }
}
