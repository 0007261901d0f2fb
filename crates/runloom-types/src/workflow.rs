//! Workflow definition documents.
//!
//! `WorkflowDocument` is the declarative form loaded from YAML or JSON files.
//! It is compiled by runloom-core into an executable `WorkflowSpec` whose steps
//! carry compiled input selectors.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::selector::InputSelectorMap;

/// Upper bound for `retry_policy.max_attempts`.
pub const MAX_RETRY_ATTEMPTS: u32 = 5;

/// Default base delay between retry attempts.
pub const DEFAULT_BACKOFF_MS: u64 = 1000;

// ---------------------------------------------------------------------------
// Workflow Document
// ---------------------------------------------------------------------------

/// A workflow definition as authored on disk.
///
/// ```yaml
/// workflow_name: campaign-copy
/// version: 1.2.0
/// steps:
///   - step_id: brief
///     skill_id: llm.summarize
///     input_selector:
///       text: { source: trigger, path: brief }
///     cache_policy: { enabled: true, scope: global }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDocument {
    pub workflow_name: String,
    /// Semantic version string (e.g. "1.0.0").
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub steps: Vec<StepDocument>,
}

/// One step of a workflow document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepDocument {
    /// Unique within the workflow.
    pub step_id: String,
    /// Skill invoked by this step.
    pub skill_id: String,
    /// Step IDs this step depends on (DAG edges).
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub input_selector: InputSelectorMap,
    #[serde(default)]
    pub cache_policy: CachePolicy,
    #[serde(default)]
    pub retry_policy: RetryPolicy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

// ---------------------------------------------------------------------------
// Cache Policy
// ---------------------------------------------------------------------------

/// Whether and how a step's successful result is memoized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachePolicy {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub scope: CacheScope,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            enabled: false,
            scope: CacheScope::RunOnly,
        }
    }
}

/// Visibility of a cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheScope {
    /// Reusable by any run that computes the same input.
    Global,
    /// Reusable only inside the run that wrote it.
    #[default]
    RunOnly,
}

impl fmt::Display for CacheScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheScope::Global => write!(f, "global"),
            CacheScope::RunOnly => write!(f, "run_only"),
        }
    }
}

impl std::str::FromStr for CacheScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "global" => Ok(CacheScope::Global),
            "run_only" => Ok(CacheScope::RunOnly),
            other => Err(format!("invalid cache scope: '{other}'")),
        }
    }
}

// ---------------------------------------------------------------------------
// Retry Policy
// ---------------------------------------------------------------------------

/// Bounded exponential-backoff retry configuration for a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first (1..=5).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Base delay; attempt `n` waits `backoff_ms * 2^(n-1)` before retrying.
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
}

fn default_max_attempts() -> u32 {
    1
}

fn default_backoff_ms() -> u64 {
    DEFAULT_BACKOFF_MS
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_ms: default_backoff_ms(),
        }
    }
}

impl RetryPolicy {
    /// Whether `max_attempts` lies in the supported range.
    pub fn is_valid(&self) -> bool {
        (1..=MAX_RETRY_ATTEMPTS).contains(&self.max_attempts)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
