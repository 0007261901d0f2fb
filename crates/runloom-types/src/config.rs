//! Engine configuration types.
//!
//! `EngineConfig` represents the top-level `config.toml` in the data directory.

use serde::{Deserialize, Serialize};

/// Top-level configuration for the run engine.
///
/// Loaded from `~/.runloom/config.toml`. All fields have defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Database URL override. When absent the data directory default is used.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_url: Option<String>,

    /// Directory scanned for workflow definition files, relative to the data dir
    /// unless absolute.
    #[serde(default = "default_workflows_dir")]
    pub workflows_dir: String,

    /// Maximum number of steps a single run may execute.
    #[serde(default = "default_max_run_steps")]
    pub max_run_steps: u32,

    /// Wall-clock budget for one `execute_run` call.
    #[serde(default = "default_run_timeout_secs")]
    pub run_timeout_secs: u64,

    /// Global switch for step caching. When false, cache policies are ignored.
    #[serde(default = "default_cache_enabled")]
    pub cache_enabled: bool,

    /// Upper bound for a single retry backoff delay.
    #[serde(default = "default_backoff_ceiling_ms")]
    pub backoff_ceiling_ms: u64,
}

fn default_workflows_dir() -> String {
    "workflows".to_string()
}

fn default_max_run_steps() -> u32 {
    100
}

fn default_run_timeout_secs() -> u64 {
    1800
}

fn default_cache_enabled() -> bool {
    true
}

fn default_backoff_ceiling_ms() -> u64 {
    60_000
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            workflows_dir: default_workflows_dir(),
            max_run_steps: default_max_run_steps(),
            run_timeout_secs: default_run_timeout_secs(),
            cache_enabled: default_cache_enabled(),
            backoff_ceiling_ms: default_backoff_ceiling_ms(),
        }
    }
}
