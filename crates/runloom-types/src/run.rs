//! Run execution records.
//!
//! `Run` and `RunStep` are the persisted progress of one workflow execution;
//! `StepOutput` is the read-model entry downstream selectors consume.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Run
// ---------------------------------------------------------------------------

/// Overall status of a run.
///
/// Transitions are monotonic: `queued -> running -> completed | failed | cancelled`.
/// A queued run may also be cancelled before it starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Failed | RunStatus::Cancelled
        )
    }

    /// Whether moving from `self` to `next` respects the status order.
    ///
    /// `running -> running` is accepted so that resuming an interrupted run is
    /// idempotent.
    pub fn can_transition_to(self, next: RunStatus) -> bool {
        match (self, next) {
            (RunStatus::Queued, RunStatus::Running | RunStatus::Cancelled) => true,
            (RunStatus::Running, RunStatus::Running) => true,
            (RunStatus::Running, n) => n.is_terminal(),
            _ => false,
        }
    }

    /// Statuses from which a move to `self` is allowed.
    pub fn predecessors(self) -> &'static [RunStatus] {
        match self {
            RunStatus::Queued => &[],
            RunStatus::Running => &[RunStatus::Queued, RunStatus::Running],
            RunStatus::Completed | RunStatus::Failed => &[RunStatus::Running],
            RunStatus::Cancelled => &[RunStatus::Queued, RunStatus::Running],
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Queued => "queued",
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(RunStatus::Queued),
            "running" => Ok(RunStatus::Running),
            "completed" => Ok(RunStatus::Completed),
            "failed" => Ok(RunStatus::Failed),
            "cancelled" => Ok(RunStatus::Cancelled),
            other => Err(format!("invalid run status: '{other}'")),
        }
    }
}

/// One execution instance of a workflow for a given trigger payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    /// UUIDv7 run ID.
    pub id: Uuid,
    pub tenant_id: String,
    pub workflow_name: String,
    pub workflow_version: String,
    /// How this run was triggered (e.g. "manual", "api", "schedule").
    pub trigger_type: String,
    pub trigger_payload: Value,
    /// Prior run whose outputs an update workflow builds on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_run_id: Option<Uuid>,
    pub status: RunStatus,
    pub created_at: DateTime<Utc>,
    /// Set on the first transition to `running`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// Set on any terminal transition.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ---------------------------------------------------------------------------
// RunStep
// ---------------------------------------------------------------------------

/// Status of an individual step within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStepStatus {
    Pending,
    Running,
    Completed,
    Skipped,
    Failed,
}

impl RunStepStatus {
    /// Completed or skipped: dependents may start.
    pub fn satisfies_dependents(self) -> bool {
        matches!(self, RunStepStatus::Completed | RunStepStatus::Skipped)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RunStepStatus::Pending => "pending",
            RunStepStatus::Running => "running",
            RunStepStatus::Completed => "completed",
            RunStepStatus::Skipped => "skipped",
            RunStepStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for RunStepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RunStepStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RunStepStatus::Pending),
            "running" => Ok(RunStepStatus::Running),
            "completed" => Ok(RunStepStatus::Completed),
            "skipped" => Ok(RunStepStatus::Skipped),
            "failed" => Ok(RunStepStatus::Failed),
            other => Err(format!("invalid run step status: '{other}'")),
        }
    }
}

/// Persisted progress of one step in one run. Unique per `(run_id, step_id)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunStep {
    pub id: Uuid,
    pub run_id: Uuid,
    pub tenant_id: String,
    pub step_id: String,
    pub skill_id: String,
    pub status: RunStepStatus,
    /// Provisional at creation, overwritten with the execution-time hash.
    pub input_hash: String,
    /// 1-based, increments on each retry.
    pub attempt: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_artifact_ids: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_data: Option<Value>,
    #[serde(default)]
    pub cache_hit: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<StepErrorRecord>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl RunStep {
    /// A fresh `pending` row stamped at run creation.
    pub fn pending(
        run_id: Uuid,
        tenant_id: &str,
        step_id: &str,
        skill_id: &str,
        input_hash: String,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            run_id,
            tenant_id: tenant_id.to_string(),
            step_id: step_id.to_string(),
            skill_id: skill_id.to_string(),
            status: RunStepStatus::Pending,
            input_hash,
            attempt: 1,
            output_artifact_ids: None,
            output_data: None,
            cache_hit: false,
            duration_ms: None,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    /// Apply a patch in place. `None` fields are left unchanged.
    pub fn apply(&mut self, update: &RunStepUpdate) {
        if update.clear_outcome {
            self.output_artifact_ids = None;
            self.output_data = None;
            self.duration_ms = None;
            self.error = None;
            self.completed_at = None;
        }
        if let Some(status) = update.status {
            self.status = status;
        }
        if let Some(hash) = &update.input_hash {
            self.input_hash = hash.clone();
        }
        if let Some(attempt) = update.attempt {
            self.attempt = attempt;
        }
        if let Some(ids) = &update.output_artifact_ids {
            self.output_artifact_ids = Some(ids.clone());
        }
        if let Some(data) = &update.output_data {
            self.output_data = Some(data.clone());
        }
        if let Some(hit) = update.cache_hit {
            self.cache_hit = hit;
        }
        if let Some(ms) = update.duration_ms {
            self.duration_ms = Some(ms);
        }
        if let Some(error) = &update.error {
            self.error = Some(error.clone());
        }
        if let Some(at) = update.started_at {
            self.started_at = Some(at);
        }
        if let Some(at) = update.completed_at {
            self.completed_at = Some(at);
        }
    }

    /// The read-model view of this row, if it reached a terminal state.
    pub fn to_step_output(&self) -> Option<StepOutput> {
        let status = match self.status {
            RunStepStatus::Completed => StepOutputStatus::Completed,
            RunStepStatus::Skipped => StepOutputStatus::Skipped,
            RunStepStatus::Failed => StepOutputStatus::Failed,
            RunStepStatus::Pending | RunStepStatus::Running => return None,
        };
        Some(StepOutput {
            step_id: self.step_id.clone(),
            status,
            output_artifact_ids: self.output_artifact_ids.clone().unwrap_or_default(),
            data: self.output_data.clone(),
        })
    }
}

/// Single-row patch applied to a `RunStep`. `None` fields are left unchanged.
///
/// With `clear_outcome` set, the outcome of any previous execution
/// (artifacts, data, duration, error and `completed_at`) is wiped first, so
/// a re-run starts from a clean row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunStepUpdate {
    pub clear_outcome: bool,
    pub status: Option<RunStepStatus>,
    pub input_hash: Option<String>,
    pub attempt: Option<u32>,
    pub output_artifact_ids: Option<Vec<String>>,
    pub output_data: Option<Value>,
    pub cache_hit: Option<bool>,
    pub duration_ms: Option<u64>,
    pub error: Option<StepErrorRecord>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Step errors
// ---------------------------------------------------------------------------

/// Classification persisted with a failed step.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum StepErrorCode {
    /// Input computation failed; never retried.
    InputSelector,
    /// The skill reported a failure without its own code.
    Skill,
    /// The skill invocation itself errored.
    Execution,
    /// Attempts exhausted without any captured failure.
    MaxRetries,
    /// A skill-provided code.
    Custom(String),
}

impl StepErrorCode {
    pub fn as_str(&self) -> &str {
        match self {
            StepErrorCode::InputSelector => "INPUT_SELECTOR_ERROR",
            StepErrorCode::Skill => "SKILL_ERROR",
            StepErrorCode::Execution => "EXECUTION_ERROR",
            StepErrorCode::MaxRetries => "MAX_RETRIES",
            StepErrorCode::Custom(code) => code,
        }
    }
}

impl From<String> for StepErrorCode {
    fn from(code: String) -> Self {
        match code.as_str() {
            "INPUT_SELECTOR_ERROR" => StepErrorCode::InputSelector,
            "SKILL_ERROR" => StepErrorCode::Skill,
            "EXECUTION_ERROR" => StepErrorCode::Execution,
            "MAX_RETRIES" => StepErrorCode::MaxRetries,
            _ => StepErrorCode::Custom(code),
        }
    }
}

impl From<StepErrorCode> for String {
    fn from(code: StepErrorCode) -> Self {
        code.as_str().to_string()
    }
}

impl fmt::Display for StepErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal error persisted onto a `RunStep`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepErrorRecord {
    pub code: StepErrorCode,
    pub message: String,
    /// Attempt number reached when the step gave up.
    pub attempt: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

// ---------------------------------------------------------------------------
// StepOutput (read model)
// ---------------------------------------------------------------------------

/// Terminal status of a step as seen by downstream selectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepOutputStatus {
    Completed,
    Skipped,
    Failed,
}

impl StepOutputStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            StepOutputStatus::Completed => "completed",
            StepOutputStatus::Skipped => "skipped",
            StepOutputStatus::Failed => "failed",
        }
    }
}

/// The concluded result of one step, addressable by `step_id` within a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepOutput {
    pub step_id: String,
    pub status: StepOutputStatus,
    #[serde(default)]
    pub output_artifact_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl StepOutput {
    pub fn completed(step_id: &str, artifact_ids: Vec<String>, data: Option<Value>) -> Self {
        Self {
            step_id: step_id.to_string(),
            status: StepOutputStatus::Completed,
            output_artifact_ids: artifact_ids,
            data,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
