//! Run context: the read model selectors and the executor operate over.
//!
//! `RunContext` is an immutable snapshot -- trigger payload, per-step outputs
//! and artifact lists, plus the optional base run of an update workflow.
//! `RunState` accumulates outputs as steps conclude. Maps are shared behind
//! `Arc` and copied on write, so a snapshot handed to one step never observes
//! later merges.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use runloom_types::run::{RunStep, StepOutput, StepOutputStatus};
use serde_json::Value;
use uuid::Uuid;

/// Step outputs keyed by step ID.
pub type OutputMap = BTreeMap<String, Arc<StepOutput>>;

/// Artifact ids keyed by step ID.
pub type ArtifactMap = BTreeMap<String, Vec<String>>;

// ---------------------------------------------------------------------------
// Base run
// ---------------------------------------------------------------------------

/// Outputs of a prior run referenced by an update workflow. Populated once,
/// never mutated afterwards.
#[derive(Debug, Clone)]
pub struct BaseRunView {
    pub run_id: Uuid,
    outputs: Arc<OutputMap>,
    artifacts: Arc<ArtifactMap>,
}

impl BaseRunView {
    pub fn new(run_id: Uuid, outputs: impl IntoIterator<Item = StepOutput>) -> Self {
        let mut map = OutputMap::new();
        let mut artifacts = ArtifactMap::new();
        for output in outputs {
            artifacts.insert(output.step_id.clone(), output.output_artifact_ids.clone());
            map.insert(output.step_id.clone(), Arc::new(output));
        }
        Self {
            run_id,
            outputs: Arc::new(map),
            artifacts: Arc::new(artifacts),
        }
    }

    /// Build from a prior run's persisted step rows; only concluded steps
    /// contribute.
    pub fn from_run_steps(run_id: Uuid, steps: &[RunStep]) -> Self {
        Self::new(run_id, steps.iter().filter_map(RunStep::to_step_output))
    }

    pub fn output(&self, step_id: &str) -> Option<&StepOutput> {
        self.outputs.get(step_id).map(Arc::as_ref)
    }

    pub fn artifacts(&self, step_id: &str) -> Option<&[String]> {
        self.artifacts.get(step_id).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.outputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }
}

// ---------------------------------------------------------------------------
// RunContext
// ---------------------------------------------------------------------------

/// Read-only view passed to selectors during one step's input computation.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub run_id: Uuid,
    pub tenant_id: String,
    pub workflow_name: String,
    trigger_payload: Arc<Value>,
    step_outputs: Arc<OutputMap>,
    artifacts: Arc<ArtifactMap>,
    base_run: Option<BaseRunView>,
}

impl RunContext {
    pub fn trigger_payload(&self) -> &Value {
        &self.trigger_payload
    }

    pub fn step_output(&self, step_id: &str) -> Option<&StepOutput> {
        self.step_outputs.get(step_id).map(Arc::as_ref)
    }

    pub fn step_outputs(&self) -> impl Iterator<Item = &StepOutput> {
        self.step_outputs.values().map(Arc::as_ref)
    }

    pub fn artifacts(&self, step_id: &str) -> Option<&[String]> {
        self.artifacts.get(step_id).map(Vec::as_slice)
    }

    pub fn base_run(&self) -> Option<&BaseRunView> {
        self.base_run.as_ref()
    }

    pub fn base_run_id(&self) -> Option<Uuid> {
        self.base_run.as_ref().map(|b| b.run_id)
    }

    /// Step ids whose outputs let dependents start (completed or skipped).
    pub fn satisfied_step_ids(&self) -> BTreeSet<String> {
        self.step_outputs
            .values()
            .filter(|o| {
                matches!(
                    o.status,
                    StepOutputStatus::Completed | StepOutputStatus::Skipped
                )
            })
            .map(|o| o.step_id.clone())
            .collect()
    }
}

// ---------------------------------------------------------------------------
// RunState
// ---------------------------------------------------------------------------

/// Accumulates step outputs for one run.
///
/// `record` merges one concluded step into the state; `snapshot` hands out a
/// cheap immutable `RunContext`. Outputs are never removed or replaced once
/// concluded, except that a later attempt of a failed step may overwrite its
/// failed output.
#[derive(Debug, Clone)]
pub struct RunState {
    ctx: RunContext,
}

impl RunState {
    pub fn new(
        run_id: Uuid,
        tenant_id: &str,
        workflow_name: &str,
        trigger_payload: Value,
        base_run: Option<BaseRunView>,
    ) -> Self {
        Self {
            ctx: RunContext {
                run_id,
                tenant_id: tenant_id.to_string(),
                workflow_name: workflow_name.to_string(),
                trigger_payload: Arc::new(trigger_payload),
                step_outputs: Arc::new(OutputMap::new()),
                artifacts: Arc::new(ArtifactMap::new()),
                base_run,
            },
        }
    }

    /// Merge one concluded step output.
    ///
    /// Copy-on-write: snapshots taken earlier keep their own maps.
    pub fn record(&mut self, output: StepOutput) {
        if let Some(existing) = self.ctx.step_outputs.get(&output.step_id) {
            if existing.status != StepOutputStatus::Failed {
                tracing::warn!(
                    step_id = output.step_id.as_str(),
                    "ignoring second output for concluded step"
                );
                return;
            }
        }
        Arc::make_mut(&mut self.ctx.artifacts)
            .insert(output.step_id.clone(), output.output_artifact_ids.clone());
        Arc::make_mut(&mut self.ctx.step_outputs)
            .insert(output.step_id.clone(), Arc::new(output));
    }

    /// Consuming form of [`RunState::record`].
    pub fn with_output(mut self, output: StepOutput) -> Self {
        self.record(output);
        self
    }

    pub fn snapshot(&self) -> RunContext {
        self.ctx.clone()
    }

    pub fn context(&self) -> &RunContext {
        &self.ctx
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
