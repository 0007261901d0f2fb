//! Run coordinator: creates runs and drives them through their steps.
//!
//! Steps run sequentially in topological order. Execution is resumable:
//! steps whose rows are already `completed` or `skipped` are folded into the
//! run state and not executed again. The first failed step fails the run.
//! Cancellation and the run timeout are checked between steps, so a run is
//! never abandoned with a half-written step outcome.

use std::sync::Arc;
use std::time::{Duration, Instant};

use runloom_types::error::RepositoryError;
use runloom_types::run::{Run, RunStatus, RunStep};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::context::{BaseRunView, RunContext, RunState};
use super::dag::{GraphError, topological_sort};
use super::definition::WorkflowError;
use super::executor::{ExecutorError, StepExecutionResult, StepExecutor};
use super::hashing::provisional_input_hash;
use super::registry::WorkflowRegistry;
use super::retry::Sleeper;
use super::spec::WorkflowSpec;
use crate::repository::cache::StepCacheRepository;
use crate::repository::run::RunRepository;
use crate::skill::SkillExecutor;

/// Default maximum number of steps a single run may contain.
pub const DEFAULT_MAX_RUN_STEPS: usize = 100;

/// Default overall run timeout (30 minutes).
pub const DEFAULT_RUN_TIMEOUT_SECS: u64 = 1800;

// ---------------------------------------------------------------------------
// Requests, outcomes, errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
pub struct CoordinatorConfig {
    pub max_run_steps: usize,
    pub run_timeout: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            max_run_steps: DEFAULT_MAX_RUN_STEPS,
            run_timeout: Duration::from_secs(DEFAULT_RUN_TIMEOUT_SECS),
        }
    }
}

/// Parameters for [`RunCoordinator::create_run`].
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub tenant_id: String,
    pub workflow_name: String,
    /// Exact version, or the latest registered when `None`.
    pub workflow_version: Option<String>,
    pub trigger_type: String,
    pub trigger_payload: Value,
    /// Prior run an update workflow reads through `base_run` selectors.
    pub base_run_id: Option<Uuid>,
}

impl RunRequest {
    pub fn new(tenant_id: &str, workflow_name: &str, trigger_payload: Value) -> Self {
        Self {
            tenant_id: tenant_id.to_string(),
            workflow_name: workflow_name.to_string(),
            workflow_version: None,
            trigger_type: "manual".to_string(),
            trigger_payload,
            base_run_id: None,
        }
    }

    pub fn with_base_run(mut self, base_run_id: Uuid) -> Self {
        self.base_run_id = Some(base_run_id);
        self
    }
}

/// Result of driving a run.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub run_id: Uuid,
    pub status: RunStatus,
    /// Steps executed by this call, in execution order.
    pub executed: Vec<StepExecutionResult>,
    /// Steps that were already concluded and were not executed again.
    pub resumed: Vec<String>,
    pub error: Option<String>,
    pub context: RunContext,
}

#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("workflow '{name}' not found{}", version_suffix(.version))]
    WorkflowNotFound {
        name: String,
        version: Option<String>,
    },

    #[error("run {0} not found")]
    RunNotFound(Uuid),

    #[error("base run {0} not found")]
    BaseRunNotFound(Uuid),

    #[error("run {run_id} already finished with status {status}")]
    AlreadyFinished { run_id: Uuid, status: RunStatus },

    #[error("workflow '{workflow}' has {steps} steps, more than the limit of {max}")]
    TooManySteps {
        workflow: String,
        steps: usize,
        max: usize,
    },

    #[error(transparent)]
    Workflow(#[from] WorkflowError),

    #[error("graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),

    #[error("executor error: {0}")]
    Executor(#[from] ExecutorError),
}

fn version_suffix(version: &Option<String>) -> String {
    version
        .as_deref()
        .map(|v| format!(" at version {v}"))
        .unwrap_or_default()
}

// ---------------------------------------------------------------------------
// RunCoordinator
// ---------------------------------------------------------------------------

pub struct RunCoordinator<R, C, S, D>
where
    R: RunRepository,
    C: StepCacheRepository,
    S: SkillExecutor,
    D: Sleeper,
{
    registry: Arc<WorkflowRegistry>,
    runs: Arc<R>,
    executor: StepExecutor<R, C, S, D>,
    config: CoordinatorConfig,
}

impl<R, C, S, D> RunCoordinator<R, C, S, D>
where
    R: RunRepository,
    C: StepCacheRepository,
    S: SkillExecutor,
    D: Sleeper,
{
    pub fn new(
        registry: Arc<WorkflowRegistry>,
        runs: Arc<R>,
        executor: StepExecutor<R, C, S, D>,
    ) -> Self {
        Self {
            registry,
            runs,
            executor,
            config: CoordinatorConfig::default(),
        }
    }

    pub fn with_config(mut self, config: CoordinatorConfig) -> Self {
        self.config = config;
        self
    }

    fn resolve_workflow(
        &self,
        name: &str,
        version: Option<&str>,
    ) -> Result<Arc<WorkflowSpec>, RunError> {
        self.registry
            .get_workflow(name, version)?
            .ok_or_else(|| RunError::WorkflowNotFound {
                name: name.to_string(),
                version: version.map(str::to_string),
            })
    }

    fn check_step_limit(&self, spec: &WorkflowSpec) -> Result<(), RunError> {
        if spec.steps.len() > self.config.max_run_steps {
            return Err(RunError::TooManySteps {
                workflow: spec.workflow_name.clone(),
                steps: spec.steps.len(),
                max: self.config.max_run_steps,
            });
        }
        Ok(())
    }

    /// Persist a `queued` run and one `pending` row per step, in
    /// topological order, stamped with the provisional input hash.
    pub async fn create_run(&self, request: RunRequest) -> Result<Run, RunError> {
        let spec = self.resolve_workflow(
            &request.workflow_name,
            request.workflow_version.as_deref(),
        )?;
        self.check_step_limit(&spec)?;

        if let Some(base_id) = request.base_run_id {
            if self
                .runs
                .get_run(&base_id, &request.tenant_id)
                .await?
                .is_none()
            {
                return Err(RunError::BaseRunNotFound(base_id));
            }
        }

        let order = topological_sort(&spec.steps)?;

        let run = Run {
            id: Uuid::now_v7(),
            tenant_id: request.tenant_id,
            workflow_name: spec.workflow_name.clone(),
            workflow_version: spec.version.to_string(),
            trigger_type: request.trigger_type,
            trigger_payload: request.trigger_payload,
            base_run_id: request.base_run_id,
            status: RunStatus::Queued,
            created_at: chrono::Utc::now(),
            started_at: None,
            completed_at: None,
            error: None,
        };
        self.runs.create_run(&run).await?;

        let provisional = provisional_input_hash(self.executor.hasher(), &run.trigger_payload);
        for step in order {
            self.runs
                .create_run_step(&RunStep::pending(
                    run.id,
                    &run.tenant_id,
                    &step.step_id,
                    &step.skill_id,
                    provisional.clone(),
                ))
                .await?;
        }

        tracing::info!(
            run_id = %run.id,
            tenant = run.tenant_id.as_str(),
            workflow = run.workflow_name.as_str(),
            version = run.workflow_version.as_str(),
            steps = spec.steps.len(),
            "run created"
        );
        Ok(run)
    }

    /// Drive a run to a terminal status, skipping steps already concluded.
    pub async fn execute_run(
        &self,
        run_id: Uuid,
        tenant_id: &str,
        cancel: &CancellationToken,
    ) -> Result<RunOutcome, RunError> {
        let run = self
            .runs
            .get_run(&run_id, tenant_id)
            .await?
            .ok_or(RunError::RunNotFound(run_id))?;
        if run.status.is_terminal() {
            return Err(RunError::AlreadyFinished {
                run_id,
                status: run.status,
            });
        }

        let spec = self.resolve_workflow(&run.workflow_name, Some(&run.workflow_version))?;

        let base = match run.base_run_id {
            Some(base_id) => {
                let steps = self.runs.list_run_steps(&base_id, tenant_id).await?;
                Some(BaseRunView::from_run_steps(base_id, &steps))
            }
            None => None,
        };
        let mut state = RunState::new(
            run_id,
            tenant_id,
            &run.workflow_name,
            run.trigger_payload.clone(),
            base,
        );

        if cancel.is_cancelled() {
            return self
                .conclude(&run, state, Vec::new(), Vec::new(), RunStatus::Cancelled, None)
                .await;
        }

        self.runs
            .update_run_status(&run_id, tenant_id, RunStatus::Running, None)
            .await?;

        // Resume: fold concluded rows into the state.
        let mut resumed = Vec::new();
        for row in self.runs.list_run_steps(&run_id, tenant_id).await? {
            if row.status.satisfies_dependents() {
                if let Some(output) = row.to_step_output() {
                    resumed.push(row.step_id.clone());
                    state.record(output);
                }
            }
        }

        if let Err(e) = self.check_step_limit(&spec) {
            let message = e.to_string();
            return self
                .conclude(&run, state, Vec::new(), resumed, RunStatus::Failed, Some(message))
                .await;
        }

        tracing::info!(
            run_id = %run_id,
            workflow = run.workflow_name.as_str(),
            skipping = resumed.len(),
            "executing run"
        );

        let started = Instant::now();
        let mut executed = Vec::new();
        let drive = self.drive(&spec, &mut state, &resumed, &mut executed, cancel);
        let (status, error) = match tokio::time::timeout(self.config.run_timeout, drive).await {
            Ok(Ok(done)) => done,
            Ok(Err(ExecutorError::Cancelled { step_id })) => (
                RunStatus::Cancelled,
                Some(format!("cancelled during step '{step_id}'")),
            ),
            Ok(Err(e)) => {
                let message = e.to_string();
                if let Err(update_err) = self
                    .runs
                    .update_run_status(&run_id, tenant_id, RunStatus::Failed, Some(&message))
                    .await
                {
                    tracing::error!(run_id = %run_id, error = %update_err, "failed to mark run failed");
                }
                return Err(e.into());
            }
            Err(_elapsed) => (
                RunStatus::Failed,
                Some(format!(
                    "run timed out after {}s",
                    self.config.run_timeout.as_secs()
                )),
            ),
        };

        tracing::info!(
            run_id = %run_id,
            status = %status,
            executed = executed.len(),
            duration_ms = started.elapsed().as_millis() as u64,
            "run finished"
        );
        self.conclude(&run, state, executed, resumed, status, error)
            .await
    }

    /// Execute the unfinished steps in topological order.
    async fn drive(
        &self,
        spec: &WorkflowSpec,
        state: &mut RunState,
        resumed: &[String],
        executed: &mut Vec<StepExecutionResult>,
        cancel: &CancellationToken,
    ) -> Result<(RunStatus, Option<String>), ExecutorError> {
        let order = match topological_sort(&spec.steps) {
            Ok(order) => order,
            Err(e) => return Ok((RunStatus::Failed, Some(e.to_string()))),
        };

        for step in order {
            if resumed.iter().any(|id| id == &step.step_id) {
                tracing::debug!(step_id = step.step_id.as_str(), "skipping concluded step");
                continue;
            }
            if cancel.is_cancelled() {
                return Ok((RunStatus::Cancelled, Some("run cancelled".to_string())));
            }

            let result = self.executor.execute_step(step, &state.snapshot()).await?;
            state.record(result.output.clone());
            let failure = result.error.as_ref().map(|e| {
                format!(
                    "step '{}' failed: {}: {}",
                    step.step_id, e.code, e.message
                )
            });
            executed.push(result);

            if let Some(message) = failure {
                return Ok((RunStatus::Failed, Some(message)));
            }
        }

        Ok((RunStatus::Completed, None))
    }

    async fn conclude(
        &self,
        run: &Run,
        state: RunState,
        executed: Vec<StepExecutionResult>,
        resumed: Vec<String>,
        status: RunStatus,
        error: Option<String>,
    ) -> Result<RunOutcome, RunError> {
        self.runs
            .update_run_status(&run.id, &run.tenant_id, status, error.as_deref())
            .await?;
        Ok(RunOutcome {
            run_id: run.id,
            status,
            executed,
            resumed,
            error,
            context: state.snapshot(),
        })
    }

    /// Cancel a run that has not finished yet.
    pub async fn cancel_run(&self, run_id: Uuid, tenant_id: &str) -> Result<(), RunError> {
        self.runs
            .update_run_status(&run_id, tenant_id, RunStatus::Cancelled, Some("cancelled by user"))
            .await
            .map_err(|e| match e {
                RepositoryError::NotFound => RunError::RunNotFound(run_id),
                other => other.into(),
            })?;
        tracing::info!(run_id = %run_id, "run cancelled");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::skill::SkillResult;
    use crate::testing::{
        CanonicalHasher, MemoryCache, MemoryRuns, RecordingSleeper, ScriptedSkills, artifact,
    };
    use crate::workflow::definition::WorkflowCompiler;
    use crate::workflow::retry::TokioSleeper;
    use runloom_types::run::{RunStepStatus, RunStepUpdate, StepErrorCode};
    use serde_json::json;

    const CAMPAIGN: &str = r#"
workflow_name: campaign
version: 1.0.0
steps:
  - step_id: compose
    skill_id: layout.compose
    depends_on: [headline, image]
    input_selector:
      headline: { source: step_output, step_id: headline, path: headline }
      image: { source: step_output, step_id: image, path: "artifacts[0]" }
  - step_id: headline
    skill_id: llm.headline
    input_selector:
      brief: { source: trigger, path: brief }
  - step_id: image
    skill_id: image.render
    input_selector:
      prompt: { source: trigger, path: brief }
"#;

    const CAMPAIGN_UPDATE: &str = r#"
workflow_name: campaign-update
version: 1.0.0
steps:
  - step_id: headline
    skill_id: llm.headline
    input_selector:
      previous: { source: base_run, step_id: headline, path: headline }
      brief: { source: trigger, path: brief }
"#;

    type Coordinator = RunCoordinator<MemoryRuns, MemoryCache, ScriptedSkills, RecordingSleeper>;

    struct Fixture {
        runs: Arc<MemoryRuns>,
        skills: Arc<ScriptedSkills>,
        coordinator: Coordinator,
    }

    fn registry() -> Arc<WorkflowRegistry> {
        let registry = WorkflowRegistry::new();
        let compiler = WorkflowCompiler::default();
        for yaml in [CAMPAIGN, CAMPAIGN_UPDATE] {
            registry.register(compiler.compile_yaml(yaml).unwrap()).unwrap();
        }
        Arc::new(registry)
    }

    fn headline(text: &str) -> Result<SkillResult, crate::skill::SkillInvocationError> {
        Ok(SkillResult::success(
            Some(json!({"headline": text})),
            vec![artifact("art-headline")],
        ))
    }

    fn fixture(skills: ScriptedSkills) -> Fixture {
        let runs = Arc::new(MemoryRuns::default());
        let skills = Arc::new(skills);
        let executor = StepExecutor::new(
            Arc::clone(&runs),
            Arc::new(MemoryCache::default()),
            Arc::clone(&skills),
            Arc::new(RecordingSleeper::default()),
            Arc::new(CanonicalHasher),
        );
        Fixture {
            coordinator: RunCoordinator::new(registry(), Arc::clone(&runs), executor),
            runs,
            skills,
        }
    }

    fn request() -> RunRequest {
        RunRequest::new("acme", "campaign", json!({"brief": "Spring sale"}))
    }

    #[tokio::test]
    async fn test_create_run_stamps_pending_rows_in_order() {
        let fx = fixture(ScriptedSkills::default());
        let run = fx.coordinator.create_run(request()).await.unwrap();

        assert_eq!(run.status, RunStatus::Queued);
        assert_eq!(run.workflow_version, "1.0.0");

        let rows = fx.runs.list_run_steps(&run.id, "acme").await.unwrap();
        let ids: Vec<&str> = rows.iter().map(|r| r.step_id.as_str()).collect();
        assert_eq!(ids, vec!["headline", "image", "compose"]);
        for row in &rows {
            assert_eq!(row.status, RunStepStatus::Pending);
            assert_eq!(row.attempt, 1);
            assert_eq!(row.input_hash, r#"{"brief":"Spring sale"}"#);
        }
    }

    #[tokio::test]
    async fn test_create_run_unknown_workflow_and_base() {
        let fx = fixture(ScriptedSkills::default());
        let err = fx
            .coordinator
            .create_run(RunRequest::new("acme", "ghost", json!({})))
            .await
            .unwrap_err();
        assert!(matches!(err, RunError::WorkflowNotFound { .. }));

        let err = fx
            .coordinator
            .create_run(request().with_base_run(Uuid::now_v7()))
            .await
            .unwrap_err();
        assert!(matches!(err, RunError::BaseRunNotFound(_)));
    }

    #[tokio::test]
    async fn test_execute_run_completes_fan_in() {
        let fx = fixture(ScriptedSkills::default().script("llm.headline", [headline("Big Sale")]));
        let run = fx.coordinator.create_run(request()).await.unwrap();

        let outcome = fx
            .coordinator
            .execute_run(run.id, "acme", &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.status, RunStatus::Completed);
        assert_eq!(outcome.executed.len(), 3);
        assert!(outcome.error.is_none());
        assert_eq!(
            fx.skills.calls_to("layout.compose"),
            vec![json!({"headline": "Big Sale", "image": "image.render-artifact"})]
        );

        let stored = fx.runs.run(run.id);
        assert_eq!(stored.status, RunStatus::Completed);
        assert!(stored.started_at.is_some());
        assert!(stored.completed_at.is_some());
        for row in fx.runs.list_run_steps(&run.id, "acme").await.unwrap() {
            assert_eq!(row.status, RunStepStatus::Completed, "{}", row.step_id);
        }

        let err = fx
            .coordinator
            .execute_run(run.id, "acme", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RunError::AlreadyFinished { status: RunStatus::Completed, .. }));
    }

    #[tokio::test]
    async fn test_first_failure_fails_run() {
        let fx = fixture(
            ScriptedSkills::default()
                .script("image.render", [Ok(SkillResult::failure("nsfw", Some("POLICY")))]),
        );
        let run = fx.coordinator.create_run(request()).await.unwrap();

        let outcome = fx
            .coordinator
            .execute_run(run.id, "acme", &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.status, RunStatus::Failed);
        let error = outcome.error.unwrap();
        assert!(error.contains("step 'image' failed: POLICY"), "got: {error}");
        assert!(fx.skills.calls_to("layout.compose").is_empty());
        assert_eq!(fx.runs.step(run.id, "compose").status, RunStepStatus::Pending);
        assert_eq!(
            fx.runs.step(run.id, "image").error.unwrap().code,
            StepErrorCode::Custom("POLICY".into())
        );
        assert_eq!(fx.runs.run(run.id).error.as_deref(), Some(error.as_str()));
    }

    #[tokio::test]
    async fn test_resume_skips_concluded_steps() {
        let fx = fixture(ScriptedSkills::default());
        let run = fx.coordinator.create_run(request()).await.unwrap();
        fx.runs
            .update_run_step(
                &run.id,
                "acme",
                "headline",
                &RunStepUpdate {
                    status: Some(RunStepStatus::Completed),
                    output_artifact_ids: Some(vec!["art-old".into()]),
                    output_data: Some(json!({"headline": "Persisted"})),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let outcome = fx
            .coordinator
            .execute_run(run.id, "acme", &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.status, RunStatus::Completed);
        assert_eq!(outcome.resumed, vec!["headline"]);
        assert_eq!(outcome.executed.len(), 2);
        assert!(fx.skills.calls_to("llm.headline").is_empty());
        assert_eq!(
            fx.skills.calls_to("layout.compose")[0]["headline"],
            json!("Persisted")
        );
    }

    #[tokio::test]
    async fn test_update_run_reads_base_run() {
        let fx = fixture(
            ScriptedSkills::default().script("llm.headline", [headline("Original"), headline("Revised")]),
        );
        let base = fx.coordinator.create_run(request()).await.unwrap();
        fx.coordinator
            .execute_run(base.id, "acme", &CancellationToken::new())
            .await
            .unwrap();

        let update = fx
            .coordinator
            .create_run(
                RunRequest::new("acme", "campaign-update", json!({"brief": "Summer"}))
                    .with_base_run(base.id),
            )
            .await
            .unwrap();
        let outcome = fx
            .coordinator
            .execute_run(update.id, "acme", &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.status, RunStatus::Completed);
        assert_eq!(outcome.context.base_run_id(), Some(base.id));
        let calls = fx.skills.calls_to("llm.headline");
        assert_eq!(calls[1], json!({"previous": "Original", "brief": "Summer"}));
    }

    #[tokio::test]
    async fn test_update_workflow_without_base_fails_step() {
        let fx = fixture(ScriptedSkills::default());
        let run = fx
            .coordinator
            .create_run(RunRequest::new("acme", "campaign-update", json!({})))
            .await
            .unwrap();
        let outcome = fx
            .coordinator
            .execute_run(run.id, "acme", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome.status, RunStatus::Failed);
        assert!(outcome.error.unwrap().contains("INPUT_SELECTOR_ERROR"));
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let fx = fixture(ScriptedSkills::default());
        let run = fx.coordinator.create_run(request()).await.unwrap();
        let token = CancellationToken::new();
        token.cancel();

        let outcome = fx.coordinator.execute_run(run.id, "acme", &token).await.unwrap();
        assert_eq!(outcome.status, RunStatus::Cancelled);
        assert!(fx.skills.calls.lock().unwrap().is_empty());
        assert_eq!(fx.runs.run(run.id).status, RunStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_cancel_run_and_missing_run() {
        let fx = fixture(ScriptedSkills::default());
        let run = fx.coordinator.create_run(request()).await.unwrap();
        fx.coordinator.cancel_run(run.id, "acme").await.unwrap();
        assert_eq!(fx.runs.run(run.id).status, RunStatus::Cancelled);

        let err = fx.coordinator.cancel_run(run.id, "acme").await.unwrap_err();
        assert!(matches!(err, RunError::Repository(RepositoryError::Conflict(_))));

        let err = fx
            .coordinator
            .execute_run(Uuid::now_v7(), "acme", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RunError::RunNotFound(_)));
    }

    #[tokio::test]
    async fn test_step_limit() {
        let runs = Arc::new(MemoryRuns::default());
        let executor = StepExecutor::new(
            Arc::clone(&runs),
            Arc::new(MemoryCache::default()),
            Arc::new(ScriptedSkills::default()),
            Arc::new(RecordingSleeper::default()),
            Arc::new(CanonicalHasher),
        );
        let coordinator = RunCoordinator::new(registry(), runs, executor).with_config(
            CoordinatorConfig {
                max_run_steps: 2,
                ..Default::default()
            },
        );
        let err = coordinator.create_run(request()).await.unwrap_err();
        assert!(matches!(err, RunError::TooManySteps { steps: 3, max: 2, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_timeout_fails_run() {
        let runs = Arc::new(MemoryRuns::default());
        let skills = ScriptedSkills::default().script(
            "llm.headline",
            [
                Ok(SkillResult::failure("busy", None)),
                Ok(SkillResult::failure("busy", None)),
            ],
        );
        let registry = WorkflowRegistry::new();
        registry
            .register(
                WorkflowCompiler::default()
                    .compile_yaml(
                        "workflow_name: slow\nversion: 1.0.0\nsteps:\n  - step_id: headline\n    skill_id: llm.headline\n    retry_policy: { max_attempts: 2, backoff_ms: 600000 }\n",
                    )
                    .unwrap(),
            )
            .unwrap();
        let executor = StepExecutor::new(
            Arc::clone(&runs),
            Arc::new(MemoryCache::default()),
            Arc::new(skills),
            Arc::new(TokioSleeper::new()),
            Arc::new(CanonicalHasher),
        );
        let coordinator = RunCoordinator::new(Arc::new(registry), Arc::clone(&runs), executor)
            .with_config(CoordinatorConfig {
                run_timeout: Duration::from_secs(5),
                ..Default::default()
            });

        let run = coordinator
            .create_run(RunRequest::new("acme", "slow", json!({})))
            .await
            .unwrap();
        let outcome = coordinator
            .execute_run(run.id, "acme", &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.status, RunStatus::Failed);
        assert!(outcome.error.unwrap().contains("timed out"));
        assert_eq!(runs.run(run.id).status, RunStatus::Failed);
        assert_eq!(runs.step(run.id, "headline").status, RunStepStatus::Running);
    }
}
