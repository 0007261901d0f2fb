//! Cached, retrying step executor.
//!
//! Turns one `StepSpec` plus the current run context into a unit of work:
//!
//! 1. Evaluate the compiled input selector against the context snapshot.
//! 2. Hash the resolved input and derive the cache key.
//! 3. Mark the step row `running`, replacing the provisional input hash.
//! 4. On a cache hit, complete the step without invoking the skill.
//! 5. Otherwise run the skill through the retry state machine, then mark the
//!    step `completed` (writing the cache) or `failed` with a classified error.
//!
//! Cache faults are logged and ignored. The executor does not guard against
//! re-running a completed step; callers schedule only unfinished steps.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use runloom_types::cache::CacheWrite;
use runloom_types::error::RepositoryError;
use runloom_types::run::{
    RunStepStatus, RunStepUpdate, StepErrorCode, StepErrorRecord, StepOutput, StepOutputStatus,
};
use serde_json::Value;

use super::context::RunContext;
use super::hashing::{cache_key, compute_input_hash};
use super::retry::{RetryError, RetryMachine, RetryState, Sleeper};
use super::spec::StepSpec;
use crate::repository::cache::StepCacheRepository;
use crate::repository::run::RunRepository;
use crate::service::hash::ContentHasher;
use crate::skill::{SkillExecutor, SkillResult};

/// Default cap on a single backoff delay (one minute).
pub const DEFAULT_BACKOFF_CEILING_MS: u64 = 60_000;

// ---------------------------------------------------------------------------
// Configuration and results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
pub struct StepExecutorConfig {
    /// Global switch; when off, cache policies are ignored.
    pub cache_enabled: bool,
    pub backoff_ceiling_ms: u64,
}

impl Default for StepExecutorConfig {
    fn default() -> Self {
        Self {
            cache_enabled: true,
            backoff_ceiling_ms: DEFAULT_BACKOFF_CEILING_MS,
        }
    }
}

/// Terminal outcome of one step execution.
#[derive(Debug, Clone)]
pub struct StepExecutionResult {
    pub output: StepOutput,
    /// `None` when the input selector failed before hashing.
    pub input_hash: Option<String>,
    pub cache_hit: bool,
    /// Attempt number reached (1-based).
    pub attempt: u32,
    pub duration_ms: u64,
    pub error: Option<StepErrorRecord>,
}

impl StepExecutionResult {
    pub fn status(&self) -> StepOutputStatus {
        self.output.status
    }

    pub fn is_success(&self) -> bool {
        self.output.status == StepOutputStatus::Completed
    }
}

/// Failures that prevent the executor from recording an outcome at all.
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),

    #[error("step row '{step_id}' not found for run {run_id}")]
    StepRowNotFound { run_id: uuid::Uuid, step_id: String },

    /// The backoff delay was cancelled. The step row is left as it was.
    #[error("step '{step_id}' cancelled during retry backoff")]
    Cancelled { step_id: String },
}

impl From<(RetryError, &str)> for ExecutorError {
    fn from((err, step_id): (RetryError, &str)) -> Self {
        match err {
            RetryError::Cancelled => ExecutorError::Cancelled {
                step_id: step_id.to_string(),
            },
        }
    }
}

// ---------------------------------------------------------------------------
// StepExecutor
// ---------------------------------------------------------------------------

/// Generic over its storage, skill and sleep collaborators.
pub struct StepExecutor<R, C, S, D>
where
    R: RunRepository,
    C: StepCacheRepository,
    S: SkillExecutor,
    D: Sleeper,
{
    runs: Arc<R>,
    cache: Arc<C>,
    skills: Arc<S>,
    sleeper: Arc<D>,
    hasher: Arc<dyn ContentHasher>,
    config: StepExecutorConfig,
}

impl<R, C, S, D> StepExecutor<R, C, S, D>
where
    R: RunRepository,
    C: StepCacheRepository,
    S: SkillExecutor,
    D: Sleeper,
{
    pub fn new(
        runs: Arc<R>,
        cache: Arc<C>,
        skills: Arc<S>,
        sleeper: Arc<D>,
        hasher: Arc<dyn ContentHasher>,
    ) -> Self {
        Self {
            runs,
            cache,
            skills,
            sleeper,
            hasher,
            config: StepExecutorConfig::default(),
        }
    }

    pub fn with_config(mut self, config: StepExecutorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &StepExecutorConfig {
        &self.config
    }

    pub fn hasher(&self) -> &dyn ContentHasher {
        self.hasher.as_ref()
    }

    /// Execute one step of `ctx`'s run and persist the outcome onto its row.
    pub async fn execute_step(
        &self,
        step: &StepSpec,
        ctx: &RunContext,
    ) -> Result<StepExecutionResult, ExecutorError> {
        let started = Instant::now();
        let run_id = ctx.run_id;
        let tenant = ctx.tenant_id.as_str();
        let step_id = step.step_id.as_str();

        // 1. Input computation. Never retried.
        let input = match step.input_selector.evaluate(ctx) {
            Ok(input) => input,
            Err(e) => {
                tracing::warn!(
                    run_id = %run_id,
                    step_id,
                    error = %e,
                    "input selector failed"
                );
                let error = StepErrorRecord {
                    code: StepErrorCode::InputSelector,
                    message: e.to_string(),
                    attempt: 1,
                    details: None,
                };
                return self
                    .finish_failed(ctx, step, None, 1, error, started)
                    .await;
            }
        };

        // 2. Hash and key.
        let input_hash = compute_input_hash(self.hasher.as_ref(), &input);
        let key = cache_key(
            &ctx.workflow_name,
            step_id,
            &input_hash,
            step.cache_policy.scope,
            run_id,
        );

        // 3. Mark running, replacing the provisional hash.
        let row = self
            .runs
            .find_run_step(&run_id, tenant, step_id)
            .await?
            .ok_or_else(|| ExecutorError::StepRowNotFound {
                run_id,
                step_id: step_id.to_string(),
            })?;
        let hash_changed = row.input_hash != input_hash;
        self.runs
            .update_run_step(
                &run_id,
                tenant,
                step_id,
                &RunStepUpdate {
                    clear_outcome: true,
                    status: Some(RunStepStatus::Running),
                    input_hash: hash_changed.then(|| input_hash.clone()),
                    attempt: Some(1),
                    cache_hit: Some(false),
                    started_at: Some(Utc::now()),
                    ..Default::default()
                },
            )
            .await?;

        tracing::debug!(
            run_id = %run_id,
            step_id,
            skill_id = step.skill_id.as_str(),
            hash_changed,
            "step running"
        );

        // 4. Cache lookup.
        let use_cache = self.config.cache_enabled && step.cache_policy.enabled;
        if use_cache {
            match self.cache.get(&key).await {
                Ok(Some(entry)) => {
                    let duration_ms = elapsed_ms(started);
                    self.runs
                        .update_run_step(
                            &run_id,
                            tenant,
                            step_id,
                            &RunStepUpdate {
                                status: Some(RunStepStatus::Completed),
                                cache_hit: Some(true),
                                output_artifact_ids: Some(entry.artifact_ids.clone()),
                                output_data: entry.data.clone(),
                                duration_ms: Some(duration_ms),
                                completed_at: Some(Utc::now()),
                                ..Default::default()
                            },
                        )
                        .await?;
                    tracing::info!(run_id = %run_id, step_id, duration_ms, "step served from cache");
                    return Ok(StepExecutionResult {
                        output: StepOutput::completed(step_id, entry.artifact_ids, entry.data),
                        input_hash: Some(input_hash),
                        cache_hit: true,
                        attempt: 1,
                        duration_ms,
                        error: None,
                    });
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(run_id = %run_id, step_id, error = %e, "cache lookup failed, executing skill");
                }
            }
        }

        // 5. Execute with retry.
        let (outcome, attempt) = self.execute_with_retry(ctx, step, &input).await?;

        match outcome {
            Ok(result) => {
                let artifact_ids = result.artifact_ids();
                let duration_ms = elapsed_ms(started);
                self.runs
                    .update_run_step(
                        &run_id,
                        tenant,
                        step_id,
                        &RunStepUpdate {
                            status: Some(RunStepStatus::Completed),
                            cache_hit: Some(false),
                            output_artifact_ids: Some(artifact_ids.clone()),
                            output_data: result.data.clone(),
                            duration_ms: Some(duration_ms),
                            completed_at: Some(Utc::now()),
                            ..Default::default()
                        },
                    )
                    .await?;

                if use_cache && !artifact_ids.is_empty() {
                    let write = CacheWrite {
                        cache_key: key,
                        workflow_name: ctx.workflow_name.clone(),
                        step_id: step_id.to_string(),
                        input_hash: input_hash.clone(),
                        artifact_ids: artifact_ids.clone(),
                        data: result.data.clone(),
                        scope: step.cache_policy.scope,
                    };
                    if let Err(e) = self.cache.set(&write).await {
                        tracing::warn!(run_id = %run_id, step_id, error = %e, "cache write failed");
                    }
                }

                tracing::info!(
                    run_id = %run_id,
                    step_id,
                    attempt,
                    duration_ms,
                    artifacts = artifact_ids.len(),
                    "step completed"
                );
                Ok(StepExecutionResult {
                    output: StepOutput::completed(step_id, artifact_ids, result.data),
                    input_hash: Some(input_hash),
                    cache_hit: false,
                    attempt,
                    duration_ms,
                    error: None,
                })
            }
            Err(error) => {
                self.finish_failed(ctx, step, Some(input_hash), attempt, error, started)
                    .await
            }
        }
    }

    /// Run the skill until it succeeds or the attempt budget is spent.
    ///
    /// Returns the success or the last observed failure, with the attempt
    /// number reached.
    async fn execute_with_retry(
        &self,
        ctx: &RunContext,
        step: &StepSpec,
        input: &Value,
    ) -> Result<(Result<SkillResult, StepErrorRecord>, u32), ExecutorError> {
        let mut machine = RetryMachine::new(&step.retry_policy, self.config.backoff_ceiling_ms);
        let mut last_failure: Option<StepErrorRecord> = None;
        let mut success: Option<SkillResult> = None;

        loop {
            match machine.state() {
                RetryState::Attempting { attempt } => {
                    match self.skills.execute(&step.skill_id, input).await {
                        Ok(result) if result.ok => {
                            success = Some(result);
                            machine.succeed();
                        }
                        Ok(result) => {
                            let code = result
                                .error_code
                                .map(StepErrorCode::from)
                                .unwrap_or(StepErrorCode::Skill);
                            last_failure = Some(StepErrorRecord {
                                code,
                                message: result
                                    .error
                                    .unwrap_or_else(|| "skill reported failure".to_string()),
                                attempt,
                                details: result.data,
                            });
                            machine.fail();
                        }
                        Err(e) => {
                            last_failure = Some(StepErrorRecord {
                                code: StepErrorCode::Execution,
                                message: e.to_string(),
                                attempt,
                                details: None,
                            });
                            machine.fail();
                        }
                    }
                }
                RetryState::Backoff {
                    next_attempt,
                    delay,
                } => {
                    tracing::warn!(
                        run_id = %ctx.run_id,
                        step_id = step.step_id.as_str(),
                        failed_attempt = next_attempt - 1,
                        delay_ms = delay.as_millis() as u64,
                        error = last_failure.as_ref().map(|f| f.message.as_str()),
                        "step attempt failed, backing off"
                    );
                    self.sleeper
                        .sleep(delay)
                        .await
                        .map_err(|e| ExecutorError::from((e, step.step_id.as_str())))?;
                    self.runs
                        .update_run_step(
                            &ctx.run_id,
                            &ctx.tenant_id,
                            &step.step_id,
                            &RunStepUpdate {
                                attempt: Some(next_attempt),
                                ..Default::default()
                            },
                        )
                        .await?;
                    machine.resume();
                }
                RetryState::Succeeded { .. } | RetryState::Exhausted { .. } => break,
            }
        }

        let attempt = machine.attempt();
        let outcome = match success {
            Some(result) => Ok(result),
            None => Err(last_failure.unwrap_or_else(|| StepErrorRecord {
                code: StepErrorCode::MaxRetries,
                message: format!("exhausted {attempt} attempts without a result"),
                attempt,
                details: None,
            })),
        };
        Ok((outcome, attempt))
    }

    async fn finish_failed(
        &self,
        ctx: &RunContext,
        step: &StepSpec,
        input_hash: Option<String>,
        attempt: u32,
        error: StepErrorRecord,
        started: Instant,
    ) -> Result<StepExecutionResult, ExecutorError> {
        let duration_ms = elapsed_ms(started);
        let now = Utc::now();
        self.runs
            .update_run_step(
                &ctx.run_id,
                &ctx.tenant_id,
                &step.step_id,
                &RunStepUpdate {
                    clear_outcome: input_hash.is_none(),
                    status: Some(RunStepStatus::Failed),
                    attempt: Some(attempt),
                    cache_hit: Some(false),
                    duration_ms: Some(duration_ms),
                    error: Some(error.clone()),
                    started_at: input_hash.is_none().then_some(now),
                    completed_at: Some(now),
                    ..Default::default()
                },
            )
            .await?;

        tracing::error!(
            run_id = %ctx.run_id,
            step_id = step.step_id.as_str(),
            code = %error.code,
            attempt,
            duration_ms,
            error = error.message.as_str(),
            "step failed"
        );

        Ok(StepExecutionResult {
            output: StepOutput {
                step_id: step.step_id.clone(),
                status: StepOutputStatus::Failed,
                output_artifact_ids: Vec::new(),
                data: None,
            },
            input_hash,
            cache_hit: false,
            attempt,
            duration_ms,
            error: Some(error),
        })
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    use super::*;
    use crate::skill::SkillInvocationError;
    use crate::template::NullTemplateRegistry;
    use crate::testing::{
        CanonicalHasher, MemoryCache, MemoryRuns, RecordingSleeper, ScriptedSkills, artifact,
    };
    use crate::workflow::context::RunState;
    use crate::workflow::dag::topological_sort;
    use crate::workflow::selector::{CompiledInputSelector, SelectorCompiler};
    use runloom_types::run::RunStep;
    use runloom_types::selector::InputSelectorMap;
    use runloom_types::workflow::{CachePolicy, CacheScope, RetryPolicy};
    use serde_json::json;
    use uuid::Uuid;

    type Executor = StepExecutor<MemoryRuns, MemoryCache, ScriptedSkills, RecordingSleeper>;

    struct Fixture {
        runs: Arc<MemoryRuns>,
        cache: Arc<MemoryCache>,
        skills: Arc<ScriptedSkills>,
        sleeper: Arc<RecordingSleeper>,
        executor: Executor,
    }

    fn fixture(skills: ScriptedSkills) -> Fixture {
        let runs = Arc::new(MemoryRuns::default());
        let cache = Arc::new(MemoryCache::default());
        let skills = Arc::new(skills);
        let sleeper = Arc::new(RecordingSleeper::default());
        let executor = StepExecutor::new(
            Arc::clone(&runs),
            Arc::clone(&cache),
            Arc::clone(&skills),
            Arc::clone(&sleeper),
            Arc::new(CanonicalHasher),
        );
        Fixture {
            runs,
            cache,
            skills,
            sleeper,
            executor,
        }
    }

    fn selector(map: Value) -> CompiledInputSelector {
        let map: InputSelectorMap = serde_json::from_value(map).unwrap();
        SelectorCompiler::new(Arc::new(NullTemplateRegistry))
            .compile_map(&map)
            .unwrap()
    }

    fn brief_step(step_id: &str, skill_id: &str) -> StepSpec {
        StepSpec::new(step_id, skill_id)
            .with_input_selector(selector(json!({"brief": {"source": "trigger", "path": "brief"}})))
    }

    fn state(run_id: Uuid) -> RunState {
        RunState::new(run_id, "acme", "campaign", json!({"brief": "Spring sale"}), None)
    }

    async fn seed(fx: &Fixture, run_id: Uuid, step: &StepSpec) {
        fx.runs
            .create_run_step(&RunStep::pending(
                run_id,
                "acme",
                &step.step_id,
                &step.skill_id,
                "provisional".to_string(),
            ))
            .await
            .unwrap();
    }

    fn failure(code: Option<&str>) -> Result<SkillResult, SkillInvocationError> {
        Ok(SkillResult::failure("upstream said no", code))
    }

    fn success(ids: &[&str]) -> Result<SkillResult, SkillInvocationError> {
        Ok(SkillResult::success(
            Some(json!({"text": "done"})),
            ids.iter().map(|id| artifact(id)).collect(),
        ))
    }

    // -----------------------------------------------------------------------
    // Retry
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_fails_twice_then_succeeds() {
        let fx = fixture(ScriptedSkills::default().script(
            "llm.draft",
            [failure(None), failure(None), success(&["art-1"])],
        ));
        let run_id = Uuid::now_v7();
        let step = brief_step("draft", "llm.draft").with_retry_policy(RetryPolicy {
            max_attempts: 3,
            backoff_ms: 100,
        });
        seed(&fx, run_id, &step).await;

        let result = fx
            .executor
            .execute_step(&step, &state(run_id).snapshot())
            .await
            .unwrap();

        assert!(result.is_success());
        assert_eq!(result.attempt, 3);
        assert_eq!(result.output.output_artifact_ids, vec!["art-1"]);
        assert_eq!(
            fx.sleeper.delays(),
            vec![Duration::from_millis(100), Duration::from_millis(200)]
        );
        assert_eq!(fx.skills.calls_to("llm.draft").len(), 3);

        let row = fx.runs.step(run_id, "draft");
        assert_eq!(row.status, RunStepStatus::Completed);
        assert_eq!(row.attempt, 3);
        assert!(!row.cache_hit);
        assert!(row.error.is_none());
        assert_eq!(row.output_data, Some(json!({"text": "done"})));
    }

    #[tokio::test]
    async fn test_always_failing_keeps_last_error_code() {
        let fx = fixture(ScriptedSkills::default().script(
            "llm.draft",
            [failure(Some("QUOTA")), failure(Some("RATE_LIMITED"))],
        ));
        let run_id = Uuid::now_v7();
        let step = brief_step("draft", "llm.draft").with_retry_policy(RetryPolicy {
            max_attempts: 2,
            backoff_ms: 50,
        });
        seed(&fx, run_id, &step).await;

        let result = fx
            .executor
            .execute_step(&step, &state(run_id).snapshot())
            .await
            .unwrap();

        assert_eq!(result.status(), StepOutputStatus::Failed);
        assert_eq!(result.attempt, 2);
        let error = result.error.unwrap();
        assert_eq!(error.code, StepErrorCode::Custom("RATE_LIMITED".into()));
        assert_eq!(error.attempt, 2);
        assert_eq!(fx.sleeper.delays(), vec![Duration::from_millis(50)]);

        let row = fx.runs.step(run_id, "draft");
        assert_eq!(row.status, RunStepStatus::Failed);
        assert_eq!(row.attempt, 2);
        assert_eq!(row.error.unwrap().code.as_str(), "RATE_LIMITED");
        assert!(row.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_skill_failure_without_code_is_skill_error() {
        let fx = fixture(ScriptedSkills::default().script("llm.draft", [failure(None)]));
        let run_id = Uuid::now_v7();
        let step = brief_step("draft", "llm.draft");
        seed(&fx, run_id, &step).await;

        let result = fx
            .executor
            .execute_step(&step, &state(run_id).snapshot())
            .await
            .unwrap();
        assert_eq!(result.error.unwrap().code, StepErrorCode::Skill);
        assert!(fx.sleeper.delays().is_empty());
    }

    #[tokio::test]
    async fn test_invocation_error_is_execution_error() {
        let fx = fixture(ScriptedSkills::default().script(
            "llm.draft",
            [Err(SkillInvocationError("connection reset".into()))],
        ));
        let run_id = Uuid::now_v7();
        let step = brief_step("draft", "llm.draft");
        seed(&fx, run_id, &step).await;

        let result = fx
            .executor
            .execute_step(&step, &state(run_id).snapshot())
            .await
            .unwrap();
        let error = result.error.unwrap();
        assert_eq!(error.code, StepErrorCode::Execution);
        assert!(error.message.contains("connection reset"));
    }

    // -----------------------------------------------------------------------
    // Input selector
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_input_selector_error_is_not_retried() {
        let fx = fixture(ScriptedSkills::default());
        let run_id = Uuid::now_v7();
        let step = StepSpec::new("polish", "llm.polish")
            .with_input_selector(selector(json!({
                "text": {"source": "step_output", "step_id": "draft", "path": "text"}
            })))
            .with_retry_policy(RetryPolicy {
                max_attempts: 5,
                backoff_ms: 10,
            });
        seed(&fx, run_id, &step).await;

        let result = fx
            .executor
            .execute_step(&step, &state(run_id).snapshot())
            .await
            .unwrap();

        assert_eq!(result.status(), StepOutputStatus::Failed);
        assert!(result.input_hash.is_none());
        let error = result.error.unwrap();
        assert_eq!(error.code, StepErrorCode::InputSelector);
        assert!(error.message.contains("'draft' not found"), "got: {}", error.message);
        assert!(fx.skills.calls_to("llm.polish").is_empty());
        assert!(fx.sleeper.delays().is_empty());

        let row = fx.runs.step(run_id, "polish");
        assert_eq!(row.status, RunStepStatus::Failed);
        assert_eq!(row.input_hash, "provisional");
    }

    #[tokio::test]
    async fn test_provisional_hash_is_replaced() {
        let fx = fixture(ScriptedSkills::default());
        let run_id = Uuid::now_v7();
        let step = brief_step("draft", "llm.draft");
        seed(&fx, run_id, &step).await;

        let result = fx
            .executor
            .execute_step(&step, &state(run_id).snapshot())
            .await
            .unwrap();

        let row = fx.runs.step(run_id, "draft");
        assert_eq!(row.input_hash, r#"{"brief":"Spring sale"}"#);
        assert_eq!(result.input_hash.as_deref(), Some(row.input_hash.as_str()));
        assert!(row.started_at.is_some());
    }

    #[tokio::test]
    async fn test_missing_row_is_an_error() {
        let fx = fixture(ScriptedSkills::default());
        let step = brief_step("draft", "llm.draft");
        let err = fx
            .executor
            .execute_step(&step, &state(Uuid::now_v7()).snapshot())
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutorError::StepRowNotFound { .. }));
    }

    // -----------------------------------------------------------------------
    // Cache
    // -----------------------------------------------------------------------

    fn cached(step: StepSpec, scope: CacheScope) -> StepSpec {
        step.with_cache_policy(CachePolicy {
            enabled: true,
            scope,
        })
    }

    #[tokio::test]
    async fn test_global_cache_hit_skips_skill() {
        let fx = fixture(ScriptedSkills::default());
        let step = cached(brief_step("draft", "llm.draft"), CacheScope::Global);

        let first_run = Uuid::now_v7();
        seed(&fx, first_run, &step).await;
        let first = fx
            .executor
            .execute_step(&step, &state(first_run).snapshot())
            .await
            .unwrap();
        assert!(!first.cache_hit);
        assert_eq!(fx.cache.len(), 1);

        let second_run = Uuid::now_v7();
        seed(&fx, second_run, &step).await;
        let second = fx
            .executor
            .execute_step(&step, &state(second_run).snapshot())
            .await
            .unwrap();

        assert!(second.cache_hit);
        assert_eq!(second.output.output_artifact_ids, vec!["llm.draft-artifact"]);
        assert_eq!(second.output.data, first.output.data);
        assert_eq!(fx.skills.calls_to("llm.draft").len(), 1);

        let row = fx.runs.step(second_run, "draft");
        assert_eq!(row.status, RunStepStatus::Completed);
        assert!(row.cache_hit);
        assert_eq!(row.output_artifact_ids, Some(vec!["llm.draft-artifact".to_string()]));
    }

    #[tokio::test]
    async fn test_run_only_cache_is_isolated_per_run() {
        let fx = fixture(ScriptedSkills::default());
        let step = cached(brief_step("draft", "llm.draft"), CacheScope::RunOnly);

        for _ in 0..2 {
            let run_id = Uuid::now_v7();
            seed(&fx, run_id, &step).await;
            let result = fx
                .executor
                .execute_step(&step, &state(run_id).snapshot())
                .await
                .unwrap();
            assert!(!result.cache_hit);
        }
        assert_eq!(fx.skills.calls_to("llm.draft").len(), 2);
        assert_eq!(fx.cache.len(), 2);
    }

    #[tokio::test]
    async fn test_no_cache_write_without_artifacts() {
        let fx = fixture(ScriptedSkills::default().script("llm.draft", [success(&[])]));
        let run_id = Uuid::now_v7();
        let step = cached(brief_step("draft", "llm.draft"), CacheScope::Global);
        seed(&fx, run_id, &step).await;

        let result = fx
            .executor
            .execute_step(&step, &state(run_id).snapshot())
            .await
            .unwrap();
        assert!(result.is_success());
        assert_eq!(fx.cache.len(), 0);
    }

    #[tokio::test]
    async fn test_cache_disabled_globally() {
        let fx = fixture(ScriptedSkills::default());
        let executor = StepExecutor::new(
            Arc::clone(&fx.runs),
            Arc::clone(&fx.cache),
            Arc::clone(&fx.skills),
            Arc::clone(&fx.sleeper),
            Arc::new(CanonicalHasher),
        )
        .with_config(StepExecutorConfig {
            cache_enabled: false,
            ..Default::default()
        });
        let run_id = Uuid::now_v7();
        let step = cached(brief_step("draft", "llm.draft"), CacheScope::Global);
        seed(&fx, run_id, &step).await;

        executor
            .execute_step(&step, &state(run_id).snapshot())
            .await
            .unwrap();
        assert_eq!(fx.cache.len(), 0);
    }

    #[tokio::test]
    async fn test_cache_faults_are_advisory() {
        let fx = fixture(ScriptedSkills::default());
        fx.cache.broken.store(true, Ordering::SeqCst);
        let run_id = Uuid::now_v7();
        let step = cached(brief_step("draft", "llm.draft"), CacheScope::Global);
        seed(&fx, run_id, &step).await;

        let result = fx
            .executor
            .execute_step(&step, &state(run_id).snapshot())
            .await
            .unwrap();
        assert!(result.is_success());
        assert!(!result.cache_hit);
        assert_eq!(fx.runs.step(run_id, "draft").status, RunStepStatus::Completed);
    }

    // -----------------------------------------------------------------------
    // End to end
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_fan_in_step_sees_both_outputs() {
        let fx = fixture(
            ScriptedSkills::default()
                .script(
                    "llm.headline",
                    [Ok(SkillResult::success(
                        Some(json!({"headline": "Big Spring Sale"})),
                        vec![artifact("art-a")],
                    ))],
                )
                .script(
                    "image.render",
                    [Ok(SkillResult::success(
                        Some(json!({"url": "https://cdn/img.png"})),
                        vec![artifact("art-b")],
                    ))],
                ),
        );
        let run_id = Uuid::now_v7();
        let steps = vec![
            StepSpec::new("c", "layout.compose")
                .with_depends_on(["a", "b"])
                .with_input_selector(selector(json!({
                    "headline": {"source": "step_output", "step_id": "a", "path": "headline"},
                    "image": {"source": "step_output", "step_id": "b", "path": "data.url"},
                    "artifacts": {"source": "step_output", "step_id": "b", "path": "artifacts"}
                }))),
            brief_step("a", "llm.headline"),
            brief_step("b", "image.render"),
        ];

        let order = topological_sort(&steps).unwrap();
        assert_eq!(order.last().unwrap().step_id, "c");

        let mut state = state(run_id);
        for step in &steps {
            seed(&fx, run_id, step).await;
        }
        for step in order {
            let result = fx
                .executor
                .execute_step(step, &state.snapshot())
                .await
                .unwrap();
            assert!(result.is_success(), "{} failed: {:?}", step.step_id, result.error);
            state.record(result.output);
        }

        let input = &fx.skills.calls_to("layout.compose")[0];
        assert_eq!(
            input,
            &json!({
                "headline": "Big Spring Sale",
                "image": "https://cdn/img.png",
                "artifacts": ["art-b"]
            })
        );
    }

    // -----------------------------------------------------------------------
    // Re-execution
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_rerun_after_failure_clears_error() {
        let fx = fixture(ScriptedSkills::default().script(
            "llm.draft",
            [failure(Some("QUOTA")), success(&["art-1"])],
        ));
        let run_id = Uuid::now_v7();
        let step = brief_step("draft", "llm.draft");
        seed(&fx, run_id, &step).await;
        let ctx = state(run_id).snapshot();

        let first = fx.executor.execute_step(&step, &ctx).await.unwrap();
        assert!(!first.is_success());
        let failed = fx.runs.step(run_id, "draft");
        assert_eq!(failed.status, RunStepStatus::Failed);
        assert_eq!(
            failed.error.as_ref().map(|e| e.code.clone()),
            Some(StepErrorCode::Custom("QUOTA".into()))
        );

        let second = fx.executor.execute_step(&step, &ctx).await.unwrap();
        assert!(second.is_success());

        let row = fx.runs.step(run_id, "draft");
        assert_eq!(row.status, RunStepStatus::Completed);
        assert!(row.error.is_none());
        assert_eq!(row.attempt, 1);
        assert!(!row.cache_hit);
        assert_eq!(row.output_artifact_ids, Some(vec!["art-1".to_string()]));
        assert_eq!(row.output_data, Some(json!({"text": "done"})));
        assert!(row.completed_at.is_some());
        assert_eq!(row.input_hash, second.input_hash.unwrap());
    }

    #[tokio::test]
    async fn test_rerun_of_completed_step_is_served_from_cache() {
        let fx = fixture(
            ScriptedSkills::default().script("llm.draft", [success(&["art-1", "art-2"])]),
        );
        let run_id = Uuid::now_v7();
        let step = cached(brief_step("draft", "llm.draft"), CacheScope::Global);
        seed(&fx, run_id, &step).await;
        let ctx = state(run_id).snapshot();

        let first = fx.executor.execute_step(&step, &ctx).await.unwrap();
        assert!(first.is_success() && !first.cache_hit);

        let second = fx.executor.execute_step(&step, &ctx).await.unwrap();
        assert!(second.cache_hit);
        assert_eq!(fx.skills.calls_to("llm.draft").len(), 1);

        let row = fx.runs.step(run_id, "draft");
        assert_eq!(row.status, RunStepStatus::Completed);
        assert!(row.cache_hit);
        assert!(row.error.is_none());
        assert_eq!(
            row.output_artifact_ids,
            Some(vec!["art-1".to_string(), "art-2".to_string()])
        );
        assert_eq!(row.output_data, Some(json!({"text": "done"})));
    }

    #[tokio::test]
    async fn test_rerun_failure_after_cache_hit_resets_outcome() {
        let fx = fixture(ScriptedSkills::default().script("llm.draft", [failure(Some("QUOTA"))]));
        let run_id = Uuid::now_v7();
        let step = brief_step("draft", "llm.draft");
        seed(&fx, run_id, &step).await;
        fx.runs
            .update_run_step(
                &run_id,
                "acme",
                "draft",
                &RunStepUpdate {
                    status: Some(RunStepStatus::Completed),
                    cache_hit: Some(true),
                    output_artifact_ids: Some(vec!["stale".into()]),
                    output_data: Some(json!({"stale": true})),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let result = fx
            .executor
            .execute_step(&step, &state(run_id).snapshot())
            .await
            .unwrap();
        assert!(!result.is_success());

        let row = fx.runs.step(run_id, "draft");
        assert_eq!(row.status, RunStepStatus::Failed);
        assert!(!row.cache_hit);
        assert!(row.output_artifact_ids.is_none());
        assert!(row.output_data.is_none());
        assert!(row.error.is_some());
    }
}
