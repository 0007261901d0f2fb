//! In-memory fakes shared by the executor and coordinator tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Utc;
use runloom_types::cache::{CacheEntry, CacheWrite};
use runloom_types::error::RepositoryError;
use runloom_types::run::{Run, RunStatus, RunStep, RunStepUpdate};
use serde_json::{Value, json};
use uuid::Uuid;

use crate::repository::cache::StepCacheRepository;
use crate::repository::run::RunRepository;
use crate::service::hash::ContentHasher;
use crate::skill::{SkillArtifact, SkillExecutor, SkillInvocationError, SkillResult};
use crate::workflow::retry::{RetryError, Sleeper};

// ---------------------------------------------------------------------------
// Runs
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryRuns {
    runs: Mutex<HashMap<Uuid, Run>>,
    steps: Mutex<Vec<RunStep>>,
}

impl MemoryRuns {
    pub fn step(&self, run_id: Uuid, step_id: &str) -> RunStep {
        self.steps
            .lock()
            .unwrap()
            .iter()
            .find(|s| s.run_id == run_id && s.step_id == step_id)
            .cloned()
            .unwrap()
    }

    pub fn run(&self, run_id: Uuid) -> Run {
        self.runs.lock().unwrap()[&run_id].clone()
    }
}

impl RunRepository for MemoryRuns {
    async fn create_run(&self, run: &Run) -> Result<(), RepositoryError> {
        self.runs.lock().unwrap().insert(run.id, run.clone());
        Ok(())
    }

    async fn get_run(&self, run_id: &Uuid, tenant_id: &str) -> Result<Option<Run>, RepositoryError> {
        Ok(self
            .runs
            .lock()
            .unwrap()
            .get(run_id)
            .filter(|r| r.tenant_id == tenant_id)
            .cloned())
    }

    async fn update_run_status(
        &self,
        run_id: &Uuid,
        tenant_id: &str,
        status: RunStatus,
        error: Option<&str>,
    ) -> Result<(), RepositoryError> {
        let mut runs = self.runs.lock().unwrap();
        let run = runs
            .get_mut(run_id)
            .filter(|r| r.tenant_id == tenant_id)
            .ok_or(RepositoryError::NotFound)?;
        if !run.status.can_transition_to(status) {
            return Err(RepositoryError::Conflict(format!(
                "run {run_id} cannot move from {} to {status}",
                run.status
            )));
        }
        let now = Utc::now();
        if status == RunStatus::Running && run.started_at.is_none() {
            run.started_at = Some(now);
        }
        if status.is_terminal() {
            run.completed_at = Some(now);
        }
        run.status = status;
        if let Some(error) = error {
            run.error = Some(error.to_string());
        }
        Ok(())
    }

    async fn create_run_step(&self, step: &RunStep) -> Result<(), RepositoryError> {
        let mut steps = self.steps.lock().unwrap();
        if steps
            .iter()
            .any(|s| s.run_id == step.run_id && s.step_id == step.step_id)
        {
            return Err(RepositoryError::Conflict(step.step_id.clone()));
        }
        steps.push(step.clone());
        Ok(())
    }

    async fn find_run_step(
        &self,
        run_id: &Uuid,
        tenant_id: &str,
        step_id: &str,
    ) -> Result<Option<RunStep>, RepositoryError> {
        Ok(self
            .steps
            .lock()
            .unwrap()
            .iter()
            .find(|s| &s.run_id == run_id && s.tenant_id == tenant_id && s.step_id == step_id)
            .cloned())
    }

    async fn update_run_step(
        &self,
        run_id: &Uuid,
        tenant_id: &str,
        step_id: &str,
        update: &RunStepUpdate,
    ) -> Result<(), RepositoryError> {
        let mut steps = self.steps.lock().unwrap();
        let step = steps
            .iter_mut()
            .find(|s| &s.run_id == run_id && s.tenant_id == tenant_id && s.step_id == step_id)
            .ok_or(RepositoryError::NotFound)?;
        step.apply(update);
        Ok(())
    }

    async fn list_run_steps(
        &self,
        run_id: &Uuid,
        tenant_id: &str,
    ) -> Result<Vec<RunStep>, RepositoryError> {
        Ok(self
            .steps
            .lock()
            .unwrap()
            .iter()
            .filter(|s| &s.run_id == run_id && s.tenant_id == tenant_id)
            .cloned()
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Cache
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryCache {
    pub entries: Mutex<HashMap<String, CacheEntry>>,
    /// Every call fails while set.
    pub broken: AtomicBool,
}

impl MemoryCache {
    fn check(&self) -> Result<(), RepositoryError> {
        if self.broken.load(Ordering::SeqCst) {
            Err(RepositoryError::Connection)
        } else {
            Ok(())
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }
}

impl StepCacheRepository for MemoryCache {
    async fn get(&self, cache_key: &str) -> Result<Option<CacheEntry>, RepositoryError> {
        self.check()?;
        Ok(self.entries.lock().unwrap().get(cache_key).cloned())
    }

    async fn set(&self, write: &CacheWrite) -> Result<(), RepositoryError> {
        self.check()?;
        let mut entries = self.entries.lock().unwrap();
        let entry = write
            .clone()
            .into_entry(entries.get(&write.cache_key), Utc::now());
        entries.insert(write.cache_key.clone(), entry);
        Ok(())
    }

    async fn invalidate_step(&self, workflow_name: &str, step_id: &str) -> Result<u64, RepositoryError> {
        self.check()?;
        let mut entries = self.entries.lock().unwrap();
        let before = entries.len();
        entries.retain(|_, e| !(e.workflow_name == workflow_name && e.step_id == step_id));
        Ok((before - entries.len()) as u64)
    }

    async fn invalidate_workflow(&self, workflow_name: &str) -> Result<u64, RepositoryError> {
        self.check()?;
        let mut entries = self.entries.lock().unwrap();
        let before = entries.len();
        entries.retain(|_, e| e.workflow_name != workflow_name);
        Ok((before - entries.len()) as u64)
    }
}

// ---------------------------------------------------------------------------
// Skills
// ---------------------------------------------------------------------------

/// Plays back scripted results per skill; unscripted calls succeed with the
/// input echoed as data and one artifact named after the skill.
#[derive(Default)]
pub struct ScriptedSkills {
    scripts: Mutex<HashMap<String, VecDeque<Result<SkillResult, SkillInvocationError>>>>,
    pub calls: Mutex<Vec<(String, Value)>>,
}

impl ScriptedSkills {
    pub fn script(
        self,
        skill_id: &str,
        results: impl IntoIterator<Item = Result<SkillResult, SkillInvocationError>>,
    ) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .entry(skill_id.to_string())
            .or_default()
            .extend(results);
        self
    }

    pub fn calls_to(&self, skill_id: &str) -> Vec<Value> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| id == skill_id)
            .map(|(_, input)| input.clone())
            .collect()
    }
}

impl SkillExecutor for ScriptedSkills {
    async fn execute(&self, skill_id: &str, input: &Value) -> Result<SkillResult, SkillInvocationError> {
        self.calls
            .lock()
            .unwrap()
            .push((skill_id.to_string(), input.clone()));
        let scripted = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(skill_id)
            .and_then(VecDeque::pop_front);
        scripted.unwrap_or_else(|| {
            Ok(SkillResult::success(
                Some(json!({"echo": input})),
                vec![SkillArtifact {
                    id: format!("{skill_id}-artifact"),
                    kind: None,
                    uri: None,
                }],
            ))
        })
    }
}

pub fn artifact(id: &str) -> SkillArtifact {
    SkillArtifact {
        id: id.to_string(),
        kind: None,
        uri: None,
    }
}

// ---------------------------------------------------------------------------
// Sleeping and hashing
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct RecordingSleeper {
    pub delays: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn delays(&self) -> Vec<Duration> {
        self.delays.lock().unwrap().clone()
    }
}

impl Sleeper for RecordingSleeper {
    async fn sleep(&self, delay: Duration) -> Result<(), RetryError> {
        self.delays.lock().unwrap().push(delay);
        Ok(())
    }
}

/// Uses the canonical JSON itself as the hash.
pub struct CanonicalHasher;

impl ContentHasher for CanonicalHasher {
    fn compute_hash(&self, content: &str) -> String {
        content.to_string()
    }
}
