//! Compiled, executable workflow specifications.
//!
//! A `WorkflowSpec` is what the registry stores and the executor runs: the
//! document's steps with their input selectors already compiled.

use runloom_types::workflow::{CachePolicy, RetryPolicy};
use semver::Version;

use super::dag::DagNode;
use super::selector::CompiledInputSelector;

#[derive(Debug, Clone)]
pub struct WorkflowSpec {
    pub workflow_name: String,
    pub version: Version,
    pub description: Option<String>,
    /// Steps in declaration order.
    pub steps: Vec<StepSpec>,
}

impl WorkflowSpec {
    pub fn step(&self, step_id: &str) -> Option<&StepSpec> {
        self.steps.iter().find(|s| s.step_id == step_id)
    }

    pub fn step_ids(&self) -> impl Iterator<Item = &str> {
        self.steps.iter().map(|s| s.step_id.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct StepSpec {
    pub step_id: String,
    pub skill_id: String,
    pub depends_on: Vec<String>,
    pub input_selector: CompiledInputSelector,
    pub cache_policy: CachePolicy,
    pub retry_policy: RetryPolicy,
    pub description: Option<String>,
}

impl StepSpec {
    /// A step with no inputs and default policies.
    pub fn new(step_id: impl Into<String>, skill_id: impl Into<String>) -> Self {
        Self {
            step_id: step_id.into(),
            skill_id: skill_id.into(),
            depends_on: Vec::new(),
            input_selector: CompiledInputSelector::default(),
            cache_policy: CachePolicy::default(),
            retry_policy: RetryPolicy::default(),
            description: None,
        }
    }

    pub fn with_depends_on<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on = deps.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_input_selector(mut self, selector: CompiledInputSelector) -> Self {
        self.input_selector = selector;
        self
    }

    pub fn with_cache_policy(mut self, policy: CachePolicy) -> Self {
        self.cache_policy = policy;
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }
}

impl DagNode for StepSpec {
    fn node_id(&self) -> &str {
        &self.step_id
    }

    fn dependencies(&self) -> &[String] {
        &self.depends_on
    }
}
