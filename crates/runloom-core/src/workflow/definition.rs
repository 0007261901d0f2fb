//! Workflow definition parsing, validation, discovery and compilation.
//!
//! Converts YAML (or JSON) files into `WorkflowDocument`s, validates their
//! structural constraints and compiles them into executable `WorkflowSpec`s.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use runloom_types::workflow::{MAX_RETRY_ATTEMPTS, WorkflowDocument};
use semver::Version;
use thiserror::Error;

use super::dag::{GraphError, topological_sort};
use super::hashing::KEY_SEPARATOR;
use super::selector::{SelectorCompiler, SelectorError};
use super::spec::{StepSpec, WorkflowSpec};
use crate::skill::SkillCatalog;
use crate::template::{NullTemplateRegistry, TemplateRegistry};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors that can occur while loading, compiling or registering workflows.
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// YAML/JSON parse failure.
    #[error("parse error: {0}")]
    Parse(String),

    /// Structural validation failure.
    #[error("validation error: {0}")]
    Validation(String),

    /// Filesystem I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// `(name, version)` is already in the registry.
    #[error("workflow '{workflow}' version {version} is already registered")]
    AlreadyRegistered { workflow: String, version: String },

    /// The step graph is not a DAG.
    #[error("workflow '{workflow}' has an invalid step graph: {source}")]
    Graph {
        workflow: String,
        #[source]
        source: GraphError,
    },

    /// A step's input selector failed to compile.
    #[error("workflow '{workflow}' step '{step_id}': {source}")]
    Selector {
        workflow: String,
        step_id: String,
        #[source]
        source: SelectorError,
    },

    /// A step references a skill the catalog does not know.
    #[error("workflow '{workflow}' step '{step_id}' references unknown skill '{skill_id}'")]
    UnknownSkill {
        workflow: String,
        step_id: String,
        skill_id: String,
    },
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Parse a YAML (or JSON) string into a validated `WorkflowDocument`.
pub fn parse_workflow_yaml(yaml: &str) -> Result<WorkflowDocument, WorkflowError> {
    let doc: WorkflowDocument =
        serde_yaml_ng::from_str(yaml).map_err(|e| WorkflowError::Parse(e.to_string()))?;
    validate_document(&doc)?;
    Ok(doc)
}

pub fn serialize_workflow_yaml(doc: &WorkflowDocument) -> Result<String, WorkflowError> {
    serde_yaml_ng::to_string(doc).map_err(|e| WorkflowError::Parse(e.to_string()))
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate structural constraints on a `WorkflowDocument`.
///
/// Checks:
/// - Name is non-empty and contains only alphanumeric characters, `-`, `_` and `.`
/// - Version is a semantic version
/// - At least one step exists
/// - Step IDs are non-empty, unique and free of the cache key separator,
///   and every step names a skill
/// - `retry_policy.max_attempts` lies in 1..=5
/// - Dependencies exist and form a DAG
pub fn validate_document(doc: &WorkflowDocument) -> Result<(), WorkflowError> {
    let name = &doc.workflow_name;
    if name.is_empty() {
        return Err(WorkflowError::Validation(
            "workflow name must not be empty".to_string(),
        ));
    }
    if !name
        .chars()
        .all(|c| c.is_alphanumeric() || matches!(c, '-' | '_' | '.'))
    {
        return Err(WorkflowError::Validation(format!(
            "workflow name '{name}' contains invalid characters"
        )));
    }

    parse_version(name, &doc.version)?;

    if doc.steps.is_empty() {
        return Err(WorkflowError::Validation(format!(
            "workflow '{name}' must have at least one step"
        )));
    }

    let mut seen_ids = HashSet::new();
    for step in &doc.steps {
        if step.step_id.trim().is_empty() {
            return Err(WorkflowError::Validation(format!(
                "workflow '{name}' has a step with an empty step_id"
            )));
        }
        if step.step_id.contains(KEY_SEPARATOR) {
            return Err(WorkflowError::Validation(format!(
                "workflow '{name}' step ID '{}' must not contain '{KEY_SEPARATOR}'",
                step.step_id
            )));
        }
        if !seen_ids.insert(step.step_id.as_str()) {
            return Err(WorkflowError::Validation(format!(
                "workflow '{name}' has duplicate step ID '{}'",
                step.step_id
            )));
        }
        if step.skill_id.trim().is_empty() {
            return Err(WorkflowError::Validation(format!(
                "step '{}' must name a skill_id",
                step.step_id
            )));
        }
        if !step.retry_policy.is_valid() {
            return Err(WorkflowError::Validation(format!(
                "step '{}' retry_policy.max_attempts must be between 1 and {MAX_RETRY_ATTEMPTS}, got {}",
                step.step_id, step.retry_policy.max_attempts
            )));
        }
    }

    topological_sort(&doc.steps).map_err(|source| WorkflowError::Graph {
        workflow: name.clone(),
        source,
    })?;

    Ok(())
}

pub(crate) fn parse_version(workflow: &str, version: &str) -> Result<Version, WorkflowError> {
    Version::parse(version.trim()).map_err(|e| {
        WorkflowError::Validation(format!(
            "workflow '{workflow}' version '{version}' is not a semantic version: {e}"
        ))
    })
}

// ---------------------------------------------------------------------------
// Filesystem operations
// ---------------------------------------------------------------------------

/// Load a workflow document from a YAML or JSON file.
pub fn load_workflow_file(path: &Path) -> Result<WorkflowDocument, WorkflowError> {
    let content = std::fs::read_to_string(path)?;
    parse_workflow_yaml(&content)
}

/// Discover all workflow files under `base_dir`.
///
/// Scans for `.yaml`, `.yml` and `.json` files recursively. Files that fail
/// to parse or validate are skipped with a warning.
pub fn discover_workflows(
    base_dir: &Path,
) -> Result<Vec<(PathBuf, WorkflowDocument)>, WorkflowError> {
    let mut results = Vec::new();
    if !base_dir.exists() {
        return Ok(results);
    }
    discover_recursive(base_dir, &mut results)?;
    results.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(results)
}

fn discover_recursive(
    dir: &Path,
    results: &mut Vec<(PathBuf, WorkflowDocument)>,
) -> Result<(), WorkflowError> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            discover_recursive(&path, results)?;
        } else if let Some(ext) = path.extension() {
            if ext == "yaml" || ext == "yml" || ext == "json" {
                match load_workflow_file(&path) {
                    Ok(doc) => results.push((path, doc)),
                    Err(error) => {
                        tracing::warn!(?path, %error, "skipping invalid workflow file");
                    }
                }
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Compilation
// ---------------------------------------------------------------------------

/// Compiles validated documents into executable specs.
#[derive(Clone)]
pub struct WorkflowCompiler {
    selectors: SelectorCompiler,
    catalog: Option<Arc<dyn SkillCatalog>>,
}

impl Default for WorkflowCompiler {
    fn default() -> Self {
        Self::new(Arc::new(NullTemplateRegistry))
    }
}

impl WorkflowCompiler {
    pub fn new(registry: Arc<dyn TemplateRegistry>) -> Self {
        Self {
            selectors: SelectorCompiler::new(registry),
            catalog: None,
        }
    }

    /// Reject documents whose steps name skills unknown to `catalog`.
    pub fn with_skill_catalog(mut self, catalog: Arc<dyn SkillCatalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    pub fn compile(&self, doc: &WorkflowDocument) -> Result<WorkflowSpec, WorkflowError> {
        validate_document(doc)?;
        let version = parse_version(&doc.workflow_name, &doc.version)?;

        let mut steps = Vec::with_capacity(doc.steps.len());
        for step in &doc.steps {
            if let Some(catalog) = &self.catalog {
                if !catalog.has_skill(&step.skill_id) {
                    return Err(WorkflowError::UnknownSkill {
                        workflow: doc.workflow_name.clone(),
                        step_id: step.step_id.clone(),
                        skill_id: step.skill_id.clone(),
                    });
                }
            }

            let input_selector = self
                .selectors
                .compile_map(&step.input_selector)
                .map_err(|source| WorkflowError::Selector {
                    workflow: doc.workflow_name.clone(),
                    step_id: step.step_id.clone(),
                    source,
                })?;

            for referenced in input_selector.referenced_steps() {
                if !step.depends_on.iter().any(|d| d == referenced) {
                    tracing::warn!(
                        workflow = doc.workflow_name.as_str(),
                        step_id = step.step_id.as_str(),
                        referenced,
                        "input selector reads a step that is not a declared dependency"
                    );
                }
            }

            steps.push(StepSpec {
                step_id: step.step_id.clone(),
                skill_id: step.skill_id.clone(),
                depends_on: step.depends_on.clone(),
                input_selector,
                cache_policy: step.cache_policy,
                retry_policy: step.retry_policy,
                description: step.description.clone(),
            });
        }

        Ok(WorkflowSpec {
            workflow_name: doc.workflow_name.clone(),
            version,
            description: doc.description.clone(),
            steps,
        })
    }

    /// Parse, validate and compile in one go.
    pub fn compile_yaml(&self, yaml: &str) -> Result<WorkflowSpec, WorkflowError> {
        self.compile(&parse_workflow_yaml(yaml)?)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
