//! In-memory workflow registry keyed by `(name, version)`.
//!
//! Constructed empty, filled by a loader at startup and injected wherever
//! specs are needed. Holds no execution state.

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::sync::Arc;

use dashmap::DashMap;
use semver::Version;

use super::dag::validate_no_cycles;
use super::definition::{WorkflowError, parse_version};
use super::hashing::KEY_SEPARATOR;
use super::spec::WorkflowSpec;

#[derive(Debug, Default)]
pub struct WorkflowRegistry {
    workflows: DashMap<String, BTreeMap<Version, Arc<WorkflowSpec>>>,
}

impl WorkflowRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate the step graph and store the spec under its name and version.
    ///
    /// A registered version is immutable: registering the same
    /// `(name, version)` again fails until it is unregistered.
    pub fn register(&self, spec: WorkflowSpec) -> Result<Arc<WorkflowSpec>, WorkflowError> {
        check_key_components(&spec)?;
        let validation = validate_no_cycles(&spec.steps);
        if let Some(source) = validation.error {
            return Err(WorkflowError::Graph {
                workflow: spec.workflow_name.clone(),
                source,
            });
        }

        let spec = Arc::new(spec);
        let mut versions = self.workflows.entry(spec.workflow_name.clone()).or_default();
        match versions.entry(spec.version.clone()) {
            Entry::Occupied(_) => {
                return Err(WorkflowError::AlreadyRegistered {
                    workflow: spec.workflow_name.clone(),
                    version: spec.version.to_string(),
                });
            }
            Entry::Vacant(slot) => {
                slot.insert(Arc::clone(&spec));
            }
        }
        drop(versions);

        tracing::info!(
            workflow = spec.workflow_name.as_str(),
            version = %spec.version,
            steps = spec.steps.len(),
            "registered workflow"
        );
        Ok(spec)
    }

    /// The exact version when given, else the highest semantic version.
    pub fn get_workflow(
        &self,
        name: &str,
        version: Option<&str>,
    ) -> Result<Option<Arc<WorkflowSpec>>, WorkflowError> {
        let Some(versions) = self.workflows.get(name) else {
            return Ok(None);
        };
        match version {
            Some(v) => {
                let v = parse_version(name, v)?;
                Ok(versions.value().get(&v).cloned())
            }
            None => Ok(versions.value().values().next_back().cloned()),
        }
    }

    /// Workflow names, sorted.
    pub fn list_workflows(&self) -> Vec<String> {
        let mut names: Vec<String> = self.workflows.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Registered versions of `name`, ascending.
    pub fn get_workflow_versions(&self, name: &str) -> Vec<Version> {
        self.workflows
            .get(name)
            .map(|v| v.value().keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn has_workflow(&self, name: &str, version: Option<&str>) -> bool {
        matches!(self.get_workflow(name, version), Ok(Some(_)))
    }

    /// Remove one version. The name disappears with its last version.
    /// Returns whether anything was removed.
    pub fn unregister(&self, name: &str, version: &str) -> Result<bool, WorkflowError> {
        let version = parse_version(name, version)?;
        let removed = match self.workflows.get_mut(name) {
            Some(mut versions) => versions.value_mut().remove(&version).is_some(),
            None => return Ok(false),
        };
        self.workflows.remove_if(name, |_, versions| versions.is_empty());

        if removed {
            tracing::info!(workflow = name, %version, "unregistered workflow");
        }
        Ok(removed)
    }

    pub fn len(&self) -> usize {
        self.workflows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workflows.is_empty()
    }
}

/// Names and step ids become cache key components, so they may not contain
/// the key separator.
fn check_key_components(spec: &WorkflowSpec) -> Result<(), WorkflowError> {
    let offending = std::iter::once(spec.workflow_name.as_str())
        .chain(spec.steps.iter().map(|s| s.step_id.as_str()))
        .find(|part| part.contains(KEY_SEPARATOR));
    match offending {
        Some(part) => Err(WorkflowError::Validation(format!(
            "'{part}' in workflow '{}' must not contain '{KEY_SEPARATOR}'",
            spec.workflow_name
        ))),
        None => Ok(()),
    }
}
