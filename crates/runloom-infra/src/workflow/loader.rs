//! Filesystem workflow loader.
//!
//! Discovers workflow files under a directory, compiles each one with a
//! [`WorkflowCompiler`] and registers the result. Documents that parse but
//! fail to compile or register are reported, not fatal: one bad file must not
//! keep the rest of the catalogue from loading.

use std::path::{Path, PathBuf};

use runloom_core::workflow::definition::{WorkflowCompiler, WorkflowError, discover_workflows};
use runloom_core::workflow::registry::WorkflowRegistry;

/// Outcome of [`load_workflows`].
#[derive(Debug, Default)]
pub struct LoadReport {
    /// `(workflow_name, version)` of every registered workflow.
    pub loaded: Vec<(String, String)>,
    /// Files that parsed but could not be compiled or registered.
    pub rejected: Vec<(PathBuf, String)>,
}

/// Compile and register every workflow under `dir`.
///
/// A missing directory loads nothing.
pub fn load_workflows(
    dir: &Path,
    compiler: &WorkflowCompiler,
    registry: &WorkflowRegistry,
) -> Result<LoadReport, WorkflowError> {
    let mut report = LoadReport::default();

    for (path, doc) in discover_workflows(dir)? {
        let registered = compiler
            .compile(&doc)
            .and_then(|spec| registry.register(spec));
        match registered {
            Ok(spec) => {
                report
                    .loaded
                    .push((spec.workflow_name.clone(), spec.version.to_string()));
            }
            Err(error) => {
                tracing::warn!(?path, %error, "rejected workflow file");
                report.rejected.push((path, error.to_string()));
            }
        }
    }

    tracing::info!(
        dir = %dir.display(),
        loaded = report.loaded.len(),
        rejected = report.rejected.len(),
        "workflows loaded"
    );
    Ok(report)
}
