//! Prompt / config / rubric registry port.
//!
//! `registry` selectors fetch versioned documents through [`TemplateRegistry`].
//! The full registry (storage, templating) lives outside the engine; this
//! module provides the trait plus two small adapters.

use std::collections::BTreeMap;

use dashmap::DashMap;
use runloom_types::selector::RegistryKind;
use semver::Version;
use serde_json::Value;

/// Why a registry lookup failed.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TemplateLookupError {
    #[error("{kind} '{id}' not found{}", version_suffix(.version))]
    NotFound {
        kind: RegistryKind,
        id: String,
        version: Option<String>,
    },

    #[error("invalid version '{0}'")]
    InvalidVersion(String),

    #[error("template registry unavailable: {0}")]
    Unavailable(String),
}

fn version_suffix(version: &Option<String>) -> String {
    version
        .as_deref()
        .map(|v| format!(" at version {v}"))
        .unwrap_or_default()
}

/// Versioned prompt / config / rubric lookup.
///
/// Synchronous so that compiled selectors stay plain functions of the run
/// context.
pub trait TemplateRegistry: Send + Sync {
    /// Fetch `id` at `version`, or the highest semantic version when `None`.
    fn get(
        &self,
        kind: RegistryKind,
        id: &str,
        version: Option<&str>,
    ) -> Result<Value, TemplateLookupError>;
}

/// Registry used when none is configured: every lookup fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullTemplateRegistry;

impl TemplateRegistry for NullTemplateRegistry {
    fn get(
        &self,
        kind: RegistryKind,
        id: &str,
        _version: Option<&str>,
    ) -> Result<Value, TemplateLookupError> {
        Err(TemplateLookupError::Unavailable(format!(
            "no registry configured for {kind} '{id}'"
        )))
    }
}

/// In-process registry keyed by `(kind, id)` with semantic-version ordering.
#[derive(Debug, Default)]
pub struct InMemoryTemplateRegistry {
    entries: DashMap<(RegistryKind, String), BTreeMap<Version, Value>>,
}

impl InMemoryTemplateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace one version of a document.
    pub fn insert(
        &self,
        kind: RegistryKind,
        id: &str,
        version: &str,
        value: Value,
    ) -> Result<(), TemplateLookupError> {
        let version = Version::parse(version)
            .map_err(|_| TemplateLookupError::InvalidVersion(version.to_string()))?;
        self.entries
            .entry((kind, id.to_string()))
            .or_default()
            .insert(version, value);
        Ok(())
    }
}

impl TemplateRegistry for InMemoryTemplateRegistry {
    fn get(
        &self,
        kind: RegistryKind,
        id: &str,
        version: Option<&str>,
    ) -> Result<Value, TemplateLookupError> {
        let not_found = || TemplateLookupError::NotFound {
            kind,
            id: id.to_string(),
            version: version.map(str::to_string),
        };

        let versions = self.entries.get(&(kind, id.to_string())).ok_or_else(not_found)?;

        match version {
            Some(v) => {
                let parsed = Version::parse(v)
                    .map_err(|_| TemplateLookupError::InvalidVersion(v.to_string()))?;
                versions.value().get(&parsed).cloned().ok_or_else(not_found)
            }
            None => versions
                .value()
                .iter()
                .next_back()
                .map(|(_, value)| value.clone())
                .ok_or_else(not_found),
        }
    }
}
