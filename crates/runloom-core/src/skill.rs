//! Skill execution and catalog ports.
//!
//! A skill is an external, named unit of work (an LLM call, media generation
//! or a deterministic transform). The engine never implements skills; it
//! calls them through [`SkillExecutor`] and checks workflow definitions
//! against a [`SkillCatalog`].

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Skill results
// ---------------------------------------------------------------------------

/// An artifact produced by a skill.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkillArtifact {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
}

/// Outcome reported by a skill: `ok` with data/artifacts, or a failure
/// with an optional skill-specific error code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkillResult {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default)]
    pub artifacts: Vec<SkillArtifact>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
}

impl SkillResult {
    pub fn success(data: Option<Value>, artifacts: Vec<SkillArtifact>) -> Self {
        Self {
            ok: true,
            data,
            artifacts,
            error: None,
            error_code: None,
        }
    }

    pub fn failure(error: impl Into<String>, error_code: Option<&str>) -> Self {
        Self {
            ok: false,
            data: None,
            artifacts: Vec::new(),
            error: Some(error.into()),
            error_code: error_code.map(str::to_string),
        }
    }

    /// Artifact ids in the order the skill reported them.
    pub fn artifact_ids(&self) -> Vec<String> {
        self.artifacts.iter().map(|a| a.id.clone()).collect()
    }
}

/// The skill call itself failed (transport error, panic in handler, ...),
/// as opposed to the skill reporting `ok: false`.
#[derive(Debug, thiserror::Error)]
#[error("skill invocation failed: {0}")]
pub struct SkillInvocationError(pub String);

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Invokes skills by id.
pub trait SkillExecutor: Send + Sync {
    fn execute(
        &self,
        skill_id: &str,
        input: &Value,
    ) -> impl std::future::Future<Output = Result<SkillResult, SkillInvocationError>> + Send;
}

/// Answers whether a skill id is known. Used to reject workflows that
/// reference unknown skills before registration.
pub trait SkillCatalog: Send + Sync {
    fn has_skill(&self, skill_id: &str) -> bool;
}

/// A fixed set of known skill ids.
#[derive(Debug, Clone, Default)]
pub struct StaticSkillCatalog {
    skills: HashSet<String>,
}

impl StaticSkillCatalog {
    pub fn new<I, S>(skills: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            skills: skills.into_iter().map(Into::into).collect(),
        }
    }
}

impl SkillCatalog for StaticSkillCatalog {
    fn has_skill(&self, skill_id: &str) -> bool {
        self.skills.contains(skill_id)
    }
}
