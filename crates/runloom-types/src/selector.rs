//! Input selector AST.
//!
//! Selectors are data: workflow definition files describe how each step's
//! input is derived from run state using a small tagged language. Source
//! selectors are tagged by `source`, composition operators by `operation`:
//!
//! ```yaml
//! input_selector:
//!   brief:
//!     source: trigger
//!     path: campaign.brief
//!   copy:
//!     operation: merge
//!     inputs:
//!       - { source: step_output, step_id: draft, path: data }
//!       - { source: constants, value: { tone: playful } }
//! ```
//!
//! Deserialization goes through `serde_json::Value` so that both YAML and JSON
//! documents get the same diagnostics for a malformed selector.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// A step's input selector map: field name -> selector.
pub type InputSelectorMap = BTreeMap<String, Selector>;

/// One node of the selector language.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "RawSelector")]
pub enum Selector {
    /// Read a path out of the trigger payload.
    Trigger { path: String },
    /// Read a path out of a completed step's output in the current run.
    StepOutput { step_id: String, path: String },
    /// Read a path out of a step's output in the base run of an update workflow.
    BaseRun { step_id: String, path: String },
    /// Fetch a versioned prompt / config / rubric from the template registry.
    Registry {
        kind: RegistryKind,
        id: String,
        version: Option<String>,
    },
    /// A fixed literal.
    Constant { value: Value },
    /// Shallow-merge object results left to right.
    Merge { inputs: Vec<Selector> },
    /// Copy only the listed keys out of an object result.
    Pick { input: Box<Selector>, keys: Vec<String> },
}

impl Selector {
    /// Short name of the selector form, used in diagnostics.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Selector::Trigger { .. } => "trigger",
            Selector::StepOutput { .. } => "step_output",
            Selector::BaseRun { .. } => "base_run",
            Selector::Registry { .. } => "registry",
            Selector::Constant { .. } => "constants",
            Selector::Merge { .. } => "merge",
            Selector::Pick { .. } => "pick",
        }
    }

    /// Step ids this selector reads from the current run, in tree order.
    pub fn referenced_steps(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_referenced_steps(&mut out);
        out
    }

    fn collect_referenced_steps<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Selector::StepOutput { step_id, .. } => out.push(step_id.as_str()),
            Selector::Merge { inputs } => {
                for input in inputs {
                    input.collect_referenced_steps(out);
                }
            }
            Selector::Pick { input, .. } => input.collect_referenced_steps(out),
            _ => {}
        }
    }
}

/// Which kind of registry document a `registry` selector fetches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistryKind {
    Prompt,
    Config,
    Rubric,
}

impl fmt::Display for RegistryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryKind::Prompt => write!(f, "prompt"),
            RegistryKind::Config => write!(f, "config"),
            RegistryKind::Rubric => write!(f, "rubric"),
        }
    }
}

/// Failure to read a selector node from a definition document.
#[derive(Debug, Error)]
pub enum SelectorParseError {
    #[error("selector must be an object, got {0}")]
    NotAnObject(&'static str),

    #[error("selector must carry exactly one of `source` or `operation`")]
    MissingTag,

    #[error("invalid {tag} selector: {message}")]
    Invalid { tag: String, message: String },
}

// ---------------------------------------------------------------------------
// Wire forms
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
enum SourceForm {
    Trigger {
        #[serde(default)]
        path: String,
    },
    StepOutput {
        step_id: String,
        #[serde(default)]
        path: String,
    },
    BaseRun {
        step_id: String,
        #[serde(default)]
        path: String,
    },
    Registry {
        #[serde(rename = "type")]
        kind: RegistryKind,
        id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        version: Option<String>,
    },
    #[serde(alias = "constant")]
    Constants {
        #[serde(default)]
        value: Value,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "operation", rename_all = "snake_case")]
enum OperationForm {
    Merge { inputs: Vec<Selector> },
    Pick { input: Box<Selector>, keys: Vec<String> },
}

/// Serialized shape of a selector (either a source or an operation).
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
enum RawSelector {
    Source(SourceForm),
    Operation(OperationForm),
}

impl TryFrom<Value> for Selector {
    type Error = SelectorParseError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        let map = match &value {
            Value::Object(map) => map,
            Value::Null => return Err(SelectorParseError::NotAnObject("null")),
            Value::Bool(_) => return Err(SelectorParseError::NotAnObject("a boolean")),
            Value::Number(_) => return Err(SelectorParseError::NotAnObject("a number")),
            Value::String(_) => return Err(SelectorParseError::NotAnObject("a string")),
            Value::Array(_) => return Err(SelectorParseError::NotAnObject("an array")),
        };

        match (map.contains_key("source"), map.contains_key("operation")) {
            (true, false) => {
                let form: SourceForm = serde_json::from_value(value).map_err(|e| {
                    SelectorParseError::Invalid {
                        tag: "source".to_string(),
                        message: e.to_string(),
                    }
                })?;
                Ok(form.into())
            }
            (false, true) => {
                let form: OperationForm = serde_json::from_value(value).map_err(|e| {
                    SelectorParseError::Invalid {
                        tag: "operation".to_string(),
                        message: e.to_string(),
                    }
                })?;
                Ok(form.into())
            }
            _ => Err(SelectorParseError::MissingTag),
        }
    }
}

impl From<SourceForm> for Selector {
    fn from(form: SourceForm) -> Self {
        match form {
            SourceForm::Trigger { path } => Selector::Trigger { path },
            SourceForm::StepOutput { step_id, path } => Selector::StepOutput { step_id, path },
            SourceForm::BaseRun { step_id, path } => Selector::BaseRun { step_id, path },
            SourceForm::Registry { kind, id, version } => Selector::Registry { kind, id, version },
            SourceForm::Constants { value } => Selector::Constant { value },
        }
    }
}

impl From<OperationForm> for Selector {
    fn from(form: OperationForm) -> Self {
        match form {
            OperationForm::Merge { inputs } => Selector::Merge { inputs },
            OperationForm::Pick { input, keys } => Selector::Pick { input, keys },
        }
    }
}

impl From<Selector> for RawSelector {
    fn from(selector: Selector) -> Self {
        match selector {
            Selector::Trigger { path } => {
                RawSelector::Source(SourceForm::Trigger { path })
            }
            Selector::StepOutput { step_id, path } => {
                RawSelector::Source(SourceForm::StepOutput { step_id, path })
            }
            Selector::BaseRun { step_id, path } => {
                RawSelector::Source(SourceForm::BaseRun { step_id, path })
            }
            Selector::Registry { kind, id, version } => {
                RawSelector::Source(SourceForm::Registry { kind, id, version })
            }
            Selector::Constant { value } => {
                RawSelector::Source(SourceForm::Constants { value })
            }
            Selector::Merge { inputs } => {
                RawSelector::Operation(OperationForm::Merge { inputs })
            }
            Selector::Pick { input, keys } => {
                RawSelector::Operation(OperationForm::Pick { input, keys })
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
