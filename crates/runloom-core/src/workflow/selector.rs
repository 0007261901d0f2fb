//! Input selector interpreter.
//!
//! Compiles the declarative selector AST (`runloom_types::selector::Selector`)
//! into a tree of [`CompiledSelector`] nodes with pre-parsed paths, then
//! evaluates that tree against a [`RunContext`]. Selector strings are only
//! ever parsed as paths; nothing is evaluated as code.
//!
//! Evaluation borrows from the run context wherever it can. A result of
//! `None` means "absent" (a path that resolved to nothing); such fields are
//! left out of the assembled step input.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use runloom_types::run::StepOutput;
use runloom_types::selector::{InputSelectorMap, RegistryKind, Selector};
use serde_json::{Map, Value};

use super::context::RunContext;
use super::path::{is_forbidden_key, FieldPath, PathSegment, PathSyntaxError};
use crate::template::{TemplateLookupError, TemplateRegistry};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors raised while compiling or evaluating selectors.
#[derive(Debug, thiserror::Error)]
pub enum SelectorError {
    #[error("step output '{step_id}' not found in {scope}")]
    StepOutputNotFound {
        step_id: String,
        scope: OutputScope,
    },

    #[error("base run not available: selector references base run step '{step_id}' but this run has no base run")]
    BaseRunNotAvailable { step_id: String },

    #[error("{operation} input{} must be an object, got {found}", index_suffix(.index))]
    NotAnObject {
        operation: &'static str,
        index: Option<usize>,
        found: &'static str,
    },

    #[error("merge input {index} is the same object instance as an earlier input (circular reference)")]
    CircularMergeInput { index: usize },

    #[error(transparent)]
    MalformedPath(#[from] PathSyntaxError),

    #[error("registry lookup failed: {0}")]
    Registry(#[from] TemplateLookupError),

    #[error("input field '{field}': {source}")]
    Field {
        field: String,
        #[source]
        source: Box<SelectorError>,
    },
}

fn index_suffix(index: &Option<usize>) -> String {
    index.map(|i| format!(" {i}")).unwrap_or_default()
}

/// Which output set a step lookup ran against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputScope {
    CurrentRun,
    BaseRun,
}

impl fmt::Display for OutputScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputScope::CurrentRun => write!(f, "current run"),
            OutputScope::BaseRun => write!(f, "base run"),
        }
    }
}

fn json_kind(value: Option<&Value>) -> &'static str {
    match value {
        None => "nothing",
        Some(Value::Null) => "null",
        Some(Value::Bool(_)) => "a boolean",
        Some(Value::Number(_)) => "a number",
        Some(Value::String(_)) => "a string",
        Some(Value::Array(_)) => "an array",
        Some(Value::Object(_)) => "an object",
    }
}

// ---------------------------------------------------------------------------
// Compiled form
// ---------------------------------------------------------------------------

/// One compiled selector node.
#[derive(Clone)]
pub enum CompiledSelector {
    Trigger(FieldPath),
    StepOutput { step_id: String, path: FieldPath },
    BaseRun { step_id: String, path: FieldPath },
    Registry {
        registry: Arc<dyn TemplateRegistry>,
        kind: RegistryKind,
        id: String,
        version: Option<String>,
    },
    Constant(Value),
    Merge(Vec<CompiledSelector>),
    Pick {
        input: Box<CompiledSelector>,
        keys: Vec<String>,
    },
}

impl fmt::Debug for CompiledSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompiledSelector::Trigger(path) => write!(f, "Trigger({path:?})"),
            CompiledSelector::StepOutput { step_id, path } => {
                write!(f, "StepOutput({step_id}, {path:?})")
            }
            CompiledSelector::BaseRun { step_id, path } => write!(f, "BaseRun({step_id}, {path:?})"),
            CompiledSelector::Registry {
                kind, id, version, ..
            } => write!(f, "Registry({kind}, {id}, {version:?})"),
            CompiledSelector::Constant(value) => write!(f, "Constant({value})"),
            CompiledSelector::Merge(inputs) => f.debug_tuple("Merge").field(inputs).finish(),
            CompiledSelector::Pick { input, keys } => {
                f.debug_struct("Pick").field("input", input).field("keys", keys).finish()
            }
        }
    }
}

impl CompiledSelector {
    /// Evaluate against a run context.
    pub fn evaluate<'a>(
        &'a self,
        ctx: &'a RunContext,
    ) -> Result<Option<Cow<'a, Value>>, SelectorError> {
        match self {
            CompiledSelector::Trigger(path) => {
                Ok(path.resolve(ctx.trigger_payload()).map(Cow::Borrowed))
            }
            CompiledSelector::StepOutput { step_id, path } => {
                let output = ctx.step_output(step_id).ok_or_else(|| {
                    SelectorError::StepOutputNotFound {
                        step_id: step_id.clone(),
                        scope: OutputScope::CurrentRun,
                    }
                })?;
                Ok(project_step_output(output, path))
            }
            CompiledSelector::BaseRun { step_id, path } => {
                let base = ctx
                    .base_run()
                    .ok_or_else(|| SelectorError::BaseRunNotAvailable {
                        step_id: step_id.clone(),
                    })?;
                let output =
                    base.output(step_id)
                        .ok_or_else(|| SelectorError::StepOutputNotFound {
                            step_id: step_id.clone(),
                            scope: OutputScope::BaseRun,
                        })?;
                Ok(project_step_output(output, path))
            }
            CompiledSelector::Registry {
                registry,
                kind,
                id,
                version,
            } => {
                let value = registry.get(*kind, id, version.as_deref())?;
                Ok(Some(Cow::Owned(value)))
            }
            CompiledSelector::Constant(value) => Ok(Some(Cow::Borrowed(value))),
            CompiledSelector::Merge(inputs) => evaluate_merge(inputs, ctx).map(Some),
            CompiledSelector::Pick { input, keys } => {
                let resolved = input.evaluate(ctx)?;
                let Some(Value::Object(source)) = resolved.as_deref() else {
                    return Err(SelectorError::NotAnObject {
                        operation: "pick",
                        index: None,
                        found: json_kind(resolved.as_deref()),
                    });
                };
                let mut picked = Map::new();
                for key in keys {
                    if is_forbidden_key(key) {
                        continue;
                    }
                    if let Some(value) = source.get(key) {
                        picked.insert(key.clone(), value.clone());
                    }
                }
                Ok(Some(Cow::Owned(Value::Object(picked))))
            }
        }
    }
}

fn evaluate_merge<'a>(
    inputs: &'a [CompiledSelector],
    ctx: &'a RunContext,
) -> Result<Cow<'a, Value>, SelectorError> {
    let mut seen: Vec<*const Value> = Vec::with_capacity(inputs.len());
    let mut merged = Map::new();

    for (index, input) in inputs.iter().enumerate() {
        let resolved = input.evaluate(ctx)?;
        let object = match resolved.as_deref() {
            Some(Value::Object(map)) => map,
            other => {
                return Err(SelectorError::NotAnObject {
                    operation: "merge",
                    index: Some(index),
                    found: json_kind(other),
                });
            }
        };

        if let Some(Cow::Borrowed(value)) = &resolved {
            let ptr: *const Value = *value;
            if seen.contains(&ptr) {
                return Err(SelectorError::CircularMergeInput { index });
            }
            seen.push(ptr);
        }

        for (key, value) in object {
            if is_forbidden_key(key) {
                continue;
            }
            merged.insert(key.clone(), value.clone());
        }
    }

    Ok(Cow::Owned(Value::Object(merged)))
}

/// Resolve a path against a step output.
///
/// The first segment selects a projection of the output (`data`,
/// `artifacts` / `outputArtifactIds`, `status`, `stepId`); any other first
/// segment is read from `data`.
fn project_step_output<'a>(output: &'a StepOutput, path: &FieldPath) -> Option<Cow<'a, Value>> {
    let Some((first, rest)) = path.split_first() else {
        return serde_json::to_value(output).ok().map(Cow::Owned);
    };

    let PathSegment::Key(name) = first else {
        return output
            .data
            .as_ref()
            .and_then(|data| path.resolve(data))
            .map(Cow::Borrowed);
    };

    match name.as_str() {
        "data" => output
            .data
            .as_ref()
            .and_then(|data| rest.resolve(data))
            .map(Cow::Borrowed),
        "artifacts" | "outputArtifactIds" | "output_artifact_ids" => {
            let ids = Value::Array(
                output
                    .output_artifact_ids
                    .iter()
                    .cloned()
                    .map(Value::String)
                    .collect(),
            );
            rest.resolve(&ids).cloned().map(Cow::Owned)
        }
        "status" => {
            let status = Value::String(output.status.as_str().to_string());
            rest.resolve(&status).cloned().map(Cow::Owned)
        }
        "stepId" | "step_id" => {
            let id = Value::String(output.step_id.clone());
            rest.resolve(&id).cloned().map(Cow::Owned)
        }
        _ => output
            .data
            .as_ref()
            .and_then(|data| path.resolve(data))
            .map(Cow::Borrowed),
    }
}

// ---------------------------------------------------------------------------
// Input selector map
// ---------------------------------------------------------------------------

/// A compiled `input_selector` map: evaluates every field independently and
/// assembles one input object.
#[derive(Clone)]
pub struct CompiledInputSelector {
    fields: Arc<Vec<(String, CompiledSelector)>>,
    source: Arc<InputSelectorMap>,
}

impl fmt::Debug for CompiledInputSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.fields.iter().map(|(k, v)| (k, v)))
            .finish()
    }
}

impl CompiledInputSelector {
    /// Evaluate every field and assemble the step input object.
    pub fn evaluate(&self, ctx: &RunContext) -> Result<Value, SelectorError> {
        let mut input = Map::new();
        for (field, selector) in self.fields.iter() {
            let value = selector.evaluate(ctx).map_err(|e| SelectorError::Field {
                field: field.clone(),
                source: Box::new(e),
            })?;
            if let Some(value) = value {
                input.insert(field.clone(), value.into_owned());
            }
        }
        Ok(Value::Object(input))
    }

    /// The selector map this was compiled from.
    pub fn source(&self) -> &InputSelectorMap {
        &self.source
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(name, _)| name.as_str())
    }

    /// Step ids referenced through `step_output` selectors.
    pub fn referenced_steps(&self) -> Vec<&str> {
        let mut refs: Vec<&str> = self
            .source
            .values()
            .flat_map(Selector::referenced_steps)
            .collect();
        refs.sort_unstable();
        refs.dedup();
        refs
    }
}

// ---------------------------------------------------------------------------
// Compiler
// ---------------------------------------------------------------------------

/// Compiles selector ASTs, binding `registry` selectors to a template registry.
#[derive(Clone)]
pub struct SelectorCompiler {
    registry: Arc<dyn TemplateRegistry>,
}

impl SelectorCompiler {
    pub fn new(registry: Arc<dyn TemplateRegistry>) -> Self {
        Self { registry }
    }

    /// Compile one selector node (recursively).
    pub fn compile(&self, selector: &Selector) -> Result<CompiledSelector, SelectorError> {
        Ok(match selector {
            Selector::Trigger { path } => CompiledSelector::Trigger(FieldPath::parse(path)?),
            Selector::StepOutput { step_id, path } => CompiledSelector::StepOutput {
                step_id: step_id.clone(),
                path: FieldPath::parse(path)?,
            },
            Selector::BaseRun { step_id, path } => CompiledSelector::BaseRun {
                step_id: step_id.clone(),
                path: FieldPath::parse(path)?,
            },
            Selector::Registry { kind, id, version } => CompiledSelector::Registry {
                registry: Arc::clone(&self.registry),
                kind: *kind,
                id: id.clone(),
                version: version.clone(),
            },
            Selector::Constant { value } => CompiledSelector::Constant(value.clone()),
            Selector::Merge { inputs } => CompiledSelector::Merge(
                inputs
                    .iter()
                    .map(|s| self.compile(s))
                    .collect::<Result<_, _>>()?,
            ),
            Selector::Pick { input, keys } => CompiledSelector::Pick {
                input: Box::new(self.compile(input)?),
                keys: keys.clone(),
            },
        })
    }

    /// Compile a whole `input_selector` map.
    pub fn compile_map(
        &self,
        map: &InputSelectorMap,
    ) -> Result<CompiledInputSelector, SelectorError> {
        let mut fields = Vec::with_capacity(map.len());
        for (field, selector) in map {
            let compiled = self.compile(selector).map_err(|e| SelectorError::Field {
                field: field.clone(),
                source: Box::new(e),
            })?;
            fields.push((field.clone(), compiled));
        }
        Ok(CompiledInputSelector {
            fields: Arc::new(fields),
            source: Arc::new(map.clone()),
        })
    }
}

impl Default for CompiledInputSelector {
    fn default() -> Self {
        Self {
            fields: Arc::new(Vec::new()),
            source: Arc::new(BTreeMap::new()),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::{InMemoryTemplateRegistry, NullTemplateRegistry};
    use crate::workflow::context::{BaseRunView, RunState};
    use runloom_types::run::StepOutputStatus;
    use serde_json::json;
    use uuid::Uuid;

    fn compiler() -> SelectorCompiler {
        SelectorCompiler::new(Arc::new(NullTemplateRegistry))
    }

    fn sel(value: Value) -> Selector {
        serde_json::from_value(value).unwrap()
    }

    fn eval(selector: Value, ctx: &RunContext) -> Result<Option<Value>, SelectorError> {
        let compiled = compiler().compile(&sel(selector))?;
        compiled.evaluate(ctx).map(|v| v.map(Cow::into_owned))
    }

    fn context() -> RunContext {
        RunState::new(
            Uuid::now_v7(),
            "acme",
            "campaign",
            json!({"a": {"b": [{"c": 1}, {"c": 2}]}, "brief": "Spring sale"}),
            None,
        )
        .with_output(StepOutput::completed(
            "draft",
            vec!["art-1".into(), "art-2".into()],
            Some(json!({"title": "Hello", "tags": ["x", "y"], "meta": {"tone": "warm"}})),
        ))
        .snapshot()
    }

    #[test]
    fn test_trigger_paths() {
        let ctx = context();
        assert_eq!(
            eval(json!({"source": "trigger", "path": "a.b[1].c"}), &ctx).unwrap(),
            Some(json!(2))
        );
        assert_eq!(
            eval(json!({"source": "trigger", "path": "a.b[5].c"}), &ctx).unwrap(),
            None
        );
        assert_eq!(
            eval(json!({"source": "trigger"}), &ctx).unwrap().unwrap()["brief"],
            "Spring sale"
        );
    }

    #[test]
    fn test_step_output_projections() {
        let ctx = context();
        let get = |path: &str| {
            eval(json!({"source": "step_output", "step_id": "draft", "path": path}), &ctx).unwrap()
        };
        assert_eq!(get("data.title"), Some(json!("Hello")));
        assert_eq!(get("title"), Some(json!("Hello")));
        assert_eq!(get("tags[1]"), Some(json!("y")));
        assert_eq!(get("artifacts"), Some(json!(["art-1", "art-2"])));
        assert_eq!(get("outputArtifactIds[0]"), Some(json!("art-1")));
        assert_eq!(get("status"), Some(json!("completed")));
        assert_eq!(get("stepId"), Some(json!("draft")));
        assert_eq!(get("missing"), None);

        let whole = get("").unwrap();
        assert_eq!(whole["step_id"], "draft");
        assert_eq!(whole["data"]["meta"]["tone"], "warm");
    }

    #[test]
    fn test_step_output_not_found() {
        let ctx = context();
        let err = eval(json!({"source": "step_output", "step_id": "ghost"}), &ctx).unwrap_err();
        assert!(matches!(
            err,
            SelectorError::StepOutputNotFound { ref step_id, scope: OutputScope::CurrentRun } if step_id == "ghost"
        ));
    }

    #[test]
    fn test_base_run_requires_base() {
        let ctx = context();
        let err =
            eval(json!({"source": "base_run", "step_id": "draft", "path": "title"}), &ctx).unwrap_err();
        assert!(matches!(err, SelectorError::BaseRunNotAvailable { .. }));
    }

    #[test]
    fn test_base_run_lookup() {
        let base = BaseRunView::new(
            Uuid::now_v7(),
            [StepOutput::completed("copy", vec![], Some(json!({"headline": "Old"})))],
        );
        let ctx = RunState::new(Uuid::now_v7(), "acme", "campaign-update", json!({}), Some(base))
            .snapshot();

        assert_eq!(
            eval(json!({"source": "base_run", "step_id": "copy", "path": "headline"}), &ctx).unwrap(),
            Some(json!("Old"))
        );
        let err = eval(json!({"source": "base_run", "step_id": "image"}), &ctx).unwrap_err();
        assert!(matches!(
            err,
            SelectorError::StepOutputNotFound { scope: OutputScope::BaseRun, .. }
        ));
    }

    #[test]
    fn test_merge_later_wins() {
        let ctx = context();
        let merged = eval(
            json!({"operation": "merge", "inputs": [
                {"source": "constants", "value": {"x": 1}},
                {"source": "constants", "value": {"x": 2, "y": 3}}
            ]}),
            &ctx,
        )
        .unwrap();
        assert_eq!(merged, Some(json!({"x": 2, "y": 3})));
    }

    #[test]
    fn test_merge_rejects_non_objects() {
        let ctx = context();
        let err = eval(
            json!({"operation": "merge", "inputs": [
                {"source": "constants", "value": {"x": 1}},
                {"source": "trigger", "path": "a.b"}
            ]}),
            &ctx,
        )
        .unwrap_err();
        assert!(
            matches!(err, SelectorError::NotAnObject { operation: "merge", index: Some(1), found: "an array" }),
            "got {err:?}"
        );

        let err = eval(
            json!({"operation": "merge", "inputs": [{"source": "trigger", "path": "nope"}]}),
            &ctx,
        )
        .unwrap_err();
        assert!(err.to_string().contains("got nothing"), "got: {err}");
    }

    #[test]
    fn test_merge_rejects_same_instance_twice() {
        let ctx = context();
        let err = eval(
            json!({"operation": "merge", "inputs": [
                {"source": "step_output", "step_id": "draft", "path": "meta"},
                {"source": "step_output", "step_id": "draft", "path": "data.meta"}
            ]}),
            &ctx,
        )
        .unwrap_err();
        assert!(matches!(err, SelectorError::CircularMergeInput { index: 1 }));
    }

    #[test]
    fn test_merge_skips_forbidden_keys() {
        let ctx = context();
        let merged = eval(
            json!({"operation": "merge", "inputs": [
                {"source": "constants", "value": {"constructor": {"evil": true}, "ok": 1}},
                {"source": "constants", "value": {"__proto__": {"polluted": true}, "prototype": 2}}
            ]}),
            &ctx,
        )
        .unwrap()
        .unwrap();
        assert_eq!(merged, json!({"ok": 1}));
    }

    #[test]
    fn test_pick_copies_only_present_keys() {
        let ctx = context();
        let picked = eval(
            json!({"operation": "pick", "keys": ["title", "absent", "constructor"], "input":
                {"source": "step_output", "step_id": "draft", "path": "data"}}),
            &ctx,
        )
        .unwrap();
        assert_eq!(picked, Some(json!({"title": "Hello"})));

        let err = eval(
            json!({"operation": "pick", "keys": ["a"], "input": {"source": "constants", "value": [1]}}),
            &ctx,
        )
        .unwrap_err();
        assert!(matches!(err, SelectorError::NotAnObject { operation: "pick", .. }));
    }

    #[test]
    fn test_registry_source() {
        let registry = InMemoryTemplateRegistry::new();
        registry
            .insert(RegistryKind::Prompt, "headline", "1.0.0", json!({"template": "Write {{x}}"}))
            .unwrap();
        let compiler = SelectorCompiler::new(Arc::new(registry));
        let ctx = context();

        let found = compiler
            .compile(&sel(json!({"source": "registry", "type": "prompt", "id": "headline"})))
            .unwrap();
        assert_eq!(
            found.evaluate(&ctx).unwrap().unwrap().into_owned()["template"],
            "Write {{x}}"
        );

        let missing = compiler
            .compile(&sel(json!({"source": "registry", "type": "prompt", "id": "nope"})))
            .unwrap();
        assert!(matches!(missing.evaluate(&ctx), Err(SelectorError::Registry(_))));
    }

    #[test]
    fn test_compile_rejects_malformed_path() {
        let mut map = InputSelectorMap::new();
        map.insert("bad".to_string(), sel(json!({"source": "trigger", "path": "a..b"})));
        let err = compiler().compile_map(&map).unwrap_err();
        assert!(err.to_string().contains("input field 'bad'"), "got: {err}");
        assert!(err.to_string().contains("malformed path"), "got: {err}");
    }

    #[test]
    fn test_input_map_assembles_and_omits_absent() {
        let mut map = InputSelectorMap::new();
        map.insert("brief".into(), sel(json!({"source": "trigger", "path": "brief"})));
        map.insert("title".into(), sel(json!({"source": "step_output", "step_id": "draft", "path": "title"})));
        map.insert("missing".into(), sel(json!({"source": "trigger", "path": "nope"})));
        map.insert("nothing".into(), sel(json!({"source": "constants", "value": null})));

        let compiled = compiler().compile_map(&map).unwrap();
        let input = compiled.evaluate(&context()).unwrap();
        assert_eq!(
            input,
            json!({"brief": "Spring sale", "title": "Hello", "nothing": null})
        );
        assert_eq!(compiled.referenced_steps(), vec!["draft"]);
    }

    #[test]
    fn test_failed_step_status_projection() {
        let failed = StepOutput {
            step_id: "render".into(),
            status: StepOutputStatus::Failed,
            output_artifact_ids: vec![],
            data: None,
        };
        let ctx = RunState::new(Uuid::now_v7(), "acme", "wf", json!({}), None)
            .with_output(failed)
            .snapshot();
        assert_eq!(
            eval(json!({"source": "step_output", "step_id": "render", "path": "status"}), &ctx).unwrap(),
            Some(json!("failed"))
        );
        assert_eq!(
            eval(json!({"source": "step_output", "step_id": "render", "path": "title"}), &ctx).unwrap(),
            None
        );
    }
}
