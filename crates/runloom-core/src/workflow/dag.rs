//! Dependency graph service: ordering, cycle detection, impact and frontier.
//!
//! Uses `petgraph` to model step dependencies as a directed graph with an
//! edge `dependency -> dependent`. Ordering is a stable Kahn's algorithm:
//! among steps that are ready at the same time, the one declared first wins,
//! so repeated sorts of the same workflow always agree.

use std::collections::{BTreeSet, HashMap, VecDeque};

use petgraph::Direction;
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use runloom_types::workflow::StepDocument;

/// Anything with a step id and a dependency list.
pub trait DagNode {
    fn node_id(&self) -> &str;
    fn dependencies(&self) -> &[String];
}

impl DagNode for StepDocument {
    fn node_id(&self) -> &str {
        &self.step_id
    }

    fn dependencies(&self) -> &[String] {
        &self.depends_on
    }
}

/// Structural problems in a step graph.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
    #[error("step '{step_id}' depends on unknown step '{dependency}'")]
    UnknownDependency { step_id: String, dependency: String },

    #[error("duplicate step id '{0}'")]
    DuplicateStep(String),

    #[error("cycle detected involving step '{0}'")]
    CycleDetected(String),
}

/// Outcome of [`validate_no_cycles`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DagValidation {
    pub valid: bool,
    pub error: Option<GraphError>,
}

// ---------------------------------------------------------------------------
// Graph construction
// ---------------------------------------------------------------------------

fn build_graph<T: DagNode>(steps: &[T]) -> Result<DiGraph<&str, ()>, GraphError> {
    let mut id_to_idx: HashMap<&str, NodeIndex> = HashMap::with_capacity(steps.len());
    let mut graph = DiGraph::<&str, ()>::with_capacity(steps.len(), steps.len());

    for step in steps {
        let idx = graph.add_node(step.node_id());
        if id_to_idx.insert(step.node_id(), idx).is_some() {
            return Err(GraphError::DuplicateStep(step.node_id().to_string()));
        }
    }

    for step in steps {
        let to_idx = id_to_idx[step.node_id()];
        for dep in step.dependencies() {
            let from_idx =
                id_to_idx
                    .get(dep.as_str())
                    .ok_or_else(|| GraphError::UnknownDependency {
                        step_id: step.node_id().to_string(),
                        dependency: dep.clone(),
                    })?;
            graph.add_edge(*from_idx, to_idx, ());
        }
    }

    Ok(graph)
}

// ---------------------------------------------------------------------------
// Topological order
// ---------------------------------------------------------------------------

/// Order `steps` so that every step comes after all of its dependencies.
///
/// Ties are broken by declaration order. Fails on an unknown dependency id,
/// a duplicate step id or a cycle.
pub fn topological_sort<T: DagNode>(steps: &[T]) -> Result<Vec<&T>, GraphError> {
    let graph = build_graph(steps)?;

    let mut in_degree: Vec<usize> = graph
        .node_indices()
        .map(|n| graph.neighbors_directed(n, Direction::Incoming).count())
        .collect();

    // Node indices follow insertion order, so the smallest ready index is the
    // earliest-declared ready step.
    let mut ready: BTreeSet<usize> = in_degree
        .iter()
        .enumerate()
        .filter(|(_, d)| **d == 0)
        .map(|(i, _)| i)
        .collect();

    let mut order = Vec::with_capacity(steps.len());
    while let Some(next) = ready.pop_first() {
        order.push(&steps[next]);
        for dependent in graph.neighbors_directed(NodeIndex::new(next), Direction::Outgoing) {
            let degree = &mut in_degree[dependent.index()];
            *degree -= 1;
            if *degree == 0 {
                ready.insert(dependent.index());
            }
        }
    }

    if order.len() < steps.len() {
        let culprit = match toposort(&graph, None) {
            Err(cycle) => graph[cycle.node_id()],
            Ok(_) => in_degree
                .iter()
                .position(|d| *d > 0)
                .map(|i| graph[NodeIndex::new(i)])
                .unwrap_or_default(),
        };
        return Err(GraphError::CycleDetected(culprit.to_string()));
    }

    Ok(order)
}

/// Structured form of [`topological_sort`]'s failure, for registration-time
/// checks that must not propagate the error directly.
pub fn validate_no_cycles<T: DagNode>(steps: &[T]) -> DagValidation {
    match topological_sort(steps) {
        Ok(_) => DagValidation {
            valid: true,
            error: None,
        },
        Err(e) => DagValidation {
            valid: false,
            error: Some(e),
        },
    }
}

// ---------------------------------------------------------------------------
// Roots, impact, frontier
// ---------------------------------------------------------------------------

/// Steps with no dependencies, in declaration order.
pub fn entry_steps<T: DagNode>(steps: &[T]) -> Vec<&T> {
    steps
        .iter()
        .filter(|s| s.dependencies().is_empty())
        .collect()
}

/// The changed step ids plus every step that transitively depends on one of
/// them.
pub fn downstream_closure<'a, T, I>(steps: &[T], changed: I) -> BTreeSet<String>
where
    T: DagNode,
    I: IntoIterator<Item = &'a str>,
{
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
    for step in steps {
        for dep in step.dependencies() {
            dependents
                .entry(dep.as_str())
                .or_default()
                .push(step.node_id());
        }
    }

    let mut closure: BTreeSet<String> = BTreeSet::new();
    let mut queue: VecDeque<String> = VecDeque::new();
    for id in changed {
        if closure.insert(id.to_string()) {
            queue.push_back(id.to_string());
        }
    }

    while let Some(current) = queue.pop_front() {
        if let Some(children) = dependents.get(current.as_str()) {
            for child in children {
                if closure.insert((*child).to_string()) {
                    queue.push_back((*child).to_string());
                }
            }
        }
    }

    closure
}

/// Pending steps whose dependencies have all completed, in declaration order.
pub fn ready_steps<'a, T: DagNode>(
    steps: &'a [T],
    completed: &BTreeSet<String>,
    pending: &BTreeSet<String>,
) -> Vec<&'a T> {
    steps
        .iter()
        .filter(|s| pending.contains(s.node_id()))
        .filter(|s| s.dependencies().iter().all(|d| completed.contains(d)))
        .collect()
}

// ---------------------------------------------------------------------------
// Execution waves
// ---------------------------------------------------------------------------

/// Group steps into waves that could run concurrently.
///
/// A step's wave is one more than the deepest wave among its dependencies;
/// roots are wave 0. Steps keep declaration order within a wave.
pub fn execution_waves<T: DagNode>(steps: &[T]) -> Result<Vec<Vec<&T>>, GraphError> {
    if steps.is_empty() {
        return Ok(vec![]);
    }

    let sorted = topological_sort(steps)?;

    let mut depths: HashMap<&str, usize> = HashMap::with_capacity(steps.len());
    for step in &sorted {
        let depth = step
            .dependencies()
            .iter()
            .map(|dep| depths.get(dep.as_str()).copied().unwrap_or(0) + 1)
            .max()
            .unwrap_or(0);
        depths.insert(step.node_id(), depth);
    }

    let max_depth = depths.values().copied().max().unwrap_or(0);
    let mut waves: Vec<Vec<&T>> = vec![vec![]; max_depth + 1];
    for step in steps {
        waves[depths[step.node_id()]].push(step);
    }

    Ok(waves)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
