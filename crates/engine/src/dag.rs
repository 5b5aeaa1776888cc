//! DAG validation. Runs before an execution record is created.
//!
//! Rules enforced:
//! 1. Step IDs must be unique within the graph.
//! 2. Every edge must reference valid step IDs (both `source` and `target`).
//! 3. The directed graph must be acyclic (topological sort must succeed).
//!
//! On success the graph's adjacency is returned as a [`Topology`] that the
//! scheduler walks.

use std::collections::{HashMap, VecDeque};

use serde_json::Value;

use nodes::NodeRegistry;

use crate::{models::WorkflowGraph, EngineError};

/// Index-based adjacency of a validated graph. Step indices refer to
/// `WorkflowGraph::steps`, edge indices to `WorkflowGraph::edges`.
#[derive(Debug, Clone, PartialEq)]
pub struct Topology {
    outgoing: Vec<Vec<usize>>,
    incoming: Vec<Vec<usize>>,
    edge_ends: Vec<(usize, usize)>,
    order: Vec<usize>,
}

impl Topology {
    /// Outgoing edge indices of a step, in payload order.
    pub fn outgoing(&self, step: usize) -> &[usize] {
        &self.outgoing[step]
    }

    pub fn incoming(&self, step: usize) -> &[usize] {
        &self.incoming[step]
    }

    /// `(source, target)` step indices of an edge.
    pub fn ends(&self, edge: usize) -> (usize, usize) {
        self.edge_ends[edge]
    }

    /// Steps without incoming edges, in graph order.
    pub fn roots(&self) -> Vec<usize> {
        (0..self.incoming.len())
            .filter(|&i| self.incoming[i].is_empty())
            .collect()
    }

    /// A topological order, ties broken by graph order.
    pub fn order(&self) -> &[usize] {
        &self.order
    }
}

/// Validate the graph and compute its topology.
///
/// # Errors
/// - [`EngineError::DuplicateStepId`] if two steps share an ID.
/// - [`EngineError::UnknownStepReference`] if an edge references a missing step.
/// - [`EngineError::CycleDetected`] if the graph is not acyclic.
pub fn validate_dag(graph: &WorkflowGraph) -> Result<Topology, EngineError> {
    // -----------------------------------------------------------------------
    // 1. Ensure step IDs are unique
    // -----------------------------------------------------------------------
    let mut index: HashMap<String, usize> = HashMap::with_capacity(graph.steps.len());
    for (i, step) in graph.steps.iter().enumerate() {
        if index.insert(step.id.clone(), i).is_some() {
            return Err(EngineError::DuplicateStepId(step.id.clone()));
        }
    }

    // -----------------------------------------------------------------------
    // 2. Validate edge endpoints
    // -----------------------------------------------------------------------
    let mut outgoing = vec![Vec::new(); graph.steps.len()];
    let mut incoming = vec![Vec::new(); graph.steps.len()];
    let mut edge_ends = Vec::with_capacity(graph.edges.len());
    for (e, edge) in graph.edges.iter().enumerate() {
        let lookup = |step_id: &str, side: &'static str| {
            index
                .get(step_id)
                .copied()
                .ok_or_else(|| EngineError::UnknownStepReference {
                    edge_id: edge.id.clone(),
                    step_id: step_id.to_owned(),
                    side,
                })
        };
        let source = lookup(&edge.source, "source")?;
        let target = lookup(&edge.target, "target")?;
        outgoing[source].push(e);
        incoming[target].push(e);
        edge_ends.push((source, target));
    }

    // -----------------------------------------------------------------------
    // 3. Topological sort (Kahn's algorithm), seeded in graph order
    // -----------------------------------------------------------------------
    let mut in_degree: Vec<usize> = incoming.iter().map(Vec::len).collect();
    let mut queue: VecDeque<usize> = (0..graph.steps.len())
        .filter(|&i| in_degree[i] == 0)
        .collect();
    let mut order = Vec::with_capacity(graph.steps.len());

    while let Some(step) = queue.pop_front() {
        order.push(step);
        for &e in &outgoing[step] {
            let (_, target) = edge_ends[e];
            in_degree[target] -= 1;
            if in_degree[target] == 0 {
                queue.push_back(target);
            }
        }
    }

    // If we didn't visit every step the graph contains a cycle.
    if order.len() != graph.steps.len() {
        let stuck = graph
            .steps
            .iter()
            .enumerate()
            .filter(|(i, _)| in_degree[*i] > 0)
            .map(|(_, s)| s.id.clone())
            .collect();
        return Err(EngineError::CycleDetected(stuck));
    }

    Ok(Topology {
        outgoing,
        incoming,
        edge_ends,
        order,
    })
}

/// A parsed and validated graph, ready to run.
#[derive(Debug, Clone)]
pub struct PreparedWorkflow {
    pub graph: WorkflowGraph,
    pub topology: Topology,
}

/// Parse `definition`, validate its structure and let every registered
/// executor check its steps' configs. Kinds without an executor are left to
/// the run-time unknown-kind policy.
pub fn prepare(
    definition: &Value,
    registry: &NodeRegistry,
) -> Result<PreparedWorkflow, EngineError> {
    let graph = WorkflowGraph::from_payload(definition)?;
    let topology = validate_dag(&graph)?;
    for step in &graph.steps {
        if let Some(node) = registry.get(step.kind.as_str()) {
            node.validate(&step.config)
                .map_err(|source| EngineError::InvalidStepConfig {
                    step_id: step.id.clone(),
                    source,
                })?;
        }
    }
    Ok(PreparedWorkflow { graph, topology })
}
