//! Per-run step/edge state machine.
//!
//! Every edge starts `Pending` and becomes `Taken` or `Dead` when its source
//! finishes. A step becomes ready once all its incoming edges are decided and
//! at least one was taken; if every incoming edge is dead the step is skipped
//! and its own outgoing edges die with it.

use nodes::Branch;

use crate::dag::Topology;
use crate::models::WorkflowGraph;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EdgeState {
    Pending,
    Taken,
    Dead,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Waiting,
    /// Placed in a frontier.
    Ready,
    Completed,
    Skipped,
}

/// Steps unlocked by one completion.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Advance {
    /// Newly ready steps, in graph order.
    pub ready: Vec<usize>,
    /// Newly skipped steps, in the order they were ruled out.
    pub skipped: Vec<usize>,
}

pub struct Traversal<'g> {
    graph: &'g WorkflowGraph,
    topology: &'g Topology,
    edges: Vec<EdgeState>,
    phases: Vec<Phase>,
}

impl<'g> Traversal<'g> {
    pub fn new(graph: &'g WorkflowGraph, topology: &'g Topology) -> Self {
        Self {
            graph,
            topology,
            edges: vec![EdgeState::Pending; graph.edges.len()],
            phases: vec![Phase::Waiting; graph.steps.len()],
        }
    }

    /// The first frontier: every root step.
    pub fn start(&mut self) -> Vec<usize> {
        let roots = self.topology.roots();
        for &root in &roots {
            self.phases[root] = Phase::Ready;
        }
        roots
    }

    pub fn phase(&self, step: usize) -> Phase {
        self.phases[step]
    }

    /// Record a successful step. Steps with a branch outcome only follow
    /// unlabelled edges and edges labelled with that outcome; all others
    /// follow every edge.
    pub fn complete(&mut self, step: usize, outcome: Option<Branch>) -> Advance {
        self.phases[step] = Phase::Completed;
        let mut advance = Advance::default();
        let mut touched = Vec::new();
        for &e in self.topology.outgoing(step) {
            let taken = match (outcome, self.graph.edges[e].branch) {
                (Some(outcome), Some(label)) => outcome == label,
                _ => true,
            };
            self.edges[e] = if taken { EdgeState::Taken } else { EdgeState::Dead };
            touched.push(self.topology.ends(e).1);
        }
        self.settle(touched, &mut advance);
        advance.ready.sort_unstable();
        advance.ready.dedup();
        advance
    }

    fn settle(&mut self, mut pending: Vec<usize>, advance: &mut Advance) {
        while let Some(step) = pending.pop() {
            if self.phases[step] != Phase::Waiting {
                continue;
            }
            let states: Vec<EdgeState> = self
                .topology
                .incoming(step)
                .iter()
                .map(|&e| self.edges[e])
                .collect();
            if states.contains(&EdgeState::Pending) {
                continue;
            }
            if states.contains(&EdgeState::Taken) {
                self.phases[step] = Phase::Ready;
                advance.ready.push(step);
            } else {
                self.phases[step] = Phase::Skipped;
                advance.skipped.push(step);
                for &e in self.topology.outgoing(step) {
                    self.edges[e] = EdgeState::Dead;
                    pending.push(self.topology.ends(e).1);
                }
            }
        }
    }

    pub fn count(&self, phase: Phase) -> usize {
        self.phases.iter().filter(|p| **p == phase).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dag::validate_dag;
    use crate::models::{Edge, Step, StepKind};
    use serde_json::Value;

    fn graph(ids: &[&str], edges: &[(&str, &str, Option<Branch>)]) -> WorkflowGraph {
        WorkflowGraph::new(
            ids.iter()
                .map(|id| Step {
                    id: id.to_string(),
                    kind: StepKind::Other("mock".into()),
                    label: id.to_string(),
                    config: Value::Null,
                })
                .collect(),
            edges
                .iter()
                .map(|(s, t, b)| Edge {
                    id: format!("{s}->{t}"),
                    source: s.to_string(),
                    target: t.to_string(),
                    branch: *b,
                })
                .collect(),
        )
    }

    #[test]
    fn join_waits_for_every_predecessor() {
        let g = graph(
            &["a", "b", "c", "d"],
            &[("a", "b", None), ("a", "c", None), ("b", "d", None), ("c", "d", None)],
        );
        let topo = validate_dag(&g).unwrap();
        let mut t = Traversal::new(&g, &topo);

        assert_eq!(t.start(), vec![0]);
        assert_eq!(t.complete(0, None).ready, vec![1, 2]);
        assert_eq!(t.complete(1, None), Advance::default());
        assert_eq!(t.complete(2, None).ready, vec![3]);
    }

    #[test]
    fn untaken_branch_is_skipped_transitively() {
        // cond -success-> ok -> done ; cond -failure-> alert -> page
        let g = graph(
            &["cond", "ok", "done", "alert", "page"],
            &[
                ("cond", "ok", Some(Branch::Success)),
                ("ok", "done", None),
                ("cond", "alert", Some(Branch::Failure)),
                ("alert", "page", None),
            ],
        );
        let topo = validate_dag(&g).unwrap();
        let mut t = Traversal::new(&g, &topo);
        t.start();

        let advance = t.complete(0, Some(Branch::Success));
        assert_eq!(advance.ready, vec![1]);
        assert_eq!(advance.skipped, vec![3, 4]);
        assert_eq!(t.phase(4), Phase::Skipped);
        assert_eq!(t.complete(1, None).ready, vec![2]);
        assert_eq!(t.count(Phase::Skipped), 2);
    }

    #[test]
    fn join_runs_when_any_incoming_edge_is_taken() {
        // cond -success-> x -> join ; cond -failure-> y -> join
        let g = graph(
            &["cond", "x", "y", "join"],
            &[
                ("cond", "x", Some(Branch::Success)),
                ("cond", "y", Some(Branch::Failure)),
                ("x", "join", None),
                ("y", "join", None),
            ],
        );
        let topo = validate_dag(&g).unwrap();
        let mut t = Traversal::new(&g, &topo);
        t.start();

        let advance = t.complete(0, Some(Branch::Failure));
        assert_eq!(advance.ready, vec![2]);
        assert_eq!(advance.skipped, vec![1]);
        assert_eq!(t.phase(3), Phase::Waiting);
        assert_eq!(t.complete(2, None).ready, vec![3]);
    }

    #[test]
    fn steps_without_outcome_follow_labelled_edges() {
        let g = graph(&["a", "b"], &[("a", "b", Some(Branch::Failure))]);
        let topo = validate_dag(&g).unwrap();
        let mut t = Traversal::new(&g, &topo);
        t.start();
        assert_eq!(t.complete(0, None).ready, vec![1]);
    }
}
