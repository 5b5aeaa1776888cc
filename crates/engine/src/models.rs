//! Core domain models for the workflow engine.
//!
//! A [`WorkflowGraph`] is built from the `{ nodes, edges }` payload stored in
//! the `definition` column of the `workflows` table, as produced by the
//! visual editor or the graph generator. It is immutable for the duration of
//! one execution.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use nodes::{kinds, Branch};

use crate::EngineError;

// ---------------------------------------------------------------------------
// StepKind
// ---------------------------------------------------------------------------

/// Executor selector. Kinds outside the built-in set are kept verbatim in
/// [`StepKind::Other`] and looked up in the registry like any other.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum StepKind {
    Trigger,
    Http,
    Sql,
    Script,
    Condition,
    LogCheck,
    Wait,
    LlmGenerate,
    Other(String),
}

impl StepKind {
    /// Parse a kind name, accepting the legacy names older graphs use.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "trigger" | "airflow_trigger" | "airflow" => Self::Trigger,
            "http" | "api" | "api_request" => Self::Http,
            "sql" | "sql_query" | "sql.execute" => Self::Sql,
            "script" | "python" | "python_script" => Self::Script,
            "condition" | "decision" | "assert.logic" => Self::Condition,
            "logcheck" | "log_check" | "airflow_log_check" => Self::LogCheck,
            "wait" | "delay" => Self::Wait,
            "llmgenerate" | "llm" => Self::LlmGenerate,
            _ => Self::Other(raw.trim().to_owned()),
        }
    }

    /// Registry key.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Trigger => kinds::TRIGGER,
            Self::Http => kinds::HTTP,
            Self::Sql => kinds::SQL,
            Self::Script => kinds::SCRIPT,
            Self::Condition => kinds::CONDITION,
            Self::LogCheck => kinds::LOG_CHECK,
            Self::Wait => kinds::WAIT,
            Self::LlmGenerate => kinds::LLM_GENERATE,
            Self::Other(raw) => raw,
        }
    }
}

impl From<String> for StepKind {
    fn from(raw: String) -> Self {
        Self::parse(&raw)
    }
}

impl From<StepKind> for String {
    fn from(kind: StepKind) -> Self {
        kind.as_str().to_owned()
    }
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Step / Edge
// ---------------------------------------------------------------------------

/// A single unit of work in the graph.
#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    /// Unique within the graph; also the step's key in the execution context.
    pub id: String,
    pub kind: StepKind,
    pub label: String,
    /// Kind-specific settings, validated by the kind's executor at load time.
    pub config: Value,
}

/// Directed dependency between two steps.
#[derive(Debug, Clone, PartialEq)]
pub struct Edge {
    pub id: String,
    pub source: String,
    pub target: String,
    /// `None` means the edge is followed whatever the source's outcome.
    pub branch: Option<Branch>,
}

// ---------------------------------------------------------------------------
// Graph payload
// ---------------------------------------------------------------------------

/// Renderer names the editor puts in `type` when the real kind is in `data.type`.
const GENERIC_NODE_TYPES: [&str; 3] = ["", "custom", "default"];

#[derive(Debug, Deserialize)]
struct GraphPayload {
    #[serde(default)]
    nodes: Vec<NodePayload>,
    #[serde(default)]
    edges: Vec<EdgePayload>,
}

#[derive(Debug, Deserialize)]
struct NodePayload {
    id: String,
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    data: NodeData,
}

#[derive(Debug, Default, Deserialize)]
struct NodeData {
    #[serde(default)]
    label: Option<String>,
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    config: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EdgePayload {
    #[serde(default)]
    id: Option<String>,
    source: String,
    target: String,
    #[serde(default)]
    branch: Option<String>,
    #[serde(default)]
    source_handle: Option<String>,
    #[serde(default)]
    label: Option<String>,
}

impl NodePayload {
    fn into_step(self) -> Step {
        let generic = |k: &Option<String>| {
            k.as_deref()
                .map_or(true, |k| GENERIC_NODE_TYPES.contains(&k.trim()))
        };
        let raw_kind = match (&self.kind, &self.data.kind) {
            (outer, Some(inner)) if generic(outer) => inner.clone(),
            (Some(outer), _) => outer.clone(),
            (None, _) => String::new(),
        };
        let label = self
            .data
            .label
            .filter(|l| !l.trim().is_empty())
            .unwrap_or_else(|| self.id.clone());
        Step {
            kind: StepKind::parse(&raw_kind),
            label,
            config: self.data.config,
            id: self.id,
        }
    }
}

impl EdgePayload {
    fn into_edge(self) -> Edge {
        // First recognisable label wins; handles such as `source` or `out`
        // carry no branch.
        let branch = [&self.branch, &self.source_handle, &self.label]
            .into_iter()
            .flatten()
            .find_map(|label| Branch::parse(label));
        Edge {
            id: self
                .id
                .filter(|id| !id.is_empty())
                .unwrap_or_else(|| format!("{}->{}", self.source, self.target)),
            source: self.source,
            target: self.target,
            branch,
        }
    }
}

// ---------------------------------------------------------------------------
// WorkflowGraph
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkflowGraph {
    /// In payload order, which is also dispatch order within a batch.
    pub steps: Vec<Step>,
    pub edges: Vec<Edge>,
}

impl WorkflowGraph {
    pub fn new(steps: Vec<Step>, edges: Vec<Edge>) -> Self {
        Self { steps, edges }
    }

    /// Parse an editor payload. Structure only; see
    /// [`validate_dag`](crate::validate_dag) for graph rules.
    pub fn from_payload(payload: &Value) -> Result<Self, EngineError> {
        let payload = GraphPayload::deserialize(payload)?;
        Ok(Self {
            steps: payload.nodes.into_iter().map(NodePayload::into_step).collect(),
            edges: payload.edges.into_iter().map(EdgePayload::into_edge).collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn legacy_kind_names_are_aliased() {
        assert_eq!(StepKind::parse("airflow_trigger"), StepKind::Trigger);
        assert_eq!(StepKind::parse("sql.execute"), StepKind::Sql);
        assert_eq!(StepKind::parse("logCheck"), StepKind::LogCheck);
        assert_eq!(StepKind::parse("assert.logic"), StepKind::Condition);
        assert_eq!(StepKind::parse("s3Upload"), StepKind::Other("s3Upload".into()));
        assert_eq!(StepKind::LogCheck.to_string(), "logCheck");
        assert_eq!(serde_json::to_value(StepKind::Http).unwrap(), json!("http"));
    }

    #[test]
    fn payload_takes_kind_from_data_for_generic_renderers() {
        let graph = WorkflowGraph::from_payload(&json!({
            "nodes": [
                {
                    "id": "a",
                    "type": "custom",
                    "data": { "type": "python_script", "label": "Transform" }
                },
                {
                    "id": "b",
                    "type": "http",
                    "data": { "type": "ignored", "config": { "url": "x" } }
                },
                { "id": "c", "data": { "label": "" } }
            ],
            "edges": []
        }))
        .unwrap();

        assert_eq!(graph.steps[0].kind, StepKind::Script);
        assert_eq!(graph.steps[0].label, "Transform");
        assert_eq!(graph.steps[1].kind, StepKind::Http);
        assert_eq!(graph.steps[1].config, json!({ "url": "x" }));
        assert_eq!(graph.steps[2].label, "c");
        assert_eq!(graph.steps[2].kind, StepKind::Other(String::new()));
    }

    #[test]
    fn edge_branch_comes_from_branch_handle_or_label() {
        let graph = WorkflowGraph::from_payload(&json!({
            "nodes": [],
            "edges": [
                { "id": "e1", "source": "a", "target": "b", "branch": "success" },
                { "source": "a", "target": "c", "sourceHandle": "false" },
                { "source": "a", "target": "d", "label": "Yes" },
                { "source": "a", "target": "e", "sourceHandle": "out" }
            ]
        }))
        .unwrap();

        let branches: Vec<_> = graph.edges.iter().map(|e| e.branch).collect();
        assert_eq!(
            branches,
            vec![Some(Branch::Success), Some(Branch::Failure), Some(Branch::Success), None]
        );
        assert_eq!(graph.edges[1].id, "a->c");
    }

    #[test]
    fn malformed_payload_is_rejected() {
        let err =
            WorkflowGraph::from_payload(&json!({ "nodes": [{ "type": "http" }] })).unwrap_err();
        assert!(matches!(err, EngineError::InvalidPayload(_)));
    }
}
