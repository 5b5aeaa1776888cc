//! The `ExecutableNode` trait — the contract every step executor must fulfil.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::NodeError;

// ---------------------------------------------------------------------------
// ExecutionContext
// ---------------------------------------------------------------------------

/// Accumulated results of one run, keyed by step id and well-known aliases
/// (`dagRunId`, `queryResult`, …).
///
/// Defined here (in the nodes crate) so both the engine and individual node
/// implementations can import it without a circular dependency. The engine
/// owns the only mutable copy; executors receive a snapshot.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    /// ID of the parent workflow.
    pub workflow_id: Uuid,
    /// ID of the current execution run.
    pub execution_id: Uuid,
    values: Map<String, Value>,
}

impl ExecutionContext {
    pub fn new(workflow_id: Uuid, execution_id: Uuid) -> Self {
        Self {
            workflow_id,
            execution_id,
            values: Map::new(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Top-level value as a non-empty string (numbers are not coerced).
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.values
            .get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }

    /// Insert or overwrite a top-level key.
    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.values.insert(key.into(), value);
    }

    /// Whole context as a JSON object.
    pub fn to_value(&self) -> Value {
        Value::Object(self.values.clone())
    }

    /// Walk a dotted path such as `node_3.rows[0].id` (or `node_3.rows.0.id`).
    ///
    /// Returns `None` as soon as a segment cannot be followed.
    pub fn lookup(&self, path: &str) -> Option<&Value> {
        let segments = parse_path(path)?;
        let (first, rest) = segments.split_first()?;
        let mut current = match first {
            PathSegment::Key(key) => self.values.get(*key)?,
            PathSegment::Index(_) => return None,
        };
        for segment in rest {
            current = match (segment, current) {
                (PathSegment::Key(key), Value::Object(map)) => map.get(*key)?,
                (PathSegment::Key(key), Value::Array(items)) => {
                    items.get(key.parse::<usize>().ok()?)?
                }
                (PathSegment::Index(i), Value::Array(items)) => items.get(*i)?,
                _ => return None,
            };
        }
        Some(current)
    }
}

#[derive(Debug, PartialEq)]
enum PathSegment<'a> {
    Key(&'a str),
    Index(usize),
}

fn parse_path(path: &str) -> Option<Vec<PathSegment<'_>>> {
    let mut segments = Vec::new();
    for part in path.split('.') {
        let (key, mut brackets) = match part.find('[') {
            Some(pos) => (&part[..pos], &part[pos..]),
            None => (part, ""),
        };
        if !key.is_empty() {
            segments.push(PathSegment::Key(key));
        } else if brackets.is_empty() {
            return None;
        }
        while !brackets.is_empty() {
            let close = brackets.find(']')?;
            let index = brackets.get(1..close)?.parse::<usize>().ok()?;
            segments.push(PathSegment::Index(index));
            brackets = &brackets[close + 1..];
            if !brackets.is_empty() && !brackets.starts_with('[') {
                return None;
            }
        }
    }
    Some(segments)
}

// ---------------------------------------------------------------------------
// NodeOutput
// ---------------------------------------------------------------------------

/// Named output of a branching step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Branch {
    Success,
    Failure,
}

impl Branch {
    pub fn from_outcome(passed: bool) -> Self {
        if passed { Self::Success } else { Self::Failure }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
        }
    }

    /// Parse an edge label; `true`/`yes` and `false`/`no` are accepted too.
    pub fn parse(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "success" | "true" | "yes" => Some(Self::Success),
            "failure" | "false" | "no" => Some(Self::Failure),
            _ => None,
        }
    }

    /// Whether an edge labelled `label` leaves through this branch.
    pub fn matches(self, label: &str) -> bool {
        Self::parse(label) == Some(self)
    }
}

/// What a successful step contributes to the run.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeOutput {
    /// Stored under the step's id in the context and on its step state.
    pub value: Value,
    /// Extra top-level context keys (`dagRunId`, `queryResult`, …).
    pub aliases: Vec<(String, Value)>,
    /// Set by steps with named outputs; `None` means every edge is followed.
    pub branch: Option<Branch>,
}

impl NodeOutput {
    pub fn new(value: Value) -> Self {
        Self {
            value,
            aliases: Vec::new(),
            branch: None,
        }
    }

    pub fn with_alias(mut self, key: impl Into<String>, value: Value) -> Self {
        self.aliases.push((key.into(), value));
        self
    }

    pub fn with_branch(mut self, branch: Branch) -> Self {
        self.branch = Some(branch);
        self
    }
}

// ---------------------------------------------------------------------------
// ExecutableNode
// ---------------------------------------------------------------------------

/// The core executor trait.
#[async_trait]
pub trait ExecutableNode: Send + Sync {
    /// Check a step's raw configuration when the graph is loaded, before any
    /// execution record exists. Placeholders are still unresolved here.
    fn validate(&self, _config: &Value) -> Result<(), NodeError> {
        Ok(())
    }

    /// Run the step with its fully resolved `config` against a snapshot of
    /// the execution context.
    async fn execute(
        &self,
        config: &Value,
        ctx: &ExecutionContext,
    ) -> Result<NodeOutput, NodeError>;
}

/// Deserialize a typed step config; a `null` config counts as `{}`.
pub fn parse_config<T: DeserializeOwned>(kind: &str, config: &Value) -> Result<T, NodeError> {
    let raw = if config.is_null() {
        Value::Object(Map::new())
    } else {
        config.clone()
    };
    serde_json::from_value(raw)
        .map_err(|e| NodeError::config(format!("invalid {kind} config: {e}")))
}
