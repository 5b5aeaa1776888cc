//! Engine-level error types.
//!
//! Only problems that prevent an execution from being created, or from
//! being persisted, surface here. Step failures are recorded on the
//! execution record instead.

use nodes::NodeError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    // ------ Graph errors ------

    /// The definition is not a `{ nodes, edges }` payload.
    #[error("invalid workflow payload: {0}")]
    InvalidPayload(#[from] serde_json::Error),

    /// Two or more steps share the same ID.
    #[error("duplicate step ID: '{0}'")]
    DuplicateStepId(String),

    /// An edge references a step ID that doesn't exist in the graph.
    #[error("edge '{edge_id}' references unknown step '{step_id}' ({side} side)")]
    UnknownStepReference {
        edge_id: String,
        step_id: String,
        side: &'static str,
    },

    /// Topological sort could not place these steps.
    #[error("workflow graph contains a cycle through: {}", .0.join(", "))]
    CycleDetected(Vec<String>),

    /// A step's config was rejected by its executor at load time.
    #[error("step '{step_id}' has an invalid config: {source}")]
    InvalidStepConfig { step_id: String, source: NodeError },

    /// An executor panicked; the run was abandoned mid-step.
    #[error("step executor panicked: {0}")]
    Panicked(String),

    // ------ Persistence errors ------

    /// Persistence error from the db crate.
    #[error("database error: {0}")]
    Database(#[from] db::DbError),
}
