//! Executor for step kinds that have no side effect of their own.

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::{ExecutableNode, ExecutionContext, NodeError, NodeOutput};

/// Succeeds immediately with an empty object.
#[derive(Debug, Default, Clone)]
pub struct NoopNode;

#[async_trait]
impl ExecutableNode for NoopNode {
    async fn execute(
        &self,
        _config: &Value,
        _ctx: &ExecutionContext,
    ) -> Result<NodeOutput, NodeError> {
        Ok(NodeOutput::new(Value::Object(Map::new())))
    }
}
