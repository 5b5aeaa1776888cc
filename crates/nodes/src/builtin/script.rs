//! `script`: evaluate a user script with `rhai`.
//!
//! The run's context is visible as `context` and, for keys that are valid
//! identifiers, as top-level variables (`node_3.count`). The script's final
//! expression becomes the step result.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use rhai::{Dynamic, Engine, Scope};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::traits::parse_config;
use crate::{kinds, ExecutableNode, ExecutionContext, NodeError, NodeOutput};

const DEFAULT_MAX_OPERATIONS: u64 = 1_000_000;

#[derive(Debug, Deserialize)]
struct ScriptConfig {
    #[serde(default, alias = "script", alias = "source")]
    code: Option<String>,
}

impl ScriptConfig {
    fn code(&self) -> Result<&str, NodeError> {
        self.code
            .as_deref()
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| NodeError::config("script requires code"))
    }
}

#[derive(Debug, Clone)]
pub struct ScriptNode {
    max_operations: u64,
}

impl Default for ScriptNode {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_OPERATIONS)
    }
}

impl ScriptNode {
    pub fn new(max_operations: u64) -> Self {
        Self { max_operations }
    }
}

fn is_identifier(key: &str) -> bool {
    let mut chars = key.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn script_error(e: impl std::fmt::Display) -> NodeError {
    NodeError::Script(e.to_string())
}

fn run_script(code: &str, context: &Value, max_operations: u64) -> Result<Value, NodeError> {
    let printed = Arc::new(Mutex::new(Vec::<String>::new()));
    let mut engine = Engine::new();
    engine.set_max_operations(max_operations);
    let sink = Arc::clone(&printed);
    engine.on_print(move |line| sink.lock().push(line.to_owned()));

    let mut scope = Scope::new();
    if let Value::Object(values) = context {
        for (key, value) in values.iter().filter(|(key, _)| is_identifier(key)) {
            scope.push_dynamic(key.clone(), rhai::serde::to_dynamic(value).map_err(script_error)?);
        }
    }
    scope.push_dynamic("context", rhai::serde::to_dynamic(context).map_err(script_error)?);

    let result = engine
        .eval_with_scope::<Dynamic>(&mut scope, code)
        .map_err(script_error)?;
    let value: Value = if result.is_unit() {
        Value::Object(Map::new())
    } else {
        rhai::serde::from_dynamic(&result).map_err(script_error)?
    };
    let mut value = match value {
        Value::Object(_) => value,
        other => json!({ "value": other }),
    };

    let lines = printed.lock();
    if !lines.is_empty() {
        value["printed"] = json!(lines.join("\n"));
    }
    Ok(value)
}

#[async_trait]
impl ExecutableNode for ScriptNode {
    fn validate(&self, config: &Value) -> Result<(), NodeError> {
        let cfg: ScriptConfig = parse_config(kinds::SCRIPT, config)?;
        cfg.code().map(|_| ())
    }

    async fn execute(
        &self,
        config: &Value,
        ctx: &ExecutionContext,
    ) -> Result<NodeOutput, NodeError> {
        let cfg: ScriptConfig = parse_config(kinds::SCRIPT, config)?;
        let code = cfg.code()?.to_owned();
        let context = ctx.to_value();
        let max_operations = self.max_operations;

        let value = tokio::task::spawn_blocking(move || run_script(&code, &context, max_operations))
            .await
            .map_err(|e| NodeError::Script(format!("script task aborted: {e}")))??;
        debug!("script finished");
        Ok(NodeOutput::new(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn ctx() -> ExecutionContext {
        let mut ctx = ExecutionContext::new(Uuid::new_v4(), Uuid::new_v4());
        ctx.insert("node_1", json!({ "count": 12 }));
        ctx.insert("dag-run", json!("not an identifier"));
        ctx
    }

    #[tokio::test]
    async fn returns_object_built_from_context() {
        let config = json!({ "code": "#{ total: node_1.count + 1, same: context.node_1.count }" });
        let out = ScriptNode::default().execute(&config, &ctx()).await.unwrap();
        assert_eq!(out.value, json!({ "total": 13, "same": 12 }));
    }

    #[tokio::test]
    async fn scalars_are_wrapped_and_prints_captured() {
        let config = json!({ "code": "print(\"checking\"); node_1.count > 10" });
        let out = ScriptNode::default().execute(&config, &ctx()).await.unwrap();
        assert_eq!(out.value["value"], true);
        assert_eq!(out.value["printed"], "checking");
    }

    #[tokio::test]
    async fn thrown_errors_fail_the_step() {
        let config = json!({ "code": "throw \"bad data\";" });
        let err = ScriptNode::default().execute(&config, &ctx()).await.unwrap_err();
        assert!(matches!(err, NodeError::Script(msg) if msg.contains("bad data")));
    }

    #[tokio::test]
    async fn runaway_loops_hit_the_operation_limit() {
        let config = json!({ "code": "loop { }" });
        let err = ScriptNode::new(10_000).execute(&config, &ctx()).await.unwrap_err();
        assert!(matches!(err, NodeError::Script(_)));
    }

    #[test]
    fn identifiers_are_filtered() {
        assert!(is_identifier("node_1"));
        assert!(is_identifier("_x"));
        assert!(!is_identifier("dag-run"));
        assert!(!is_identifier("1abc"));
        assert!(!is_identifier(""));
    }

    #[test]
    fn validate_requires_code() {
        assert!(ScriptNode::default().validate(&json!({ "code": "1" })).is_ok());
        assert!(ScriptNode::default().validate(&json!({ "code": "" })).is_err());
    }
}
