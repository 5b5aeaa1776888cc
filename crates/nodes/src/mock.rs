//! Test doubles: `MockNode` for executors, `StaticAirflow` and
//! `StaticSqlRunner` for the systems built-in executors talk to.
//!
//! Useful in unit and integration tests where a real integration is either
//! unavailable or irrelevant.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};

use crate::airflow::{AirflowApi, AirflowConnection, DagRun, TaskInstance};
use crate::builtin::{QueryOutcome, SqlRunner};
use crate::{
    Branch, Credential, ExecutableNode, ExecutionContext, InMemoryCredentials, NodeError,
    NodeOutput,
};

/// Behaviour injected into `MockNode` at construction time.
#[derive(Debug, Clone)]
pub enum MockBehaviour {
    /// Return a specific JSON value.
    ReturnValue(Value),
    /// Return a value and route through the given branch.
    Branching(Value, bool),
    /// Fail with the given error.
    Fail(NodeError),
    /// Return the resolved config. A `fail` string in the config fails the
    /// call with a transport error; a `passed` bool selects a branch.
    EchoConfig,
}

/// A mock node that records every resolved config it receives and returns a
/// programmer-specified result. Clones share the call log.
#[derive(Debug, Clone)]
pub struct MockNode {
    /// What the node will do when `execute` is called.
    pub behaviour: MockBehaviour,
    delay: Option<Duration>,
    aliases: Vec<(String, Value)>,
    calls: Arc<Mutex<Vec<Value>>>,
}

impl MockNode {
    pub fn new(behaviour: MockBehaviour) -> Self {
        Self {
            behaviour,
            delay: None,
            aliases: Vec::new(),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Create a mock that always succeeds with the given value.
    pub fn returning(value: Value) -> Self {
        Self::new(MockBehaviour::ReturnValue(value))
    }

    pub fn branching(value: Value, passed: bool) -> Self {
        Self::new(MockBehaviour::Branching(value, passed))
    }

    pub fn failing(error: NodeError) -> Self {
        Self::new(MockBehaviour::Fail(error))
    }

    pub fn echo() -> Self {
        Self::new(MockBehaviour::EchoConfig)
    }

    /// Sleep (on the tokio clock) before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Contribute a top-level context alias on success.
    pub fn with_alias(mut self, key: impl Into<String>, value: Value) -> Self {
        self.aliases.push((key.into(), value));
        self
    }

    /// Number of times this node has been executed.
    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Resolved configs seen so far, in call order.
    pub fn calls(&self) -> Vec<Value> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl ExecutableNode for MockNode {
    async fn execute(
        &self,
        config: &Value,
        _ctx: &ExecutionContext,
    ) -> Result<NodeOutput, NodeError> {
        self.calls.lock().push(config.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let output = match &self.behaviour {
            MockBehaviour::ReturnValue(v) => NodeOutput::new(v.clone()),
            MockBehaviour::Branching(v, passed) => {
                NodeOutput::new(v.clone()).with_branch(Branch::from_outcome(*passed))
            }
            MockBehaviour::Fail(error) => return Err(error.clone()),
            MockBehaviour::EchoConfig => {
                if let Some(message) = config.get("fail").and_then(Value::as_str) {
                    return Err(NodeError::transport(message));
                }
                let output = NodeOutput::new(config.clone());
                match config.get("passed").and_then(Value::as_bool) {
                    Some(passed) => output.with_branch(Branch::from_outcome(passed)),
                    None => output,
                }
            }
        };
        Ok(self
            .aliases
            .iter()
            .cloned()
            .fold(output, |out, (key, value)| out.with_alias(key, value)))
    }
}

/// Credentials holding one Airflow connection under `id`.
pub fn airflow_credentials(id: &str) -> InMemoryCredentials {
    InMemoryCredentials::new().with(Credential {
        id: id.to_owned(),
        kind: "airflow".to_owned(),
        name: Some("test airflow".to_owned()),
        data: json!({ "baseUrl": "http://airflow.test", "username": "admin", "password": "admin" }),
    })
}

/// In-memory Airflow. DAG runs report the configured states one poll at a
/// time (the last one repeats); task logs are served from a fixed table.
#[derive(Debug, Default)]
pub struct StaticAirflow {
    states: Mutex<VecDeque<String>>,
    task_logs: Vec<(String, String)>,
    triggered: Mutex<Vec<(String, Value)>>,
}

impl StaticAirflow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_states<'a>(self, states: impl IntoIterator<Item = &'a str>) -> Self {
        *self.states.lock() = states.into_iter().map(str::to_owned).collect();
        self
    }

    pub fn with_task_log(mut self, task_id: &str, log: &str) -> Self {
        self.task_logs.push((task_id.to_owned(), log.to_owned()));
        self
    }

    /// `(dag_id, conf)` of every trigger call.
    pub fn triggered(&self) -> Vec<(String, Value)> {
        self.triggered.lock().clone()
    }

    fn next_state(&self) -> String {
        let mut states = self.states.lock();
        let state = if states.len() > 1 {
            states.pop_front()
        } else {
            states.front().cloned()
        };
        state.unwrap_or_else(|| "success".to_owned())
    }

    fn run(&self, dag_run_id: String) -> DagRun {
        DagRun {
            dag_run_id,
            state: Some(self.next_state()),
            execution_date: Some("2024-01-01T00:00:00+00:00".to_owned()),
        }
    }
}

#[async_trait]
impl AirflowApi for StaticAirflow {
    async fn trigger_dag(
        &self,
        _conn: &AirflowConnection,
        dag_id: &str,
        conf: &Value,
    ) -> Result<DagRun, NodeError> {
        let count = {
            let mut triggered = self.triggered.lock();
            triggered.push((dag_id.to_owned(), conf.clone()));
            triggered.len()
        };
        Ok(self.run(format!("manual__{count}")))
    }

    async fn get_dag_run(
        &self,
        _conn: &AirflowConnection,
        _dag_id: &str,
        dag_run_id: &str,
    ) -> Result<DagRun, NodeError> {
        Ok(self.run(dag_run_id.to_owned()))
    }

    async fn list_task_instances(
        &self,
        _conn: &AirflowConnection,
        _dag_id: &str,
        _dag_run_id: &str,
    ) -> Result<Vec<TaskInstance>, NodeError> {
        Ok(self
            .task_logs
            .iter()
            .map(|(task_id, _)| TaskInstance {
                task_id: task_id.clone(),
                state: Some("success".to_owned()),
                try_number: Some(1),
            })
            .collect())
    }

    async fn task_log(
        &self,
        _conn: &AirflowConnection,
        _dag_id: &str,
        _dag_run_id: &str,
        task_id: &str,
        _try_number: u32,
    ) -> Result<String, NodeError> {
        self.task_logs
            .iter()
            .find(|(id, _)| id == task_id)
            .map(|(_, log)| log.clone())
            .ok_or_else(|| {
                NodeError::transport(format!("airflow request failed: no log for task '{task_id}'"))
            })
    }
}

/// Answers every query with the same outcome and records the SQL text.
#[derive(Debug)]
pub struct StaticSqlRunner {
    outcome: QueryOutcome,
    queries: Mutex<Vec<String>>,
}

impl StaticSqlRunner {
    pub fn rows(rows: Vec<Value>) -> Self {
        Self {
            outcome: QueryOutcome::Rows(rows),
            queries: Mutex::new(Vec::new()),
        }
    }

    pub fn affected(count: u64) -> Self {
        Self {
            outcome: QueryOutcome::Affected(count),
            queries: Mutex::new(Vec::new()),
        }
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().clone()
    }
}

#[async_trait]
impl SqlRunner for StaticSqlRunner {
    async fn run(&self, _credential: &Credential, query: &str) -> Result<QueryOutcome, NodeError> {
        self.queries.lock().push(query.to_owned());
        Ok(self.outcome.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[tokio::test]
    async fn echo_returns_config_and_honours_fail() {
        let node = MockNode::echo().with_alias("seen", json!(true));
        let ctx = ExecutionContext::new(Uuid::new_v4(), Uuid::new_v4());

        let out = node.execute(&json!({ "q": 1, "passed": false }), &ctx).await.unwrap();
        assert_eq!(out.value["q"], 1);
        assert_eq!(out.branch, Some(Branch::Failure));
        assert_eq!(out.aliases, vec![("seen".to_string(), json!(true))]);

        let err = node.execute(&json!({ "fail": "boom" }), &ctx).await.unwrap_err();
        assert_eq!(err, NodeError::transport("boom"));
        assert_eq!(node.clone().call_count(), 2);
    }

    #[test]
    fn static_airflow_repeats_last_state() {
        let api = StaticAirflow::new().with_states(["queued", "success"]);
        assert_eq!(api.next_state(), "queued");
        assert_eq!(api.next_state(), "success");
        assert_eq!(api.next_state(), "success");
    }
}
