//! `logCheck`: assert that an Airflow task log matches a pattern.
//!
//! A pattern that does not match is a successful step routed to the
//! `failure` branch; only a failed log fetch is an error.

use std::sync::Arc;

use async_trait::async_trait;
use regex::{Regex, RegexBuilder};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use crate::airflow::{AirflowApi, AirflowConnection};
use crate::credentials::{self, CredentialStore};
use crate::de::{opt_reference, Scalar};
use crate::traits::parse_config;
use crate::{kinds, Branch, ExecutableNode, ExecutionContext, NodeError, NodeOutput};

const ENTIRE_DAG: &str = "entire_dag";
const EXCERPT_CHARS: usize = 500;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LogCheckConfig {
    #[serde(default, alias = "dag_id")]
    dag_id: Option<String>,
    #[serde(default, alias = "dag_run_id", alias = "runId")]
    dag_run_id: Option<String>,
    #[serde(default, alias = "taskId", alias = "task_id")]
    task_name: Option<String>,
    #[serde(default)]
    try_number: Option<Scalar>,
    #[serde(default, alias = "assertion", alias = "pattern")]
    log_assertion: Option<String>,
    #[serde(
        default,
        alias = "credential_id",
        alias = "connectionId",
        deserialize_with = "opt_reference"
    )]
    credential_id: Option<String>,
}

impl LogCheckConfig {
    fn pattern(&self) -> Result<Regex, NodeError> {
        let raw = self
            .log_assertion
            .as_deref()
            .filter(|p| !p.trim().is_empty())
            .ok_or_else(|| NodeError::config("logCheck requires a logAssertion"))?;
        assertion_regex(raw)
    }

    /// `None` means every task of the run.
    fn task(&self) -> Option<&str> {
        self.task_name
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty() && *t != ENTIRE_DAG)
    }

    fn try_number(&self) -> u32 {
        self.try_number
            .as_ref()
            .and_then(Scalar::as_f64)
            .filter(|n| *n >= 1.0)
            .map_or(1, |n| n as u32)
    }
}

/// Case-insensitive regex; leftover `{{`/`}}` markers act as wildcards.
fn assertion_regex(raw: &str) -> Result<Regex, NodeError> {
    let pattern = raw.replace("{{", ".*").replace("}}", ".*");
    RegexBuilder::new(&pattern)
        .case_insensitive(true)
        .build()
        .map_err(|e| NodeError::config(format!("invalid logAssertion pattern: {e}")))
}

fn non_empty<'a>(own: Option<&'a str>, fallback: Option<&'a str>) -> Option<&'a str> {
    own.map(str::trim).filter(|s| !s.is_empty()).or(fallback)
}

fn excerpt(log: &str, pattern: &Regex) -> String {
    match pattern.find(log) {
        Some(found) => found.as_str().chars().take(EXCERPT_CHARS).collect(),
        None => {
            let total = log.chars().count();
            log.chars().skip(total.saturating_sub(EXCERPT_CHARS)).collect()
        }
    }
}

pub struct LogCheckNode {
    credentials: Arc<dyn CredentialStore>,
    api: Arc<dyn AirflowApi>,
}

impl LogCheckNode {
    pub fn new(credentials: Arc<dyn CredentialStore>, api: Arc<dyn AirflowApi>) -> Self {
        Self { credentials, api }
    }

    async fn fetch_logs(
        &self,
        conn: &AirflowConnection,
        dag_id: &str,
        dag_run_id: &str,
        task: Option<&str>,
        try_number: u32,
    ) -> Result<String, NodeError> {
        if let Some(task_id) = task {
            return self.api.task_log(conn, dag_id, dag_run_id, task_id, try_number).await;
        }
        let mut combined = String::new();
        for instance in self.api.list_task_instances(conn, dag_id, dag_run_id).await? {
            let attempt = instance.try_number.filter(|n| *n >= 1).unwrap_or(1);
            let log = self
                .api
                .task_log(conn, dag_id, dag_run_id, &instance.task_id, attempt)
                .await?;
            combined.push_str(&format!("--- {} ---\n{log}\n", instance.task_id));
        }
        Ok(combined)
    }
}

#[async_trait]
impl ExecutableNode for LogCheckNode {
    fn validate(&self, config: &Value) -> Result<(), NodeError> {
        let cfg: LogCheckConfig = parse_config(kinds::LOG_CHECK, config)?;
        cfg.pattern()?;
        if cfg.credential_id.is_none() {
            return Err(NodeError::config("logCheck requires an airflow credentialId"));
        }
        Ok(())
    }

    async fn execute(
        &self,
        config: &Value,
        ctx: &ExecutionContext,
    ) -> Result<NodeOutput, NodeError> {
        let cfg: LogCheckConfig = parse_config(kinds::LOG_CHECK, config)?;
        let pattern = cfg.pattern()?;
        let dag_id = non_empty(cfg.dag_id.as_deref(), ctx.get_str("dagId"))
            .ok_or_else(|| NodeError::config("logCheck requires a dagId"))?;
        let dag_run_id = non_empty(cfg.dag_run_id.as_deref(), ctx.get_str("dagRunId"))
            .ok_or_else(|| NodeError::config("logCheck requires a dagRunId"))?;
        let credential = credentials::require(
            self.credentials.as_ref(),
            cfg.credential_id.as_deref(),
            "airflow",
        )?;
        let conn = AirflowConnection::from_credential(&credential)?;

        let task = cfg.task();
        let log = self
            .fetch_logs(&conn, dag_id, dag_run_id, task, cfg.try_number())
            .await?;
        let matched = pattern.is_match(&log);
        info!(dag_id, dag_run_id, matched, "log assertion evaluated");

        let value = json!({
            "matched": matched,
            "dagId": dag_id,
            "dagRunId": dag_run_id,
            "taskName": task.unwrap_or(ENTIRE_DAG),
            "pattern": pattern.as_str(),
            "excerpt": excerpt(&log, &pattern),
        });
        Ok(NodeOutput::new(value)
            .with_alias("log_match_result", json!(matched))
            .with_branch(Branch::from_outcome(matched)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{airflow_credentials, StaticAirflow};
    use uuid::Uuid;

    fn node(api: StaticAirflow) -> LogCheckNode {
        LogCheckNode::new(Arc::new(airflow_credentials("af")), Arc::new(api))
    }

    fn ctx_with_run() -> ExecutionContext {
        let mut ctx = ExecutionContext::new(Uuid::new_v4(), Uuid::new_v4());
        ctx.insert("dagId", json!("etl"));
        ctx.insert("dagRunId", json!("manual__1"));
        ctx
    }

    #[tokio::test]
    async fn matching_log_takes_success_branch() {
        let api = StaticAirflow::new().with_task_log("load", "INFO Marking task as SUCCESS");
        let config = json!({
            "taskName": "load",
            "logAssertion": "marking task as success",
            "credentialId": "af"
        });
        let out = node(api).execute(&config, &ctx_with_run()).await.unwrap();

        assert_eq!(out.branch, Some(Branch::Success));
        assert_eq!(out.value["matched"], true);
        assert_eq!(out.value["dagRunId"], "manual__1");
        assert_eq!(out.aliases, vec![("log_match_result".to_string(), json!(true))]);
    }

    #[tokio::test]
    async fn miss_is_a_failure_branch_not_an_error() {
        let api = StaticAirflow::new().with_task_log("load", "ERROR row count mismatch");
        let config = json!({ "taskName": "load", "logAssertion": "SUCCESS", "credentialId": "af" });
        let out = node(api).execute(&config, &ctx_with_run()).await.unwrap();
        assert_eq!(out.branch, Some(Branch::Failure));
        assert_eq!(out.value["excerpt"], "ERROR row count mismatch");
    }

    #[tokio::test]
    async fn entire_dag_concatenates_every_task_log() {
        let api = StaticAirflow::new()
            .with_task_log("extract", "extracted 10 rows")
            .with_task_log("load", "loaded 10 rows");
        let config = json!({
            "taskName": "entire_dag",
            "logAssertion": "extracted {{}} rows[\\s\\S]*loaded",
            "credentialId": "af"
        });
        let out = node(api).execute(&config, &ctx_with_run()).await.unwrap();
        assert_eq!(out.value["matched"], true);
        assert_eq!(out.value["taskName"], "entire_dag");
    }

    #[tokio::test]
    async fn missing_run_id_is_a_config_error() {
        let config = json!({ "dagId": "etl", "logAssertion": "x", "credentialId": "af" });
        let ctx = ExecutionContext::new(Uuid::new_v4(), Uuid::new_v4());
        let err = node(StaticAirflow::new()).execute(&config, &ctx).await.unwrap_err();
        assert!(matches!(err, NodeError::Config(msg) if msg.contains("dagRunId")));
    }

    #[tokio::test]
    async fn failed_fetch_is_a_transport_error() {
        let config = json!({ "taskName": "missing", "logAssertion": "x", "credentialId": "af" });
        let err = node(StaticAirflow::new()).execute(&config, &ctx_with_run()).await.unwrap_err();
        assert!(matches!(err, NodeError::Transport(_)));
    }

    #[test]
    fn validate_rejects_bad_patterns() {
        let node = node(StaticAirflow::new());
        assert!(node.validate(&json!({ "logAssertion": "ok", "credentialId": "af" })).is_ok());
        assert!(node.validate(&json!({ "logAssertion": "(", "credentialId": "af" })).is_err());
        assert!(node.validate(&json!({ "credentialId": "af" })).is_err());
    }
}
