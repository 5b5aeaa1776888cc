//! `trigger`: start an Airflow DAG run, optionally waiting for it to finish.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tokio::time::{sleep, Instant};
use tracing::{debug, info};

use crate::airflow::{AirflowApi, AirflowConnection, DagRun};
use crate::credentials::{self, CredentialStore};
use crate::de::{opt_reference, Scalar};
use crate::traits::parse_config;
use crate::{kinds, ExecutableNode, ExecutionContext, NodeError, NodeOutput};

const DEFAULT_POLL_INTERVAL_SECS: f64 = 10.0;
const DEFAULT_TIMEOUT_SECS: f64 = 3600.0;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TriggerConfig {
    #[serde(default, alias = "dag_id")]
    dag_id: Option<String>,
    #[serde(default)]
    conf: Option<Value>,
    #[serde(
        default,
        alias = "credential_id",
        alias = "connectionId",
        deserialize_with = "opt_reference"
    )]
    credential_id: Option<String>,
    #[serde(default)]
    wait_for_completion: bool,
    #[serde(default)]
    poll_interval_secs: Option<Scalar>,
    #[serde(default)]
    timeout_secs: Option<Scalar>,
}

impl TriggerConfig {
    fn dag_id(&self) -> Result<&str, NodeError> {
        self.dag_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| NodeError::config("trigger requires a dagId"))
    }

    /// `conf` may arrive as an object or as JSON text typed into a form field.
    fn conf(&self) -> Result<Value, NodeError> {
        match &self.conf {
            None | Some(Value::Null) => Ok(Value::Object(Map::new())),
            Some(Value::String(text)) if text.trim().is_empty() => Ok(Value::Object(Map::new())),
            Some(Value::String(text)) => serde_json::from_str(text)
                .map_err(|e| NodeError::config(format!("trigger conf is not valid JSON: {e}"))),
            Some(other) => Ok(other.clone()),
        }
    }

    /// Missing, unresolved or non-positive values fall back to `default`.
    fn seconds(field: &str, value: &Option<Scalar>, default: f64) -> Result<Duration, NodeError> {
        let secs = value
            .as_ref()
            .and_then(Scalar::as_f64)
            .filter(|s| *s > 0.0)
            .unwrap_or(default);
        Duration::try_from_secs_f64(secs)
            .map_err(|_| NodeError::config(format!("trigger {field} of {secs}s is out of range")))
    }

    fn poll_interval(&self) -> Result<Duration, NodeError> {
        Self::seconds("pollIntervalSecs", &self.poll_interval_secs, DEFAULT_POLL_INTERVAL_SECS)
    }

    fn timeout(&self) -> Result<Duration, NodeError> {
        Self::seconds("timeoutSecs", &self.timeout_secs, DEFAULT_TIMEOUT_SECS)
    }
}

pub struct TriggerNode {
    credentials: Arc<dyn CredentialStore>,
    api: Arc<dyn AirflowApi>,
}

impl TriggerNode {
    pub fn new(credentials: Arc<dyn CredentialStore>, api: Arc<dyn AirflowApi>) -> Self {
        Self { credentials, api }
    }

    async fn await_completion(
        &self,
        conn: &AirflowConnection,
        dag_id: &str,
        mut run: DagRun,
        interval: Duration,
        timeout: Duration,
    ) -> Result<DagRun, NodeError> {
        // A timeout past the clock's range never expires.
        let deadline = Instant::now().checked_add(timeout);
        while !run.is_terminal() {
            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                return Err(NodeError::transport(format!(
                    "DAG run '{}' of '{dag_id}' did not finish within {}s",
                    run.dag_run_id,
                    timeout.as_secs()
                )));
            }
            sleep(interval).await;
            run = self.api.get_dag_run(conn, dag_id, &run.dag_run_id).await?;
            debug!(dag_id, dag_run_id = %run.dag_run_id, state = ?run.state, "polled DAG run");
        }
        if !run.is_success() {
            return Err(NodeError::transport(format!(
                "DAG run '{}' of '{dag_id}' finished in state {}",
                run.dag_run_id,
                run.state.as_deref().unwrap_or("unknown")
            )));
        }
        Ok(run)
    }
}

#[async_trait]
impl ExecutableNode for TriggerNode {
    fn validate(&self, config: &Value) -> Result<(), NodeError> {
        let cfg: TriggerConfig = parse_config(kinds::TRIGGER, config)?;
        cfg.dag_id()?;
        if cfg.credential_id.is_none() {
            return Err(NodeError::config("trigger requires an airflow credentialId"));
        }
        cfg.poll_interval()?;
        cfg.timeout()?;
        Ok(())
    }

    async fn execute(
        &self,
        config: &Value,
        _ctx: &ExecutionContext,
    ) -> Result<NodeOutput, NodeError> {
        let cfg: TriggerConfig = parse_config(kinds::TRIGGER, config)?;
        let dag_id = cfg.dag_id()?;
        let credential = credentials::require(
            self.credentials.as_ref(),
            cfg.credential_id.as_deref(),
            "airflow",
        )?;
        let conn = AirflowConnection::from_credential(&credential)?;
        let conf = cfg.conf()?;
        let polling = if cfg.wait_for_completion {
            Some((cfg.poll_interval()?, cfg.timeout()?))
        } else {
            None
        };

        let mut run = self.api.trigger_dag(&conn, dag_id, &conf).await?;
        info!(dag_id, dag_run_id = %run.dag_run_id, "DAG run triggered");

        if let Some((interval, timeout)) = polling {
            run = self.await_completion(&conn, dag_id, run, interval, timeout).await?;
        }

        let value = json!({
            "dagId": dag_id,
            "dagRunId": run.dag_run_id,
            "state": run.state,
            "executionDate": run.execution_date,
        });
        Ok(NodeOutput::new(value)
            .with_alias("dagRunId", json!(run.dag_run_id))
            .with_alias("dagId", json!(dag_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{airflow_credentials, StaticAirflow};
    use uuid::Uuid;

    fn node(api: Arc<StaticAirflow>) -> TriggerNode {
        TriggerNode::new(Arc::new(airflow_credentials("af")), api)
    }

    fn ctx() -> ExecutionContext {
        ExecutionContext::new(Uuid::new_v4(), Uuid::new_v4())
    }

    #[tokio::test]
    async fn triggers_and_exposes_run_id_alias() {
        let api = Arc::new(StaticAirflow::new());
        let config = json!({
            "dagId": "etl",
            "credentialId": "af",
            "conf": "{\"day\": \"2024-01-01\"}"
        });
        let out = node(api.clone()).execute(&config, &ctx()).await.unwrap();

        assert_eq!(out.value["dagId"], "etl");
        let run_id = out.value["dagRunId"].clone();
        assert!(out.aliases.contains(&("dagRunId".to_string(), run_id)));
        assert_eq!(api.triggered(), vec![("etl".to_string(), json!({ "day": "2024-01-01" }))]);
    }

    #[tokio::test(start_paused = true)]
    async fn waits_until_the_run_succeeds() {
        let api = Arc::new(StaticAirflow::new().with_states(["queued", "running", "success"]));
        let config = json!({
            "dagId": "etl",
            "credentialId": "af",
            "waitForCompletion": true,
            "pollIntervalSecs": 5
        });
        let out = node(api).execute(&config, &ctx()).await.unwrap();
        assert_eq!(out.value["state"], "success");
    }

    #[tokio::test(start_paused = true)]
    async fn failed_dag_run_is_a_transport_error() {
        let api = Arc::new(StaticAirflow::new().with_states(["running", "failed"]));
        let config = json!({ "dagId": "etl", "credentialId": "af", "waitForCompletion": true });
        let err = node(api).execute(&config, &ctx()).await.unwrap_err();
        assert!(matches!(err, NodeError::Transport(msg) if msg.contains("failed")));
    }

    #[tokio::test(start_paused = true)]
    async fn polling_gives_up_after_the_timeout() {
        let api = Arc::new(StaticAirflow::new().with_states(["running"]));
        let config = json!({
            "dagId": "etl",
            "credentialId": "af",
            "waitForCompletion": true,
            "pollIntervalSecs": 10,
            "timeoutSecs": 25
        });
        let err = node(api).execute(&config, &ctx()).await.unwrap_err();
        assert!(matches!(err, NodeError::Transport(msg) if msg.contains("did not finish")));
    }

    #[test]
    fn validate_requires_dag_and_credential() {
        let node = node(Arc::new(StaticAirflow::new()));
        assert!(node.validate(&json!({ "dagId": "etl", "credentialId": 3 })).is_ok());
        assert!(node.validate(&json!({ "credentialId": "af" })).is_err());
        assert!(node.validate(&json!({ "dagId": "etl" })).is_err());
    }

    #[tokio::test]
    async fn oversized_timeout_is_rejected_instead_of_overflowing() {
        let node = node(Arc::new(StaticAirflow::new().with_states(["running"])));
        let config = json!({
            "dagId": "etl",
            "credentialId": "af",
            "waitForCompletion": true,
            "timeoutSecs": 1e20
        });
        assert!(matches!(node.validate(&config), Err(NodeError::Config(_))));
        let err = node.execute(&config, &ctx()).await.unwrap_err();
        assert!(matches!(err, NodeError::Config(msg) if msg.contains("timeoutSecs")));
    }

    #[tokio::test]
    async fn unknown_credential_is_a_config_error() {
        let config = json!({ "dagId": "etl", "credentialId": "nope" });
        let node = node(Arc::new(StaticAirflow::new()));
        let err = node.execute(&config, &ctx()).await.unwrap_err();
        assert!(matches!(err, NodeError::Config(_)));
    }
}
