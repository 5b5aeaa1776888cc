//! Airflow REST API (v1) access used by the `trigger` and `logCheck` steps.
//!
//! The connection is resolved from a credential for every call and a fresh
//! HTTP client is built per request; no client outlives the call that made it.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use crate::{Credential, NodeError};

/// Base URL and basic-auth pair for one Airflow deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AirflowConnection {
    pub base_url: String,
    pub username: String,
    pub password: String,
}

impl AirflowConnection {
    /// Read `baseUrl`, `username` and `password` from an `airflow` credential.
    pub fn from_credential(credential: &Credential) -> Result<Self, NodeError> {
        let field = |key: &str| {
            credential.field(key).map(str::to_owned).ok_or_else(|| {
                NodeError::config(format!("credential '{}' has no '{key}'", credential.id))
            })
        };
        Ok(Self {
            base_url: field("baseUrl")?.trim_end_matches('/').to_owned(),
            username: field("username")?,
            password: field("password")?,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v1{path}", self.base_url)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DagRun {
    pub dag_run_id: String,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default, alias = "logical_date")]
    pub execution_date: Option<String>,
}

impl DagRun {
    pub fn is_terminal(&self) -> bool {
        matches!(self.state.as_deref(), Some("success" | "failed"))
    }

    pub fn is_success(&self) -> bool {
        self.state.as_deref() == Some("success")
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TaskInstance {
    pub task_id: String,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub try_number: Option<u32>,
}

#[async_trait]
pub trait AirflowApi: Send + Sync {
    async fn trigger_dag(
        &self,
        conn: &AirflowConnection,
        dag_id: &str,
        conf: &Value,
    ) -> Result<DagRun, NodeError>;

    async fn get_dag_run(
        &self,
        conn: &AirflowConnection,
        dag_id: &str,
        dag_run_id: &str,
    ) -> Result<DagRun, NodeError>;

    async fn list_task_instances(
        &self,
        conn: &AirflowConnection,
        dag_id: &str,
        dag_run_id: &str,
    ) -> Result<Vec<TaskInstance>, NodeError>;

    async fn task_log(
        &self,
        conn: &AirflowConnection,
        dag_id: &str,
        dag_run_id: &str,
        task_id: &str,
        try_number: u32,
    ) -> Result<String, NodeError>;
}

/// [`AirflowApi`] over HTTP with `reqwest`.
#[derive(Debug, Clone)]
pub struct RestAirflowApi {
    timeout: Duration,
}

impl Default for RestAirflowApi {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
        }
    }
}

impl RestAirflowApi {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    fn client(&self) -> Result<reqwest::Client, NodeError> {
        reqwest::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| NodeError::transport(format!("cannot build HTTP client: {e}")))
    }

    async fn send(
        &self,
        conn: &AirflowConnection,
        request: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, NodeError> {
        request
            .basic_auth(&conn.username, Some(&conn.password))
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| NodeError::transport(format!("airflow request failed: {e}")))
    }
}

fn decode<T: serde::de::DeserializeOwned>(
    what: &str,
    body: Result<T, reqwest::Error>,
) -> Result<T, NodeError> {
    body.map_err(|e| NodeError::transport(format!("unexpected airflow {what} response: {e}")))
}

#[async_trait]
impl AirflowApi for RestAirflowApi {
    async fn trigger_dag(
        &self,
        conn: &AirflowConnection,
        dag_id: &str,
        conf: &Value,
    ) -> Result<DagRun, NodeError> {
        let url = conn.url(&format!("/dags/{dag_id}/dagRuns"));
        debug!("POST {url}");
        let request = self.client()?.post(&url).json(&json!({ "conf": conf }));
        let response = self.send(conn, request).await?;
        decode("dagRun", response.json::<DagRun>().await)
    }

    async fn get_dag_run(
        &self,
        conn: &AirflowConnection,
        dag_id: &str,
        dag_run_id: &str,
    ) -> Result<DagRun, NodeError> {
        let url = conn.url(&format!("/dags/{dag_id}/dagRuns/{dag_run_id}"));
        debug!("GET {url}");
        let response = self.send(conn, self.client()?.get(&url)).await?;
        decode("dagRun", response.json::<DagRun>().await)
    }

    async fn list_task_instances(
        &self,
        conn: &AirflowConnection,
        dag_id: &str,
        dag_run_id: &str,
    ) -> Result<Vec<TaskInstance>, NodeError> {
        #[derive(Deserialize)]
        struct Page {
            #[serde(default)]
            task_instances: Vec<TaskInstance>,
        }

        let url = conn.url(&format!("/dags/{dag_id}/dagRuns/{dag_run_id}/taskInstances"));
        debug!("GET {url}");
        let response = self.send(conn, self.client()?.get(&url)).await?;
        Ok(decode("taskInstances", response.json::<Page>().await)?.task_instances)
    }

    async fn task_log(
        &self,
        conn: &AirflowConnection,
        dag_id: &str,
        dag_run_id: &str,
        task_id: &str,
        try_number: u32,
    ) -> Result<String, NodeError> {
        let url = conn.url(&format!(
            "/dags/{dag_id}/dagRuns/{dag_run_id}/taskInstances/{task_id}/logs/{try_number}"
        ));
        debug!("GET {url}");
        let request = self.client()?.get(&url).header("Accept", "text/plain");
        let response = self.send(conn, request).await?;
        decode("log", response.text().await)
    }
}
