//! `sql`: run one statement against a database named by a credential.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use sqlx::types::Json;
use sqlx::{Connection, PgConnection};
use tracing::{debug, info};

use crate::credentials::{Credential, CredentialStore};
use crate::de::opt_reference;
use crate::traits::parse_config;
use crate::{kinds, ExecutableNode, ExecutionContext, NodeError, NodeOutput};

/// What a statement produced.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryOutcome {
    /// Result set of a row-returning statement, one JSON object per row.
    Rows(Vec<Value>),
    /// Row count of an `INSERT`/`UPDATE`/`DELETE`/DDL statement.
    Affected(u64),
}

/// Executes SQL text over a connection described by a credential.
#[async_trait]
pub trait SqlRunner: Send + Sync {
    async fn run(&self, credential: &Credential, query: &str) -> Result<QueryOutcome, NodeError>;
}

/// Postgres runner; opens one connection per call from the credential's
/// `url` (or `connectionString`) and closes it afterwards.
#[derive(Debug, Default, Clone)]
pub struct PgSqlRunner;

fn returns_rows(query: &str) -> bool {
    let first = query
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .to_ascii_lowercase();
    matches!(first.as_str(), "select" | "with" | "values")
}

fn query_error(e: sqlx::Error) -> NodeError {
    NodeError::transport(format!("query failed: {e}"))
}

#[async_trait]
impl SqlRunner for PgSqlRunner {
    async fn run(&self, credential: &Credential, query: &str) -> Result<QueryOutcome, NodeError> {
        let url = credential
            .field("url")
            .or_else(|| credential.field("connectionString"))
            .ok_or_else(|| {
                NodeError::config(format!("credential '{}' has no url", credential.id))
            })?;
        let mut conn = PgConnection::connect(url)
            .await
            .map_err(|e| NodeError::transport(format!("cannot connect to database: {e}")))?;

        let statement = query.trim().trim_end_matches(';');
        let outcome = if returns_rows(statement) {
            let wrapped =
                format!("SELECT COALESCE(json_agg(t), '[]'::json) FROM ({statement}) AS t");
            let (rows,): (Json<Vec<Value>>,) = sqlx::query_as(&wrapped)
                .fetch_one(&mut conn)
                .await
                .map_err(query_error)?;
            QueryOutcome::Rows(rows.0)
        } else {
            let done = sqlx::query(statement)
                .execute(&mut conn)
                .await
                .map_err(query_error)?;
            QueryOutcome::Affected(done.rows_affected())
        };

        if let Err(e) = conn.close().await {
            debug!("closing database connection failed: {e}");
        }
        Ok(outcome)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SqlConfig {
    #[serde(default, alias = "sql", alias = "sqlQuery")]
    query: Option<String>,
    #[serde(
        default,
        alias = "credential_id",
        alias = "connectionId",
        alias = "connection_id",
        deserialize_with = "opt_reference"
    )]
    credential_id: Option<String>,
}

impl SqlConfig {
    fn query(&self) -> Result<&str, NodeError> {
        self.query
            .as_deref()
            .map(str::trim)
            .filter(|q| !q.is_empty())
            .ok_or_else(|| NodeError::config("sql requires a query"))
    }

    fn check(&self) -> Result<&str, NodeError> {
        if self.credential_id.is_none() {
            return Err(NodeError::config("sql requires a connection credentialId"));
        }
        self.query()
    }
}

/// Column names in first-row order.
fn columns(rows: &[Value]) -> Vec<String> {
    rows.first()
        .and_then(Value::as_object)
        .map(|row| row.keys().cloned().collect())
        .unwrap_or_default()
}

pub struct SqlNode {
    credentials: Arc<dyn CredentialStore>,
    runner: Arc<dyn SqlRunner>,
}

impl SqlNode {
    pub fn new(credentials: Arc<dyn CredentialStore>, runner: Arc<dyn SqlRunner>) -> Self {
        Self { credentials, runner }
    }
}

#[async_trait]
impl ExecutableNode for SqlNode {
    fn validate(&self, config: &Value) -> Result<(), NodeError> {
        let cfg: SqlConfig = parse_config(kinds::SQL, config)?;
        cfg.check().map(|_| ())
    }

    async fn execute(
        &self,
        config: &Value,
        _ctx: &ExecutionContext,
    ) -> Result<NodeOutput, NodeError> {
        let cfg: SqlConfig = parse_config(kinds::SQL, config)?;
        let query = cfg.check()?;
        // Any database credential type is accepted; the runner decides.
        let reference = cfg.credential_id.as_deref().unwrap_or_default();
        let credential = self
            .credentials
            .get(reference)
            .ok_or_else(|| NodeError::config(format!("unknown credential '{reference}'")))?;

        match self.runner.run(&credential, query).await? {
            QueryOutcome::Rows(rows) => {
                let count = rows.len();
                let columns = columns(&rows);
                info!(count, "query returned rows");
                let value = json!({
                    "rows": rows,
                    "rowCount": count,
                    "count": count,
                    "columns": columns,
                });
                let query_result = json!({
                    "record_count": count,
                    "rows": value["rows"],
                    "columns": value["columns"],
                });
                Ok(NodeOutput::new(value)
                    .with_alias("queryResult", query_result)
                    .with_alias("lastRecordCount", json!(count)))
            }
            QueryOutcome::Affected(affected) => {
                info!(affected, "statement executed");
                let query_result = json!({ "record_count": affected, "rows": [], "columns": [] });
                Ok(NodeOutput::new(json!({ "affectedRows": affected, "count": affected }))
                    .with_alias("queryResult", query_result)
                    .with_alias("lastRecordCount", json!(affected)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::StaticSqlRunner;
    use crate::InMemoryCredentials;
    use uuid::Uuid;

    fn credentials() -> Arc<InMemoryCredentials> {
        Arc::new(
            InMemoryCredentials::from_json(json!([
                { "id": "pg", "type": "postgres", "data": { "url": "postgres://localhost/app" } }
            ]))
            .unwrap(),
        )
    }

    fn ctx() -> ExecutionContext {
        ExecutionContext::new(Uuid::new_v4(), Uuid::new_v4())
    }

    #[test]
    fn row_returning_statements_are_detected() {
        assert!(returns_rows("SELECT 1"));
        assert!(returns_rows("  with x as (select 1) select * from x"));
        assert!(!returns_rows("UPDATE t SET a = 1"));
        assert!(!returns_rows(""));
    }

    #[tokio::test]
    async fn rows_populate_query_result_aliases() {
        let runner = Arc::new(StaticSqlRunner::rows(vec![
            json!({ "id": 1, "name": "a" }),
            json!({ "id": 2, "name": "b" }),
        ]));
        let node = SqlNode::new(credentials(), runner.clone());
        let query = "SELECT id, name FROM t WHERE day = '2024-01-01'";
        let config = json!({ "query": query, "connectionId": "pg" });
        let out = node.execute(&config, &ctx()).await.unwrap();

        assert_eq!(out.value["count"], 2);
        assert_eq!(out.value["columns"], json!(["id", "name"]));
        let (key, query_result) = &out.aliases[0];
        assert_eq!(key, "queryResult");
        assert_eq!(query_result["record_count"], 2);
        assert_eq!(out.aliases[1], ("lastRecordCount".to_string(), json!(2)));
        assert_eq!(runner.queries(), vec![query.to_string()]);
    }

    #[tokio::test]
    async fn statements_report_affected_rows() {
        let node = SqlNode::new(credentials(), Arc::new(StaticSqlRunner::affected(3)));
        let out = node
            .execute(&json!({ "query": "DELETE FROM t", "credentialId": "pg" }), &ctx())
            .await
            .unwrap();
        assert_eq!(out.value["affectedRows"], 3);
        assert_eq!(
            out.aliases,
            vec![
                (
                    "queryResult".to_string(),
                    json!({ "record_count": 3, "rows": [], "columns": [] })
                ),
                ("lastRecordCount".to_string(), json!(3)),
            ]
        );
    }

    #[tokio::test]
    async fn unknown_connection_is_a_config_error() {
        let node = SqlNode::new(credentials(), Arc::new(StaticSqlRunner::affected(0)));
        let err = node
            .execute(&json!({ "query": "SELECT 1", "credentialId": "other" }), &ctx())
            .await
            .unwrap_err();
        assert!(matches!(err, NodeError::Config(_)));
    }

    #[test]
    fn validate_requires_query_and_connection() {
        let node = SqlNode::new(credentials(), Arc::new(StaticSqlRunner::affected(0)));
        assert!(node.validate(&json!({ "query": "SELECT 1", "credentialId": "pg" })).is_ok());
        assert!(node.validate(&json!({ "query": "  ", "credentialId": "pg" })).is_err());
        assert!(node.validate(&json!({ "query": "SELECT 1" })).is_err());
    }

    #[tokio::test]
    async fn unreachable_database_is_a_transport_error() {
        let credential = Credential {
            id: "pg".into(),
            kind: "postgres".into(),
            name: None,
            data: json!({ "url": "postgres://u:p@127.0.0.1:1/db" }),
        };
        let err = PgSqlRunner.run(&credential, "SELECT 1").await.unwrap_err();
        assert!(matches!(err, NodeError::Transport(_)));
    }
}
