//! Execution record queries.
//!
//! Logs and step states are stored as JSONB columns and overwritten as a
//! whole on every update, which keeps `update_execution` idempotent.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::{
    DbError,
    models::{ExecutionRecord, ExecutionStatus, LogEntry, RecordUpdate, StepState},
};

const COLUMNS: &str =
    "id, workflow_id, status, logs, step_status, results, started_at, completed_at";

#[derive(Debug, FromRow)]
struct ExecutionRow {
    id: Uuid,
    workflow_id: Uuid,
    status: String,
    logs: Json<Vec<LogEntry>>,
    step_status: Json<BTreeMap<String, StepState>>,
    results: Option<Json<serde_json::Value>>,
    started_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
}

impl TryFrom<ExecutionRow> for ExecutionRecord {
    type Error = DbError;

    fn try_from(row: ExecutionRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            workflow_id: row.workflow_id,
            status: row.status.parse::<ExecutionStatus>().map_err(DbError::Decode)?,
            logs: row.logs.0,
            step_status: row.step_status.0,
            results: row.results.map(|r| r.0),
            started_at: row.started_at,
            completed_at: row.completed_at,
        })
    }
}

/// Create a new workflow execution record in `pending` status.
pub async fn create_execution(
    pool: &PgPool,
    workflow_id: Uuid,
) -> Result<ExecutionRecord, DbError> {
    let record = ExecutionRecord::new(workflow_id);

    let row = sqlx::query_as::<_, ExecutionRow>(&format!(
        r#"
        INSERT INTO executions (id, workflow_id, status, logs, step_status, started_at)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING {COLUMNS}
        "#
    ))
    .bind(record.id)
    .bind(workflow_id)
    .bind(record.status.to_string())
    .bind(Json(&record.logs))
    .bind(Json(&record.step_status))
    .bind(record.started_at)
    .fetch_one(pool)
    .await?;

    row.try_into()
}

/// Overwrite the mutable columns of a non-terminal execution.
///
/// `completed_at` is stamped the first time the status becomes terminal.
pub async fn update_execution(
    pool: &PgPool,
    execution_id: Uuid,
    update: &RecordUpdate,
) -> Result<ExecutionRecord, DbError> {
    let row = sqlx::query_as::<_, ExecutionRow>(&format!(
        r#"
        UPDATE executions
        SET status = $1,
            logs = $2,
            step_status = $3,
            results = COALESCE($4, results),
            completed_at = CASE
                WHEN $1 IN ('completed', 'failed') THEN COALESCE(completed_at, $5)
                ELSE completed_at
            END
        WHERE id = $6 AND status NOT IN ('completed', 'failed')
        RETURNING {COLUMNS}
        "#
    ))
    .bind(update.status.to_string())
    .bind(Json(&update.logs))
    .bind(Json(&update.step_status))
    .bind(update.results.as_ref().map(Json))
    .bind(Utc::now())
    .bind(execution_id)
    .fetch_optional(pool)
    .await?;

    match row {
        Some(row) => row.try_into(),
        None => match get_execution(pool, execution_id).await? {
            Some(_) => Err(DbError::TerminalState(execution_id)),
            None => Err(DbError::NotFound),
        },
    }
}

pub async fn get_execution(
    pool: &PgPool,
    execution_id: Uuid,
) -> Result<Option<ExecutionRecord>, DbError> {
    let row = sqlx::query_as::<_, ExecutionRow>(&format!(
        "SELECT {COLUMNS} FROM executions WHERE id = $1"
    ))
    .bind(execution_id)
    .fetch_optional(pool)
    .await?;

    row.map(ExecutionRecord::try_from).transpose()
}

/// All executions of a workflow, newest first.
pub async fn list_executions(
    pool: &PgPool,
    workflow_id: Uuid,
) -> Result<Vec<ExecutionRecord>, DbError> {
    let rows = sqlx::query_as::<_, ExecutionRow>(&format!(
        "SELECT {COLUMNS} FROM executions WHERE workflow_id = $1 ORDER BY started_at DESC"
    ))
    .bind(workflow_id)
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(ExecutionRecord::try_from).collect()
}
