//! Workflow definition queries.
//!
//! The engine only reads definitions; `create_workflow` exists so the CLI can
//! register a graph file before running it.

use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use crate::{DbError, models::WorkflowRow};

/// `definition` is stored as given; it is parsed only when a run starts.
pub async fn create_workflow(
    pool: &PgPool,
    name: &str,
    definition: serde_json::Value,
) -> Result<WorkflowRow, DbError> {
    sqlx::query_as::<_, WorkflowRow>(
        "INSERT INTO workflows (id, name, definition, created_at) \
         VALUES ($1, $2, $3, $4) RETURNING id, name, definition, created_at",
    )
    .bind(Uuid::new_v4())
    .bind(name)
    .bind(definition)
    .bind(Utc::now())
    .fetch_one(pool)
    .await
    .map_err(DbError::from)
}

pub async fn get_workflow(pool: &PgPool, id: Uuid) -> Result<WorkflowRow, DbError> {
    sqlx::query_as::<_, WorkflowRow>(
        "SELECT id, name, definition, created_at FROM workflows WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or(DbError::NotFound)
}
