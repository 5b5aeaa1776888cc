//! Repository functions (one per database operation) and the
//! [`PgStore`] that exposes them through the store traits.
//!
//! Every function takes a `&DbPool` and returns a `Result<T, DbError>`.
//! Pure SQL, no business logic.

pub mod executions;
pub mod workflows;

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use crate::{
    DbError, DbPool,
    models::{ExecutionRecord, RecordUpdate, WorkflowRow},
    store::{ExecutionStore, WorkflowStore},
};

/// Postgres-backed store.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ExecutionStore for PgStore {
    async fn create(&self, workflow_id: Uuid) -> Result<ExecutionRecord, DbError> {
        executions::create_execution(&self.pool, workflow_id).await
    }

    async fn update(&self, id: Uuid, update: RecordUpdate) -> Result<ExecutionRecord, DbError> {
        executions::update_execution(&self.pool, id, &update).await
    }

    async fn get(&self, id: Uuid) -> Result<Option<ExecutionRecord>, DbError> {
        executions::get_execution(&self.pool, id).await
    }

    async fn list_by_workflow(&self, workflow_id: Uuid) -> Result<Vec<ExecutionRecord>, DbError> {
        executions::list_executions(&self.pool, workflow_id).await
    }
}

#[async_trait]
impl WorkflowStore for PgStore {
    async fn create_workflow(&self, name: &str, definition: Value) -> Result<WorkflowRow, DbError> {
        workflows::create_workflow(&self.pool, name, definition).await
    }

    async fn get_workflow(&self, id: Uuid) -> Result<WorkflowRow, DbError> {
        workflows::get_workflow(&self.pool, id).await
    }
}
