//! Store traits the engine persists through.
//!
//! Both traits are object-safe so the engine can hold `Arc<dyn …>` and be
//! wired against [`MemoryStore`](crate::MemoryStore) in tests and
//! [`PgStore`](crate::PgStore) in production.

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use crate::{
    DbError,
    models::{ExecutionRecord, RecordUpdate, WorkflowRow},
};

/// Persistence for [`ExecutionRecord`]s.
///
/// `update` is called after every step of a run, so implementations must
/// treat it as an idempotent overwrite: the last completed call wins and is
/// visible to every subsequent `get`.
#[async_trait]
pub trait ExecutionStore: Send + Sync {
    /// Create a new record in `pending` status.
    async fn create(&self, workflow_id: Uuid) -> Result<ExecutionRecord, DbError>;

    /// Overwrite status, logs, step states and (when present) results.
    ///
    /// # Errors
    /// - [`DbError::NotFound`] if no record has this id.
    /// - [`DbError::TerminalState`] if the record is already `completed` or `failed`.
    async fn update(&self, id: Uuid, update: RecordUpdate) -> Result<ExecutionRecord, DbError>;

    async fn get(&self, id: Uuid) -> Result<Option<ExecutionRecord>, DbError>;

    /// All runs of a workflow, newest first.
    async fn list_by_workflow(&self, workflow_id: Uuid) -> Result<Vec<ExecutionRecord>, DbError>;
}

/// Read access to stored workflow definitions.
#[async_trait]
pub trait WorkflowStore: Send + Sync {
    async fn create_workflow(&self, name: &str, definition: Value) -> Result<WorkflowRow, DbError>;

    /// Fetch a workflow by id; [`DbError::NotFound`] when missing.
    async fn get_workflow(&self, id: Uuid) -> Result<WorkflowRow, DbError>;
}
