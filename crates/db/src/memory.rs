//! In-process store used by tests and by the CLI when no database is given.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use serde_json::Value;
use uuid::Uuid;

use crate::{
    DbError,
    models::{ExecutionRecord, RecordUpdate, WorkflowRow},
    store::{ExecutionStore, WorkflowStore},
};

/// Implements both [`ExecutionStore`] and [`WorkflowStore`] over hash maps.
#[derive(Debug, Default)]
pub struct MemoryStore {
    executions: RwLock<HashMap<Uuid, ExecutionRecord>>,
    workflows: RwLock<HashMap<Uuid, WorkflowRow>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ExecutionStore for MemoryStore {
    async fn create(&self, workflow_id: Uuid) -> Result<ExecutionRecord, DbError> {
        let record = ExecutionRecord::new(workflow_id);
        self.executions.write().insert(record.id, record.clone());
        Ok(record)
    }

    async fn update(&self, id: Uuid, update: RecordUpdate) -> Result<ExecutionRecord, DbError> {
        let mut executions = self.executions.write();
        let record = executions.get_mut(&id).ok_or(DbError::NotFound)?;
        if record.status.is_terminal() {
            return Err(DbError::TerminalState(id));
        }
        record.apply(update);
        Ok(record.clone())
    }

    async fn get(&self, id: Uuid) -> Result<Option<ExecutionRecord>, DbError> {
        Ok(self.executions.read().get(&id).cloned())
    }

    async fn list_by_workflow(&self, workflow_id: Uuid) -> Result<Vec<ExecutionRecord>, DbError> {
        let mut records: Vec<ExecutionRecord> = self
            .executions
            .read()
            .values()
            .filter(|r| r.workflow_id == workflow_id)
            .cloned()
            .collect();
        records.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(records)
    }
}

#[async_trait]
impl WorkflowStore for MemoryStore {
    async fn create_workflow(&self, name: &str, definition: Value) -> Result<WorkflowRow, DbError> {
        let row = WorkflowRow {
            id: Uuid::new_v4(),
            name: name.to_owned(),
            definition,
            created_at: Utc::now(),
        };
        self.workflows.write().insert(row.id, row.clone());
        Ok(row)
    }

    async fn get_workflow(&self, id: Uuid) -> Result<WorkflowRow, DbError> {
        self.workflows.read().get(&id).cloned().ok_or(DbError::NotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ExecutionStatus, LogEntry};
    use serde_json::json;

    fn running(record: &ExecutionRecord, message: &str) -> RecordUpdate {
        let mut update = RecordUpdate::from(record);
        update.status = ExecutionStatus::Running;
        update.logs.push(LogEntry::info(None, message));
        update
    }

    #[tokio::test]
    async fn create_starts_pending_and_is_readable() {
        let store = MemoryStore::new();
        let wf = Uuid::new_v4();
        let record = store.create(wf).await.unwrap();

        assert_eq!(record.status, ExecutionStatus::Pending);
        let fetched = store.get(record.id).await.unwrap().expect("record exists");
        assert_eq!(fetched, record);
    }

    #[tokio::test]
    async fn update_overwrites_and_is_visible_to_get() {
        let store = MemoryStore::new();
        let record = store.create(Uuid::new_v4()).await.unwrap();

        let updated = store.update(record.id, running(&record, "one")).await.unwrap();
        let updated = store.update(record.id, running(&updated, "two")).await.unwrap();

        let fetched = store.get(record.id).await.unwrap().unwrap();
        assert_eq!(fetched.status, ExecutionStatus::Running);
        assert_eq!(fetched.logs.len(), 2);
        assert_eq!(fetched, updated);
    }

    #[tokio::test]
    async fn terminal_records_reject_updates() {
        let store = MemoryStore::new();
        let record = store.create(Uuid::new_v4()).await.unwrap();

        let mut done = RecordUpdate::from(&record);
        done.status = ExecutionStatus::Failed;
        let failed = store.update(record.id, done).await.unwrap();
        assert!(failed.completed_at.is_some());

        let result = store.update(record.id, running(&failed, "late")).await;
        assert!(matches!(result, Err(DbError::TerminalState(id)) if id == record.id));
        assert_eq!(store.get(record.id).await.unwrap().unwrap().logs.len(), 0);
    }

    #[tokio::test]
    async fn update_of_unknown_record_is_not_found() {
        let store = MemoryStore::new();
        let record = ExecutionRecord::new(Uuid::new_v4());
        let result = store.update(record.id, RecordUpdate::from(&record)).await;
        assert!(matches!(result, Err(DbError::NotFound)));
        assert!(store.get(record.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_by_workflow_filters_by_owner() {
        let store = MemoryStore::new();
        let wf_a = Uuid::new_v4();
        let wf_b = Uuid::new_v4();
        store.create(wf_a).await.unwrap();
        store.create(wf_a).await.unwrap();
        store.create(wf_b).await.unwrap();

        let runs = store.list_by_workflow(wf_a).await.unwrap();
        assert_eq!(runs.len(), 2);
        assert!(runs.iter().all(|r| r.workflow_id == wf_a));
        assert!(runs[0].started_at >= runs[1].started_at);
    }

    #[tokio::test]
    async fn workflows_round_trip() {
        let store = MemoryStore::new();
        let row = store
            .create_workflow("nightly", json!({ "nodes": [], "edges": [] }))
            .await
            .unwrap();
        assert_eq!(store.get_workflow(row.id).await.unwrap().name, "nightly");
        assert!(matches!(store.get_workflow(Uuid::new_v4()).await, Err(DbError::NotFound)));
    }
}
