//! Record types shared by the engine, the stores and their readers.
//!
//! An [`ExecutionRecord`] is the pollable representation of one workflow run:
//! the UI renders `logs` as a live console and `step_status` as the per-node
//! overlay on the canvas.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// workflows
// ---------------------------------------------------------------------------

/// A persisted workflow definition row.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct WorkflowRow {
    pub id: Uuid,
    pub name: String,
    /// Graph payload (`{ nodes, edges }`) as produced by the editor.
    pub definition: Value,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// executions
// ---------------------------------------------------------------------------

/// Lifecycle of a whole run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl ExecutionStatus {
    /// `completed` and `failed` are final; stores refuse further updates.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for ExecutionStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending"   => Ok(Self::Pending),
            "running"   => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed"    => Ok(Self::Failed),
            other       => Err(format!("unknown execution status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

/// One line of the user-visible execution console.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_id: Option<String>,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl LogEntry {
    pub fn new(level: LogLevel, step_id: Option<&str>, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            step_id: step_id.map(str::to_owned),
            message: message.into(),
            data: None,
        }
    }

    pub fn info(step_id: Option<&str>, message: impl Into<String>) -> Self {
        Self::new(LogLevel::Info, step_id, message)
    }

    pub fn warn(step_id: Option<&str>, message: impl Into<String>) -> Self {
        Self::new(LogLevel::Warn, step_id, message)
    }

    pub fn error(step_id: Option<&str>, message: impl Into<String>) -> Self {
        Self::new(LogLevel::Error, step_id, message)
    }

    /// Attach a structured payload.
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// Per-step lifecycle: `pending → running → {completed | failed}`, or
/// `pending → skipped` when the step sits on a branch that was not taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepState {
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
}

/// One workflow run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRecord {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub status: ExecutionStatus,
    pub logs: Vec<LogEntry>,
    pub step_status: BTreeMap<String, StepState>,
    /// Snapshot of the execution context, written with every update.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub results: Option<Value>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl ExecutionRecord {
    /// A fresh `pending` record.
    pub fn new(workflow_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            workflow_id,
            status: ExecutionStatus::Pending,
            logs: Vec::new(),
            step_status: BTreeMap::new(),
            results: None,
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    /// Overwrite the mutable part of the record (last write wins).
    pub fn apply(&mut self, update: RecordUpdate) {
        self.status = update.status;
        self.logs = update.logs;
        self.step_status = update.step_status;
        if update.results.is_some() {
            self.results = update.results;
        }
        if self.status.is_terminal() && self.completed_at.is_none() {
            self.completed_at = Some(Utc::now());
        }
    }
}

/// Full overwrite of a record's mutable state, as sent to
/// [`ExecutionStore::update`](crate::ExecutionStore::update).
#[derive(Debug, Clone, PartialEq)]
pub struct RecordUpdate {
    pub status: ExecutionStatus,
    pub logs: Vec<LogEntry>,
    pub step_status: BTreeMap<String, StepState>,
    pub results: Option<Value>,
}

impl From<&ExecutionRecord> for RecordUpdate {
    fn from(record: &ExecutionRecord) -> Self {
        Self {
            status: record.status,
            logs: record.logs.clone(),
            step_status: record.step_status.clone(),
            results: record.results.clone(),
        }
    }
}
