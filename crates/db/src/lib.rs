//! `db` crate — execution-record persistence.
//!
//! Provides the record types polled by the UI, the store traits the engine
//! writes through, an in-memory store, and a Postgres store backed by `sqlx`.
//! No scheduling logic lives here.

pub mod error;
pub mod memory;
pub mod models;
pub mod pool;
pub mod repository;
pub mod store;

pub use error::DbError;
pub use memory::MemoryStore;
pub use models::{
    ExecutionRecord, ExecutionStatus, LogEntry, LogLevel, RecordUpdate, StepState, StepStatus,
    WorkflowRow,
};
pub use pool::DbPool;
pub use repository::PgStore;
pub use store::{ExecutionStore, WorkflowStore};
