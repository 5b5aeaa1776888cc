//! Typed error type for the db crate.

use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("sqlx error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("row not found")]
    NotFound,

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// The record already reached `completed` or `failed`.
    #[error("execution {0} is in a terminal state and cannot be updated")]
    TerminalState(Uuid),

    #[error("corrupt row: {0}")]
    Decode(String),
}
