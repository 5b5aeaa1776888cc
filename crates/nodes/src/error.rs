//! Node-level error type.

use thiserror::Error;

/// Errors returned by a node's `execute` method.
///
/// Every variant is fatal to the run; the engine records the message on the
/// failing step. A negative assertion is not an error; it is reported as a
/// [`Branch::Failure`](crate::Branch::Failure) outcome instead.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NodeError {
    /// Missing or invalid config field, unknown credential reference.
    #[error("configuration error: {0}")]
    Config(String),

    /// The target system was unreachable or answered with an error.
    #[error("transport error: {0}")]
    Transport(String),

    /// A user script raised or exceeded its limits.
    #[error("script error: {0}")]
    Script(String),
}

impl NodeError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }
}
