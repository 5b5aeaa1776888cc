//! `nodes` crate — the `ExecutableNode` trait and built-in step executors.
//!
//! Built-in and custom step kinds are both served by an
//! [`ExecutableNode`] looked up by kind string in a [`NodeRegistry`].
//! Executors own all side effects; the engine never performs I/O itself.

pub mod airflow;
pub mod builtin;
pub mod credentials;
pub mod de;
pub mod error;
pub mod mock;
pub mod registry;
pub mod traits;

pub use credentials::{Credential, CredentialStore, InMemoryCredentials};
pub use error::NodeError;
pub use registry::{Integrations, NodeRegistry};
pub use traits::{Branch, ExecutableNode, ExecutionContext, NodeOutput};

/// Canonical kind strings the built-in executors are registered under.
pub mod kinds {
    pub const TRIGGER: &str = "trigger";
    pub const HTTP: &str = "http";
    pub const SQL: &str = "sql";
    pub const SCRIPT: &str = "script";
    pub const CONDITION: &str = "condition";
    pub const LOG_CHECK: &str = "logCheck";
    pub const WAIT: &str = "wait";
    pub const LLM_GENERATE: &str = "llmGenerate";
}
