//! `engine` crate — graph model, graph validation, placeholder resolution
//! and the scheduler that drives one execution record to a terminal status.

pub mod dag;
pub mod error;
pub mod executor;
pub mod models;
pub mod resolver;
pub mod traversal;

pub use dag::{prepare, validate_dag, PreparedWorkflow, Topology};
pub use error::EngineError;
pub use executor::{ExecutorConfig, UnknownKindPolicy, WorkflowExecutor};
pub use models::{Edge, Step, StepKind, WorkflowGraph};
pub use resolver::VariableResolver;
