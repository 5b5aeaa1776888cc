//! Built-in step executors, one module per step kind.

pub mod condition;
pub mod http;
pub mod log_check;
pub mod noop;
pub mod script;
pub mod sql;
pub mod trigger;
pub mod wait;

pub use condition::ConditionNode;
pub use http::HttpNode;
pub use log_check::LogCheckNode;
pub use noop::NoopNode;
pub use script::ScriptNode;
pub use sql::{PgSqlRunner, QueryOutcome, SqlNode, SqlRunner};
pub use trigger::TriggerNode;
pub use wait::WaitNode;
