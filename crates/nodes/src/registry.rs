//! Kind string → executor lookup.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::airflow::{AirflowApi, RestAirflowApi};
use crate::builtin::{
    ConditionNode, HttpNode, LogCheckNode, PgSqlRunner, ScriptNode, SqlNode, SqlRunner, TriggerNode,
    WaitNode,
};
use crate::{kinds, CredentialStore, ExecutableNode};

/// External collaborators the built-in executors talk through.
#[derive(Clone)]
pub struct Integrations {
    pub credentials: Arc<dyn CredentialStore>,
    pub airflow: Arc<dyn AirflowApi>,
    pub sql: Arc<dyn SqlRunner>,
}

impl Integrations {
    /// Real Airflow REST and Postgres clients over the given credentials.
    pub fn new(credentials: Arc<dyn CredentialStore>) -> Self {
        Self {
            credentials,
            airflow: Arc::new(RestAirflowApi::default()),
            sql: Arc::new(PgSqlRunner),
        }
    }

    pub fn with_airflow(mut self, airflow: Arc<dyn AirflowApi>) -> Self {
        self.airflow = airflow;
        self
    }

    pub fn with_sql(mut self, sql: Arc<dyn SqlRunner>) -> Self {
        self.sql = sql;
        self
    }
}

/// Maps step kinds to their executors. Unregistered kinds are left to the
/// engine's unknown-kind policy.
#[derive(Clone, Default)]
pub struct NodeRegistry {
    nodes: HashMap<String, Arc<dyn ExecutableNode>>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every built-in executor, wired to `integrations`.
    pub fn builtin(integrations: Integrations) -> Self {
        let Integrations { credentials, airflow, sql } = integrations;
        Self::new()
            .with(kinds::TRIGGER, TriggerNode::new(credentials.clone(), airflow.clone()))
            .with(kinds::LOG_CHECK, LogCheckNode::new(credentials.clone(), airflow))
            .with(kinds::SQL, SqlNode::new(credentials, sql))
            .with(kinds::HTTP, HttpNode)
            .with(kinds::CONDITION, ConditionNode)
            .with(kinds::SCRIPT, ScriptNode::default())
            .with(kinds::WAIT, WaitNode)
    }

    /// Register (or replace) the executor for `kind`.
    pub fn register(&mut self, kind: impl Into<String>, node: Arc<dyn ExecutableNode>) {
        self.nodes.insert(kind.into(), node);
    }

    pub fn with(mut self, kind: impl Into<String>, node: impl ExecutableNode + 'static) -> Self {
        self.register(kind, Arc::new(node));
        self
    }

    pub fn get(&self, kind: &str) -> Option<Arc<dyn ExecutableNode>> {
        self.nodes.get(kind).cloned()
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.nodes.contains_key(kind)
    }
}

impl fmt::Debug for NodeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut kinds: Vec<_> = self.nodes.keys().collect();
        kinds.sort();
        f.debug_struct("NodeRegistry").field("kinds", &kinds).finish()
    }
}
