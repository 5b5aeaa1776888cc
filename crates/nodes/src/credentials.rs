//! Read-only credential lookup.
//!
//! Steps reference connection details by id (`credentialId`); executors
//! resolve the reference per call and never mutate credential storage.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::NodeError;

/// Stored connection details, e.g. `{ "baseUrl", "username", "password" }`
/// for Airflow or `{ "url" }` for a database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Credential {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub data: Value,
}

impl Credential {
    /// String field of `data`, `None` when absent or empty.
    pub fn field(&self, key: &str) -> Option<&str> {
        self.data
            .get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }
}

pub trait CredentialStore: Send + Sync {
    fn get(&self, reference: &str) -> Option<Credential>;
}

/// Fetch a credential of the expected `kind`.
///
/// # Errors
/// [`NodeError::Config`] when the reference is missing, unknown, or points
/// at a credential of another kind.
pub fn require(
    store: &dyn CredentialStore,
    reference: Option<&str>,
    kind: &str,
) -> Result<Credential, NodeError> {
    let reference = reference
        .ok_or_else(|| NodeError::config(format!("a {kind} credentialId is required")))?;
    let credential = store
        .get(reference)
        .ok_or_else(|| NodeError::config(format!("unknown credential '{reference}'")))?;
    if !credential.kind.eq_ignore_ascii_case(kind) {
        return Err(NodeError::config(format!(
            "credential '{reference}' is of type '{}', expected '{kind}'",
            credential.kind
        )));
    }
    Ok(credential)
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryCredentials {
    by_id: HashMap<String, Credential>,
}

impl InMemoryCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, credential: Credential) {
        self.by_id.insert(credential.id.clone(), credential);
    }

    pub fn with(mut self, credential: Credential) -> Self {
        self.insert(credential);
        self
    }

    /// Build from a JSON array of credentials.
    pub fn from_json(value: Value) -> Result<Self, serde_json::Error> {
        let list: Vec<Credential> = serde_json::from_value(value)?;
        Ok(list.into_iter().fold(Self::new(), Self::with))
    }
}

impl CredentialStore for InMemoryCredentials {
    fn get(&self, reference: &str) -> Option<Credential> {
        self.by_id.get(reference).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store() -> InMemoryCredentials {
        InMemoryCredentials::from_json(json!([
            {
                "id": "1",
                "type": "airflow",
                "data": { "baseUrl": "http://af", "username": "u", "password": "p" }
            },
            { "id": "2", "type": "postgres", "data": { "url": "postgres://x" } }
        ]))
        .unwrap()
    }

    #[test]
    fn require_checks_reference_and_kind() {
        let store = store();
        let airflow = require(&store, Some("1"), "airflow").unwrap();
        assert_eq!(airflow.field("baseUrl"), Some("http://af"));
        assert!(matches!(require(&store, None, "airflow"), Err(NodeError::Config(_))));
        assert!(matches!(require(&store, Some("9"), "airflow"), Err(NodeError::Config(_))));
        assert!(matches!(require(&store, Some("2"), "airflow"), Err(NodeError::Config(_))));
    }
}
