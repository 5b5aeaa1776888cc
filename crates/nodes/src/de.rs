//! Serde helpers for step configs written by hand or by the graph generator,
//! where numbers and ids arrive as either JSON numbers or strings.

use std::time::Duration;

use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// A numeric config field that may be a literal or a string (possibly a
/// placeholder that only becomes numeric after resolution).
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Number(serde_json::Number),
    Text(String),
}

impl Scalar {
    pub fn as_f64(&self) -> Option<f64> {
        let value = match self {
            Self::Number(n) => n.as_f64(),
            Self::Text(s) => s.trim().parse::<f64>().ok(),
        };
        value.filter(|v| v.is_finite())
    }

    /// Seconds as a [`Duration`]; `None` for negative values and values too
    /// large to represent.
    pub fn as_duration(&self) -> Option<Duration> {
        self.as_f64()
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
    }
}

/// Accepts `"12"`, `12` or `null` for reference ids such as `credentialId`.
pub fn opt_reference<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Value>::deserialize(deserializer)?;
    Ok(match raw {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_owned()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

/// Render any JSON value as plain text (strings unquoted).
pub fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Deserialize)]
    struct Cfg {
        #[serde(default, deserialize_with = "opt_reference")]
        credential_id: Option<String>,
        seconds: Scalar,
    }

    #[test]
    fn references_accept_numbers_and_strings() {
        let a: Cfg = serde_json::from_value(json!({ "credential_id": 4, "seconds": 1 })).unwrap();
        let b: Cfg =
            serde_json::from_value(json!({ "credential_id": " 4 ", "seconds": "1" })).unwrap();
        let c: Cfg = serde_json::from_value(json!({ "credential_id": "", "seconds": 1 })).unwrap();
        assert_eq!(a.credential_id.as_deref(), Some("4"));
        assert_eq!(b.credential_id.as_deref(), Some("4"));
        assert_eq!(c.credential_id, None);
    }

    #[test]
    fn scalar_parses_numeric_text() {
        let cfg: Cfg = serde_json::from_value(json!({ "seconds": " 2.5 " })).unwrap();
        assert_eq!(cfg.seconds.as_f64(), Some(2.5));
        let cfg: Cfg = serde_json::from_value(json!({ "seconds": "{{delay}}" })).unwrap();
        assert_eq!(cfg.seconds.as_f64(), None);
    }

    #[test]
    fn durations_reject_negative_and_oversized_seconds() {
        let secs = |v: Value| Scalar::deserialize(v).unwrap().as_duration();
        assert_eq!(secs(json!("1.5")), Some(Duration::from_millis(1500)));
        assert_eq!(secs(json!(-1)), None);
        assert_eq!(secs(json!(1e20)), None);
        assert_eq!(secs(json!("1e300")), None);
    }
}
