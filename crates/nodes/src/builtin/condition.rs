//! `condition`: compare two operands with an allow-listed operator.
//!
//! Never fails. A malformed operator or operand evaluates to `false` and
//! routes the run down the `failure` branch.

use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::{Branch, ExecutableNode, ExecutionContext, NodeError, NodeOutput};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Gt,
    Lt,
    Ge,
    Le,
    Eq,
    Ne,
}

impl FromStr for Operator {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            ">" => Ok(Self::Gt),
            "<" => Ok(Self::Lt),
            ">=" => Ok(Self::Ge),
            "<=" => Ok(Self::Le),
            "==" | "=" | "===" => Ok(Self::Eq),
            "!=" | "<>" | "!==" => Ok(Self::Ne),
            other => Err(format!("unsupported operator '{other}'")),
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Gt => ">",
            Self::Lt => "<",
            Self::Ge => ">=",
            Self::Le => "<=",
            Self::Eq => "==",
            Self::Ne => "!=",
        })
    }
}

/// A resolved comparison operand.
#[derive(Debug, Clone, PartialEq)]
enum Operand {
    Number(f64),
    Text(String),
}

impl Operand {
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Null => None,
            Value::Number(n) => n.as_f64().map(Self::Number),
            Value::String(s) => Some(Self::Text(s.clone())),
            other => Some(Self::Text(other.to_string())),
        }
    }

    /// A token typed by the user: a number, a quoted string, a context path
    /// or, failing all of those, a bare word.
    fn from_token(token: &str, ctx: &ExecutionContext) -> Option<Self> {
        let token = token.trim();
        if token.is_empty() || token.contains("{{") {
            return None;
        }
        for quote in ['"', '\''] {
            if token.len() >= 2 && token.starts_with(quote) && token.ends_with(quote) {
                return Some(Self::Text(token[1..token.len() - 1].to_owned()));
            }
        }
        if let Ok(n) = token.parse::<f64>() {
            return Some(Self::Number(n));
        }
        match ctx.lookup(token) {
            Some(value) => Self::from_value(value),
            None => Some(Self::Text(token.to_owned())),
        }
    }

    fn from_config(value: &Value, ctx: &ExecutionContext) -> Option<Self> {
        match value {
            Value::String(s) => Self::from_token(s, ctx),
            other => Self::from_value(other),
        }
    }

    fn as_number(&self) -> Option<f64> {
        let n = match self {
            Self::Number(n) => Some(*n),
            Self::Text(s) => s.trim().parse::<f64>().ok(),
        };
        n.filter(|n| n.is_finite())
    }

    fn text(&self) -> String {
        match self {
            Self::Number(n) => json!(n).to_string(),
            Self::Text(s) => s.clone(),
        }
    }

    fn to_json(&self) -> Value {
        match self {
            Self::Number(n) => json!(n),
            Self::Text(s) => json!(s),
        }
    }
}

fn compare(left: &Operand, op: Operator, right: &Operand) -> bool {
    match (left.as_number(), right.as_number()) {
        (Some(l), Some(r)) => match op {
            Operator::Gt => l > r,
            Operator::Lt => l < r,
            Operator::Ge => l >= r,
            Operator::Le => l <= r,
            Operator::Eq => l == r,
            Operator::Ne => l != r,
        },
        _ => match op {
            Operator::Eq => left.text() == right.text(),
            Operator::Ne => left.text() != right.text(),
            _ => false,
        },
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ConditionConfig {
    expression: Option<String>,
    variable: Option<Value>,
    operator: Option<String>,
    threshold: Option<Value>,
}

struct Comparison {
    left: Option<Operand>,
    operator: Result<Operator, String>,
    right: Option<Operand>,
}

fn expression_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*(.+?)\s*(===|!==|>=|<=|==|!=|<>|=|>|<)\s*(.+?)\s*$").ok())
        .as_ref()
}

impl ConditionConfig {
    fn comparison(&self, ctx: &ExecutionContext) -> Comparison {
        if let Some(expression) = self.expression.as_deref().filter(|e| !e.trim().is_empty()) {
            return match expression_regex().and_then(|re| re.captures(expression)) {
                Some(caps) => Comparison {
                    left: Operand::from_token(&caps[1], ctx),
                    operator: caps[2].parse(),
                    right: Operand::from_token(&caps[3], ctx),
                },
                None => Comparison {
                    left: None,
                    operator: Err(format!("cannot parse expression '{expression}'")),
                    right: None,
                },
            };
        }
        Comparison {
            left: self.variable.as_ref().and_then(|v| Operand::from_config(v, ctx)),
            operator: self
                .operator
                .as_deref()
                .ok_or_else(|| "missing operator".to_owned())
                .and_then(str::parse),
            right: self.threshold.as_ref().and_then(|v| Operand::from_config(v, ctx)),
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct ConditionNode;

#[async_trait]
impl ExecutableNode for ConditionNode {
    async fn execute(
        &self,
        config: &Value,
        ctx: &ExecutionContext,
    ) -> Result<NodeOutput, NodeError> {
        let cfg: ConditionConfig = serde_json::from_value(config.clone()).unwrap_or_default();
        let Comparison { left, operator, right } = cfg.comparison(ctx);

        let (passed, reason) = match (&left, &operator, &right) {
            (Some(l), Ok(op), Some(r)) => (compare(l, *op, r), None),
            (_, Err(reason), _) => (false, Some(reason.clone())),
            _ => (false, Some("unresolved operand".to_owned())),
        };
        debug!(passed, ?reason, "condition evaluated");

        let mut value = json!({
            "passed": passed,
            "left": left.as_ref().map(Operand::to_json),
            "operator": operator.as_ref().map(ToString::to_string).ok(),
            "right": right.as_ref().map(Operand::to_json),
        });
        if let Some(reason) = reason {
            value["reason"] = json!(reason);
        }
        Ok(NodeOutput::new(value).with_branch(Branch::from_outcome(passed)))
    }
}
