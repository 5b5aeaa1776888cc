//! `{{…}}` placeholder substitution in step configs.
//!
//! Forms, applied in this order:
//! 1. `{{today}}` / `{{yesterday}}` — local date as `yyyy-MM-dd`.
//! 2. `{{date:<format>[:subN|addN]}}` — local date shifted by N days and
//!    rendered with `yyyy`, `MM` and `dd` tokens.
//! 3. `{{path.to[0].value}}` — a lookup in the execution context.
//!
//! Anything that cannot be resolved is left in place verbatim.

use std::sync::OnceLock;

use chrono::{Days, Local, NaiveDate};
use regex::{Captures, Regex};
use serde_json::Value;

use nodes::ExecutionContext;

const ISO_DATE: &str = "%Y-%m-%d";

fn date_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\{\s*date:([^:}]+)(?::([^}]*))?\}\}").ok())
        .as_ref()
}

fn path_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\{\s*([^{}\s:]+)\s*\}\}").ok())
        .as_ref()
}

/// Translate `yyyy`/`MM`/`dd` tokens into a chrono format string. Every
/// other character is literal.
fn chrono_format(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len() + 4);
    let mut rest = pattern;
    while let Some(c) = rest.chars().next() {
        let (piece, consumed) = if rest.starts_with("yyyy") {
            ("%Y", 4)
        } else if rest.starts_with("MM") {
            ("%m", 2)
        } else if rest.starts_with("dd") {
            ("%d", 2)
        } else if c == '%' {
            ("%%", 1)
        } else {
            out.push(c);
            rest = &rest[c.len_utf8()..];
            continue;
        };
        out.push_str(piece);
        rest = &rest[consumed..];
    }
    out
}

/// Apply a `subN` / `addN` modifier. Unknown modifiers leave the date as is.
fn shift(date: NaiveDate, modifier: Option<&str>) -> NaiveDate {
    let Some(modifier) = modifier.map(str::trim).filter(|m| !m.is_empty()) else {
        return date;
    };
    let amount = |digits: &str| digits.trim().parse::<u64>().ok().map(Days::new);
    let shifted = if let Some(n) = modifier.strip_prefix("sub") {
        amount(n).and_then(|d| date.checked_sub_days(d))
    } else if let Some(n) = modifier.strip_prefix("add") {
        amount(n).and_then(|d| date.checked_add_days(d))
    } else {
        None
    };
    shifted.unwrap_or(date)
}

/// Render a context value for inlining into text.
fn inline(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

pub struct VariableResolver<'a> {
    context: &'a ExecutionContext,
    today: NaiveDate,
}

impl<'a> VariableResolver<'a> {
    pub fn new(context: &'a ExecutionContext) -> Self {
        Self::with_today(context, Local::now().date_naive())
    }

    /// Resolver with a fixed notion of "today".
    pub fn with_today(context: &'a ExecutionContext, today: NaiveDate) -> Self {
        Self { context, today }
    }

    pub fn resolve(&self, text: &str) -> String {
        if !text.contains("{{") {
            return text.to_owned();
        }
        let yesterday = shift(self.today, Some("sub1"));
        let mut out = text
            .replace("{{today}}", &self.today.format(ISO_DATE).to_string())
            .replace("{{yesterday}}", &yesterday.format(ISO_DATE).to_string());

        if let Some(re) = date_regex() {
            out = re
                .replace_all(&out, |caps: &Captures<'_>| {
                    let date = shift(self.today, caps.get(2).map(|m| m.as_str()));
                    date.format(&chrono_format(&caps[1])).to_string()
                })
                .into_owned();
        }

        if let Some(re) = path_regex() {
            out = re
                .replace_all(&out, |caps: &Captures<'_>| match self.context.lookup(&caps[1]) {
                    Some(value) => inline(value),
                    None => caps[0].to_owned(),
                })
                .into_owned();
        }
        out
    }

    /// Resolve every string inside `value`; other scalars pass through.
    pub fn resolve_value(&self, value: &Value) -> Value {
        match value {
            Value::String(s) => Value::String(self.resolve(s)),
            Value::Array(items) => {
                Value::Array(items.iter().map(|v| self.resolve_value(v)).collect())
            }
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), self.resolve_value(v)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    fn ctx() -> ExecutionContext {
        let mut ctx = ExecutionContext::new(Uuid::new_v4(), Uuid::new_v4());
        ctx.insert("node_3", json!({ "count": 12, "rows": [{ "id": "r1" }], "ok": true }));
        ctx.insert("dagRunId", json!("manual__2024"));
        ctx
    }

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn relative_dates() {
        let ctx = ctx();
        let r = VariableResolver::with_today(&ctx, day(2024, 3, 1));
        assert_eq!(r.resolve("{{today}}"), "2024-03-01");
        assert_eq!(r.resolve("day = '{{yesterday}}'"), "day = '2024-02-29'");
        assert_eq!(r.resolve("{{date:yyyyMMdd}}"), "20240301");
        assert_eq!(r.resolve("{{date:dd/MM/yyyy:sub7}}"), "23/02/2024");
        assert_eq!(r.resolve("{{date:yyyy-MM:add31}}"), "2024-04");
        assert_eq!(r.resolve("{{date:yyyy-MM-dd:bogus}}"), "2024-03-01");
        assert_eq!(r.resolve("{{date:100%}}"), "100%");
    }

    #[test]
    fn context_paths_inline_scalars_and_json() {
        let ctx = ctx();
        let r = VariableResolver::new(&ctx);
        assert_eq!(r.resolve("count={{node_3.count}}"), "count=12");
        assert_eq!(r.resolve("{{ dagRunId }}"), "manual__2024");
        assert_eq!(r.resolve("{{node_3.rows[0].id}}"), "r1");
        assert_eq!(r.resolve("{{node_3.rows}}"), r#"[{"id":"r1"}]"#);
        assert_eq!(r.resolve("{{node_3.ok}}"), "true");
    }

    #[test]
    fn unresolved_placeholders_stay_literal() {
        let ctx = ctx();
        let r = VariableResolver::new(&ctx);
        assert_eq!(r.resolve("{{node_9.count}} and {{node_3.count}}"), "{{node_9.count}} and 12");
        assert_eq!(r.resolve("{{ }} {{a b}}"), "{{ }} {{a b}}");
    }

    #[test]
    fn resolution_is_idempotent_once_no_tokens_remain() {
        let ctx = ctx();
        let r = VariableResolver::with_today(&ctx, day(2024, 1, 1));
        let once = r.resolve("run {{dagRunId}} on {{today}}");
        assert_eq!(r.resolve(&once), once);
    }

    #[test]
    fn resolve_value_walks_nested_strings_only() {
        let ctx = ctx();
        let r = VariableResolver::new(&ctx);
        let config = json!({
            "query": "SELECT {{node_3.count}}",
            "limit": 5,
            "headers": { "X-Run": "{{dagRunId}}" },
            "tags": ["{{node_3.rows[0].id}}", null]
        });
        assert_eq!(
            r.resolve_value(&config),
            json!({
                "query": "SELECT 12",
                "limit": 5,
                "headers": { "X-Run": "manual__2024" },
                "tags": ["r1", null]
            })
        );
    }
}
