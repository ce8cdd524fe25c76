//! # Filter Compiler
//!
//! Turns an Elasticsearch query clause (`bool`, `term`, `range`, ...) into one
//! SphinxQL boolean expression and records every attribute it touches.
//!
//! `match_all`, empty `bool` blocks and a bare `*` query string compile to
//! nothing: the clause does not restrict anything.

use crate::date::parse_date_millis;
use crate::error::FilterError;
use crate::sql::{literal, quote_ident, quote_string};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

/// A compiled clause.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledFilter {
    pub expr: String,
    /// Attributes referenced by the expression, in first-use order.
    pub fields: Vec<String>,
    /// The expression contains a `MATCH()` and is only valid as a top-level WHERE term.
    pub full_text: bool,
}

#[derive(Default)]
struct Collected {
    fields: Vec<String>,
    full_text: bool,
}

impl Collected {
    fn touch(&mut self, field: &str) {
        if !self.fields.iter().any(|f| f == field) {
            self.fields.push(field.to_string());
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FilterCompiler {
    now: DateTime<Utc>,
}

impl FilterCompiler {
    /// `now` anchors date math so every clause of one request sees the same instant.
    pub fn new(now: DateTime<Utc>) -> Self {
        Self { now }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    pub fn compile(&self, clause: &Value) -> Result<Option<CompiledFilter>, FilterError> {
        let mut collected = Collected::default();
        let expr = self.clause(clause, &mut collected)?;
        Ok(expr.map(|expr| CompiledFilter {
            expr,
            fields: collected.fields,
            full_text: collected.full_text,
        }))
    }

    fn clause(&self, clause: &Value, out: &mut Collected) -> Result<Option<String>, FilterError> {
        match clause {
            Value::Null => Ok(None),
            Value::Object(map) => {
                let mut parts = Vec::new();
                for (kind, body) in map {
                    if let Some(expr) = self.leaf(kind, body, out)? {
                        parts.push(expr);
                    }
                }
                Ok(join(parts, "AND"))
            }
            Value::Array(items) => {
                let mut parts = Vec::new();
                for item in items {
                    if let Some(expr) = self.clause(item, out)? {
                        parts.push(expr);
                    }
                }
                Ok(join(parts, "AND"))
            }
            other => Err(FilterError::malformed("clause", format!("unexpected {}", other))),
        }
    }

    fn leaf(&self, kind: &str, body: &Value, out: &mut Collected) -> Result<Option<String>, FilterError> {
        match kind {
            "bool" => self.bool_clause(body, out),
            "match_all" => Ok(None),
            "term" | "match" | "match_phrase" => equality(kind, body, out).map(Some),
            "terms" => terms(body, out).map(Some),
            "range" => self.range(body, out).map(Some),
            "exists" => {
                let field = body
                    .get("field")
                    .and_then(Value::as_str)
                    .ok_or_else(|| FilterError::malformed(kind, "missing 'field'"))?;
                out.touch(field);
                Ok(Some(format!("{} IS NOT NULL", quote_ident(field))))
            }
            "query_string" | "simple_query_string" => {
                let query = body
                    .get("query")
                    .and_then(Value::as_str)
                    .ok_or_else(|| FilterError::malformed(kind, "missing 'query'"))?
                    .trim();
                if query.is_empty() || query == "*" {
                    return Ok(None);
                }
                out.full_text = true;
                Ok(Some(format!("MATCH({})", quote_string(query))))
            }
            other => Err(FilterError::Unsupported(other.to_string())),
        }
    }

    fn bool_clause(&self, body: &Value, out: &mut Collected) -> Result<Option<String>, FilterError> {
        let body = body
            .as_object()
            .ok_or_else(|| FilterError::malformed("bool", "expected an object"))?;

        let mut required = Vec::new();
        for key in ["must", "filter"] {
            for clause in occurrences(body, key) {
                if let Some(expr) = self.clause(clause, out)? {
                    required.push(expr);
                }
            }
        }

        let mut optional = Vec::new();
        for clause in occurrences(body, "should") {
            if let Some(expr) = self.clause(clause, out)? {
                optional.push(expr);
            }
        }
        let minimum_should_match = body
            .get("minimum_should_match")
            .and_then(|v| v.as_i64().or_else(|| v.as_str().and_then(|s| s.parse().ok())))
            .unwrap_or(if required.is_empty() { 1 } else { 0 });
        if minimum_should_match > 0 {
            if let Some(any) = join(optional, "OR") {
                required.push(any);
            }
        }

        for clause in occurrences(body, "must_not") {
            if let Some(expr) = self.clause(clause, out)? {
                required.push(format!("NOT {}", wrap(&expr)));
            }
        }

        Ok(join(required, "AND"))
    }

    fn range(&self, body: &Value, out: &mut Collected) -> Result<String, FilterError> {
        let (field, bounds) = single_field(body, "range")?;
        let bounds = bounds
            .as_object()
            .ok_or_else(|| FilterError::malformed("range", "expected bounds object"))?;
        let format = bounds.get("format").and_then(Value::as_str);
        out.touch(field);

        let mut parts = Vec::new();
        for (op, sql_op) in [("gte", ">="), ("gt", ">"), ("lte", "<="), ("lt", "<")] {
            let Some(value) = bounds.get(op).filter(|v| !v.is_null()) else {
                continue;
            };
            let rendered = if is_date_bound(value, format) {
                let ms = parse_date_millis(value, format, self.now)?;
                ms.div_euclid(1000).to_string()
            } else {
                literal(value).ok_or_else(|| FilterError::malformed("range", "bound is not a scalar"))?
            };
            parts.push(format!("{} {} {}", quote_ident(field), sql_op, rendered));
        }
        join(parts, "AND").ok_or_else(|| FilterError::malformed("range", "no bounds"))
    }
}

/// Whether a query carries any restriction at all: a non-empty scalar
/// somewhere in the clause tree, ignoring `match_all` sub-trees.
pub fn has_filter_data(clause: &Value) -> bool {
    match clause {
        Value::Null => false,
        Value::String(s) => !s.is_empty(),
        Value::Bool(_) | Value::Number(_) => true,
        Value::Array(items) => items.iter().any(has_filter_data),
        Value::Object(map) => map
            .iter()
            .any(|(k, v)| k != "match_all" && has_filter_data(v)),
    }
}

fn occurrences<'a>(body: &'a Map<String, Value>, key: &str) -> Vec<&'a Value> {
    match body.get(key) {
        Some(Value::Array(items)) => items.iter().collect(),
        Some(Value::Null) | None => Vec::new(),
        Some(other) => vec![other],
    }
}

fn single_field<'a>(body: &'a Value, clause: &str) -> Result<(&'a str, &'a Value), FilterError> {
    body.as_object()
        .and_then(|m| m.iter().find(|(k, _)| k.as_str() != "boost"))
        .map(|(k, v)| (k.as_str(), v))
        .ok_or_else(|| FilterError::malformed(clause, "expected a field"))
}

fn equality(clause: &str, body: &Value, out: &mut Collected) -> Result<String, FilterError> {
    let (field, value) = single_field(body, clause)?;
    let value = match value {
        Value::Object(inner) => inner
            .get("value")
            .or_else(|| inner.get("query"))
            .ok_or_else(|| FilterError::malformed(clause, "missing 'query'"))?,
        scalar => scalar,
    };
    let rendered = literal(value).ok_or_else(|| FilterError::malformed(clause, "value is not a scalar"))?;
    out.touch(field);
    Ok(format!("{} = {}", quote_ident(field), rendered))
}

fn terms(body: &Value, out: &mut Collected) -> Result<String, FilterError> {
    let (field, values) = single_field(body, "terms")?;
    let values = values
        .as_array()
        .filter(|v| !v.is_empty())
        .ok_or_else(|| FilterError::malformed("terms", "expected a non-empty list"))?;
    let rendered = values
        .iter()
        .map(|v| literal(v).ok_or_else(|| FilterError::malformed("terms", "value is not a scalar")))
        .collect::<Result<Vec<_>, _>>()?;
    out.touch(field);
    Ok(format!("{} IN ({})", quote_ident(field), rendered.join(", ")))
}

fn is_date_bound(value: &Value, format: Option<&str>) -> bool {
    match value {
        Value::String(s) => format.is_some() || s.trim().parse::<f64>().is_err(),
        Value::Number(_) => format.map_or(false, |f| f.contains("epoch")),
        _ => false,
    }
}

fn wrap(expr: &str) -> String {
    if expr.starts_with('(') && expr.ends_with(')') {
        expr.to_string()
    } else {
        format!("({})", expr)
    }
}

// Leaves are atomic and every compound result is parenthesized, so parts join as-is.
fn join(parts: Vec<String>, op: &str) -> Option<String> {
    match parts.len() {
        0 => None,
        1 => parts.into_iter().next(),
        _ => Some(format!("({})", parts.join(&format!(" {} ", op)))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn compiler() -> FilterCompiler {
        FilterCompiler::new(
            DateTime::parse_from_rfc3339("2024-01-01T00:10:00Z")
                .map(|d| d.with_timezone(&Utc))
                .unwrap(),
        )
    }

    #[test]
    fn test_match_all_and_empty_bool_compile_to_nothing() {
        let c = compiler();
        assert_eq!(c.compile(&json!({"match_all": {}})), Ok(None));
        assert_eq!(
            c.compile(&json!({"bool": {"must": [], "filter": [{"match_all": {}}], "should": [], "must_not": []}})),
            Ok(None)
        );
        assert_eq!(c.compile(&json!({"query_string": {"query": "*"}})), Ok(None));
    }

    #[test]
    fn test_bool_tree() {
        let c = compiler();
        let compiled = c
            .compile(&json!({"bool": {
                "filter": [{"term": {"status": "ok"}}, {"range": {"bytes": {"gte": 10, "lt": 20}}}],
                "must_not": [{"terms": {"host": ["a", "b"]}}]
            }}))
            .unwrap()
            .unwrap();
        assert_eq!(
            compiled.expr,
            "(status = 'ok' AND (bytes >= 10 AND bytes < 20) AND NOT (host IN ('a', 'b')))"
        );
        assert_eq!(compiled.fields, vec!["status", "bytes", "host"]);
        assert!(!compiled.full_text);
    }

    #[test]
    fn test_should_becomes_disjunction() {
        let c = compiler();
        let compiled = c
            .compile(&json!({"bool": {"should": [{"match_phrase": {"a": 1}}, {"match_phrase": {"b": {"query": "x"}}}]}}))
            .unwrap()
            .unwrap();
        assert_eq!(compiled.expr, "(a = 1 OR b = 'x')");
    }

    #[test]
    fn test_date_range_converts_to_seconds() {
        let c = compiler();
        let compiled = c
            .compile(&json!({"range": {"@timestamp": {
                "gte": "2024-01-01T00:00:00.000Z",
                "lte": "now",
                "format": "strict_date_optional_time"
            }}}))
            .unwrap()
            .unwrap();
        assert_eq!(
            compiled.expr,
            "(`@timestamp` >= 1704067200 AND `@timestamp` <= 1704067800)"
        );
    }

    #[test]
    fn test_query_string_is_full_text() {
        let compiled = compiler()
            .compile(&json!({"query_string": {"query": "error AND timeout"}}))
            .unwrap()
            .unwrap();
        assert_eq!(compiled.expr, "MATCH('error AND timeout')");
        assert!(compiled.full_text);
        assert!(compiled.fields.is_empty());
    }

    #[test]
    fn test_unsupported_clause() {
        assert_eq!(
            compiler().compile(&json!({"geo_distance": {}})),
            Err(FilterError::Unsupported("geo_distance".into()))
        );
        assert!(compiler().compile(&json!({"field": "bytes"})).is_err());
    }

    #[test]
    fn test_has_filter_data() {
        assert!(!has_filter_data(&json!({"bool": {"must": [], "filter": [{"match_all": {}}]}})));
        assert!(has_filter_data(&json!({"bool": {"filter": [{"term": {"a": 1}}]}})));
        assert!(!has_filter_data(&json!({"query_string": {"query": ""}})));
    }
}
