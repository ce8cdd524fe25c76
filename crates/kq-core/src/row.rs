//! # Result Rows
//!
//! One flat row returned by the daemon for a grouped query, plus the value
//! helpers every post-processing pass shares.

use serde_json::{Map, Value};
use std::cmp::Ordering;

/// Where a row came from. Only daemon rows count towards `hits.total`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowOrigin {
    /// Returned by the daemon.
    Engine,
    /// A copy produced when one row matched several concurrent filter legs.
    Expanded,
    /// A zero-count row synthesized for a missing histogram interval.
    GapFill,
    /// A row that missed an indirect filter; it counts only outside that filter.
    Placeholder,
    /// The empty row processed when nothing came back at all.
    Empty,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResultRow {
    pub values: Map<String, Value>,
    pub origin: RowOrigin,
    /// Set on copies of a row: documents count only at nodes inside the
    /// subtree of every aggregation listed here (by first node index).
    pub count_scopes: Vec<usize>,
    /// Documents do not count at nodes inside the subtree of any
    /// aggregation listed here.
    pub muted_scopes: Vec<usize>,
}

impl ResultRow {
    pub fn new(values: Map<String, Value>) -> Self {
        Self::synthetic(values, RowOrigin::Engine)
    }

    pub fn synthetic(values: Map<String, Value>, origin: RowOrigin) -> Self {
        Self {
            values,
            origin,
            count_scopes: Vec::new(),
            muted_scopes: Vec::new(),
        }
    }

    /// The same row carrying no documents: metrics and counts see nothing.
    pub fn muted(&self, count_field: &str) -> Self {
        let mut row = self.clone();
        row.set(count_field, Value::from(0));
        row
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.values.get(field).filter(|v| !v.is_null())
    }

    pub fn set(&mut self, field: &str, value: Value) {
        self.values.insert(field.to_string(), value);
    }

    /// Document count carried by the row; missing or malformed counts read as zero.
    pub fn count(&self, count_field: &str) -> u64 {
        self.get(count_field)
            .and_then(value_to_f64)
            .map(|c| if c > 0.0 { c as u64 } else { 0 })
            .unwrap_or(0)
    }

    /// Whether an indirect filter column reports a match.
    pub fn flag(&self, field: &str) -> bool {
        self.get(field)
            .and_then(value_to_f64)
            .map(|v| v != 0.0)
            .unwrap_or(false)
    }

    /// Identity of the row's group over `fields`, used as a map key.
    pub fn group_key(&self, fields: &[String]) -> String {
        let mut key = String::new();
        for field in fields {
            key.push_str(&value_key(self.values.get(field).unwrap_or(&Value::Null)));
            key.push('\u{1f}');
        }
        key
    }
}

/// Numeric view of a cell. The daemon returns some numeric columns as strings.
pub fn value_to_f64(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

pub fn value_to_string(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Canonical text of a value for hashing. Numeric strings and numbers collapse.
pub fn value_key(v: &Value) -> String {
    match v {
        Value::Null => "\u{0}".to_string(),
        Value::Number(n) => match n.as_f64() {
            Some(f) => format_number(f),
            None => n.to_string(),
        },
        other => value_to_string(other),
    }
}

/// Total order used for sorting cells: numbers before strings, nulls last.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a.is_null(), b.is_null()) {
        (true, true) => return Ordering::Equal,
        (true, false) => return Ordering::Greater,
        (false, true) => return Ordering::Less,
        _ => {}
    }
    match (value_to_f64(a), value_to_f64(b)) {
        (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => value_to_string(a).cmp(&value_to_string(b)),
    }
}

/// Number as JSON: integral values lose their fractional part.
pub fn number_value(f: f64) -> Value {
    if f.fract() == 0.0 && f.abs() < 9.0e15 {
        Value::from(f as i64)
    } else {
        serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null)
    }
}

/// Shortest decimal text for a float, `10` rather than `10.0`.
pub fn format_number(f: f64) -> String {
    if f.fract() == 0.0 && f.abs() < 9.0e15 {
        format!("{}", f as i64)
    } else {
        format!("{}", f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(v: Value) -> ResultRow {
        ResultRow::new(v.as_object().cloned().unwrap_or_default())
    }

    #[test]
    fn test_count_tolerates_strings_and_missing() {
        let r = row(json!({"cnt": "12", "x": null}));
        assert_eq!(r.count("cnt"), 12);
        assert_eq!(r.count("missing"), 0);
        assert!(r.get("x").is_none());
    }

    #[test]
    fn test_group_key_collapses_numeric_strings() {
        let a = row(json!({"g": 10, "h": "x"}));
        let b = row(json!({"g": "10", "h": "x"}));
        let fields = vec!["g".to_string(), "h".to_string()];
        assert_eq!(a.group_key(&fields), b.group_key(&fields));
    }

    #[test]
    fn test_compare_values_orders_nulls_last() {
        assert_eq!(compare_values(&json!(2), &json!(10)), Ordering::Less);
        assert_eq!(compare_values(&json!("b"), &json!("a")), Ordering::Greater);
        assert_eq!(compare_values(&Value::Null, &json!(1)), Ordering::Greater);
    }

    #[test]
    fn test_number_formatting() {
        assert_eq!(format_number(10.0), "10");
        assert_eq!(format_number(0.5), "0.5");
        assert_eq!(number_value(3.0), json!(3));
    }
}
