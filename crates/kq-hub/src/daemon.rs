//! # Daemon Client
//!
//! Talks to the search daemon's HTTP `/sql` endpoint. Implements both
//! engine collaborators: [`SqlExecutor`] for statements and [`FieldCatalog`]
//! for `SHOW TABLES` / `DESCRIBE` lookups.

use kq_core::catalog::pattern_regex;
use kq_core::{AggError, ExecutionResult, FieldCatalog, SqlExecutor, TableFields};
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::debug;

pub struct DaemonClient {
    client: reqwest::Client,
    url: String,
}

impl DaemonClient {
    pub fn new(url: &str, timeout_ms: u64) -> Result<Self, String> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .map_err(|e| e.to_string())?;
        Ok(Self {
            client,
            url: url.trim_end_matches('/').to_string(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Run one statement in raw mode and decode the first result set.
    pub async fn raw(&self, sql: &str) -> Result<ExecutionResult, String> {
        let resp = self
            .client
            .post(format!("{}/sql?mode=raw", self.url))
            .form(&[("query", sql)])
            .send()
            .await
            .map_err(|e| e.to_string())?;
        let status = resp.status();
        let body: Value = resp.json().await.map_err(|e| e.to_string())?;
        if !status.is_success() {
            return Err(error_message(&body).unwrap_or_else(|| format!("daemon returned {}", status)));
        }
        decode_result(&body)
    }
}

#[async_trait::async_trait]
impl SqlExecutor for DaemonClient {
    async fn execute(&self, sql: &str) -> Result<ExecutionResult, String> {
        debug!(%sql, "executing");
        self.raw(sql).await
    }
}

#[async_trait::async_trait]
impl FieldCatalog for DaemonClient {
    async fn resolve(&self, target: &str) -> kq_core::Result<Vec<TableFields>> {
        let mut names: Vec<String> = Vec::new();
        for pattern in target.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            if !safe_pattern().map_or(false, |re| re.is_match(pattern)) {
                return Err(AggError::Catalog(format!("invalid table pattern '{}'", pattern)));
            }
            let matcher = pattern_regex(pattern)?;
            let listed = self
                .raw(&format!("SHOW TABLES LIKE '{}'", like_pattern(pattern)))
                .await
                .map_err(AggError::Catalog)?;
            for row in &listed.rows {
                if let Some(name) = table_name(row) {
                    if matcher.is_match(&name) && !names.contains(&name) {
                        names.push(name);
                    }
                }
            }
        }
        names.sort();

        let mut tables = Vec::with_capacity(names.len());
        for name in names {
            let described = self
                .raw(&format!("DESCRIBE {}", name))
                .await
                .map_err(AggError::Catalog)?;
            tables.push(describe_table(&name, &described.rows));
        }
        Ok(tables)
    }
}

fn safe_pattern() -> Option<&'static Regex> {
    static SAFE: OnceLock<Option<Regex>> = OnceLock::new();
    SAFE.get_or_init(|| Regex::new(r"^[A-Za-z0-9_.*\-]+$").ok()).as_ref()
}

/// `logs_*` as a LIKE pattern: `*` becomes `%`, a literal `_` is escaped.
pub fn like_pattern(pattern: &str) -> String {
    pattern.replace('_', "\\\\_").replace('*', "%")
}

fn table_name(row: &Map<String, Value>) -> Option<String> {
    ["Table", "Index"]
        .iter()
        .find_map(|col| row.get(*col))
        .or_else(|| row.values().next())
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// Build a table's field list from `DESCRIBE` rows. Full-text fields are
/// searchable but cannot be grouped or aggregated.
pub fn describe_table(name: &str, rows: &[Map<String, Value>]) -> TableFields {
    let mut fields: BTreeMap<String, bool> = BTreeMap::new();
    for row in rows {
        let (Some(field), Some(kind)) = (
            row.get("Field").and_then(Value::as_str),
            row.get("Type").and_then(Value::as_str),
        ) else {
            continue;
        };
        let aggregatable = kind != "text";
        let slot = fields.entry(field.to_string()).or_insert(aggregatable);
        *slot |= aggregatable;
    }
    TableFields {
        name: name.to_string(),
        fields,
    }
}

fn error_message(body: &Value) -> Option<String> {
    let body = match body {
        Value::Array(sets) => sets.first()?,
        other => other,
    };
    match body.get("error")? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Object(obj) => obj
            .get("reason")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| Some(Value::Object(obj.clone()).to_string())),
        _ => None,
    }
}

/// Decode a raw-mode response:
/// `[{"columns": [...], "data": [{...}], "total": N, "error": ""}]`.
pub fn decode_result(body: &Value) -> Result<ExecutionResult, String> {
    if let Some(message) = error_message(body) {
        return Err(message);
    }
    let set = match body {
        Value::Array(sets) => match sets.first() {
            Some(set) => set,
            None => return Ok(ExecutionResult::default()),
        },
        other => other,
    };
    let rows: Vec<Map<String, Value>> = set
        .get("data")
        .and_then(Value::as_array)
        .map(|data| data.iter().filter_map(|r| r.as_object().cloned()).collect())
        .unwrap_or_default();
    let total = set
        .get("total")
        .and_then(Value::as_u64)
        .unwrap_or(rows.len() as u64);
    Ok(ExecutionResult { rows, total })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_rows_and_total() {
        let body = json!([{
            "columns": [{"status": {"type": "string"}}, {"cnt": {"type": "long long"}}],
            "data": [{"status": "ok", "cnt": 3}, {"status": "fail", "cnt": 1}],
            "total": 2,
            "error": "",
            "warning": ""
        }]);
        let result = decode_result(&body).unwrap();
        assert_eq!(result.total, 2);
        assert_eq!(result.rows.len(), 2);
        assert_eq!(result.rows[0]["status"], json!("ok"));
    }

    #[test]
    fn test_decode_reports_daemon_error() {
        let body = json!([{"total": 0, "error": "unknown column: 'x'", "warning": ""}]);
        assert_eq!(decode_result(&body).unwrap_err(), "unknown column: 'x'");

        let body = json!({"error": {"type": "parse_exception", "reason": "bad query"}});
        assert_eq!(decode_result(&body).unwrap_err(), "bad query");
    }

    #[test]
    fn test_describe_marks_text_fields() {
        let rows: Vec<Map<String, Value>> = json!([
            {"Field": "id", "Type": "bigint", "Properties": ""},
            {"Field": "message", "Type": "text", "Properties": "indexed stored"},
            {"Field": "status", "Type": "text", "Properties": "indexed"},
            {"Field": "status", "Type": "string", "Properties": ""}
        ])
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|r| r.as_object().cloned())
        .collect();
        let table = describe_table("logs", &rows);
        assert!(table.is_aggregatable("id"));
        assert!(table.has("message"));
        assert!(!table.is_aggregatable("message"));
        assert!(table.is_aggregatable("status"));
    }

    #[test]
    fn test_like_pattern() {
        assert_eq!(like_pattern("logs*"), "logs%");
        assert_eq!(like_pattern("web_logs"), "web\\\\_logs");
    }
}
