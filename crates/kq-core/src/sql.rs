//! # SphinxQL Request Builder
//!
//! Collects the clauses nodes contribute for one physical table and renders
//! them as a single grouped statement. All decisions are made upstream; this
//! module only assembles and de-duplicates.

use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

/// Rows requested per statement.
pub const RESULT_LIMIT: usize = 1000;

const COUNT_EXPR: &str = "count(*)";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

impl Direction {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.to_ascii_lowercase().as_str() {
            "asc" => Some(Self::Asc),
            "desc" => Some(Self::Desc),
            _ => None,
        }
    }

    pub fn as_sql(self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

#[derive(Debug, Clone)]
pub struct SqlRequest {
    table: String,
    count_alias: String,
    fields: Vec<(String, Option<String>)>,
    wheres: Vec<String>,
    groups: Vec<String>,
    orders: Vec<(String, Direction)>,
    options: Vec<(String, Value)>,
}

impl SqlRequest {
    pub fn new(table: &str, count_alias: &str) -> Self {
        Self {
            table: table.to_string(),
            count_alias: count_alias.to_string(),
            fields: Vec::new(),
            wheres: Vec::new(),
            groups: Vec::new(),
            orders: Vec::new(),
            options: Vec::new(),
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn count_alias(&self) -> &str {
        &self.count_alias
    }

    /// Add a select expression. Identical (expression, alias) pairs are kept once.
    pub fn add_field(&mut self, expr: &str, alias: Option<&str>) {
        let entry = (expr.to_string(), alias.map(str::to_string));
        if !self.fields.contains(&entry) {
            self.fields.push(entry);
        }
    }

    pub fn add_count(&mut self) {
        let alias = self.count_alias.clone();
        self.add_field(COUNT_EXPR, Some(&alias));
    }

    pub fn add_where(&mut self, expr: &str) {
        if !self.wheres.iter().any(|w| w == expr) {
            self.wheres.push(expr.to_string());
        }
    }

    pub fn add_group(&mut self, field: &str) {
        if !self.groups.iter().any(|g| g == field) {
            self.groups.push(field.to_string());
        }
    }

    /// First writer wins: a later order on the same field is ignored.
    pub fn add_order(&mut self, field: &str, direction: Direction) {
        if !self.orders.iter().any(|(f, _)| f == field) {
            self.orders.push((field.to_string(), direction));
        }
    }

    pub fn set_option(&mut self, name: &str, value: Value) {
        match self.options.iter_mut().find(|(k, _)| k == name) {
            Some(slot) => slot.1 = value,
            None => self.options.push((name.to_string(), value)),
        }
    }

    pub fn render(&self) -> String {
        let mut fields: Vec<String> = self
            .fields
            .iter()
            .map(|(expr, alias)| match alias {
                Some(alias) => format!("{} AS {}", expr, alias),
                None => expr.clone(),
            })
            .collect();
        if !self.fields.iter().any(|(expr, _)| expr == COUNT_EXPR) {
            fields.push(format!("{} AS {}", COUNT_EXPR, self.count_alias));
        }

        let mut sql = format!(
            "SELECT {fields} FROM {table}",
            fields = fields.join(", "),
            table = quote_ident(&self.table)
        );
        if !self.wheres.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&self.wheres.join(" AND "));
        }
        if !self.groups.is_empty() {
            sql.push_str(" GROUP BY ");
            sql.push_str(&self.groups.join(", "));
        }
        if !self.orders.is_empty() {
            let orders: Vec<String> = self
                .orders
                .iter()
                .map(|(f, d)| format!("{} {}", f, d.as_sql()))
                .collect();
            sql.push_str(" ORDER BY ");
            sql.push_str(&orders.join(", "));
        }
        sql.push_str(&format!(" LIMIT 0,{}", RESULT_LIMIT));
        if !self.options.is_empty() {
            let options: Vec<String> = self
                .options
                .iter()
                .map(|(k, v)| format!("{}={}", k, option_literal(v)))
                .collect();
            sql.push_str(" OPTION ");
            sql.push_str(&options.join(", "));
        }
        sql
    }
}

fn option_literal(value: &Value) -> String {
    match value {
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => if *b { "1" } else { "0" }.to_string(),
        Value::String(s) => quote_string(s),
        other => quote_string(&other.to_string()),
    }
}

fn plain_ident() -> Option<&'static Regex> {
    static PLAIN: OnceLock<Option<Regex>> = OnceLock::new();
    PLAIN
        .get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)*$").ok())
        .as_ref()
}

/// Identifiers outside `[A-Za-z_][A-Za-z0-9_]*` (such as `@timestamp`) are backquoted.
pub fn quote_ident(name: &str) -> String {
    if plain_ident().map_or(false, |re| re.is_match(name)) {
        name.to_string()
    } else {
        format!("`{}`", name.replace('`', ""))
    }
}

pub fn quote_string(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len() + 2);
    out.push('\'');
    for c in raw.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            _ => out.push(c),
        }
    }
    out.push('\'');
    out
}

/// A JSON scalar as a SphinxQL literal.
pub fn literal(value: &Value) -> Option<String> {
    match value {
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(if *b { "1" } else { "0" }.to_string()),
        Value::String(s) => Some(quote_string(s)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_render_full_statement() {
        let mut req = SqlRequest::new("logs", "cnt");
        req.add_field("status", None);
        req.add_field("avg(bytes)", Some("al1"));
        req.add_where("code = 200");
        req.add_group("status");
        req.add_order("cnt", Direction::Desc);
        req.add_order("cnt", Direction::Asc);
        req.set_option("max_matches", json!(10000));
        req.set_option("ranker", json!("none"));
        assert_eq!(
            req.render(),
            "SELECT status, avg(bytes) AS al1, count(*) AS cnt FROM logs WHERE code = 200 \
             GROUP BY status ORDER BY cnt DESC LIMIT 0,1000 OPTION max_matches=10000, ranker='none'"
        );
    }

    #[test]
    fn test_count_appears_once() {
        let mut req = SqlRequest::new("t", "cnt");
        req.add_count();
        req.add_count();
        assert_eq!(req.render(), "SELECT count(*) AS cnt FROM t LIMIT 0,1000");
    }

    #[test]
    fn test_duplicate_clauses_collapse() {
        let mut req = SqlRequest::new("t", "cnt");
        req.add_where("a = 1");
        req.add_where("a = 1");
        req.add_group("g");
        req.add_group("g");
        req.add_field("g", None);
        req.add_field("g", None);
        assert_eq!(
            req.render(),
            "SELECT g, count(*) AS cnt FROM t WHERE a = 1 GROUP BY g LIMIT 0,1000"
        );
    }

    #[test]
    fn test_quoting() {
        assert_eq!(quote_ident("status"), "status");
        assert_eq!(quote_ident("json.a"), "json.a");
        assert_eq!(quote_ident("@timestamp"), "`@timestamp`");
        assert_eq!(quote_string("it's"), "'it\\'s'");
        assert_eq!(literal(&json!(true)), Some("1".to_string()));
        assert_eq!(literal(&json!(null)), None);
    }
}
