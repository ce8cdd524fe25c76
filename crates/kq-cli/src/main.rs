//! # kq
//!
//! Command-line front end for the dashboard search sidecar.
//!
//! - `kq translate`: print the SQL a request compiles to, offline.
//! - `kq search`: send a request through a running hub.
//! - `kq sql`: run a raw statement against the search daemon.
//! - `kq status`: report the hub's status.

use std::io::Read;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use serde_json::Value;
use tabled::builder::Builder;
use tabled::settings::Style;

use kq_core::catalog::pattern_regex;
use kq_core::{plan_tables, EngineSettings, TableFields};

#[derive(Parser)]
#[command(name = "kq", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the statement issued per table, without a daemon.
    Translate {
        /// Request body file, `-` for stdin.
        #[arg(long, default_value = "-")]
        request: PathBuf,

        /// Table pattern the request targets.
        #[arg(long, default_value = "*")]
        index: String,

        /// Table description `NAME:FIELD,FIELD,...`; a trailing `~` marks a full-text field.
        #[arg(long = "table")]
        tables: Vec<String>,

        /// JSON file with a list of `{"name": ..., "fields": {"field": aggregatable}}`.
        #[arg(long)]
        tables_file: Option<PathBuf>,

        /// Alias of the row count column.
        #[arg(long, default_value = "cnt")]
        count_alias: String,
    },

    /// Run a search through the hub.
    Search {
        index: String,

        /// Request body file, `-` for stdin.
        #[arg(long, default_value = "-")]
        request: PathBuf,
    },

    /// Run a raw statement against the search daemon.
    Sql { statement: String },

    /// Report hub status as JSON.
    Status,
}

fn main() {
    let cli = Cli::parse();

    match cli.command {
        Commands::Translate {
            request,
            index,
            tables,
            tables_file,
            count_alias,
        } => {
            if let Err(e) = translate(&request, &index, &tables, tables_file.as_ref(), &count_alias) {
                eprintln!("Error: {}", e);
                std::process::exit(1);
            }
        }

        // Async Commands
        cmd => {
            let rt = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
                Ok(rt) => rt,
                Err(e) => {
                    eprintln!("Failed to build tokio runtime: {}", e);
                    std::process::exit(1);
                }
            };
            if let Err(e) = rt.block_on(async_main(cmd)) {
                eprintln!("Error: {}", e);
                std::process::exit(1);
            }
        }
    }
}

fn read_request(path: &PathBuf) -> Result<Value, String> {
    let mut raw = String::new();
    if path.as_os_str() == "-" {
        std::io::stdin().read_to_string(&mut raw).map_err(|e| e.to_string())?;
    } else {
        raw = std::fs::read_to_string(path).map_err(|e| format!("{}: {}", path.display(), e))?;
    }
    if raw.trim().is_empty() {
        return Ok(Value::Object(Default::default()));
    }
    serde_json::from_str(&raw).map_err(|e| format!("request is not JSON: {}", e))
}

/// `logs:status,bytes,message~` as a table description.
fn parse_table(desc: &str) -> Result<TableFields, String> {
    let (name, fields) = desc
        .split_once(':')
        .ok_or_else(|| format!("expected NAME:FIELD,... in '{}'", desc))?;
    let mut table = TableFields::new(name.trim());
    for field in fields.split(',').map(str::trim).filter(|f| !f.is_empty()) {
        table = match field.strip_suffix('~') {
            Some(text) => table.with_field(text, false),
            None => table.with_field(field, true),
        };
    }
    Ok(table)
}

fn translate(
    request: &PathBuf,
    index: &str,
    described: &[String],
    tables_file: Option<&PathBuf>,
    count_alias: &str,
) -> Result<(), String> {
    let mut tables = described.iter().map(|s| parse_table(s)).collect::<Result<Vec<_>, _>>()?;
    if let Some(path) = tables_file {
        let raw = std::fs::read_to_string(path).map_err(|e| format!("{}: {}", path.display(), e))?;
        let listed: Vec<TableFields> = serde_json::from_str(&raw).map_err(|e| e.to_string())?;
        tables.extend(listed);
    }
    let matchers = index
        .split(',')
        .map(|p| pattern_regex(p.trim()))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| e.to_string())?;
    tables.retain(|t| matchers.iter().any(|m| m.is_match(&t.name)));
    if tables.is_empty() {
        return Err(format!("no described table matches '{}'", index));
    }

    let settings = EngineSettings {
        count_alias: count_alias.to_string(),
        ..Default::default()
    };
    let body = read_request(request)?;
    let plans = plan_tables(&body, &tables, &settings, chrono::Utc::now()).map_err(|e| e.to_string())?;
    for plan in &plans {
        match (&plan.sql, &plan.skipped) {
            (Some(sql), _) => println!("{}: {}", plan.table, sql),
            (None, Some(reason)) => println!("{}: skipped ({})", plan.table, reason),
            (None, None) => println!("{}: skipped", plan.table),
        }
    }
    Ok(())
}

async fn async_main(cmd: Commands) -> Result<(), String> {
    let client = reqwest::Client::new();
    let hub_url = std::env::var("KQ_HUB_URL").unwrap_or_else(|_| "http://127.0.0.1:9400".to_string());
    let daemon_url = std::env::var("KQ_DAEMON_URL").unwrap_or_else(|_| "http://127.0.0.1:9308".to_string());

    match cmd {
        Commands::Search { index, request } => {
            let body = read_request(&request)?;
            let url = format!("{}/{}/_search", hub_url, index);
            let resp = post_request(&client, &url, &body).await.map_err(|e| e.to_string())?;
            let status = resp.status();
            let text = resp.text().await.map_err(|e| e.to_string())?;
            if !status.is_success() {
                return Err(format!("{}: {}", status, text));
            }
            print_json(&text);
        }

        Commands::Sql { statement } => {
            let url = format!("{}/sql?mode=raw", daemon_url);
            let resp = client
                .post(&url)
                .form(&[("query", statement.as_str())])
                .send()
                .await
                .map_err(|e| e.to_string())?;
            let body: Value = resp.json().await.map_err(|e| e.to_string())?;
            println!("{}", render_result_set(&body)?);
        }

        Commands::Status => {
            let url = format!("{}/api/status", hub_url);
            let resp = get_request(&client, &url).await.map_err(|e| e.to_string())?;
            let text = resp.text().await.map_err(|e| e.to_string())?;
            print_json(&text);
        }

        Commands::Translate { .. } => {}
    }
    Ok(())
}

fn print_json(text: &str) {
    match serde_json::from_str::<Value>(text).and_then(|v| serde_json::to_string_pretty(&v)) {
        Ok(pretty) => println!("{}", pretty),
        Err(_) => println!("{}", text),
    }
}

/// Render the first result set of a raw-mode response as a table.
fn render_result_set(body: &Value) -> Result<String, String> {
    let set = match body {
        Value::Array(sets) => sets.first().cloned().unwrap_or(Value::Null),
        other => other.clone(),
    };
    if let Some(error) = set.get("error").and_then(Value::as_str).filter(|e| !e.is_empty()) {
        return Err(error.to_string());
    }
    let columns: Vec<String> = set
        .get("columns")
        .and_then(Value::as_array)
        .map(|cols| {
            cols.iter()
                .filter_map(|c| c.as_object().and_then(|o| o.keys().next().cloned()))
                .collect()
        })
        .unwrap_or_default();
    let rows = set.get("data").and_then(Value::as_array).cloned().unwrap_or_default();
    if columns.is_empty() {
        return Ok(format!("{} rows", rows.len()));
    }

    let mut builder = Builder::default();
    builder.push_record(columns.clone());
    for row in &rows {
        builder.push_record(columns.iter().map(|c| match row.get(c) {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        }));
    }
    let table = builder.build().with(Style::modern()).to_string();
    Ok(format!("{}\n{} rows", table, rows.len()))
}

async fn get_request(client: &reqwest::Client, url: &str) -> Result<reqwest::Response, reqwest::Error> {
    client.get(url).send().await
}

async fn post_request(
    client: &reqwest::Client,
    url: &str,
    json: &Value,
) -> Result<reqwest::Response, reqwest::Error> {
    client.post(url).json(json).send().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_table_description() {
        let table = parse_table("logs: status, bytes, message~").unwrap();
        assert_eq!(table.name, "logs");
        assert!(table.is_aggregatable("status"));
        assert!(table.is_aggregatable("bytes"));
        assert!(table.has("message"));
        assert!(!table.is_aggregatable("message"));
        assert!(parse_table("logs").is_err());
    }

    #[test]
    fn test_render_result_set() {
        let body = json!([{
            "columns": [{"status": {"type": "string"}}, {"cnt": {"type": "long long"}}],
            "data": [{"status": "ok", "cnt": 3}],
            "total": 1,
            "error": ""
        }]);
        let out = render_result_set(&body).unwrap();
        assert!(out.contains("status"));
        assert!(out.contains("ok"));
        assert!(out.ends_with("1 rows"));

        let failed = json!([{"error": "no such table"}]);
        assert_eq!(render_result_set(&failed).unwrap_err(), "no such table");
    }
}
