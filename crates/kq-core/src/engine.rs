//! # Aggregation Engine
//!
//! Orchestrates one search: resolve the target to physical tables, plan one
//! statement per table, run them one after another, post-process each
//! table's rows and fold everything into a single response.

use crate::catalog::{FieldCatalog, TableFields};
use crate::error::{AggError, Result};
use crate::executor::SqlExecutor;
use crate::node_set::NodeSet;
use crate::parser::RequestParser;
use crate::request_logic::{self, PassOutcome, RequestContext};
use crate::response::ResponseBuilder;
use crate::response_logic::{self, ResponseContext};
use crate::row::{ResultRow, RowOrigin};
use crate::sql::SqlRequest;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeSet;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Engine knobs, filled from the `[engine]` config section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineSettings {
    pub count_alias: String,
    pub max_gap_buckets: usize,
    /// Rendered into the statement's OPTION clause.
    pub sql_options: Map<String, Value>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            count_alias: "cnt".to_string(),
            max_gap_buckets: 10_000,
            sql_options: Map::new(),
        }
    }
}

/// The statement planned for one physical table, or why there is none.
#[derive(Debug, Clone)]
pub struct TablePlan {
    pub table: String,
    pub sql: Option<String>,
    pub skipped: Option<String>,
    pub nodes: NodeSet,
    pub context: RequestContext,
}

impl TablePlan {
    pub fn is_skipped(&self) -> bool {
        self.skipped.is_some()
    }

    pub fn response_context(&self, settings: &EngineSettings) -> ResponseContext {
        ResponseContext {
            count_field: self.context.count_alias.clone(),
            complex_ordering: self.context.complex_ordering,
            max_gap_buckets: settings.max_gap_buckets,
        }
    }

    pub fn summary(&self) -> Value {
        json!({
            "table": self.table,
            "sql": self.sql,
            "skipped": self.skipped,
        })
    }
}

/// Plan one statement per table. `tables` must not be empty.
pub fn plan_tables(
    request: &Value,
    tables: &[TableFields],
    settings: &EngineSettings,
    now: DateTime<Utc>,
) -> Result<Vec<TablePlan>> {
    let pristine = NodeSet::new(RequestParser::new(now).parse(request)?);
    let reserved: BTreeSet<String> = tables.iter().flat_map(|t| t.fields.keys().cloned()).collect();
    let multi_table = tables.len() > 1;
    Ok(tables
        .iter()
        .map(|table| plan_table(&pristine, table.clone(), multi_table, reserved.clone(), settings))
        .collect())
}

fn plan_table(
    pristine: &NodeSet,
    table: TableFields,
    multi_table: bool,
    reserved: BTreeSet<String>,
    settings: &EngineSettings,
) -> TablePlan {
    let mut nodes = pristine.clone();
    let mut context = RequestContext::new(table, multi_table, reserved, &settings.count_alias);
    let table = context.table_name().to_string();
    match request_logic::run(&mut nodes, &mut context) {
        PassOutcome::Skip(reason) => {
            warn!(%table, %reason, "table skipped");
            TablePlan {
                table,
                sql: None,
                skipped: Some(reason),
                nodes,
                context,
            }
        }
        PassOutcome::Continue => {
            let mut req = SqlRequest::new(&table, &context.count_alias);
            for node in nodes.iter().filter(|n| n.is_active()) {
                node.fill_in_request(&mut req);
            }
            req.add_count();
            for (name, value) in &settings.sql_options {
                req.set_option(name, value.clone());
            }
            let sql = req.render();
            debug!(%table, %sql, "planned");
            TablePlan {
                table,
                sql: Some(sql),
                skipped: None,
                nodes,
                context,
            }
        }
    }
}

pub struct AggregationEngine<E, C> {
    executor: E,
    catalog: C,
    settings: EngineSettings,
}

impl<E: SqlExecutor, C: FieldCatalog> AggregationEngine<E, C> {
    pub fn new(executor: E, catalog: C, settings: EngineSettings) -> Self {
        Self {
            executor,
            catalog,
            settings,
        }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    async fn tables(&self, target: &str) -> Result<Vec<TableFields>> {
        let tables = self.catalog.resolve(target).await?;
        if tables.is_empty() {
            return Err(AggError::NoTables(target.to_string()));
        }
        Ok(tables)
    }

    /// Plan without executing.
    pub async fn translate(&self, target: &str, request: &Value) -> Result<Vec<TablePlan>> {
        let tables = self.tables(target).await?;
        plan_tables(request, &tables, &self.settings, Utc::now())
    }

    /// Run a search and return the response body.
    pub async fn search(&self, target: &str, request: &Value) -> Result<Value> {
        let started = Instant::now();
        let tables = self.tables(target).await?;
        let plans = plan_tables(request, &tables, &self.settings, Utc::now())?;

        let mut builder = ResponseBuilder::new();
        let mut any_rows = false;
        for plan in plans.iter().filter(|p| !p.is_skipped()) {
            let Some(sql) = &plan.sql else {
                continue;
            };
            let result = self.executor.execute(sql).await.map_err(|message| AggError::Execution {
                table: plan.table.clone(),
                message,
            })?;
            let rows: Vec<ResultRow> = result.rows.into_iter().map(ResultRow::new).collect();
            let ctx = plan.response_context(&self.settings);
            let matched: u64 = rows.iter().map(|r| r.count(&ctx.count_field)).sum();
            info!(table = %plan.table, rows = rows.len(), matched, "query executed");
            if result.total != rows.len() as u64 {
                debug!(table = %plan.table, reported = result.total, returned = rows.len(), "daemon reported a different row total");
            }
            builder.add_total(matched);
            if rows.is_empty() {
                continue;
            }
            let rows = response_logic::run(rows, &plan.nodes, &ctx);
            if rows.is_empty() {
                continue;
            }
            any_rows = true;
            builder.add_rows(&plan.nodes, &ctx.count_field, &rows);
        }

        if !any_rows {
            self.fold_empty(&plans, request, &mut builder)?;
        }
        Ok(builder.finish(started.elapsed().as_millis() as u64))
    }

    /// Emit the empty bucket shape when no table returned anything.
    fn fold_empty(&self, plans: &[TablePlan], request: &Value, builder: &mut ResponseBuilder) -> Result<()> {
        let fallback;
        let plan = match plans.iter().find(|p| !p.is_skipped()) {
            Some(plan) => plan,
            None => {
                let table = plans
                    .first()
                    .map(|p| TableFields::new(&p.table))
                    .unwrap_or_default();
                let pristine = NodeSet::new(RequestParser::new(Utc::now()).parse(request)?);
                fallback = plan_table(&pristine, table, false, BTreeSet::new(), &self.settings);
                &fallback
            }
        };
        let ctx = plan.response_context(&self.settings);
        let empty = vec![ResultRow::synthetic(Map::new(), RowOrigin::Empty)];
        let rows = response_logic::run(empty, &plan.nodes, &ctx);
        builder.add_rows(&plan.nodes, &ctx.count_field, &rows);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tables() -> Vec<TableFields> {
        vec![
            TableFields::new("logs_a").with_field("status", true).with_field("bytes", true),
            TableFields::new("logs_b").with_field("status", true),
        ]
    }

    #[test]
    fn test_plan_renders_statement() {
        let mut settings = EngineSettings::default();
        settings.sql_options.insert("max_matches".into(), json!(10000));
        let plans = plan_tables(
            &json!({"aggs": {"1": {"terms": {"field": "status", "size": 5, "order": {"_count": "desc"}}}}}),
            &tables()[..1],
            &settings,
            Utc::now(),
        )
        .unwrap();
        assert_eq!(
            plans[0].sql.as_deref(),
            Some("SELECT status, count(*) AS cnt FROM logs_a GROUP BY status ORDER BY cnt DESC LIMIT 0,1000 OPTION max_matches=10000")
        );
    }

    #[test]
    fn test_multi_table_blanks_missing_metric() {
        let plans = plan_tables(
            &json!({"aggs": {"2": {"terms": {"field": "status"}, "aggs": {"1": {"avg": {"field": "bytes"}}}}}}),
            &tables(),
            &EngineSettings::default(),
            Utc::now(),
        )
        .unwrap();
        assert_eq!(
            plans[0].sql.as_deref(),
            Some("SELECT status, avg(bytes) AS al1, count(*) AS cnt FROM logs_a GROUP BY status ORDER BY cnt DESC LIMIT 0,1000")
        );
        assert_eq!(
            plans[1].sql.as_deref(),
            Some("SELECT status, count(*) AS cnt FROM logs_b GROUP BY status ORDER BY cnt DESC LIMIT 0,1000")
        );
        assert!(plans[1].nodes.get(1).unwrap().state.blanked);
    }

    #[test]
    fn test_summary_reports_skip_reason() {
        let plans = plan_tables(
            &json!({"aggs": {"2": {"terms": {"field": "bytes"}}}}),
            &tables(),
            &EngineSettings::default(),
            Utc::now(),
        )
        .unwrap();
        assert!(plans[0].summary()["sql"].is_string());
        assert!(plans[1].summary()["skipped"].is_string());
    }
}
