//! # Response Builder
//!
//! Folds flat rows back into the nested aggregation tree and wraps it in the
//! search response envelope.
//!
//! Each row walks the node list in order. A node is placed under the bucket
//! its parent descended into for this row; a node whose parent did not
//! descend is not visited. Legs of a concurrent `filters` aggregation are
//! placed side by side: only the last one decides where the row continues,
//! falling back to an earlier leg that matched. A row whose documents are
//! scoped away from a node is folded there with a zero count.

use crate::node::Step;
use crate::node_set::NodeSet;
use crate::row::ResultRow;
use crate::tree::{Aggregations, PathSegment};
use serde_json::{json, Value};
use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct ResponseBuilder {
    root: Aggregations,
    total: u64,
}

impl ResponseBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Documents matched by the query, before any row post-processing.
    pub fn add_total(&mut self, count: u64) {
        self.total += count;
    }

    /// Fold the rows of one table, walked with that table's node list.
    pub fn add_rows(&mut self, nodes: &NodeSet, count_field: &str, rows: &[ResultRow]) {
        // leg index -> (aggregation anchor, last leg of its run)
        let mut legs: HashMap<usize, (usize, bool)> = HashMap::new();
        for run in nodes.concurrent_runs() {
            let anchor = nodes.leg_anchor(run[0]);
            for (pos, &idx) in run.iter().enumerate() {
                legs.insert(idx, (anchor, pos + 1 == run.len()));
            }
        }
        let metric_keys: Vec<Option<&str>> = nodes
            .iter()
            .map(|n| n.state.order_metric.and_then(|m| nodes.get(m)).map(|m| m.key.as_str()))
            .collect();

        for row in rows {
            self.walk(nodes, count_field, row, &legs, &metric_keys);
        }
    }

    fn walk(
        &mut self,
        nodes: &NodeSet,
        count_field: &str,
        row: &ResultRow,
        legs: &HashMap<usize, (usize, bool)>,
        metric_keys: &[Option<&str>],
    ) {
        let scoped = !row.count_scopes.is_empty() || !row.muted_scopes.is_empty();
        let muted = scoped.then(|| row.muted(count_field));
        let mut paths: Vec<Option<Vec<PathSegment>>> = vec![None; nodes.len()];
        let mut pending: HashMap<usize, Vec<PathSegment>> = HashMap::new();

        for (idx, node) in nodes.iter().enumerate() {
            if !node.in_response() {
                continue;
            }
            let base = match node.parent {
                None => Vec::new(),
                Some(parent) => match &paths[parent] {
                    Some(path) => path.clone(),
                    None => continue,
                },
            };
            let Some(level) = self.root.at_path(&base) else {
                continue;
            };
            let silenced = !row.count_scopes.iter().all(|&scope| nodes.within(idx, scope))
                || row.muted_scopes.iter().any(|&scope| nodes.within(idx, scope));
            let source = match &muted {
                Some(muted) if silenced => muted,
                _ => row,
            };
            let metric_key = metric_keys.get(idx).copied().flatten();
            let anchor = nodes.leg_anchor(idx);

            match node.fill_in_response(source, count_field, metric_key, level) {
                Step::Descend(segment) => {
                    let mut path = base;
                    path.push(segment);
                    match legs.get(&idx) {
                        Some(&(anchor, false)) => {
                            pending.insert(anchor, path);
                        }
                        _ => paths[anchor] = Some(path),
                    }
                }
                Step::Skip => {
                    if let Some(&(anchor, true)) = legs.get(&idx) {
                        paths[anchor] = pending.remove(&anchor);
                    }
                }
                Step::Stay => {}
            }
        }
    }

    /// Apply final bucket ordering and limits and render the envelope.
    pub fn finish(mut self, took_ms: u64) -> Value {
        self.root.finalize();
        json!({
            "took": took_ms,
            "timed_out": false,
            "_shards": {"total": 1, "successful": 1, "skipped": 0, "failed": 0},
            "hits": {"total": self.total, "max_score": null, "hits": []},
            "aggregations": self.root.to_json(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::response_logic::fixtures::{planned, rows};
    use crate::response_logic;
    use crate::row::RowOrigin;

    fn build(request: Value, data: Value) -> Value {
        let (nodes, ctx) = planned(request);
        let raw = rows(data);
        let mut builder = ResponseBuilder::new();
        builder.add_total(raw.iter().map(|r| r.count(&ctx.count_field)).sum());
        let processed = response_logic::run(raw, &nodes, &ctx);
        builder.add_rows(&nodes, &ctx.count_field, &processed);
        builder.finish(1)
    }

    #[test]
    fn test_nested_terms_with_metric() {
        let out = build(
            json!({"aggs": {"2": {"terms": {"field": "host"}, "aggs": {"1": {"sum": {"field": "bytes"}}}}}}),
            json!([
                {"host": "a", "al1": 10, "cnt": 2},
                {"host": "b", "al1": 5, "cnt": 3}
            ]),
        );
        assert_eq!(out["hits"]["total"], json!(5));
        assert_eq!(
            out["aggregations"],
            json!({"2": {
                "doc_count_error_upper_bound": 0,
                "sum_other_doc_count": 0,
                "buckets": [
                    {"key": "b", "doc_count": 3, "1": {"value": 5}},
                    {"key": "a", "doc_count": 2, "1": {"value": 10}}
                ]
            }})
        );
    }

    #[test]
    fn test_concurrent_legs_are_siblings_with_own_children() {
        let out = build(
            json!({"aggs": {
                "3": {
                    "filters": {"filters": {"x": {"term": {"a": 1}}, "y": {"range": {"a": {"gte": 0}}}}},
                    "aggs": {"1": {"max": {"field": "b"}}}
                },
                "4": {"sum": {"field": "b"}}
            }}),
            json!([
                {"al1": 1, "al2": 1, "al3": 7, "al4": 7, "cnt": 2},
                {"al1": 0, "al2": 1, "al3": 3, "al4": 3, "cnt": 1}
            ]),
        );
        assert_eq!(
            out["aggregations"],
            json!({
                "3": {"buckets": {
                    "x": {"doc_count": 2, "1": {"value": 7}},
                    "y": {"doc_count": 3, "1": {"value": 7}}
                }},
                "4": {"value": 10}
            })
        );
    }

    #[test]
    fn test_placeholder_counts_outside_its_filter() {
        let out = build(
            json!({"aggs": {"2": {
                "terms": {"field": "host", "min_doc_count": 0},
                "aggs": {"f": {"filter": {"term": {"s": 5}}}, "1": {"max": {"field": "b"}}}
            }}}),
            json!([{"host": "a", "al1": 0, "al2": 7, "cnt": 3}]),
        );
        assert_eq!(out["hits"]["total"], json!(3));
        assert_eq!(
            out["aggregations"]["2"]["buckets"],
            json!([{"key": "a", "doc_count": 3, "f": {"doc_count": 0}, "1": {"value": 7}}])
        );
    }

    #[test]
    fn test_filter_next_to_sibling_terms() {
        let out = build(
            json!({"aggs": {
                "f": {"filter": {"term": {"a": 1}}},
                "2": {"terms": {"field": "host"}}
            }}),
            json!([
                {"al1": 1, "host": "a", "cnt": 2},
                {"al1": 0, "host": "b", "cnt": 5}
            ]),
        );
        assert_eq!(out["hits"]["total"], json!(7));
        assert_eq!(out["aggregations"]["f"], json!({"doc_count": 2}));
        assert_eq!(
            out["aggregations"]["2"]["buckets"],
            json!([{"key": "b", "doc_count": 5}, {"key": "a", "doc_count": 2}])
        );
    }

    #[test]
    fn test_filter_nested_under_terms() {
        let out = build(
            json!({"aggs": {"2": {
                "terms": {"field": "host"},
                "aggs": {"f": {"filter": {"term": {"s": 5}}, "aggs": {"1": {"sum": {"field": "b"}}}}}
            }}}),
            json!([
                {"host": "a", "al1": 0, "al2": 30, "cnt": 3},
                {"host": "a", "al1": 1, "al2": 10, "cnt": 1},
                {"host": "c", "al1": 0, "al2": 40, "cnt": 4}
            ]),
        );
        assert_eq!(out["hits"]["total"], json!(8));
        assert_eq!(
            out["aggregations"]["2"]["buckets"],
            json!([
                {"key": "a", "doc_count": 4, "f": {"doc_count": 1, "1": {"value": 10}}},
                {"key": "c", "doc_count": 4, "f": {"doc_count": 0}}
            ])
        );
    }

    #[test]
    fn test_empty_row_keeps_shape() {
        let (nodes, ctx) = planned(json!({"aggs": {
            "2": {"terms": {"field": "host"}},
            "3": {"range": {"field": "b", "ranges": [{"to": 10}]}}
        }}));
        let empty = ResultRow::synthetic(Default::default(), RowOrigin::Empty);
        let mut builder = ResponseBuilder::new();
        builder.add_rows(&nodes, &ctx.count_field, &[empty]);
        let out = builder.finish(0);
        assert_eq!(out["hits"]["total"], json!(0));
        assert_eq!(out["aggregations"]["2"]["buckets"], json!([]));
        assert_eq!(out["aggregations"]["3"]["buckets"][0]["doc_count"], json!(0));
    }
}
