//! Empty histogram intervals.
//!
//! Applies to the deepest histogram with `min_doc_count: 0` that sits after
//! every active terms level. Within each group of the levels above it, every
//! interval between the lowest and highest bucket (widened by
//! `extended_bounds`) that has no row gets a synthetic zero-count row.

use super::ResponseContext;
use crate::node::histogram::Grid;
use crate::node::NodeKind;
use crate::node_set::NodeSet;
use crate::row::{value_to_f64, ResultRow, RowOrigin};
use serde_json::{Map, Value};
use std::collections::{BTreeSet, HashMap};
use tracing::warn;

/// The histogram to fill, if any.
pub fn target(nodes: &NodeSet) -> Option<usize> {
    let last_terms = nodes
        .iter()
        .enumerate()
        .filter(|(_, n)| n.is_active() && matches!(n.kind, NodeKind::Term(_)))
        .map(|(idx, _)| idx)
        .max();
    nodes
        .iter()
        .enumerate()
        .filter(|(idx, n)| n.is_active() && n.is_extendable() && last_terms.map_or(true, |t| *idx > t))
        .filter(|(_, n)| n.state.alias.is_some())
        .map(|(idx, _)| idx)
        .last()
}

pub fn apply(rows: Vec<ResultRow>, nodes: &NodeSet, ctx: &ResponseContext) -> Vec<ResultRow> {
    let Some(idx) = target(nodes) else {
        return rows;
    };
    let Some(node) = nodes.get(idx) else {
        return rows;
    };
    let (Some(alias), Some((grid, bounds))) = (node.state.alias.clone(), node.gap_grid()) else {
        return rows;
    };
    let outer = nodes.group_fields_before(idx);

    let mut order: Vec<String> = Vec::new();
    let mut groups: HashMap<String, Vec<ResultRow>> = HashMap::new();
    for row in rows {
        let key = row.group_key(&outer);
        if !groups.contains_key(&key) {
            order.push(key.clone());
        }
        groups.entry(key).or_default().push(row);
    }

    let mut out = Vec::new();
    for key in order {
        let Some(mut group) = groups.remove(&key) else {
            continue;
        };
        let synthetic = fill_group(&group, &outer, &alias, grid, bounds, ctx);
        group.extend(synthetic);
        out.extend(group);
    }
    out
}

fn fill_group(
    group: &[ResultRow],
    outer: &[String],
    alias: &str,
    grid: Grid,
    bounds: Option<(i64, i64)>,
    ctx: &ResponseContext,
) -> Vec<ResultRow> {
    let Some(template) = group.first() else {
        return Vec::new();
    };
    let present: BTreeSet<i64> = group
        .iter()
        .filter_map(|row| row.get(alias).and_then(value_to_f64))
        .filter_map(|raw| grid.index_of(raw))
        .collect();
    let lows = present.first().copied().into_iter().chain(bounds.map(|b| b.0));
    let highs = present.last().copied().into_iter().chain(bounds.map(|b| b.1));
    let (Some(lo), Some(hi)) = (lows.min(), highs.max()) else {
        return Vec::new();
    };

    let mut synthetic = Vec::new();
    for index in lo..=hi {
        if present.contains(&index) {
            continue;
        }
        if synthetic.len() >= ctx.max_gap_buckets {
            warn!(alias, limit = ctx.max_gap_buckets, "histogram gap fill capped");
            break;
        }
        let mut values = Map::new();
        for (field, value) in &template.values {
            let kept = if outer.contains(field) { value.clone() } else { Value::Null };
            values.insert(field.clone(), kept);
        }
        values.insert(alias.to_string(), grid.value_at(index));
        values.insert(ctx.count_field.clone(), Value::from(0));
        synthetic.push(ResultRow::synthetic(values, RowOrigin::GapFill));
    }
    synthetic
}

#[cfg(test)]
mod tests {
    use super::super::fixtures::{planned, rows};
    use super::*;
    use serde_json::json;

    #[test]
    fn test_fills_between_bounds() {
        let (nodes, ctx) = planned(json!({"aggs": {"2": {
            "histogram": {"field": "bytes", "interval": 10, "min_doc_count": 0,
                          "extended_bounds": {"min": 0, "max": 40}},
            "aggs": {"1": {"avg": {"field": "latency"}}}
        }}}));
        assert_eq!(target(&nodes), Some(0));
        let out = apply(
            rows(json!([
                {"al1": 0, "al2": 1.5, "cnt": 2},
                {"al1": 10, "al2": 2.0, "cnt": 1},
                {"al1": 30, "al2": 0.5, "cnt": 4}
            ])),
            &nodes,
            &ctx,
        );
        let mut keys: Vec<i64> = out.iter().filter_map(|r| r.values["al1"].as_i64()).collect();
        keys.sort();
        assert_eq!(keys, vec![0, 10, 20, 30, 40]);
        for row in out.iter().filter(|r| r.origin == RowOrigin::GapFill) {
            assert_eq!(row.count("cnt"), 0);
            assert_eq!(row.values["al2"], Value::Null);
        }
    }

    #[test]
    fn test_groups_fill_independently() {
        let (nodes, ctx) = planned(json!({"aggs": {"3": {
            "terms": {"field": "host", "order": {"_key": "asc"}},
            "aggs": {"2": {"histogram": {"field": "bytes", "interval": 5, "min_doc_count": 0}}}
        }}}));
        let out = apply(
            rows(json!([
                {"host": "a", "al1": 0, "cnt": 1},
                {"host": "b", "al1": 5, "cnt": 1},
                {"host": "a", "al1": 15, "cnt": 1}
            ])),
            &nodes,
            &ctx,
        );
        let hosts: Vec<(Value, Value)> = out
            .iter()
            .map(|r| (r.values["host"].clone(), r.values["al1"].clone()))
            .collect();
        assert_eq!(
            hosts,
            vec![
                (json!("a"), json!(0)),
                (json!("a"), json!(15)),
                (json!("a"), json!(5)),
                (json!("a"), json!(10)),
                (json!("b"), json!(5)),
            ]
        );
    }

    #[test]
    fn test_histogram_above_terms_is_not_filled() {
        let (nodes, _) = planned(json!({"aggs": {"2": {
            "histogram": {"field": "bytes", "interval": 5, "min_doc_count": 0},
            "aggs": {"3": {"terms": {"field": "host"}}}
        }}}));
        assert_eq!(target(&nodes), None);
    }

    #[test]
    fn test_cap_limits_synthetic_rows() {
        let (nodes, mut ctx) = planned(json!({"aggs": {"2": {
            "histogram": {"field": "bytes", "interval": 1, "min_doc_count": 0}
        }}}));
        ctx.max_gap_buckets = 3;
        let out = apply(rows(json!([{"al1": 0, "cnt": 1}, {"al1": 100, "cnt": 1}])), &nodes, &ctx);
        assert_eq!(out.len(), 5);
    }
}
