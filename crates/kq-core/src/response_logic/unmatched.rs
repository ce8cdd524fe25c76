//! Rows that reached an indirect filter without matching it.
//!
//! Such a row still carries documents for every bucket outside the filter:
//! enclosing buckets and sibling aggregations. It becomes a placeholder
//! whose documents are muted inside the filter's subtree only. A group of
//! placeholders with no matching row is dropped when nothing outside the
//! filter would read it.

use super::ResponseContext;
use crate::node_set::NodeSet;
use crate::row::{ResultRow, RowOrigin};
use std::collections::{HashMap, HashSet};

/// A filter aggregation checked as one unit: its first node and leg columns.
#[derive(Debug, Clone, PartialEq)]
pub struct Unit {
    pub first: usize,
    pub aliases: Vec<String>,
}

/// Indirect legs with a column of their own, grouped per aggregation.
/// Concurrent legs form one unit; a match-all leg makes the unit moot.
pub fn units(nodes: &NodeSet) -> Vec<Unit> {
    let mut units = Vec::new();
    for group in nodes.filter_groups() {
        let active: Vec<usize> = group
            .into_iter()
            .filter(|&i| nodes.get(i).is_some_and(|n| n.is_active() && !n.state.direct))
            .collect();
        let Some(&first) = active.first() else {
            continue;
        };
        if active
            .iter()
            .any(|&i| nodes.get(i).and_then(|n| n.group_filter()).is_some_and(|f| f.matches_all()))
        {
            continue;
        }
        let aliases: Vec<String> = active
            .iter()
            .filter_map(|&i| nodes.get(i).and_then(|n| n.group_field()).map(str::to_string))
            .collect();
        if !aliases.is_empty() {
            units.push(Unit { first, aliases });
        }
    }
    units
}

pub fn apply(mut rows: Vec<ResultRow>, nodes: &NodeSet, _ctx: &ResponseContext) -> Vec<ResultRow> {
    for unit in units(nodes) {
        let anchor = nodes.leg_anchor(unit.first);
        let outer = nodes.group_fields_before(unit.first);
        let mut pending: HashMap<String, Vec<usize>> = HashMap::new();
        for (idx, row) in rows.iter_mut().enumerate() {
            if row.origin == RowOrigin::Empty {
                continue;
            }
            let group = row.group_key(&outer);
            if unit.aliases.iter().any(|a| row.flag(a)) {
                pending.remove(&group);
                continue;
            }
            row.origin = RowOrigin::Placeholder;
            if !row.muted_scopes.contains(&anchor) {
                row.muted_scopes.push(anchor);
            }
            pending.entry(group).or_default().push(idx);
        }
        if read_outside(nodes, anchor) {
            continue;
        }
        let doomed: HashSet<usize> = pending.into_values().flatten().collect();
        rows = rows
            .into_iter()
            .enumerate()
            .filter(|(idx, _)| !doomed.contains(idx))
            .map(|(_, row)| row)
            .collect();
    }
    rows
}

/// Whether some printed node outside the aggregation at `anchor` reads rows.
fn read_outside(nodes: &NodeSet, anchor: usize) -> bool {
    nodes
        .iter()
        .enumerate()
        .any(|(idx, node)| node.in_response() && !nodes.within(idx, anchor))
}

#[cfg(test)]
mod tests {
    use super::super::fixtures::{planned, rows};
    use super::*;
    use serde_json::{json, Value};

    fn request() -> Value {
        json!({"aggs": {"2": {
            "terms": {"field": "host"},
            "aggs": {"f": {"filter": {"term": {"status": 500}}, "aggs": {"1": {"sum": {"field": "bytes"}}}}}
        }}})
    }

    #[test]
    fn test_units_cover_indirect_legs() {
        let (nodes, _) = planned(request());
        assert_eq!(units(&nodes), vec![Unit { first: 1, aliases: vec!["al1".into()] }]);
    }

    #[test]
    fn test_placeholders_keep_documents_for_enclosing_buckets() {
        let (nodes, ctx) = planned(request());
        let input = rows(json!([
            {"host": "a", "al1": 0, "al2": 10, "cnt": 3},
            {"host": "a", "al1": 1, "al2": 4, "cnt": 1},
            {"host": "c", "al1": 0, "al2": 1, "cnt": 4}
        ]));
        let out = apply(input, &nodes, &ctx);
        let summary: Vec<(Value, u64, RowOrigin, Vec<usize>)> = out
            .iter()
            .map(|r| (r.values["host"].clone(), r.count("cnt"), r.origin, r.muted_scopes.clone()))
            .collect();
        assert_eq!(
            summary,
            vec![
                (json!("a"), 3, RowOrigin::Placeholder, vec![1]),
                (json!("a"), 1, RowOrigin::Engine, vec![]),
                (json!("c"), 4, RowOrigin::Placeholder, vec![1]),
            ]
        );
        assert_eq!(out[0].values["al2"], json!(10));
    }

    #[test]
    fn test_lone_filter_drops_unmatched_groups() {
        let (nodes, ctx) = planned(json!({
            "query": {"bool": {"filter": [{"term": {"host": "a"}}]}},
            "aggs": {"3": {"filters": {"filters": [{"term": {"status": 500}}]}}}
        }));
        let unit = units(&nodes).remove(0);
        let alias = unit.aliases[0].clone();
        let unmatched = json!({alias.clone(): 0, "cnt": 3});
        let matched = json!({alias: 1, "cnt": 2});

        let out = apply(rows(json!([unmatched.clone()])), &nodes, &ctx);
        assert!(out.is_empty());
        let out = apply(rows(json!([unmatched, matched])), &nodes, &ctx);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].origin, RowOrigin::Placeholder);
    }

    #[test]
    fn test_match_all_leg_disables_the_unit() {
        let (nodes, _) = planned(json!({"aggs": {"2": {
            "terms": {"field": "host"},
            "aggs": {"3": {"filters": {"filters": {"all": {"match_all": {}}, "x": {"term": {"a": 1}}}}}}
        }}}));
        assert!(units(&nodes).is_empty());
    }
}
