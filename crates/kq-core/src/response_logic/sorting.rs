//! In-memory row order for combinations ORDER BY could not express.
//!
//! Rows are ordered level by level. A terms level sorts on its key, on the
//! document count of its group, or on the value of the metric it is ordered
//! by, computed over the group with the metric's own function. Histogram
//! levels sort on their key, ascending.

use super::ResponseContext;
use crate::node::metric::MetricCalculator;
use crate::node::term::OrderTarget;
use crate::node::NodeKind;
use crate::node_set::NodeSet;
use crate::row::{compare_values, number_value, value_to_f64, ResultRow};
use crate::sql::Direction;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::HashMap;

enum SortKey {
    /// The level's own column.
    Field(String),
    /// Summed document count of the group through this level.
    Count(Vec<String>),
    /// Metric over the group through this level.
    Metric { group: Vec<String>, alias: String, calc: MetricCalculator },
}

pub fn apply(rows: Vec<ResultRow>, nodes: &NodeSet, ctx: &ResponseContext) -> Vec<ResultRow> {
    let levels = levels(nodes);
    if levels.is_empty() {
        return rows;
    }

    let mut keyed: Vec<(Vec<Value>, ResultRow)> = rows.into_iter().map(|row| (Vec::new(), row)).collect();
    let mut directions = Vec::with_capacity(levels.len());
    for (key, direction) in levels {
        directions.push(direction);
        match key {
            SortKey::Field(field) => {
                for (cells, row) in keyed.iter_mut() {
                    cells.push(row.get(&field).cloned().unwrap_or(Value::Null));
                }
            }
            SortKey::Count(group) => {
                let mut totals: HashMap<String, u64> = HashMap::new();
                for (_, row) in keyed.iter() {
                    *totals.entry(row.group_key(&group)).or_default() += row.count(&ctx.count_field);
                }
                for (cells, row) in keyed.iter_mut() {
                    let total = totals.get(&row.group_key(&group)).copied().unwrap_or(0);
                    cells.push(Value::from(total));
                }
            }
            SortKey::Metric { group, alias, calc } => {
                let mut values: HashMap<String, MetricCalculator> = HashMap::new();
                for (_, row) in keyed.iter() {
                    let entry = values.entry(row.group_key(&group)).or_insert_with(|| calc.clone());
                    let count = row.count(&ctx.count_field);
                    if let Some(v) = row.get(&alias).and_then(value_to_f64).filter(|_| count > 0) {
                        entry.add(v, count);
                    }
                }
                for (cells, row) in keyed.iter_mut() {
                    let value = values
                        .get(&row.group_key(&group))
                        .and_then(MetricCalculator::result)
                        .map(number_value)
                        .unwrap_or(Value::Null);
                    cells.push(value);
                }
            }
        }
    }

    keyed.sort_by(|(a, _), (b, _)| compare_cells(a, b, &directions));
    keyed.into_iter().map(|(_, row)| row).collect()
}

fn levels(nodes: &NodeSet) -> Vec<(SortKey, Direction)> {
    let mut levels = Vec::new();
    for (idx, node) in nodes.iter().enumerate() {
        if !node.is_active() || !node.is_ordering_dim() {
            continue;
        }
        let NodeKind::Term(term) = &node.kind else {
            if let Some(alias) = node.state.alias.clone() {
                levels.push((SortKey::Field(alias), Direction::Asc));
            }
            continue;
        };
        let group = nodes.group_fields_through(idx);
        let metric = node.state.order_metric.and_then(|m| nodes.get(m)).and_then(|m| match (&m.kind, &m.state.alias) {
            (NodeKind::Metric(agg), Some(alias)) => Some((agg.func, alias.clone())),
            _ => None,
        });
        let key = match (&term.order.target, metric) {
            (OrderTarget::Key, _) => SortKey::Field(term.field.clone()),
            (OrderTarget::Metric(_), Some((func, alias))) => SortKey::Metric {
                group,
                alias,
                calc: MetricCalculator::new(func),
            },
            _ => SortKey::Count(group),
        };
        levels.push((key, term.order.direction));
    }
    levels
}

/// Level by level; missing values sort last whatever the direction.
fn compare_cells(a: &[Value], b: &[Value], directions: &[Direction]) -> Ordering {
    for ((x, y), direction) in a.iter().zip(b).zip(directions) {
        let ord = match (x.is_null(), y.is_null()) {
            (false, false) => match direction {
                Direction::Asc => compare_values(x, y),
                Direction::Desc => compare_values(y, x),
            },
            _ => compare_values(x, y),
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

#[cfg(test)]
mod tests {
    use super::super::fixtures::{planned, rows};
    use super::*;
    use serde_json::json;

    fn column(rows: &[ResultRow], field: &str) -> Vec<Value> {
        rows.iter().map(|r| r.values[field].clone()).collect()
    }

    #[test]
    fn test_outer_by_count_inner_by_metric() {
        let (nodes, ctx) = planned(json!({"aggs": {"2": {
            "terms": {"field": "host"},
            "aggs": {"3": {
                "terms": {"field": "path", "order": {"1": "desc"}},
                "aggs": {"1": {"max": {"field": "bytes"}}}
            }}
        }}}));
        assert!(ctx.complex_ordering);
        let input = rows(json!([
            {"host": "a", "path": "/x", "al1": 5, "cnt": 1},
            {"host": "a", "path": "/y", "al1": 9, "cnt": 1},
            {"host": "b", "path": "/x", "al1": 1, "cnt": 4},
            {"host": "b", "path": "/z", "al1": 7, "cnt": 2}
        ]));
        let sorted = apply(input.clone(), &nodes, &ctx);
        assert_eq!(column(&sorted, "host"), vec![json!("b"), json!("b"), json!("a"), json!("a")]);
        assert_eq!(column(&sorted, "path"), vec![json!("/z"), json!("/x"), json!("/y"), json!("/x")]);

        let mut before: Vec<_> = input.iter().map(|r| r.values.clone()).collect();
        let mut after: Vec<_> = sorted.iter().map(|r| r.values.clone()).collect();
        before.sort_by_key(|v| serde_json::to_string(v).unwrap());
        after.sort_by_key(|v| serde_json::to_string(v).unwrap());
        assert_eq!(before, after);
    }

    #[test]
    fn test_missing_values_sort_last() {
        let ord = compare_cells(&[Value::Null], &[json!(3)], &[Direction::Desc]);
        assert_eq!(ord, Ordering::Greater);
    }
}
