//! Metrics this table cannot compute print as `null` rather than vanish.

use crate::node_set::NodeSet;
use crate::row::ResultRow;
use serde_json::Value;

pub fn apply(mut rows: Vec<ResultRow>, nodes: &NodeSet) -> Vec<ResultRow> {
    let blanked: Vec<&str> = nodes
        .iter()
        .filter(|n| n.is_metric() && n.state.blanked)
        .filter_map(|n| n.state.alias.as_deref())
        .collect();
    for row in rows.iter_mut() {
        for alias in &blanked {
            row.set(alias, Value::Null);
        }
    }
    rows
}

#[cfg(test)]
mod tests {
    use super::super::fixtures::{planned, rows};
    use super::*;
    use serde_json::json;

    #[test]
    fn test_blanked_metric_column_is_null() {
        let (mut nodes, _) = planned(json!({"aggs": {"1": {"avg": {"field": "a"}}, "2": {"max": {"field": "b"}}}}));
        if let Some(node) = nodes.get_mut(1) {
            node.state.disabled = true;
            node.state.blanked = true;
        }
        let out = apply(rows(json!([{"al1": 3, "al2": 9, "cnt": 1}])), &nodes);
        assert_eq!(out[0].values["al1"], json!(3));
        assert_eq!(out[0].values["al2"], Value::Null);
    }
}
