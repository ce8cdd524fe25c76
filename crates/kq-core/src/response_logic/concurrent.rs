//! Sibling filter legs from one grouped row.
//!
//! A row matching several legs of a concurrent `filters` aggregation is
//! split into one row per matching leg, each with only that leg set. The
//! copies count documents only inside the aggregation's own subtree, so the
//! levels around it still see every document once.

use crate::node_set::NodeSet;
use crate::row::{ResultRow, RowOrigin};
use serde_json::Value;

pub fn apply(mut rows: Vec<ResultRow>, nodes: &NodeSet) -> Vec<ResultRow> {
    for run in nodes.concurrent_runs() {
        let Some(&first) = run.first() else {
            continue;
        };
        let anchor = nodes.leg_anchor(first);
        let legs: Vec<String> = run
            .iter()
            .filter_map(|&i| nodes.get(i).and_then(|n| n.group_field()).map(str::to_string))
            .collect();
        if legs.len() < 2 {
            continue;
        }

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let matched: Vec<&String> = legs.iter().filter(|leg| row.flag(leg)).collect();
            if matched.len() < 2 {
                out.push(row);
                continue;
            }
            for (n, keep) in matched.iter().enumerate() {
                let mut copy = row.clone();
                for leg in &legs {
                    copy.set(leg, Value::from(u8::from(leg == *keep)));
                }
                if n > 0 {
                    copy.origin = RowOrigin::Expanded;
                    copy.count_scopes.push(anchor);
                }
                out.push(copy);
            }
        }
        rows = out;
    }
    rows
}
