//! Per-table field checks for targets that span several tables.
//!
//! A missing grouping field would silently merge buckets, so the table is
//! skipped. A missing metric still prints, blank. Ranges and filter buckets
//! over a missing field are left out for this table.

use super::{PassOutcome, RequestContext};
use crate::node_set::NodeSet;
use tracing::debug;

pub fn apply(nodes: &mut NodeSet, ctx: &RequestContext) -> PassOutcome {
    let table = &ctx.table;
    let requested = nodes.all_arg_fields();
    if !requested.is_empty() && requested.iter().all(|f| !table.has(f)) {
        return PassOutcome::Skip(format!("'{}' has none of the requested fields", table.name));
    }

    for idx in 0..nodes.len() {
        let Some(node) = nodes.get(idx) else {
            continue;
        };
        if node.is_query() || !node.is_active() {
            continue;
        }
        let args = node.arg_fields();
        if node.is_value_group() {
            if let Some(field) = args.iter().find(|f| !table.is_aggregatable(f)) {
                return PassOutcome::Skip(format!(
                    "'{}' cannot group on '{}' for aggregation '{}'",
                    table.name, field, node.key
                ));
            }
            continue;
        }
        let unusable = if node.is_metric() {
            args.iter().find(|f| !table.is_aggregatable(f))
        } else {
            args.iter().find(|f| !table.has(f))
        };
        let Some(field) = unusable.cloned() else {
            continue;
        };
        debug!(table = %table.name, agg = %node.key, %field, "disabling aggregation");
        let blank = node.is_metric();
        nodes.disable(idx);
        if let Some(node) = nodes.get_mut(idx) {
            node.state.blanked = blank;
        }
    }
    PassOutcome::Continue
}
