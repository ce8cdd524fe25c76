//! Bucket order pushed into ORDER BY, when one clause can express it.
//!
//! Ordering dimensions are the active terms and histogram levels. The
//! combination is complex when there is more than one dimension and either
//! some terms level orders by a value (document count or a metric) or some
//! level has no explicit order. Complex orders sort every level by its own
//! field in SQL and are settled after the rows come back.

use super::{PassOutcome, RequestContext};
use crate::node::term::OrderTarget;
use crate::node::NodeKind;
use crate::node_set::NodeSet;
use crate::sql::{quote_ident, Direction};
use tracing::debug;

pub fn apply(nodes: &mut NodeSet, ctx: &mut RequestContext) -> PassOutcome {
    let dims: Vec<usize> = nodes
        .iter()
        .enumerate()
        .filter(|(_, n)| n.is_active() && n.is_ordering_dim())
        .map(|(idx, _)| idx)
        .collect();
    let mut explicit = 0;
    let mut by_value = false;
    for &idx in &dims {
        match nodes.get(idx).map(|n| &n.kind) {
            Some(NodeKind::Term(term)) => {
                explicit += usize::from(term.order.explicit);
                by_value |= term.order.target != OrderTarget::Key;
            }
            Some(_) => explicit += 1,
            None => {}
        }
    }
    ctx.complex_ordering = dims.len() > 1 && (by_value || dims.len() > explicit);
    debug!(table = ctx.table_name(), dims = dims.len(), explicit, complex = ctx.complex_ordering, "ordering");

    for idx in dims {
        let Some(NodeKind::Term(term)) = nodes.get(idx).map(|n| n.kind.clone()) else {
            continue;
        };
        let metric = match &term.order.target {
            OrderTarget::Metric(name) => nodes
                .iter()
                .position(|n| n.parent == Some(idx) && n.is_metric() && n.is_active() && &n.key == name),
            _ => None,
        };
        let metric_alias = metric.and_then(|m| nodes.get(m)).and_then(|n| n.state.alias.clone());
        let direction = term.order.direction;
        let sql_order = if ctx.complex_ordering {
            (quote_ident(&term.field), Direction::Asc)
        } else {
            match (&term.order.target, metric_alias) {
                (OrderTarget::Key, _) => (quote_ident(&term.field), direction),
                (OrderTarget::Metric(_), Some(alias)) => (alias, direction),
                _ => (ctx.count_alias.clone(), direction),
            }
        };
        if let Some(node) = nodes.get_mut(idx) {
            node.state.order_metric = metric;
            node.state.sql_order = Some(sql_order);
        }
    }
    PassOutcome::Continue
}
