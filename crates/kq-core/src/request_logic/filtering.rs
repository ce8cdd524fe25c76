//! Filter bucket classification.
//!
//! * A leg that does not compile is disabled.
//! * Legs of one `filters` aggregation with more than one active leg are
//!   concurrent: they must come out as siblings, not nested levels.
//! * A leg is direct (folded into WHERE) when it is not concurrent, every
//!   other active aggregation lies inside its subtree, and either no
//!   effective top-level query exists or the leg is named. Everything else
//!   is selected as `IF(expr, 1, 0)` and grouped on.
//! * An indirect leg using full-text matching is disabled, since the
//!   daemon only accepts `MATCH()` in WHERE.
//!
//! Disabling a leg can change the other decisions, so classification
//! repeats until nothing moves.

use super::{PassOutcome, RequestContext};
use crate::node_set::NodeSet;
use tracing::{debug, warn};

pub fn apply(nodes: &mut NodeSet, ctx: &RequestContext) -> PassOutcome {
    for idx in 0..nodes.len() {
        let failure = match nodes.get(idx).and_then(|n| n.group_filter().map(|f| (n, f))) {
            Some((node, filter)) if node.is_active() => filter.compiled.as_ref().err().map(|e| (node.key.clone(), e.to_string())),
            _ => None,
        };
        if let Some((agg, reason)) = failure {
            warn!(table = ctx.table_name(), %agg, %reason, "filter bucket disabled");
            nodes.disable(idx);
        }
    }

    loop {
        let mut changed = mark_concurrent(nodes);
        changed |= mark_direct(nodes);
        changed |= drop_indirect_full_text(nodes, ctx);
        if !changed {
            break;
        }
    }
    PassOutcome::Continue
}

fn mark_concurrent(nodes: &mut NodeSet) -> bool {
    let mut changed = false;
    for group in nodes.filter_groups() {
        let active = group.iter().filter(|&&i| nodes.get(i).is_some_and(|n| n.is_active())).count();
        for idx in group {
            if let Some(node) = nodes.get_mut(idx) {
                let concurrent = active > 1 && node.is_active();
                if node.state.concurrent != concurrent {
                    node.state.concurrent = concurrent;
                    changed = true;
                }
            }
        }
    }
    changed
}

fn mark_direct(nodes: &mut NodeSet) -> bool {
    let effective_query = nodes.has_effective_query();
    let mut decisions = Vec::new();
    for (idx, node) in nodes.iter().enumerate() {
        let Some(filter) = node.group_filter() else {
            continue;
        };
        let encloses_all = nodes
            .iter()
            .enumerate()
            .filter(|(j, other)| *j != idx && other.is_active() && !other.is_query())
            .all(|(j, _)| nodes.is_descendant(j, idx));
        let direct = node.is_active()
            && !node.state.concurrent
            && encloses_all
            && (!effective_query || filter.is_named());
        decisions.push((idx, direct));
    }

    let mut changed = false;
    for (idx, direct) in decisions {
        if let Some(node) = nodes.get_mut(idx) {
            if node.state.direct != direct {
                debug!(agg = %node.key, direct, "filter classified");
                node.state.direct = direct;
                changed = true;
            }
        }
    }
    changed
}

fn drop_indirect_full_text(nodes: &mut NodeSet, ctx: &RequestContext) -> bool {
    let doomed: Vec<usize> = nodes
        .iter()
        .enumerate()
        .filter(|(_, n)| n.is_active() && !n.state.direct)
        .filter(|(_, n)| {
            n.group_filter()
                .and_then(|f| f.compiled())
                .is_some_and(|c| c.full_text)
        })
        .map(|(idx, _)| idx)
        .collect();
    for &idx in &doomed {
        if let Some(node) = nodes.get(idx) {
            warn!(table = ctx.table_name(), agg = %node.key, "full-text filter cannot be selected, bucket disabled");
        }
        nodes.disable(idx);
    }
    !doomed.is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::TableFields;
    use crate::parser::RequestParser;
    use chrono::Utc;
    use serde_json::{json, Value};
    use std::collections::BTreeSet;

    fn run(request: Value) -> NodeSet {
        let mut nodes = NodeSet::new(RequestParser::new(Utc::now()).parse(&request).unwrap());
        let ctx = RequestContext::new(TableFields::new("t"), false, BTreeSet::new(), "cnt");
        apply(&mut nodes, &ctx);
        nodes
    }

    fn flags(nodes: &NodeSet) -> Vec<(bool, bool, bool)> {
        nodes
            .iter()
            .map(|n| (n.is_active(), n.state.direct, n.state.concurrent))
            .collect()
    }

    #[test]
    fn test_outermost_single_filter_is_direct() {
        let nodes = run(json!({"aggs": {"f": {
            "filter": {"term": {"a": 1}},
            "aggs": {"2": {"terms": {"field": "b"}}}
        }}}));
        assert_eq!(flags(&nodes), vec![(true, true, false), (true, false, false)]);
    }

    #[test]
    fn test_nested_or_sibling_filters_are_indirect() {
        let nodes = run(json!({"aggs": {
            "2": {"terms": {"field": "b"}, "aggs": {"f": {"filter": {"term": {"a": 1}}}}}
        }}));
        assert!(!nodes.get(1).unwrap().state.direct);

        let nodes = run(json!({"aggs": {
            "f": {"filter": {"term": {"a": 1}}},
            "1": {"max": {"field": "b"}}
        }}));
        assert!(!nodes.get(0).unwrap().state.direct);
    }

    #[test]
    fn test_multi_leg_filters_are_concurrent() {
        let nodes = run(json!({"aggs": {"3": {"filters": {"filters": {
            "x": {"term": {"a": 1}}, "y": {"term": {"a": 2}}
        }}}}}));
        assert_eq!(flags(&nodes), vec![(true, false, true), (true, false, true)]);
    }

    #[test]
    fn test_anonymous_leg_under_query_is_indirect() {
        let nodes = run(json!({
            "query": {"bool": {"filter": [{"term": {"host": "a"}}]}},
            "aggs": {"3": {"filters": {"filters": [{"term": {"a": 1}}]}}}
        }));
        assert_eq!(flags(&nodes)[1], (true, false, false));

        let nodes = run(json!({
            "query": {"bool": {"filter": [{"term": {"host": "a"}}]}},
            "aggs": {"3": {"filters": {"filters": {"only": {"term": {"a": 1}}}}}}
        }));
        assert_eq!(flags(&nodes)[1], (true, true, false));
    }

    #[test]
    fn test_uncompilable_and_indirect_full_text_legs_are_disabled() {
        let nodes = run(json!({"aggs": {"3": {"filters": {"filters": {
            "bad": {"geo_distance": {}},
            "text": {"query_string": {"query": "error"}},
            "ok": {"term": {"a": 1}}
        }}}}}));
        assert_eq!(
            flags(&nodes),
            vec![(false, false, false), (false, false, false), (true, true, false)]
        );
    }

    #[test]
    fn test_unknown_kind_is_disabled() {
        let nodes = run(json!({"aggs": {"9": {"cardinality": {"field": "user"}}}}));
        assert!(!nodes.get(0).unwrap().is_active());
    }
}
