//! Generated column names for computed expressions: `al1`, `al2`, ...
//!
//! A candidate that collides with a table field gets `_` appended until it
//! is free. Nodes computing the same expression share one alias. Nodes that
//! already carry an alias keep it, so running the pass again changes nothing.

use super::{PassOutcome, RequestContext};
use crate::node_set::NodeSet;
use std::collections::{HashMap, HashSet};
use tracing::debug;

pub fn apply(nodes: &mut NodeSet, ctx: &RequestContext) -> PassOutcome {
    let mut assigned: HashSet<String> = HashSet::new();
    let mut by_expression: HashMap<String, String> = HashMap::new();
    for node in nodes.iter() {
        if let (Some(alias), Some(expr)) = (&node.state.alias, node.expression()) {
            assigned.insert(alias.clone());
            by_expression.entry(expr).or_insert_with(|| alias.clone());
        }
    }

    let mut counter = 0usize;
    for idx in 0..nodes.len() {
        let Some(node) = nodes.get_mut(idx) else {
            continue;
        };
        if !node.is_aliasable() || node.state.alias.is_some() {
            continue;
        }
        let Some(expr) = node.expression() else {
            continue;
        };
        let alias = match by_expression.get(&expr) {
            Some(alias) => alias.clone(),
            None => {
                let alias = loop {
                    counter += 1;
                    let mut candidate = format!("al{}", counter);
                    if assigned.contains(&candidate) {
                        continue;
                    }
                    while ctx.reserved.contains(&candidate) || candidate == ctx.count_alias {
                        candidate.push('_');
                    }
                    if !assigned.contains(&candidate) {
                        break candidate;
                    }
                };
                assigned.insert(alias.clone());
                by_expression.insert(expr.clone(), alias.clone());
                alias
            }
        };
        debug!(agg = %node.key, %alias, %expr, "alias assigned");
        node.state.alias = Some(alias);
    }
    PassOutcome::Continue
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::TableFields;
    use crate::parser::RequestParser;
    use chrono::Utc;
    use serde_json::json;
    use std::collections::BTreeSet;

    fn aliases(nodes: &NodeSet) -> Vec<Option<String>> {
        nodes.iter().map(|n| n.state.alias.clone()).collect()
    }

    fn setup() -> (NodeSet, RequestContext) {
        let nodes = RequestParser::new(Utc::now())
            .parse(&json!({"aggs": {
                "2": {"terms": {"field": "host"}, "aggs": {
                    "1": {"avg": {"field": "bytes"}},
                    "3": {"avg": {"field": "bytes"}},
                    "4": {"histogram": {"field": "bytes", "interval": 10}}
                }}
            }}))
            .unwrap();
        let reserved: BTreeSet<String> = ["host", "bytes", "al2"].iter().map(|s| s.to_string()).collect();
        let ctx = RequestContext::new(TableFields::new("t"), false, reserved, "cnt");
        (NodeSet::new(nodes), ctx)
    }

    #[test]
    fn test_aliases_skip_terms_dedup_and_avoid_fields() {
        let (mut nodes, ctx) = setup();
        apply(&mut nodes, &ctx);
        assert_eq!(
            aliases(&nodes),
            vec![None, Some("al1".into()), Some("al1".into()), Some("al2_".into())]
        );
    }

    #[test]
    fn test_second_run_keeps_aliases() {
        let (mut nodes, ctx) = setup();
        apply(&mut nodes, &ctx);
        let first = aliases(&nodes);
        apply(&mut nodes, &ctx);
        assert_eq!(aliases(&nodes), first);
    }
}
