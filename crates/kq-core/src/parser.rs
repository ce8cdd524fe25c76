//! # Request Parser
//!
//! Flattens a dashboard search body into the ordered node list.
//!
//! ```text
//! {"query": {...}, "aggs": {"2": {"terms": {...}, "aggs": {"1": {"avg": {...}}}}}}
//!   -> [query, 2:terms, 1:avg]
//! ```
//!
//! Order is pre-order: the root `query` first, then aggregations. Inside
//! every `aggs` block named keys come before purely numeric ones, which are
//! taken in numeric order. Each node remembers its enclosing bucket node and
//! its depth so the response builder can rebuild the tree.

use crate::error::{AggError, Result};
use crate::filter::FilterCompiler;
use crate::node::filter::FilterShape;
use crate::node::term::OrderTarget;
use crate::node::{unknown_kind, Node, NodeKind};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

const AGGS_KEYS: [&str; 2] = ["aggs", "aggregations"];

pub struct RequestParser {
    compiler: FilterCompiler,
}

impl RequestParser {
    /// `now` anchors every relative date in the request.
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            compiler: FilterCompiler::new(now),
        }
    }

    pub fn parse(&self, request: &Value) -> Result<Vec<Node>> {
        let root = request
            .as_object()
            .ok_or_else(|| AggError::MalformedRequest("request body must be an object".into()))?;
        let mut nodes = Vec::new();

        match root.get("query") {
            None | Some(Value::Null) => {}
            Some(query @ Value::Object(_)) => {
                nodes.push(Node::build("query", "query", query, None, 0, &self.compiler)?);
            }
            Some(_) => return Err(AggError::MalformedRequest("'query' must be an object".into())),
        }

        if let Some(aggs) = aggs_block(root, "request")? {
            self.walk(aggs, None, 0, &mut nodes)?;
        }
        validate_orders(&nodes)?;
        Ok(nodes)
    }

    fn walk(&self, aggs: &Map<String, Value>, parent: Option<usize>, depth: usize, nodes: &mut Vec<Node>) -> Result<()> {
        for key in ordered_keys(aggs) {
            let body = aggs
                .get(key)
                .and_then(Value::as_object)
                .ok_or_else(|| AggError::MalformedRequest(format!("aggregation '{}' must be an object", key)))?;
            let kinds: Vec<&String> = body
                .keys()
                .filter(|k| !AGGS_KEYS.contains(&k.as_str()) && k.as_str() != "meta")
                .collect();
            let [kind] = kinds.as_slice() else {
                return Err(unknown_kind(key, &kinds));
            };
            let params = &body[kind.as_str()];
            let children = aggs_block(body, key)?;

            let anchor = nodes.len();
            match kind.as_str() {
                "filters" => self.push_legs(key, params, parent, depth, nodes)?,
                "filter" => nodes.push(Node::filter_leg(
                    key,
                    FilterShape::Single,
                    0,
                    vec![key.to_string()],
                    params,
                    parent,
                    depth,
                    &self.compiler,
                )),
                "query" => {
                    return Err(AggError::invalid(key, "query", "query", "only allowed at the top level"));
                }
                _ => {
                    let node = Node::build(key, kind, params, parent, depth, &self.compiler)?;
                    if node.is_metric() && children.is_some_and(|c| !c.is_empty()) {
                        return Err(AggError::invalid(key, kind, "aggs", "metrics cannot have sub-aggregations"));
                    }
                    nodes.push(node);
                }
            }

            if let Some(children) = children.filter(|c| !c.is_empty()) {
                for node in nodes[anchor..].iter_mut() {
                    node.has_children = true;
                }
                self.walk(children, Some(anchor), depth + 1, nodes)?;
            }
        }
        Ok(())
    }

    /// One node per leg of a `filters` aggregation, in declaration order.
    fn push_legs(&self, key: &str, params: &Value, parent: Option<usize>, depth: usize, nodes: &mut Vec<Node>) -> Result<()> {
        let legs: Vec<(String, &Value)> = match params.get("filters") {
            Some(Value::Object(named)) => named.iter().map(|(label, clause)| (label.clone(), clause)).collect(),
            Some(Value::Array(items)) => items
                .iter()
                .enumerate()
                .map(|(i, clause)| (i.to_string(), clause))
                .collect(),
            Some(_) => return Err(AggError::invalid(key, "filters", "filters", "expected an object or a list")),
            None => return Err(AggError::missing(key, "filters", "filters")),
        };
        if legs.is_empty() {
            return Err(AggError::invalid(key, "filters", "filters", "at least one filter is required"));
        }
        let shape = if params.get("filters").is_some_and(Value::is_array) {
            FilterShape::Anonymous
        } else {
            FilterShape::Named
        };
        let labels: Vec<String> = legs.iter().map(|(label, _)| label.clone()).collect();
        for (leg, (_, clause)) in legs.into_iter().enumerate() {
            nodes.push(Node::filter_leg(key, shape, leg, labels.clone(), clause, parent, depth, &self.compiler));
        }
        Ok(())
    }
}

fn aggs_block<'a>(body: &'a Map<String, Value>, owner: &str) -> Result<Option<&'a Map<String, Value>>> {
    let mut found = None;
    for name in AGGS_KEYS {
        match body.get(name) {
            None | Some(Value::Null) => {}
            Some(Value::Object(map)) => found = Some(map),
            Some(_) => {
                return Err(AggError::MalformedRequest(format!("'{}' of '{}' must be an object", name, owner)));
            }
        }
    }
    Ok(found)
}

/// Named keys in declaration order, then numeric keys ascending.
fn ordered_keys(aggs: &Map<String, Value>) -> Vec<&str> {
    let mut named = Vec::new();
    let mut numeric = Vec::new();
    for key in aggs.keys() {
        match key.parse::<u64>() {
            Ok(n) => numeric.push((n, key.as_str())),
            Err(_) => named.push(key.as_str()),
        }
    }
    numeric.sort_by_key(|(n, _)| *n);
    named.extend(numeric.into_iter().map(|(_, key)| key));
    named
}

/// A terms order that names a metric must name one of its own metric children.
fn validate_orders(nodes: &[Node]) -> Result<()> {
    for (idx, node) in nodes.iter().enumerate() {
        let NodeKind::Term(term) = &node.kind else {
            continue;
        };
        let OrderTarget::Metric(name) = &term.order.target else {
            continue;
        };
        let found = nodes
            .iter()
            .any(|n| n.parent == Some(idx) && n.is_metric() && &n.key == name);
        if !found {
            return Err(AggError::invalid(
                &node.key,
                "terms",
                "order",
                format!("'{}' is not a metric sub-aggregation", name),
            ));
        }
    }
    Ok(())
}
