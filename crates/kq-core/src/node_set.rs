//! # Node Set
//!
//! The ordered node list plus the projections the passes and the query
//! builder read from it. Projections are computed on every call, so they
//! always reflect the aliases and flags as they stand.

use crate::node::filter::QueryFilter;
use crate::node::{Node, NodeKind};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeSet {
    nodes: Vec<Node>,
}

impl NodeSet {
    pub fn new(nodes: Vec<Node>) -> Self {
        Self { nodes }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter()
    }

    pub fn get(&self, idx: usize) -> Option<&Node> {
        self.nodes.get(idx)
    }

    pub fn get_mut(&mut self, idx: usize) -> Option<&mut Node> {
        self.nodes.get_mut(idx)
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Columns that identify a row's bucket at every level, in node order.
    pub fn group_fields(&self) -> Vec<String> {
        self.group_fields_before(self.nodes.len())
    }

    /// Grouping columns of the nodes that precede `idx`.
    pub fn group_fields_before(&self, idx: usize) -> Vec<String> {
        let mut fields: Vec<String> = Vec::new();
        for node in self.nodes.iter().take(idx) {
            if let Some(field) = node.group_field() {
                if !fields.iter().any(|f| f == field) {
                    fields.push(field.to_string());
                }
            }
        }
        fields
    }

    pub fn group_fields_through(&self, idx: usize) -> Vec<String> {
        self.group_fields_before(idx + 1)
    }

    /// Aliases of metric values present in rows, including blanked ones.
    pub fn metric_fields(&self) -> Vec<String> {
        self.nodes
            .iter()
            .filter(|n| n.is_metric() && (n.is_active() || n.state.blanked))
            .filter_map(|n| n.state.alias.clone())
            .collect()
    }

    /// Every column the statement selects besides the count.
    pub fn fields(&self) -> Vec<String> {
        let mut fields: Vec<String> = Vec::new();
        for node in self.nodes.iter().filter(|n| n.is_active()) {
            if let Some(field) = node.output_field() {
                if !fields.iter().any(|f| f == field) {
                    fields.push(field.to_string());
                }
            }
        }
        fields
    }

    pub fn arg_fields(&self, idx: usize) -> Vec<String> {
        self.nodes.get(idx).map(Node::arg_fields).unwrap_or_default()
    }

    /// Table attributes read by any node, deduplicated.
    pub fn all_arg_fields(&self) -> Vec<String> {
        let mut fields: Vec<String> = Vec::new();
        for idx in 0..self.nodes.len() {
            for field in self.arg_fields(idx) {
                if !fields.contains(&field) {
                    fields.push(field);
                }
            }
        }
        fields
    }

    pub fn query_filter(&self) -> Option<&QueryFilter> {
        self.nodes.iter().find_map(|n| match &n.kind {
            NodeKind::QueryFilter(q) if n.is_active() => Some(q),
            _ => None,
        })
    }

    pub fn has_effective_query(&self) -> bool {
        self.query_filter().is_some_and(QueryFilter::is_effective)
    }

    /// First leg of the aggregation `idx` belongs to. Children of a
    /// `filters` aggregation point at it as their parent.
    pub fn leg_anchor(&self, idx: usize) -> usize {
        let mut anchor = idx;
        while anchor > 0 {
            let (prev, cur) = (&self.nodes[anchor - 1], &self.nodes[anchor]);
            if prev.is_group_filter() && cur.is_group_filter() && prev.key == cur.key && prev.parent == cur.parent {
                anchor -= 1;
            } else {
                break;
            }
        }
        anchor
    }

    /// All legs of every filter aggregation, grouped, in node order.
    pub fn filter_groups(&self) -> Vec<Vec<usize>> {
        let mut groups: Vec<Vec<usize>> = Vec::new();
        for (idx, node) in self.nodes.iter().enumerate() {
            if !node.is_group_filter() {
                continue;
            }
            let anchor = self.leg_anchor(idx);
            match groups.last_mut() {
                Some(group) if group.first() == Some(&anchor) => group.push(idx),
                _ => groups.push(vec![idx]),
            }
        }
        groups
    }

    /// Active legs marked concurrent, grouped by aggregation.
    pub fn concurrent_runs(&self) -> Vec<Vec<usize>> {
        self.filter_groups()
            .into_iter()
            .map(|group| {
                group
                    .into_iter()
                    .filter(|&i| self.nodes[i].is_active() && self.nodes[i].state.concurrent)
                    .collect::<Vec<_>>()
            })
            .filter(|run| !run.is_empty())
            .collect()
    }

    /// Whether nothing of the aggregation anchored at `parent` is left.
    pub fn branch_disabled(&self, parent: usize) -> bool {
        let anchor = self.leg_anchor(parent);
        let first = &self.nodes[anchor];
        self.nodes[anchor..]
            .iter()
            .take_while(|n| n.key == first.key && n.parent == first.parent)
            .all(|n| !n.is_active())
    }

    /// Whether `node` lies inside the subtree of `ancestor`. Legs of one
    /// `filters` aggregation share their subtree.
    pub fn is_descendant(&self, node: usize, ancestor: usize) -> bool {
        let anchor = self.leg_anchor(ancestor);
        let mut current = self.nodes.get(node).and_then(|n| n.parent);
        while let Some(p) = current {
            if p == anchor {
                return true;
            }
            current = self.nodes.get(p).and_then(|n| n.parent);
        }
        false
    }

    /// Whether `node` is a leg of the aggregation anchored at `anchor` or
    /// lies below it.
    pub fn within(&self, node: usize, anchor: usize) -> bool {
        self.leg_anchor(node) == anchor || self.is_descendant(node, anchor)
    }

    /// Disable a node and everything whose enclosing branch is now empty.
    pub fn disable(&mut self, idx: usize) {
        let Some(node) = self.nodes.get_mut(idx) else {
            return;
        };
        node.state.disabled = true;
        for i in idx + 1..self.nodes.len() {
            let Some(parent) = self.nodes[i].parent else {
                continue;
            };
            if self.nodes[i].is_active() && self.branch_disabled(parent) {
                self.nodes[i].state.disabled = true;
            }
        }
    }
}
