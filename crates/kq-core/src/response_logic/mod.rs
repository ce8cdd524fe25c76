//! # Response Logic
//!
//! Passes over the flat rows of one table, run before the tree is rebuilt.
//! Each pass takes the whole row set and returns the new one; a pass whose
//! precondition does not hold leaves the rows alone.

pub mod blanking;
pub mod concurrent;
pub mod gap_fill;
pub mod sorting;
pub mod unmatched;

use crate::node_set::NodeSet;
use crate::row::ResultRow;
use tracing::debug;

#[derive(Debug, Clone, PartialEq)]
pub struct ResponseContext {
    pub count_field: String,
    pub complex_ordering: bool,
    /// Upper bound on synthetic histogram rows per outer group.
    pub max_gap_buckets: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponsePass {
    Sorting,
    UnmatchedFilter,
    ConcurrentFilter,
    GapFill,
    MetricBlanking,
}

impl ResponsePass {
    pub const ALL: [ResponsePass; 5] = [
        ResponsePass::Sorting,
        ResponsePass::UnmatchedFilter,
        ResponsePass::ConcurrentFilter,
        ResponsePass::GapFill,
        ResponsePass::MetricBlanking,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Sorting => "sorting",
            Self::UnmatchedFilter => "unmatched_filter",
            Self::ConcurrentFilter => "concurrent_filter",
            Self::GapFill => "gap_fill",
            Self::MetricBlanking => "metric_blanking",
        }
    }

    pub fn is_available(self, nodes: &NodeSet, ctx: &ResponseContext) -> bool {
        match self {
            Self::Sorting => ctx.complex_ordering,
            Self::UnmatchedFilter => !unmatched::units(nodes).is_empty(),
            Self::ConcurrentFilter => nodes.concurrent_runs().iter().any(|run| run.len() > 1),
            Self::GapFill => gap_fill::target(nodes).is_some(),
            Self::MetricBlanking => nodes.iter().any(|n| n.is_metric() && n.state.blanked),
        }
    }

    pub fn apply(self, rows: Vec<ResultRow>, nodes: &NodeSet, ctx: &ResponseContext) -> Vec<ResultRow> {
        match self {
            Self::Sorting => sorting::apply(rows, nodes, ctx),
            Self::UnmatchedFilter => unmatched::apply(rows, nodes, ctx),
            Self::ConcurrentFilter => concurrent::apply(rows, nodes),
            Self::GapFill => gap_fill::apply(rows, nodes, ctx),
            Self::MetricBlanking => blanking::apply(rows, nodes),
        }
    }
}

pub fn run(mut rows: Vec<ResultRow>, nodes: &NodeSet, ctx: &ResponseContext) -> Vec<ResultRow> {
    for pass in ResponsePass::ALL {
        if pass.is_available(nodes, ctx) {
            let before = rows.len();
            rows = pass.apply(rows, nodes, ctx);
            debug!(pass = pass.name(), before, after = rows.len(), "response pass");
        }
    }
    rows
}

#[cfg(test)]
pub(crate) mod fixtures {
    use crate::catalog::TableFields;
    use crate::node_set::NodeSet;
    use crate::parser::RequestParser;
    use crate::request_logic::{self, RequestContext};
    use crate::row::ResultRow;
    use chrono::Utc;
    use serde_json::Value;
    use std::collections::BTreeSet;

    use super::ResponseContext;

    /// Parse and plan a request for a single table.
    pub fn planned(request: Value) -> (NodeSet, ResponseContext) {
        let mut nodes = NodeSet::new(RequestParser::new(Utc::now()).parse(&request).unwrap());
        let mut ctx = RequestContext::new(TableFields::new("t"), false, BTreeSet::new(), "cnt");
        request_logic::run(&mut nodes, &mut ctx);
        let response = ResponseContext {
            count_field: ctx.count_alias.clone(),
            complex_ordering: ctx.complex_ordering,
            max_gap_buckets: 100,
        };
        (nodes, response)
    }

    pub fn rows(values: Value) -> Vec<ResultRow> {
        values
            .as_array()
            .unwrap()
            .iter()
            .map(|v| ResultRow::new(v.as_object().cloned().unwrap()))
            .collect()
    }
}
