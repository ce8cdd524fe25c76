//! # Request Logic
//!
//! Passes run over a per-table copy of the node list before the statement is
//! rendered. Each pass mutates node state in place and either lets the
//! pipeline continue or reports that this table cannot answer the request.

pub mod aliasing;
pub mod field_detection;
pub mod filtering;
pub mod ordering;

use crate::catalog::TableFields;
use crate::node_set::NodeSet;
use std::collections::BTreeSet;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassOutcome {
    Continue,
    /// Leave this table out of the search. Carries the reason.
    Skip(String),
}

/// Facts about the table being planned, shared by every pass.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestContext {
    pub table: TableFields,
    pub multi_table: bool,
    /// Names generated aliases must avoid: every field of every table.
    pub reserved: BTreeSet<String>,
    pub count_alias: String,
    /// Set by the ordering pass: bucket order is settled after the query.
    pub complex_ordering: bool,
}

impl RequestContext {
    pub fn new(table: TableFields, multi_table: bool, reserved: BTreeSet<String>, count_alias: &str) -> Self {
        let mut alias = count_alias.to_string();
        while reserved.contains(&alias) {
            alias.push('_');
        }
        Self {
            table,
            multi_table,
            reserved,
            count_alias: alias,
            complex_ordering: false,
        }
    }

    pub fn table_name(&self) -> &str {
        &self.table.name
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestPass {
    FieldDetection,
    Aliasing,
    Filtering,
    Ordering,
}

impl RequestPass {
    /// Execution order.
    pub const ALL: [RequestPass; 4] = [
        RequestPass::FieldDetection,
        RequestPass::Aliasing,
        RequestPass::Filtering,
        RequestPass::Ordering,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::FieldDetection => "field_detection",
            Self::Aliasing => "aliasing",
            Self::Filtering => "filtering",
            Self::Ordering => "ordering",
        }
    }

    pub fn is_available(self, ctx: &RequestContext) -> bool {
        match self {
            Self::FieldDetection => ctx.multi_table,
            _ => true,
        }
    }

    pub fn apply(self, nodes: &mut NodeSet, ctx: &mut RequestContext) -> PassOutcome {
        match self {
            Self::FieldDetection => field_detection::apply(nodes, ctx),
            Self::Aliasing => aliasing::apply(nodes, ctx),
            Self::Filtering => filtering::apply(nodes, ctx),
            Self::Ordering => ordering::apply(nodes, ctx),
        }
    }
}

/// Run every available pass in order, stopping at the first skip.
pub fn run(nodes: &mut NodeSet, ctx: &mut RequestContext) -> PassOutcome {
    for pass in RequestPass::ALL {
        if !pass.is_available(ctx) {
            continue;
        }
        let outcome = pass.apply(nodes, ctx);
        if let PassOutcome::Skip(reason) = &outcome {
            debug!(table = ctx.table_name(), pass = pass.name(), %reason, "table skipped");
            return outcome;
        }
    }
    PassOutcome::Continue
}
