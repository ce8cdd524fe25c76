//! # Nodes
//!
//! One [`Node`] per aggregation, filter leg, metric or query clause of the
//! request tree. Nodes are created by the parser, mutated in place by the
//! request passes, then read while the statement is rendered and while rows
//! are folded back into the response tree.

pub mod filter;
pub mod histogram;
pub mod metric;
pub mod range;
pub mod term;

use crate::error::{AggError, Result};
use crate::filter::FilterCompiler;
use crate::row::{value_to_f64, ResultRow};
use crate::sql::{Direction, SqlRequest};
use crate::tree::{Aggregations, PathSegment};
use serde_json::Value;

use self::filter::{FilterShape, GroupFilter, QueryFilter};
use self::histogram::{fill_histogram_request, DateHistogramAgg, Grid, HistogramAgg};
use self::metric::{MetricAgg, MetricFunc};
use self::range::RangeAgg;
use self::term::TermAgg;

/// What a node did with a row.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// The row belongs to this bucket; deeper nodes continue inside it.
    Descend(PathSegment),
    /// Leaf contribution (metrics); no bucket to descend into.
    Stay,
    /// The row is not part of this branch. Siblings still see it.
    Skip,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Metric(MetricAgg),
    Term(TermAgg),
    Histogram(HistogramAgg),
    DateHistogram(DateHistogramAgg),
    Range(RangeAgg),
    DateRange(RangeAgg),
    GroupFilter(GroupFilter),
    QueryFilter(QueryFilter),
}

/// Mutable per-table decisions taken by the request passes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeState {
    pub disabled: bool,
    /// A disabled metric that still prints, with a null value.
    pub blanked: bool,
    pub direct: bool,
    pub concurrent: bool,
    pub alias: Option<String>,
    /// ORDER BY contribution of a `terms` node.
    pub sql_order: Option<(String, Direction)>,
    /// Index of the metric a `terms` node is ordered by, when active.
    pub order_metric: Option<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    /// Aggregation name. All legs of one `filters` aggregation share it.
    pub key: String,
    /// Enclosing bucket node; for children of `filters` the first leg.
    pub parent: Option<usize>,
    pub depth: usize,
    pub has_children: bool,
    pub kind: NodeKind,
    pub state: NodeState,
}

impl Node {
    fn new(key: &str, parent: Option<usize>, depth: usize, kind: NodeKind) -> Self {
        Self {
            key: key.to_string(),
            parent,
            depth,
            has_children: false,
            kind,
            state: NodeState::default(),
        }
    }

    /// Build the node for one aggregation object. Kinds that are not known
    /// aggregations are treated as filter buckets named after the kind.
    pub fn build(
        key: &str,
        kind: &str,
        body: &Value,
        parent: Option<usize>,
        depth: usize,
        compiler: &FilterCompiler,
    ) -> Result<Self> {
        let node_kind = match kind {
            "terms" => NodeKind::Term(TermAgg::parse(key, body)?),
            "histogram" => NodeKind::Histogram(HistogramAgg::parse(key, body)?),
            "date_histogram" => NodeKind::DateHistogram(DateHistogramAgg::parse(key, body, compiler.now())?),
            "range" => NodeKind::Range(RangeAgg::parse(key, body)?),
            "date_range" => NodeKind::DateRange(RangeAgg::parse_dates(key, body, compiler.now())?),
            "query" => NodeKind::QueryFilter(QueryFilter {
                compiled: compiler.compile(body)?,
                body: body.clone(),
            }),
            other => match MetricFunc::parse(other) {
                Some(func) => NodeKind::Metric(MetricAgg::parse(key, func, body)?),
                None => NodeKind::GroupFilter(GroupFilter {
                    shape: FilterShape::Named,
                    leg: 0,
                    labels: vec![other.to_string()],
                    compiled: compiler.compile(body),
                    body: body.clone(),
                }),
            },
        };
        Ok(Self::new(key, parent, depth, node_kind))
    }

    /// One leg of `filters` or the single bucket of `filter`.
    pub fn filter_leg(
        key: &str,
        shape: FilterShape,
        leg: usize,
        labels: Vec<String>,
        body: &Value,
        parent: Option<usize>,
        depth: usize,
        compiler: &FilterCompiler,
    ) -> Self {
        let kind = NodeKind::GroupFilter(GroupFilter {
            shape,
            leg,
            labels,
            compiled: compiler.compile(body),
            body: body.clone(),
        });
        Self::new(key, parent, depth, kind)
    }

    pub fn kind_name(&self) -> &'static str {
        match &self.kind {
            NodeKind::Metric(m) => m.func.name(),
            NodeKind::Term(_) => "terms",
            NodeKind::Histogram(_) => "histogram",
            NodeKind::DateHistogram(_) => "date_histogram",
            NodeKind::Range(_) => "range",
            NodeKind::DateRange(_) => "date_range",
            NodeKind::GroupFilter(f) if f.shape == FilterShape::Single => "filter",
            NodeKind::GroupFilter(_) => "filters",
            NodeKind::QueryFilter(_) => "query",
        }
    }

    pub fn is_active(&self) -> bool {
        !self.state.disabled
    }

    pub fn is_metric(&self) -> bool {
        matches!(self.kind, NodeKind::Metric(_))
    }

    pub fn is_query(&self) -> bool {
        matches!(self.kind, NodeKind::QueryFilter(_))
    }

    pub fn is_group_filter(&self) -> bool {
        matches!(self.kind, NodeKind::GroupFilter(_))
    }

    /// Grouping levels whose loss would silently merge buckets.
    pub fn is_value_group(&self) -> bool {
        matches!(
            self.kind,
            NodeKind::Term(_) | NodeKind::Histogram(_) | NodeKind::DateHistogram(_)
        )
    }

    /// Levels whose bucket order can be requested.
    pub fn is_ordering_dim(&self) -> bool {
        self.is_value_group()
    }

    /// Produces a computed expression that needs a generated alias.
    pub fn is_aliasable(&self) -> bool {
        !matches!(self.kind, NodeKind::Term(_) | NodeKind::QueryFilter(_))
    }

    pub fn is_histogram(&self) -> bool {
        matches!(self.kind, NodeKind::Histogram(_) | NodeKind::DateHistogram(_))
    }

    /// Visited while building the response: active nodes plus blanked metrics.
    pub fn in_response(&self) -> bool {
        !self.is_query() && (self.is_active() || self.state.blanked)
    }

    pub fn group_filter(&self) -> Option<&GroupFilter> {
        match &self.kind {
            NodeKind::GroupFilter(f) => Some(f),
            _ => None,
        }
    }

    pub fn expression(&self) -> Option<String> {
        match &self.kind {
            NodeKind::Metric(m) => Some(m.expression()),
            NodeKind::Histogram(h) => Some(h.expression()),
            NodeKind::DateHistogram(h) => Some(h.expression()),
            NodeKind::Range(r) | NodeKind::DateRange(r) => Some(r.expression()),
            NodeKind::GroupFilter(f) => f.expression(),
            NodeKind::Term(_) | NodeKind::QueryFilter(_) => None,
        }
    }

    /// Column this node reads back from result rows.
    pub fn output_field(&self) -> Option<&str> {
        match &self.kind {
            NodeKind::Term(t) => Some(&t.field),
            NodeKind::QueryFilter(_) => None,
            _ => self.state.alias.as_deref(),
        }
    }

    /// Column identifying this node's bucket in a row, if it groups the statement.
    pub fn group_field(&self) -> Option<&str> {
        if !self.is_active() {
            return None;
        }
        match &self.kind {
            NodeKind::Metric(_) | NodeKind::QueryFilter(_) => None,
            NodeKind::GroupFilter(_) if self.state.direct => None,
            _ => self.output_field(),
        }
    }

    /// Underlying table attributes this node reads.
    pub fn arg_fields(&self) -> Vec<String> {
        match &self.kind {
            NodeKind::Metric(m) => vec![m.field.clone()],
            NodeKind::Term(t) => vec![t.field.clone()],
            NodeKind::Histogram(h) => vec![h.field.clone()],
            NodeKind::DateHistogram(h) => vec![h.field.clone()],
            NodeKind::Range(r) | NodeKind::DateRange(r) => vec![r.field.clone()],
            NodeKind::GroupFilter(f) => f.compiled().map(|c| c.fields.clone()).unwrap_or_default(),
            NodeKind::QueryFilter(_) => Vec::new(),
        }
    }

    /// Histogram that must show empty intervals.
    pub fn is_extendable(&self) -> bool {
        match &self.kind {
            NodeKind::Histogram(h) => h.min_doc_count == 0,
            NodeKind::DateHistogram(h) => h.min_doc_count == 0,
            _ => false,
        }
    }

    /// Interval grid and declared bounds (as grid indices) of a histogram node.
    pub fn gap_grid(&self) -> Option<(Grid, Option<(i64, i64)>)> {
        match &self.kind {
            NodeKind::Histogram(h) => Some((h.grid(), h.bound_indices())),
            NodeKind::DateHistogram(h) => Some((h.grid(), h.bound_indices())),
            _ => None,
        }
    }

    pub fn fill_in_request(&self, req: &mut SqlRequest) {
        let alias = self.state.alias.as_deref();
        match &self.kind {
            NodeKind::Metric(m) => {
                if let Some(alias) = alias {
                    req.add_field(&m.expression(), Some(alias));
                }
            }
            NodeKind::Term(t) => t.fill_request(self.state.sql_order.as_ref(), req),
            NodeKind::Histogram(h) => {
                if let Some(alias) = alias {
                    fill_histogram_request(&h.expression(), alias, req);
                }
            }
            NodeKind::DateHistogram(h) => {
                if let Some(alias) = alias {
                    fill_histogram_request(&h.expression(), alias, req);
                }
            }
            NodeKind::Range(r) | NodeKind::DateRange(r) => {
                if let Some(alias) = alias {
                    req.add_field(&r.expression(), Some(alias));
                    req.add_group(alias);
                }
            }
            NodeKind::GroupFilter(f) => f.fill_request(self.state.direct, alias, req),
            NodeKind::QueryFilter(q) => q.fill_request(req),
        }
    }

    /// Fold one row into the tree level `aggs`. `metric_key` is the key of
    /// the metric a `terms` node is ordered by.
    pub fn fill_in_response(
        &self,
        row: &ResultRow,
        count_field: &str,
        metric_key: Option<&str>,
        aggs: &mut Aggregations,
    ) -> Step {
        let key = self.key.as_str();
        let alias = self.state.alias.as_deref().unwrap_or_default();
        match &self.kind {
            NodeKind::Metric(m) => {
                if let Some(calc) = aggs.metric(key, m.func) {
                    let count = row.count(count_field);
                    if let Some(value) = row.get(alias).and_then(value_to_f64).filter(|_| count > 0) {
                        calc.add(value, count);
                    }
                }
                Step::Stay
            }
            NodeKind::Term(t) => t.fill_response(key, metric_key, row, count_field, aggs),
            NodeKind::Histogram(h) => h.fill_response(key, alias, row, count_field, aggs),
            NodeKind::DateHistogram(h) => h.fill_response(key, alias, row, count_field, aggs),
            NodeKind::Range(r) | NodeKind::DateRange(r) => r.fill_response(key, alias, row, count_field, aggs),
            NodeKind::GroupFilter(f) => f.fill_response(
                key,
                self.state.direct,
                self.state.alias.as_deref(),
                row,
                count_field,
                aggs,
            ),
            NodeKind::QueryFilter(_) => Step::Stay,
        }
    }
}

pub(crate) fn unknown_kind(agg: &str, kinds: &[&String]) -> AggError {
    let found = if kinds.is_empty() {
        "none".to_string()
    } else {
        kinds.iter().map(|k| k.as_str()).collect::<Vec<_>>().join(", ")
    };
    AggError::UnknownKind {
        agg: agg.to_string(),
        found,
    }
}
