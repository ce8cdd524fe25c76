//! `terms`: one bucket per distinct value of a field.

use crate::error::{AggError, Result};
use crate::row::{value_key, ResultRow};
use crate::sql::{quote_ident, Direction, SqlRequest};
use crate::tree::{Aggregations, Bucket, BucketList, BucketSort, ListFinish, ListShape, PathSegment};
use serde_json::Value;

use super::Step;

pub const DEFAULT_SIZE: usize = 10;

#[derive(Debug, Clone, PartialEq)]
pub enum OrderTarget {
    Key,
    Count,
    /// Name of a sibling metric sub-aggregation.
    Metric(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct TermOrder {
    pub target: OrderTarget,
    pub direction: Direction,
    /// The request spelled the order out rather than relying on the default.
    pub explicit: bool,
}

impl Default for TermOrder {
    fn default() -> Self {
        Self {
            target: OrderTarget::Count,
            direction: Direction::Desc,
            explicit: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TermAgg {
    pub field: String,
    pub size: usize,
    pub min_doc_count: u64,
    pub order: TermOrder,
}

impl TermAgg {
    pub fn parse(key: &str, body: &Value) -> Result<Self> {
        let field = body
            .get("field")
            .and_then(Value::as_str)
            .ok_or_else(|| AggError::missing(key, "terms", "field"))?;
        let size = match body.get("size") {
            None | Some(Value::Null) => DEFAULT_SIZE,
            Some(v) => v
                .as_u64()
                .map(|s| s as usize)
                .ok_or_else(|| AggError::invalid(key, "terms", "size", "expected a non-negative integer"))?,
        };
        let min_doc_count = body.get("min_doc_count").and_then(Value::as_u64).unwrap_or(1);
        let order = match body.get("order") {
            None | Some(Value::Null) => TermOrder::default(),
            Some(order) => parse_order(key, order)?,
        };
        Ok(Self {
            field: field.to_string(),
            size,
            min_doc_count,
            order,
        })
    }

    pub fn fill_request(&self, sql_order: Option<&(String, Direction)>, req: &mut SqlRequest) {
        let field = quote_ident(&self.field);
        req.add_field(&field, None);
        req.add_group(&field);
        if let Some((target, direction)) = sql_order {
            req.add_order(target, *direction);
        }
    }

    /// `metric_key` is set when ordering by a metric that is active for this table.
    pub fn fill_response(
        &self,
        key: &str,
        metric_key: Option<&str>,
        row: &ResultRow,
        count_field: &str,
        aggs: &mut Aggregations,
    ) -> Step {
        let sort = match (&self.order.target, metric_key) {
            (OrderTarget::Key, _) => BucketSort::Key(self.order.direction),
            (OrderTarget::Metric(_), Some(name)) => BucketSort::Metric {
                name: name.to_string(),
                direction: self.order.direction,
            },
            _ => BucketSort::Count(self.order.direction),
        };
        let finish = ListFinish {
            sort: Some(sort),
            size: Some(self.size),
            min_doc_count: self.min_doc_count,
            terms_meta: true,
        };
        let Some(list) = aggs.buckets(key, || BucketList::new(ListShape::Array, finish)) else {
            return Step::Skip;
        };
        let Some(value) = row.get(&self.field) else {
            return Step::Skip;
        };
        let idx = list.find_or_insert(value_key(value), |id| Bucket::new(id, Some(value.clone())));
        if let Some(bucket) = list.bucket_mut(idx) {
            bucket.doc_count += row.count(count_field);
        }
        Step::Descend(PathSegment::Bucket {
            agg: key.to_string(),
            index: idx,
        })
    }
}

fn parse_order(key: &str, order: &Value) -> Result<TermOrder> {
    let entry = match order {
        Value::Object(map) => map.iter().next(),
        Value::Array(items) => items.first().and_then(Value::as_object).and_then(|m| m.iter().next()),
        _ => None,
    };
    let (target, direction) =
        entry.ok_or_else(|| AggError::invalid(key, "terms", "order", "expected {\"<target>\": \"asc|desc\"}"))?;
    let direction = direction
        .as_str()
        .and_then(Direction::parse)
        .ok_or_else(|| AggError::invalid(key, "terms", "order", "direction must be asc or desc"))?;
    let target = match target.as_str() {
        "_key" | "_term" => OrderTarget::Key,
        "_count" => OrderTarget::Count,
        metric => OrderTarget::Metric(metric.trim_end_matches(".value").to_string()),
    };
    Ok(TermOrder {
        target,
        direction,
        explicit: true,
    })
}
