//! `range` and `date_range`.
//!
//! All range boundaries are sorted into one `INTERVAL()` call, so each row
//! carries the index of the segment between two consecutive boundaries. A
//! segment lies either fully inside or fully outside every declared range.

use crate::date::{format_millis, parse_date_millis};
use crate::error::{AggError, Result};
use crate::row::{format_number, number_value, value_to_f64, ResultRow};
use crate::sql::quote_ident;
use crate::tree::{Aggregations, Bucket, BucketList, ListShape, PathSegment};
use chrono::{DateTime, Utc};
use serde_json::Value;

use super::Step;

#[derive(Debug, Clone, PartialEq)]
pub struct RangeSpec {
    pub key: String,
    /// Inclusive lower bound, in the unit stored by the daemon.
    pub from: Option<f64>,
    /// Exclusive upper bound.
    pub to: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RangeAgg {
    pub field: String,
    pub ranges: Vec<RangeSpec>,
    pub keyed: bool,
    /// Boundaries are epoch seconds and buckets report millis.
    pub dates: bool,
    boundaries: Vec<f64>,
}

impl RangeAgg {
    pub fn parse(key: &str, body: &Value) -> Result<Self> {
        let kind = "range";
        let (field, items, keyed) = common(key, kind, body)?;
        let mut ranges = Vec::with_capacity(items.len());
        for item in items {
            let bound = |name: &str| match item.get(name) {
                None | Some(Value::Null) => Ok(None),
                Some(v) => value_to_f64(v)
                    .map(Some)
                    .ok_or_else(|| AggError::invalid(key, kind, "ranges", format!("'{}' is not a number", name))),
            };
            let (from, to) = (bound("from")?, bound("to")?);
            let label = item
                .get("key")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| {
                    format!(
                        "{}-{}",
                        from.map_or("*".to_string(), es_double),
                        to.map_or("*".to_string(), es_double)
                    )
                });
            ranges.push(RangeSpec { key: label, from, to });
        }
        Ok(Self::new(field, ranges, keyed, false))
    }

    pub fn parse_dates(key: &str, body: &Value, now: DateTime<Utc>) -> Result<Self> {
        let kind = "date_range";
        let (field, items, keyed) = common(key, kind, body)?;
        let format = body.get("format").and_then(Value::as_str);
        let mut ranges = Vec::with_capacity(items.len());
        for item in items {
            let bound = |name: &str| match item.get(name) {
                None | Some(Value::Null) => Ok(None),
                Some(v) => parse_date_millis(v, format, now)
                    .map(Some)
                    .map_err(|e| AggError::invalid(key, kind, "ranges", e.to_string())),
            };
            let (from, to) = (bound("from")?, bound("to")?);
            if from.is_none() && to.is_none() {
                return Err(AggError::invalid(key, kind, "ranges", "every range needs 'from' or 'to'"));
            }
            let label = item
                .get("key")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| {
                    format!(
                        "{}-{}",
                        from.map_or("*".to_string(), format_millis),
                        to.map_or("*".to_string(), format_millis)
                    )
                });
            ranges.push(RangeSpec {
                key: label,
                from: from.map(|ms| ms.div_euclid(1000) as f64),
                to: to.map(|ms| ms.div_euclid(1000) as f64),
            });
        }
        Ok(Self::new(field, ranges, keyed, true))
    }

    fn new(field: &str, ranges: Vec<RangeSpec>, keyed: bool, dates: bool) -> Self {
        let mut boundaries: Vec<f64> = ranges
            .iter()
            .flat_map(|r| [r.from, r.to])
            .flatten()
            .collect();
        boundaries.sort_by(|a, b| a.total_cmp(b));
        boundaries.dedup();
        Self {
            field: field.to_string(),
            ranges,
            keyed,
            dates,
            boundaries,
        }
    }

    pub fn expression(&self) -> String {
        if self.boundaries.is_empty() {
            return "0".to_string();
        }
        let points: Vec<String> = self.boundaries.iter().map(|b| format_number(*b)).collect();
        format!("INTERVAL({}, {})", quote_ident(&self.field), points.join(", "))
    }

    /// Whether every value of segment `segment` falls inside `range`.
    pub fn contains(&self, range: &RangeSpec, segment: usize) -> bool {
        let lo = segment.checked_sub(1).and_then(|i| self.boundaries.get(i)).copied();
        let hi = self.boundaries.get(segment).copied();
        let from_ok = match (range.from, lo) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(from), Some(lo)) => lo >= from,
        };
        let to_ok = match (range.to, hi) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(to), Some(hi)) => hi <= to,
        };
        from_ok && to_ok
    }

    fn empty_buckets(&self) -> Vec<Bucket> {
        self.ranges
            .iter()
            .map(|r| {
                let mut bucket = Bucket::new(r.key.clone(), Some(Value::String(r.key.clone())));
                if let Some(from) = r.from {
                    bucket = self.with_bound(bucket, "from", from);
                }
                if let Some(to) = r.to {
                    bucket = self.with_bound(bucket, "to", to);
                }
                bucket
            })
            .collect()
    }

    fn with_bound(&self, bucket: Bucket, name: &str, value: f64) -> Bucket {
        if self.dates {
            let ms = value as i64 * 1000;
            bucket
                .with_extra(name, Value::from(ms))
                .with_extra(&format!("{}_as_string", name), Value::String(format_millis(ms)))
        } else {
            bucket.with_extra(name, number_value(value))
        }
    }

    /// Counts go to every containing range; sub-aggregations follow the first.
    pub fn fill_response(&self, key: &str, alias: &str, row: &ResultRow, count_field: &str, aggs: &mut Aggregations) -> Step {
        let shape = if self.keyed { ListShape::Keyed } else { ListShape::Array };
        let Some(list) = aggs.buckets(key, || BucketList::preset(shape, self.empty_buckets())) else {
            return Step::Skip;
        };
        let Some(segment) = row.get(alias).and_then(value_to_f64) else {
            return Step::Skip;
        };
        let segment = segment.max(0.0) as usize;
        let count = row.count(count_field);
        let mut first = None;
        for (idx, range) in self.ranges.iter().enumerate() {
            if self.contains(range, segment) {
                if let Some(bucket) = list.bucket_mut(idx) {
                    bucket.doc_count += count;
                }
                first.get_or_insert(idx);
            }
        }
        match first {
            Some(index) => Step::Descend(PathSegment::Bucket {
                agg: key.to_string(),
                index,
            }),
            None => Step::Skip,
        }
    }
}

fn common<'a>(key: &str, kind: &str, body: &'a Value) -> Result<(&'a str, &'a Vec<Value>, bool)> {
    let field = body
        .get("field")
        .and_then(Value::as_str)
        .ok_or_else(|| AggError::missing(key, kind, "field"))?;
    let items = body
        .get("ranges")
        .and_then(Value::as_array)
        .ok_or_else(|| AggError::missing(key, kind, "ranges"))?;
    if items.is_empty() || items.iter().any(|r| !r.is_object()) {
        return Err(AggError::invalid(key, kind, "ranges", "expected a non-empty list of objects"));
    }
    let keyed = body.get("keyed").and_then(Value::as_bool).unwrap_or(false);
    Ok((field, items, keyed))
}

/// `10.0`, `2.5`: how generated range keys print numbers.
fn es_double(v: f64) -> String {
    if v.fract() == 0.0 {
        format!("{:.1}", v)
    } else {
        format!("{}", v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn bytes_ranges() -> RangeAgg {
        RangeAgg::parse(
            "4",
            &json!({"field": "bytes", "ranges": [{"to": 100}, {"from": 100, "to": 1000}, {"from": 50}]}),
        )
        .unwrap()
    }

    #[test]
    fn test_expression_sorts_boundaries() {
        assert_eq!(bytes_ranges().expression(), "INTERVAL(bytes, 50, 100, 1000)");
    }

    #[test]
    fn test_segments_map_to_overlapping_ranges() {
        let agg = bytes_ranges();
        let hits = |segment| -> Vec<&str> {
            agg.ranges
                .iter()
                .filter(|r| agg.contains(r, segment))
                .map(|r| r.key.as_str())
                .collect()
        };
        assert_eq!(hits(0), vec!["*-100.0"]);
        assert_eq!(hits(1), vec!["*-100.0", "50.0-*"]);
        assert_eq!(hits(2), vec!["100.0-1000.0", "50.0-*"]);
        assert_eq!(hits(3), vec!["50.0-*"]);
    }

    #[test]
    fn test_response_counts_every_containing_range() {
        let agg = bytes_ranges();
        let mut aggs = Aggregations::default();
        let row = ResultRow::new(json!({"al1": 1, "cnt": 4}).as_object().cloned().unwrap());
        let step = agg.fill_response("4", "al1", &row, "cnt", &mut aggs);
        assert_eq!(step, Step::Descend(PathSegment::Bucket { agg: "4".into(), index: 0 }));
        assert_eq!(
            aggs.to_json(),
            json!({"4": {"buckets": [
                {"key": "*-100.0", "to": 100, "doc_count": 4},
                {"key": "100.0-1000.0", "from": 100, "to": 1000, "doc_count": 0},
                {"key": "50.0-*", "from": 50, "doc_count": 4}
            ]}})
        );
    }

    #[test]
    fn test_date_range_validation_and_keys() {
        let now = DateTime::parse_from_rfc3339("2024-01-02T00:00:00Z")
            .map(|d| d.with_timezone(&Utc))
            .unwrap();
        assert!(RangeAgg::parse_dates("5", &json!({"field": "ts", "ranges": [{}]}), now).is_err());
        let agg = RangeAgg::parse_dates(
            "5",
            &json!({"field": "ts", "ranges": [{"from": "now-1d/d", "to": "now"}]}),
            now,
        )
        .unwrap();
        assert_eq!(agg.expression(), "INTERVAL(ts, 1704067200, 1704153600)");
        assert_eq!(agg.ranges[0].key, "2024-01-01T00:00:00.000Z-2024-01-02T00:00:00.000Z");
    }
}
