//! `histogram` and `date_histogram`.
//!
//! Both bucket a field into fixed intervals computed in SQL. Calendar months,
//! quarters and years are not fixed-width, so those buckets are computed as
//! `YYYYMM` integers and converted back to epoch millis when the response is
//! built.

use crate::date::{format_millis, millis_to_year_month, parse_date_millis, parse_fixed_interval, year_month_to_millis};
use crate::error::{AggError, Result};
use crate::row::{format_number, number_value, value_key, value_to_f64, ResultRow};
use crate::sql::{quote_ident, Direction, SqlRequest};
use crate::tree::{Aggregations, Bucket, BucketList, BucketSort, ListFinish, ListShape, PathSegment};
use chrono::{DateTime, Utc};
use serde_json::Value;

use super::Step;

/// Monday 1970-01-05 00:00 UTC; weeks are aligned to it.
const WEEK_OFFSET_SECS: i64 = 4 * 86_400;

#[derive(Debug, Clone, PartialEq)]
pub struct HistogramAgg {
    pub field: String,
    pub interval: f64,
    pub offset: f64,
    pub min_doc_count: u64,
    pub extended_bounds: Option<(f64, f64)>,
}

impl HistogramAgg {
    pub fn parse(key: &str, body: &Value) -> Result<Self> {
        let field = body
            .get("field")
            .and_then(Value::as_str)
            .ok_or_else(|| AggError::missing(key, "histogram", "field"))?;
        let interval = body
            .get("interval")
            .ok_or_else(|| AggError::missing(key, "histogram", "interval"))?;
        let interval = value_to_f64(interval)
            .filter(|i| *i > 0.0)
            .ok_or_else(|| AggError::invalid(key, "histogram", "interval", "must be a positive number"))?;
        let offset = body.get("offset").and_then(value_to_f64).unwrap_or(0.0);
        let extended_bounds = match body.get("extended_bounds") {
            None | Some(Value::Null) => None,
            Some(bounds) => {
                let min = bounds.get("min").and_then(value_to_f64);
                let max = bounds.get("max").and_then(value_to_f64);
                match (min, max) {
                    (Some(min), Some(max)) if min <= max => Some((min, max)),
                    _ => {
                        return Err(AggError::invalid(
                            key,
                            "histogram",
                            "extended_bounds",
                            "expected numeric min <= max",
                        ))
                    }
                }
            }
        };
        Ok(Self {
            field: field.to_string(),
            interval,
            offset,
            min_doc_count: body.get("min_doc_count").and_then(Value::as_u64).unwrap_or(0),
            extended_bounds,
        })
    }

    pub fn expression(&self) -> String {
        let field = quote_ident(&self.field);
        let interval = format_number(self.interval);
        if self.offset == 0.0 {
            format!("FLOOR({}/{})*{}", field, interval, interval)
        } else {
            let offset = format_number(self.offset);
            format!("FLOOR(({}-{})/{})*{}+{}", field, offset, interval, interval, offset)
        }
    }

    pub fn grid(&self) -> Grid {
        Grid::Linear {
            width: self.interval,
            offset: self.offset,
        }
    }

    /// Declared bounds as grid indices.
    pub fn bound_indices(&self) -> Option<(i64, i64)> {
        let grid = self.grid();
        let (min, max) = self.extended_bounds?;
        Some((grid.floor_index(min)?, grid.floor_index(max)?))
    }

    pub fn fill_response(&self, key: &str, alias: &str, row: &ResultRow, count_field: &str, aggs: &mut Aggregations) -> Step {
        fill_histogram(key, self.min_doc_count, row, count_field, aggs, || {
            let raw = row.get(alias).and_then(value_to_f64)?;
            Some((number_value(raw), None))
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateInterval {
    /// Fixed-width buckets of `width` seconds, shifted by `offset` seconds.
    Seconds { width: i64, offset: i64 },
    /// Calendar buckets of 1, 3 or 12 months.
    Months(i64),
}

impl DateInterval {
    pub fn calendar(raw: &str) -> Option<Self> {
        let fixed = |width| Some(Self::Seconds { width, offset: 0 });
        match raw {
            "1m" | "minute" => fixed(60),
            "1h" | "hour" => fixed(3_600),
            "1d" | "day" => fixed(86_400),
            "1w" | "week" => Some(Self::Seconds {
                width: 7 * 86_400,
                offset: WEEK_OFFSET_SECS,
            }),
            "1M" | "month" => Some(Self::Months(1)),
            "1q" | "quarter" => Some(Self::Months(3)),
            "1y" | "year" => Some(Self::Months(12)),
            _ => None,
        }
    }

    /// Fixed intervals must be a whole number of seconds.
    pub fn fixed(raw: &str) -> Option<Self> {
        let millis = parse_fixed_interval(raw)?;
        (millis % 1000 == 0).then_some(Self::Seconds {
            width: millis / 1000,
            offset: 0,
        })
    }

    pub fn expression(&self, field: &str) -> String {
        let field = quote_ident(field);
        match *self {
            Self::Seconds { width, offset: 0 } => format!("FLOOR({}/{})*{}", field, width, width),
            Self::Seconds { width, offset } => {
                format!("FLOOR(({}-{})/{})*{}+{}", field, offset, width, width, offset)
            }
            Self::Months(1) => format!("YEARMONTH({})", field),
            Self::Months(12) => format!("YEAR({})*100+1", field),
            Self::Months(n) => format!(
                "YEAR({f})*100+FLOOR((MONTH({f})-1)/{n})*{n}+1",
                f = field,
                n = n
            ),
        }
    }

    /// Convert a bucket value computed by [`expression`](Self::expression) to epoch millis.
    pub fn to_millis(&self, raw: f64) -> Option<i64> {
        match self {
            Self::Seconds { .. } => Some(raw as i64 * 1000),
            Self::Months(_) => year_month_to_millis(raw as i64),
        }
    }

    /// The bucket value containing an instant.
    pub fn from_millis(&self, ms: i64) -> Option<f64> {
        match *self {
            Self::Seconds { width, offset } => {
                let secs = ms.div_euclid(1000);
                Some(((secs - offset).div_euclid(width) * width + offset) as f64)
            }
            Self::Months(n) => {
                let months = year_month_index(millis_to_year_month(ms)?);
                Some(months_to_year_month(months - months.rem_euclid(n)) as f64)
            }
        }
    }

    pub fn grid(&self) -> Grid {
        match *self {
            Self::Seconds { width, offset } => Grid::Linear {
                width: width as f64,
                offset: offset as f64,
            },
            Self::Months(n) => Grid::Months(n),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DateHistogramAgg {
    pub field: String,
    pub interval: DateInterval,
    pub min_doc_count: u64,
    /// Epoch millis.
    pub extended_bounds: Option<(i64, i64)>,
}

impl DateHistogramAgg {
    pub fn parse(key: &str, body: &Value, now: DateTime<Utc>) -> Result<Self> {
        let kind = "date_histogram";
        let field = body
            .get("field")
            .and_then(Value::as_str)
            .ok_or_else(|| AggError::missing(key, kind, "field"))?;
        let calendar = body.get("calendar_interval").and_then(Value::as_str);
        let fixed = body.get("fixed_interval").and_then(Value::as_str);
        let interval = match (calendar, fixed) {
            (Some(raw), None) => DateInterval::calendar(raw)
                .ok_or_else(|| AggError::invalid(key, kind, "calendar_interval", format!("unsupported '{}'", raw)))?,
            (None, Some(raw)) => DateInterval::fixed(raw)
                .ok_or_else(|| AggError::invalid(key, kind, "fixed_interval", format!("unsupported '{}'", raw)))?,
            (None, None) => return Err(AggError::missing(key, kind, "calendar_interval")),
            (Some(_), Some(_)) => {
                return Err(AggError::invalid(
                    key,
                    kind,
                    "fixed_interval",
                    "only one of calendar_interval and fixed_interval may be set",
                ))
            }
        };
        let extended_bounds = match body.get("extended_bounds") {
            None | Some(Value::Null) => None,
            Some(bounds) => {
                let format = body.get("format").and_then(Value::as_str);
                let parse = |name: &str| {
                    bounds
                        .get(name)
                        .map(|v| parse_date_millis(v, format, now))
                        .transpose()
                        .map_err(|e| AggError::invalid(key, kind, "extended_bounds", e.to_string()))
                };
                match (parse("min")?, parse("max")?) {
                    (Some(min), Some(max)) if min <= max => Some((min, max)),
                    _ => return Err(AggError::invalid(key, kind, "extended_bounds", "expected min <= max")),
                }
            }
        };
        Ok(Self {
            field: field.to_string(),
            interval,
            min_doc_count: body.get("min_doc_count").and_then(Value::as_u64).unwrap_or(0),
            extended_bounds,
        })
    }

    pub fn expression(&self) -> String {
        self.interval.expression(&self.field)
    }

    pub fn grid(&self) -> Grid {
        self.interval.grid()
    }

    pub fn bound_indices(&self) -> Option<(i64, i64)> {
        let grid = self.grid();
        let (min, max) = self.extended_bounds?;
        let min = grid.floor_index(self.interval.from_millis(min)?)?;
        let max = grid.floor_index(self.interval.from_millis(max)?)?;
        Some((min, max))
    }

    pub fn fill_response(&self, key: &str, alias: &str, row: &ResultRow, count_field: &str, aggs: &mut Aggregations) -> Step {
        fill_histogram(key, self.min_doc_count, row, count_field, aggs, || {
            let raw = row.get(alias).and_then(value_to_f64)?;
            let ms = self.interval.to_millis(raw)?;
            Some((Value::from(ms), Some(format_millis(ms))))
        })
    }
}

pub(crate) fn fill_histogram_request(expr: &str, alias: &str, req: &mut SqlRequest) {
    req.add_field(expr, Some(alias));
    req.add_group(alias);
    req.add_order(alias, Direction::Asc);
}

fn fill_histogram(
    key: &str,
    min_doc_count: u64,
    row: &ResultRow,
    count_field: &str,
    aggs: &mut Aggregations,
    bucket_key: impl FnOnce() -> Option<(Value, Option<String>)>,
) -> Step {
    let finish = ListFinish {
        sort: Some(BucketSort::Key(Direction::Asc)),
        size: None,
        min_doc_count,
        terms_meta: false,
    };
    let Some(list) = aggs.buckets(key, || BucketList::new(ListShape::Array, finish)) else {
        return Step::Skip;
    };
    let Some((value, as_string)) = bucket_key() else {
        return Step::Skip;
    };
    let idx = list.find_or_insert(value_key(&value), |id| {
        let bucket = Bucket::new(id, Some(value));
        match as_string {
            Some(text) => bucket.with_extra("key_as_string", Value::String(text)),
            None => bucket,
        }
    });
    if let Some(bucket) = list.bucket_mut(idx) {
        bucket.doc_count += row.count(count_field);
    }
    Step::Descend(PathSegment::Bucket {
        agg: key.to_string(),
        index: idx,
    })
}

/// Bucket positions as integers, for walking every interval between two values.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Grid {
    Linear { width: f64, offset: f64 },
    /// `YYYYMM` values stepping by this many months.
    Months(i64),
}

impl Grid {
    /// Index of a value that already sits on the grid.
    pub fn index_of(&self, raw: f64) -> Option<i64> {
        match *self {
            Grid::Linear { width, offset } => Some(((raw - offset) / width).round() as i64),
            Grid::Months(n) => Some(year_month_index(raw as i64).div_euclid(n)),
        }
    }

    /// Index of the bucket containing an arbitrary value.
    pub fn floor_index(&self, raw: f64) -> Option<i64> {
        match *self {
            Grid::Linear { width, offset } => Some(((raw - offset) / width).floor() as i64),
            Grid::Months(_) => self.index_of(raw),
        }
    }

    pub fn value_at(&self, index: i64) -> Value {
        match *self {
            Grid::Linear { width, offset } => number_value(index as f64 * width + offset),
            Grid::Months(n) => Value::from(months_to_year_month(index * n)),
        }
    }
}

fn year_month_index(year_month: i64) -> i64 {
    year_month.div_euclid(100) * 12 + year_month.rem_euclid(100) - 1
}

fn months_to_year_month(months: i64) -> i64 {
    months.div_euclid(12) * 100 + months.rem_euclid(12) + 1
}
