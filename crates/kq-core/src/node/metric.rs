//! Single-value metrics (`avg`, `sum`, `min`, `max`) and the calculator used to
//! merge per-group partial values, both when sorting rows and when filling
//! the response tree.

use crate::error::{AggError, Result};
use crate::sql::quote_ident;
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricFunc {
    Avg,
    Sum,
    Min,
    Max,
}

impl MetricFunc {
    pub fn parse(kind: &str) -> Option<Self> {
        match kind {
            "avg" => Some(Self::Avg),
            "sum" => Some(Self::Sum),
            "min" => Some(Self::Min),
            "max" => Some(Self::Max),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Avg => "avg",
            Self::Sum => "sum",
            Self::Min => "min",
            Self::Max => "max",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MetricAgg {
    pub func: MetricFunc,
    pub field: String,
}

impl MetricAgg {
    pub fn parse(key: &str, func: MetricFunc, body: &Value) -> Result<Self> {
        let field = body
            .get("field")
            .and_then(Value::as_str)
            .ok_or_else(|| AggError::missing(key, func.name(), "field"))?;
        Ok(Self {
            func,
            field: field.to_string(),
        })
    }

    pub fn expression(&self) -> String {
        format!("{}({})", self.func.name(), quote_ident(&self.field))
    }
}

/// Merges partial aggregates. `avg` partials are weighted by their row count.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricCalculator {
    func: MetricFunc,
    total: f64,
    weight: f64,
    extreme: Option<f64>,
    seen: bool,
}

impl MetricCalculator {
    pub fn new(func: MetricFunc) -> Self {
        Self {
            func,
            total: 0.0,
            weight: 0.0,
            extreme: None,
            seen: false,
        }
    }

    pub fn add(&mut self, value: f64, weight: u64) {
        self.seen = true;
        match self.func {
            MetricFunc::Avg => {
                self.total += value * weight as f64;
                self.weight += weight as f64;
            }
            MetricFunc::Sum => self.total += value,
            MetricFunc::Min => {
                self.extreme = Some(self.extreme.map_or(value, |m| m.min(value)));
            }
            MetricFunc::Max => {
                self.extreme = Some(self.extreme.map_or(value, |m| m.max(value)));
            }
        }
    }

    /// `sum` over nothing is zero; the other functions have no value.
    pub fn result(&self) -> Option<f64> {
        match self.func {
            MetricFunc::Avg => (self.weight > 0.0).then(|| self.total / self.weight),
            MetricFunc::Sum => Some(self.total),
            MetricFunc::Min | MetricFunc::Max => self.extreme,
        }
    }

    pub fn is_empty(&self) -> bool {
        !self.seen
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_weighted_average() {
        let mut calc = MetricCalculator::new(MetricFunc::Avg);
        calc.add(10.0, 1);
        calc.add(20.0, 3);
        assert_eq!(calc.result(), Some(17.5));
    }

    #[test]
    fn test_min_max_sum() {
        let mut min = MetricCalculator::new(MetricFunc::Min);
        let mut max = MetricCalculator::new(MetricFunc::Max);
        let mut sum = MetricCalculator::new(MetricFunc::Sum);
        for v in [4.0, -2.0, 9.0] {
            min.add(v, 2);
            max.add(v, 2);
            sum.add(v, 2);
        }
        assert_eq!(min.result(), Some(-2.0));
        assert_eq!(max.result(), Some(9.0));
        assert_eq!(sum.result(), Some(11.0));
    }

    #[test]
    fn test_empty_results() {
        assert_eq!(MetricCalculator::new(MetricFunc::Avg).result(), None);
        assert_eq!(MetricCalculator::new(MetricFunc::Sum).result(), Some(0.0));
        assert!(MetricCalculator::new(MetricFunc::Max).is_empty());
    }

    #[test]
    fn test_parse_requires_field() {
        assert!(MetricAgg::parse("1", MetricFunc::Avg, &json!({})).is_err());
        let agg = MetricAgg::parse("1", MetricFunc::Max, &json!({"field": "@timestamp"})).unwrap();
        assert_eq!(agg.expression(), "max(`@timestamp`)");
    }
}
