//! Filter buckets (`filters`, `filter`) and the top-level `query`.
//!
//! A filter bucket is either *direct*, folded into the statement's WHERE
//! clause, or *indirect*, selected as `IF(expr, 1, 0)` and grouped on so
//! each row says whether it matched.

use crate::error::FilterError;
use crate::filter::{has_filter_data, CompiledFilter};
use crate::row::ResultRow;
use crate::sql::SqlRequest;
use crate::tree::{Aggregations, Bucket, BucketList, ListShape, PathSegment};
use serde_json::Value;

use super::Step;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterShape {
    /// A leg of `filters` declared as an object: keyed buckets.
    Named,
    /// A leg of `filters` declared as a list: array buckets.
    Anonymous,
    /// The `filter` aggregation: one bucket, no list.
    Single,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GroupFilter {
    pub shape: FilterShape,
    /// Position of this leg among `labels`.
    pub leg: usize,
    /// Labels of every leg declared by the same aggregation.
    pub labels: Vec<String>,
    pub body: Value,
    pub compiled: std::result::Result<Option<CompiledFilter>, FilterError>,
}

impl GroupFilter {
    pub fn label(&self) -> &str {
        self.labels.get(self.leg).map(String::as_str).unwrap_or_default()
    }

    pub fn is_named(&self) -> bool {
        !matches!(self.shape, FilterShape::Anonymous)
    }

    pub fn compiled(&self) -> Option<&CompiledFilter> {
        self.compiled.as_ref().ok().and_then(Option::as_ref)
    }

    /// The leg compiled to no restriction at all.
    pub fn matches_all(&self) -> bool {
        matches!(self.compiled, Ok(None))
    }

    /// Selected column for the indirect form. A match-all leg selects a
    /// constant so concurrent legs can still be told apart per row.
    pub fn expression(&self) -> Option<String> {
        match &self.compiled {
            Ok(Some(c)) => Some(format!("IF({}, 1, 0)", c.expr)),
            Ok(None) => Some("1".to_string()),
            Err(_) => None,
        }
    }

    pub fn fill_request(&self, direct: bool, alias: Option<&str>, req: &mut SqlRequest) {
        if direct {
            if let Some(compiled) = self.compiled() {
                req.add_where(&compiled.expr);
            }
        } else if let (Some(alias), Some(expr)) = (alias, self.expression()) {
            req.add_field(&expr, Some(alias));
            req.add_group(alias);
        }
    }

    pub fn fill_response(
        &self,
        key: &str,
        direct: bool,
        alias: Option<&str>,
        row: &ResultRow,
        count_field: &str,
        aggs: &mut Aggregations,
    ) -> Step {
        let matched = direct
            || match alias {
                Some(alias) => row.flag(alias),
                None => self.matches_all(),
            };
        let segment = match self.shape {
            FilterShape::Single => {
                let Some(bucket) = aggs.single(key) else {
                    return Step::Skip;
                };
                if matched {
                    bucket.doc_count += row.count(count_field);
                }
                PathSegment::Single { agg: key.to_string() }
            }
            FilterShape::Named | FilterShape::Anonymous => {
                let shape = if self.shape == FilterShape::Named {
                    ListShape::Keyed
                } else {
                    ListShape::Array
                };
                let legs = || -> Vec<Bucket> {
                    self.labels
                        .iter()
                        .map(|label| Bucket::new(label.clone(), None))
                        .collect()
                };
                let Some(list) = aggs.buckets(key, || BucketList::preset(shape, legs())) else {
                    return Step::Skip;
                };
                if matched {
                    if let Some(bucket) = list.bucket_mut(self.leg) {
                        bucket.doc_count += row.count(count_field);
                    }
                }
                PathSegment::Bucket {
                    agg: key.to_string(),
                    index: self.leg,
                }
            }
        };
        if matched {
            Step::Descend(segment)
        } else {
            Step::Skip
        }
    }
}

/// The request's top-level `query`, always applied as WHERE.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryFilter {
    pub body: Value,
    pub compiled: Option<CompiledFilter>,
}

impl QueryFilter {
    /// Whether the query restricts anything once compiled.
    pub fn is_effective(&self) -> bool {
        self.compiled.is_some() && has_filter_data(&self.body)
    }

    pub fn fill_request(&self, req: &mut SqlRequest) {
        if let Some(compiled) = self.compiled.as_ref().filter(|_| self.is_effective()) {
            req.add_where(&compiled.expr);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::FilterCompiler;
    use crate::row::RowOrigin;
    use chrono::Utc;
    use serde_json::json;

    fn leg(shape: FilterShape, leg: usize, labels: &[&str], body: Value) -> GroupFilter {
        GroupFilter {
            shape,
            leg,
            labels: labels.iter().map(|s| s.to_string()).collect(),
            compiled: FilterCompiler::new(Utc::now()).compile(&body),
            body,
        }
    }

    fn row(v: Value, origin: RowOrigin) -> ResultRow {
        ResultRow::synthetic(v.as_object().cloned().unwrap(), origin)
    }

    #[test]
    fn test_direct_and_indirect_requests() {
        let f = leg(FilterShape::Named, 0, &["ok"], json!({"term": {"status": 200}}));
        let mut req = SqlRequest::new("t", "cnt");
        f.fill_request(true, Some("al1"), &mut req);
        assert_eq!(req.render(), "SELECT count(*) AS cnt FROM t WHERE status = 200 LIMIT 0,1000");

        let mut req = SqlRequest::new("t", "cnt");
        f.fill_request(false, Some("al1"), &mut req);
        assert_eq!(
            req.render(),
            "SELECT IF(status = 200, 1, 0) AS al1, count(*) AS cnt FROM t GROUP BY al1 LIMIT 0,1000"
        );
    }

    #[test]
    fn test_match_all_leg_selects_constant() {
        let f = leg(FilterShape::Named, 0, &["all"], json!({"match_all": {}}));
        let mut req = SqlRequest::new("t", "cnt");
        f.fill_request(false, Some("al1"), &mut req);
        assert_eq!(req.render(), "SELECT 1 AS al1, count(*) AS cnt FROM t GROUP BY al1 LIMIT 0,1000");
        let mut req = SqlRequest::new("t", "cnt");
        f.fill_request(true, Some("al1"), &mut req);
        assert_eq!(req.render(), "SELECT count(*) AS cnt FROM t LIMIT 0,1000");
    }

    #[test]
    fn test_all_legs_appear_with_zero_counts() {
        let f = leg(FilterShape::Named, 1, &["ok", "err"], json!({"term": {"status": 500}}));
        let mut aggs = Aggregations::default();
        let step = f.fill_response("3", false, Some("al2"), &row(json!({"al2": 1, "cnt": 5}), RowOrigin::Engine), "cnt", &mut aggs);
        assert_eq!(step, Step::Descend(PathSegment::Bucket { agg: "3".into(), index: 1 }));
        assert_eq!(
            aggs.to_json(),
            json!({"3": {"buckets": {"ok": {"doc_count": 0}, "err": {"doc_count": 5}}}})
        );
    }

    #[test]
    fn test_unmatched_row_skips_only_the_filter() {
        let f = leg(FilterShape::Single, 0, &["f"], json!({"term": {"a": 1}}));
        let mut aggs = Aggregations::default();
        let placeholder = row(json!({"al1": 0, "cnt": 3}), RowOrigin::Placeholder);
        assert_eq!(f.fill_response("f", false, Some("al1"), &placeholder, "cnt", &mut aggs), Step::Skip);
        let unmatched = row(json!({"al1": 0, "cnt": 2}), RowOrigin::Engine);
        assert_eq!(f.fill_response("f", false, Some("al1"), &unmatched, "cnt", &mut aggs), Step::Skip);
        assert_eq!(aggs.to_json(), json!({"f": {"doc_count": 0}}));
    }

    #[test]
    fn test_query_filter_effectiveness() {
        let compiler = FilterCompiler::new(Utc::now());
        let body = json!({"bool": {"must": [{"match_all": {}}]}});
        let q = QueryFilter {
            compiled: compiler.compile(&body).unwrap(),
            body,
        };
        assert!(!q.is_effective());

        let body = json!({"bool": {"filter": [{"term": {"host": "a"}}]}});
        let q = QueryFilter {
            compiled: compiler.compile(&body).unwrap(),
            body,
        };
        assert!(q.is_effective());
        let mut req = SqlRequest::new("t", "cnt");
        q.fill_request(&mut req);
        assert_eq!(req.render(), "SELECT count(*) AS cnt FROM t WHERE host = 'a' LIMIT 0,1000");
    }
}
