//! # Response Tree
//!
//! Order-preserving nested aggregation output. Rows are folded in one at a
//! time; entries are only ever created or accumulated, never replaced.

use crate::node::metric::{MetricCalculator, MetricFunc};
use crate::row::{compare_values, number_value};
use crate::sql::Direction;
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub enum AggOutput {
    Buckets(BucketList),
    Single(Bucket),
    Metric(MetricCalculator),
}

/// One step from an [`Aggregations`] level into a bucket's sub-aggregations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    Bucket { agg: String, index: usize },
    Single { agg: String },
}

#[derive(Debug, Clone, Default)]
pub struct Aggregations {
    entries: Vec<(String, AggOutput)>,
}

impl Aggregations {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&AggOutput> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    fn entry(&mut self, key: &str, init: impl FnOnce() -> AggOutput) -> &mut AggOutput {
        let idx = match self.entries.iter().position(|(k, _)| k == key) {
            Some(idx) => idx,
            None => {
                self.entries.push((key.to_string(), init()));
                self.entries.len() - 1
            }
        };
        &mut self.entries[idx].1
    }

    pub fn buckets(&mut self, key: &str, init: impl FnOnce() -> BucketList) -> Option<&mut BucketList> {
        match self.entry(key, || AggOutput::Buckets(init())) {
            AggOutput::Buckets(list) => Some(list),
            _ => None,
        }
    }

    pub fn single(&mut self, key: &str) -> Option<&mut Bucket> {
        match self.entry(key, || AggOutput::Single(Bucket::new(key.to_string(), None))) {
            AggOutput::Single(bucket) => Some(bucket),
            _ => None,
        }
    }

    pub fn metric(&mut self, key: &str, func: MetricFunc) -> Option<&mut MetricCalculator> {
        match self.entry(key, || AggOutput::Metric(MetricCalculator::new(func))) {
            AggOutput::Metric(calc) => Some(calc),
            _ => None,
        }
    }

    /// Sub-aggregations of the bucket a segment points at.
    pub fn descend(&mut self, segment: &PathSegment) -> Option<&mut Aggregations> {
        let (agg, index) = match segment {
            PathSegment::Bucket { agg, index } => (agg, Some(*index)),
            PathSegment::Single { agg } => (agg, None),
        };
        let slot = self.entries.iter_mut().find(|(k, _)| k == agg).map(|(_, v)| v)?;
        match (slot, index) {
            (AggOutput::Buckets(list), Some(i)) => list.entries.get_mut(i).map(|b| &mut b.sub),
            (AggOutput::Single(bucket), None) => Some(&mut bucket.sub),
            _ => None,
        }
    }

    /// Follow a whole path from this level.
    pub fn at_path(&mut self, path: &[PathSegment]) -> Option<&mut Aggregations> {
        let mut current = self;
        for segment in path {
            current = current.descend(segment)?;
        }
        Some(current)
    }

    /// Apply ordering, pruning and size limits, innermost levels first.
    pub fn finalize(&mut self) {
        for (_, output) in self.entries.iter_mut() {
            match output {
                AggOutput::Buckets(list) => list.finalize(),
                AggOutput::Single(bucket) => bucket.sub.finalize(),
                AggOutput::Metric(_) => {}
            }
        }
    }

    pub fn to_json(&self) -> Value {
        let mut out = Map::new();
        for (key, output) in &self.entries {
            out.insert(key.clone(), output.to_json());
        }
        Value::Object(out)
    }

    fn write_into(&self, out: &mut Map<String, Value>) {
        for (key, output) in &self.entries {
            out.insert(key.clone(), output.to_json());
        }
    }
}

impl AggOutput {
    fn to_json(&self) -> Value {
        match self {
            AggOutput::Buckets(list) => list.to_json(),
            AggOutput::Single(bucket) => bucket.to_json(false),
            AggOutput::Metric(calc) => {
                let value = calc.result().map(number_value).unwrap_or(Value::Null);
                serde_json::json!({ "value": value })
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListShape {
    /// `"buckets": [...]`
    Array,
    /// `"buckets": {"name": {...}}`
    Keyed,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BucketSort {
    Key(Direction),
    Count(Direction),
    Metric { name: String, direction: Direction },
}

/// What happens to a bucket list once every row is in.
#[derive(Debug, Clone, Default)]
pub struct ListFinish {
    pub sort: Option<BucketSort>,
    pub size: Option<usize>,
    pub min_doc_count: u64,
    /// Emit `doc_count_error_upper_bound` and `sum_other_doc_count`.
    pub terms_meta: bool,
}

#[derive(Debug, Clone)]
pub struct BucketList {
    shape: ListShape,
    entries: Vec<Bucket>,
    index: HashMap<String, usize>,
    finish: ListFinish,
    other_doc_count: u64,
}

impl BucketList {
    pub fn new(shape: ListShape, finish: ListFinish) -> Self {
        Self {
            shape,
            entries: Vec::new(),
            index: HashMap::new(),
            finish,
            other_doc_count: 0,
        }
    }

    /// A list whose buckets all exist up front, in declaration order.
    pub fn preset(shape: ListShape, buckets: Vec<Bucket>) -> Self {
        let mut list = Self::new(shape, ListFinish::default());
        for bucket in buckets {
            list.index.insert(bucket.id.clone(), list.entries.len());
            list.entries.push(bucket);
        }
        list
    }

    pub fn find_or_insert(&mut self, id: String, make: impl FnOnce(String) -> Bucket) -> usize {
        if let Some(&idx) = self.index.get(&id) {
            return idx;
        }
        let idx = self.entries.len();
        self.index.insert(id.clone(), idx);
        self.entries.push(make(id));
        idx
    }

    pub fn bucket_mut(&mut self, idx: usize) -> Option<&mut Bucket> {
        self.entries.get_mut(idx)
    }

    pub fn entries(&self) -> &[Bucket] {
        &self.entries
    }

    pub fn other_doc_count(&self) -> u64 {
        self.other_doc_count
    }

    fn finalize(&mut self) {
        for bucket in self.entries.iter_mut() {
            bucket.sub.finalize();
        }
        if let Some(sort) = &self.finish.sort {
            self.entries.sort_by(|a, b| compare_buckets(a, b, sort));
        }
        if self.finish.min_doc_count > 0 {
            let min = self.finish.min_doc_count;
            self.entries.retain(|b| b.doc_count >= min);
        }
        if let Some(size) = self.finish.size {
            if self.entries.len() > size {
                self.other_doc_count += self.entries[size..].iter().map(|b| b.doc_count).sum::<u64>();
                self.entries.truncate(size);
            }
        }
        self.index = self
            .entries
            .iter()
            .enumerate()
            .map(|(i, b)| (b.id.clone(), i))
            .collect();
    }

    fn to_json(&self) -> Value {
        let mut out = Map::new();
        if self.finish.terms_meta {
            out.insert("doc_count_error_upper_bound".into(), Value::from(0));
            out.insert("sum_other_doc_count".into(), Value::from(self.other_doc_count));
        }
        let buckets = match self.shape {
            ListShape::Array => Value::Array(self.entries.iter().map(|b| b.to_json(true)).collect()),
            ListShape::Keyed => Value::Object(
                self.entries
                    .iter()
                    .map(|b| (b.id.clone(), b.to_json(false)))
                    .collect(),
            ),
        };
        out.insert("buckets".into(), buckets);
        Value::Object(out)
    }
}

fn metric_of(bucket: &Bucket, name: &str) -> Option<f64> {
    match bucket.sub.get(name) {
        Some(AggOutput::Metric(calc)) => calc.result(),
        _ => None,
    }
}

fn compare_buckets(a: &Bucket, b: &Bucket, sort: &BucketSort) -> Ordering {
    let key_order = || {
        compare_values(
            a.key.as_ref().unwrap_or(&Value::Null),
            b.key.as_ref().unwrap_or(&Value::Null),
        )
    };
    let directed = |ord: Ordering, direction: Direction| match direction {
        Direction::Asc => ord,
        Direction::Desc => ord.reverse(),
    };
    match sort {
        BucketSort::Key(direction) => directed(key_order(), *direction),
        BucketSort::Count(direction) => {
            directed(a.doc_count.cmp(&b.doc_count), *direction).then_with(key_order)
        }
        BucketSort::Metric { name, direction } => match (metric_of(a, name), metric_of(b, name)) {
            (Some(x), Some(y)) => directed(x.partial_cmp(&y).unwrap_or(Ordering::Equal), *direction)
                .then_with(key_order),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => key_order(),
        },
    }
}

#[derive(Debug, Clone)]
pub struct Bucket {
    /// Identity inside its list; also the object key of keyed output.
    pub id: String,
    pub key: Option<Value>,
    /// Extra attributes printed between the key and `doc_count`.
    pub extra: Vec<(String, Value)>,
    pub doc_count: u64,
    pub sub: Aggregations,
}

impl Bucket {
    pub fn new(id: String, key: Option<Value>) -> Self {
        Self {
            id,
            key,
            extra: Vec::new(),
            doc_count: 0,
            sub: Aggregations::default(),
        }
    }

    pub fn with_extra(mut self, name: &str, value: Value) -> Self {
        self.extra.push((name.to_string(), value));
        self
    }

    fn to_json(&self, with_key: bool) -> Value {
        let mut out = Map::new();
        if with_key {
            if let Some(key) = &self.key {
                out.insert("key".into(), key.clone());
            }
        }
        for (name, value) in &self.extra {
            out.insert(name.clone(), value.clone());
        }
        out.insert("doc_count".into(), Value::from(self.doc_count));
        self.sub.write_into(&mut out);
        Value::Object(out)
    }
}
