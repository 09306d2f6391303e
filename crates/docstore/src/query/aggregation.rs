//! Builders of the `aggs` section of a search.

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Value, json};

use crate::error::StorageResult;

use super::after_key::decode_after_key;

/// Number of buckets requested by term aggregations unless given otherwise.
pub const DEFAULT_TERM_AGGREGATION_BUCKET_COUNT: usize = 25;

const TERMS: &str = "terms";
const FILTER: &str = "filter";
const NESTED: &str = "nested";
const CARDINALITY: &str = "cardinality";
const VALUE_COUNT: &str = "value_count";
const MIN: &str = "min";
const MAX: &str = "max";
const HISTOGRAM: &str = "histogram";
const DATE_RANGE: &str = "date_range";
const COMPOSITE: &str = "composite";

const KEY_AGGREGATIONS: &str = "aggs";
const KEY_FIELD: &str = "field";
const KEY_SIZE: &str = "size";
const KEY_PATH: &str = "path";
const KEY_SOURCES: &str = "sources";
const KEY_AFTER: &str = "after";

/// A named range of a date range aggregation.
#[derive(Debug, Clone, PartialEq)]
pub struct DateRange {
    key: String,
    from: Option<DateTime<Utc>>,
    to: Option<DateTime<Utc>>,
}

impl DateRange {
    /// Creates a range; `from` is inclusive, `to` exclusive and either may be open.
    pub fn new(key: &str, from: Option<DateTime<Utc>>, to: Option<DateTime<Utc>>) -> Self {
        Self {
            key: key.to_string(),
            from,
            to,
        }
    }

    fn build(&self) -> Value {
        let mut range = Map::new();
        range.insert("key".to_string(), json!(self.key));
        if let Some(from) = self.from {
            range.insert(
                "from".to_string(),
                json!(from.to_rfc3339_opts(SecondsFormat::Millis, true)),
            );
        }
        if let Some(to) = self.to {
            range.insert(
                "to".to_string(),
                json!(to.to_rfc3339_opts(SecondsFormat::Millis, true)),
            );
        }
        Value::Object(range)
    }
}

/// A node of an aggregation tree.
///
/// Cloning copies the whole tree.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregationBuilder {
    name: String,
    aggregation_type: String,
    nested_path: Option<String>,
    body: Map<String, Value>,
    sub_aggregations: Vec<AggregationBuilder>,
    sources: Vec<AggregationBuilder>,
}

impl AggregationBuilder {
    /// Creates an aggregation of any type.
    pub fn create(aggregation_type: &str, name: &str) -> Self {
        Self {
            name: name.to_string(),
            aggregation_type: aggregation_type.to_string(),
            nested_path: None,
            body: Map::new(),
            sub_aggregations: Vec::new(),
            sources: Vec::new(),
        }
    }

    /// Buckets by the terms of a field, named like the field.
    pub fn terms_of(field: &str) -> Self {
        Self::terms(field, field)
    }

    /// Buckets by the terms of a field.
    pub fn terms(name: &str, field: &str) -> Self {
        Self::create(TERMS, name)
            .field(field)
            .size(DEFAULT_TERM_AGGREGATION_BUCKET_COUNT)
    }

    /// One bucket of all documents matching the query.
    pub fn filter(name: &str, query: Value) -> Self {
        Self::create(FILTER, name).with_body(query)
    }

    /// Aggregates the objects of a nested field; sub-aggregations refer to `path.field`.
    pub fn nested(name: &str, path: &str) -> Self {
        let mut builder = Self::create(NESTED, name);
        builder.nested_path = Some(path.to_string());
        builder
    }

    /// Approximate number of distinct values.
    pub fn cardinality(name: &str, field: &str) -> Self {
        Self::create(CARDINALITY, name).field(field)
    }

    /// Number of values.
    pub fn value_count(name: &str, field: &str) -> Self {
        Self::create(VALUE_COUNT, name).field(field)
    }

    /// Smallest value.
    pub fn min(name: &str, field: &str) -> Self {
        Self::create(MIN, name).field(field)
    }

    /// Largest value.
    pub fn max(name: &str, field: &str) -> Self {
        Self::create(MAX, name).field(field)
    }

    /// Buckets by fixed-size intervals of a numeric field.
    pub fn histogram(name: &str, field: &str, interval: f64) -> Self {
        Self::create(HISTOGRAM, name)
            .field(field)
            .param("interval", interval)
    }

    /// Buckets by named date ranges; buckets are keyed by range name.
    pub fn date_range(name: &str, field: &str, ranges: &[DateRange]) -> Self {
        Self::create(DATE_RANGE, name)
            .field(field)
            .param("keyed", true)
            .param(
                "ranges",
                Value::Array(ranges.iter().map(DateRange::build).collect()),
            )
    }

    /// Pages through all bucket combinations of its sources, `size` buckets at a time.
    pub fn composite(name: &str, size: usize) -> Self {
        Self::create(COMPOSITE, name).size(size)
    }

    /// Sets the field to aggregate.
    pub fn field(self, field: &str) -> Self {
        self.param(KEY_FIELD, field)
    }

    /// Sets the number of buckets.
    pub fn size(self, size: usize) -> Self {
        self.param(KEY_SIZE, size)
    }

    /// Sets a parameter of the body.
    pub fn param(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.body.insert(name.to_string(), value.into());
        self
    }

    /// Replaces the body. Non-object values are ignored.
    pub fn with_body(mut self, body: Value) -> Self {
        if let Value::Object(body) = body {
            self.body = body;
        }
        self
    }

    /// Adds an aggregation computed for each bucket.
    pub fn sub_aggregation(mut self, aggregation: AggregationBuilder) -> Self {
        self.sub_aggregations.push(aggregation);
        self
    }

    /// Adds a source of a composite aggregation.
    pub fn source(mut self, source: AggregationBuilder) -> Self {
        self.sources.push(source);
        self
    }

    /// Continues a composite aggregation after the given `after_key` object.
    pub fn after_key(self, after_key: Map<String, Value>) -> Self {
        self.param(KEY_AFTER, Value::Object(after_key))
    }

    /// Continues a composite aggregation after a compound after-key.
    ///
    /// An empty key starts from the beginning.
    pub fn with_compound_after_key(self, key: &str) -> StorageResult<Self> {
        if key.is_empty() {
            return Ok(self);
        }
        Ok(self.after_key(decode_after_key(key)?))
    }

    /// Returns the name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the sub-aggregations.
    pub fn sub_aggregations(&self) -> &[AggregationBuilder] {
        &self.sub_aggregations
    }

    fn build_source(&self) -> Value {
        json!({ self.name.as_str(): { self.aggregation_type.as_str(): self.body } })
    }

    /// Renders the aggregation, without its name.
    pub fn build(&self) -> Value {
        let mut aggregation = Map::new();
        match self.nested_path {
            Some(ref path) => {
                aggregation.insert(NESTED.to_string(), json!({ KEY_PATH: path }));
            }
            None => {
                let mut body = self.body.clone();
                if !self.sources.is_empty() {
                    body.insert(
                        KEY_SOURCES.to_string(),
                        Value::Array(self.sources.iter().map(Self::build_source).collect()),
                    );
                }
                aggregation.insert(self.aggregation_type.clone(), Value::Object(body));
            }
        }

        if !self.sub_aggregations.is_empty() {
            let sub_aggregations: Map<String, Value> = self
                .sub_aggregations
                .iter()
                .map(|sub| (sub.name.clone(), sub.build()))
                .collect();
            aggregation.insert(KEY_AGGREGATIONS.to_string(), Value::Object(sub_aggregations));
        }

        Value::Object(aggregation)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::query::after_key::encode_after_key;

    #[test]
    fn test_terms_with_sub_aggregation() {
        let aggregation = AggregationBuilder::terms_of("tenant")
            .sub_aggregation(AggregationBuilder::cardinality("names", "name"));

        assert_eq!(aggregation.name(), "tenant");
        assert_eq!(
            aggregation.build(),
            json!({
                "terms": {"field": "tenant", "size": 25},
                "aggs": {"names": {"cardinality": {"field": "name"}}}
            })
        );
    }

    #[test]
    fn test_nested_and_filter() {
        assert_eq!(
            AggregationBuilder::nested("tags", "tags")
                .sub_aggregation(AggregationBuilder::terms("keys", "tags.key").size(5))
                .build(),
            json!({
                "nested": {"path": "tags"},
                "aggs": {"keys": {"terms": {"field": "tags.key", "size": 5}}}
            })
        );
        assert_eq!(
            AggregationBuilder::filter("adults", json!({"range": {"age": {"gte": 18}}})).build(),
            json!({"filter": {"range": {"age": {"gte": 18}}}})
        );
    }

    #[test]
    fn test_composite_with_after_key() {
        let after = json!({"name": "Bob"});
        let Value::Object(after) = after else {
            unreachable!()
        };

        let aggregation = AggregationBuilder::composite("pages", 2)
            .source(AggregationBuilder::create("terms", "name").field("name"))
            .with_compound_after_key(&encode_after_key(&after))
            .unwrap();

        assert_eq!(
            aggregation.build(),
            json!({"composite": {
                "size": 2,
                "after": {"name": "Bob"},
                "sources": [{"name": {"terms": {"field": "name"}}}]
            }})
        );
        assert!(
            AggregationBuilder::composite("pages", 2)
                .with_compound_after_key("%%%")
                .is_err()
        );
    }

    #[test]
    fn test_date_range() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let aggregation = AggregationBuilder::date_range(
            "created",
            "created",
            &[
                DateRange::new("before", None, Some(start)),
                DateRange::new("after", Some(start), None),
            ],
        );

        assert_eq!(
            aggregation.build(),
            json!({"date_range": {
                "field": "created",
                "keyed": true,
                "ranges": [
                    {"key": "before", "to": "2024-01-01T00:00:00.000Z"},
                    {"key": "after", "from": "2024-01-01T00:00:00.000Z"}
                ]
            }})
        );
    }
}
