//! Read access to aggregation responses.

use serde_json::{Map, Value};

use super::after_key::encode_after_key;

const KEY_BUCKETS: &str = "buckets";
const KEY_KEY: &str = "key";
const KEY_KEY_AS_STRING: &str = "key_as_string";
const KEY_DOC_COUNT: &str = "doc_count";
const KEY_AFTER_KEY: &str = "after_key";
const KEY_VALUE: &str = "value";

fn lookup<'a>(mut value: &'a Value, path: &str) -> Option<&'a Value> {
    for segment in path.split('.') {
        value = value.get(segment)?;
    }
    Some(value)
}

/// The result of one aggregation.
///
/// A missing aggregation yields an empty result rather than an error, so that
/// optional sub-aggregations can be read without checks.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregationResult {
    raw: Option<Value>,
}

impl AggregationResult {
    pub(crate) fn new(raw: Option<Value>) -> Self {
        Self { raw }
    }

    /// Returns true if the response did not contain the aggregation.
    pub fn is_empty(&self) -> bool {
        self.raw.is_none()
    }

    /// Returns the JSON of the aggregation.
    pub fn raw(&self) -> Option<&Value> {
        self.raw.as_ref()
    }

    /// Returns all buckets.
    ///
    /// Both bucket arrays and keyed bucket objects are supported; for the latter the
    /// object key becomes the bucket key.
    pub fn buckets(&self) -> Vec<Bucket> {
        match self.raw.as_ref().and_then(|raw| raw.get(KEY_BUCKETS)) {
            Some(Value::Array(buckets)) => buckets
                .iter()
                .map(|bucket| Bucket {
                    key: bucket.get(KEY_KEY).cloned().unwrap_or(Value::Null),
                    raw: bucket.clone(),
                })
                .collect(),
            Some(Value::Object(buckets)) => buckets
                .iter()
                .map(|(key, bucket)| Bucket {
                    key: Value::String(key.clone()),
                    raw: bucket.clone(),
                })
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Calls the handler for each bucket.
    pub fn for_each_bucket(&self, mut handler: impl FnMut(&Bucket)) {
        for bucket in self.buckets() {
            handler(&bucket);
        }
    }

    /// Returns the key and document count of each bucket.
    pub fn term_counts(&self) -> Vec<(String, u64)> {
        self.buckets()
            .into_iter()
            .map(|bucket| (bucket.key_as_string(), bucket.doc_count()))
            .collect()
    }

    /// Returns the first bucket.
    pub fn first_bucket(&self) -> Option<Bucket> {
        self.buckets().into_iter().next()
    }

    /// Returns the `after_key` of a composite aggregation.
    pub fn after_key(&self) -> Option<&Map<String, Value>> {
        self.raw
            .as_ref()
            .and_then(|raw| raw.get(KEY_AFTER_KEY))
            .and_then(Value::as_object)
    }

    /// Returns the `after_key` encoded as a single string, see
    /// [`AggregationBuilder::with_compound_after_key`](super::AggregationBuilder::with_compound_after_key).
    pub fn compound_after_key(&self) -> Option<String> {
        self.after_key().map(encode_after_key)
    }

    /// Returns the result of a cardinality aggregation.
    pub fn cardinality(&self) -> Option<u64> {
        self.raw
            .as_ref()
            .and_then(|raw| raw.get(KEY_VALUE))
            .and_then(Value::as_u64)
    }

    /// Returns the result of a value count aggregation.
    pub fn value_count(&self) -> Option<u64> {
        self.cardinality()
    }

    /// Returns the result of a single value metric such as `min` or `max`.
    pub fn value(&self) -> Option<f64> {
        self.raw
            .as_ref()
            .and_then(|raw| raw.get(KEY_VALUE))
            .and_then(Value::as_f64)
    }

    /// Returns a sub-aggregation, empty if missing.
    pub fn sub_aggregation(&self, name: &str) -> AggregationResult {
        Self::new(self.raw.as_ref().and_then(|raw| raw.get(name)).cloned())
    }

    /// Returns a nested sub-aggregation by dotted path, e.g. `tags.keys`.
    pub fn aggregation(&self, path: &str) -> AggregationResult {
        Self::new(self.raw.as_ref().and_then(|raw| lookup(raw, path)).cloned())
    }
}

/// One bucket of a bucket aggregation.
#[derive(Debug, Clone, PartialEq)]
pub struct Bucket {
    key: Value,
    raw: Value,
}

impl Bucket {
    /// Returns the key, an object for composite aggregations.
    pub fn key(&self) -> &Value {
        &self.key
    }

    /// Returns the key as string, preferring `key_as_string` if the server sent one.
    pub fn key_as_string(&self) -> String {
        if let Some(key) = self.raw.get(KEY_KEY_AS_STRING).and_then(Value::as_str) {
            return key.to_string();
        }
        match self.key {
            Value::String(ref key) => key.clone(),
            ref key => key.to_string(),
        }
    }

    /// Returns the number of documents in the bucket.
    pub fn doc_count(&self) -> u64 {
        self.raw
            .get(KEY_DOC_COUNT)
            .and_then(Value::as_u64)
            .unwrap_or(0)
    }

    /// Returns a sub-aggregation of the bucket, empty if missing.
    pub fn sub_aggregation(&self, name: &str) -> AggregationResult {
        AggregationResult::new(self.raw.get(name).cloned())
    }

    /// Returns a nested sub-aggregation by dotted path.
    pub fn aggregation(&self, path: &str) -> AggregationResult {
        AggregationResult::new(lookup(&self.raw, path).cloned())
    }

    /// Returns the JSON of the bucket.
    pub fn raw(&self) -> &Value {
        &self.raw
    }
}
