//! Approximate nearest neighbor search over dense vectors.

use serde_json::{Map, Value, json};

use super::bool_query::BoolQueryBuilder;

/// Parameters of a `knn` search.
#[derive(Debug, Clone, PartialEq)]
pub struct NearestNeighborsSearch {
    field: String,
    query_vector: Vec<f32>,
    k: usize,
    num_candidates: usize,
    filter: Option<BoolQueryBuilder>,
}

impl NearestNeighborsSearch {
    /// Searches the `k` nearest of `num_candidates` candidates per shard.
    ///
    /// `num_candidates` must not be smaller than `k`; the server rejects the search otherwise.
    pub fn new(field: &str, query_vector: Vec<f32>, k: usize, num_candidates: usize) -> Self {
        Self {
            field: field.to_string(),
            query_vector,
            k,
            num_candidates,
            filter: None,
        }
    }

    /// Restricts the candidates. `None` is ignored.
    pub fn filter(mut self, clause: impl Into<Option<Value>>) -> Self {
        if let Some(clause) = clause.into() {
            self.filter
                .get_or_insert_with(BoolQueryBuilder::new)
                .filter(clause);
        }
        self
    }

    /// Renders the `knn` section.
    pub fn build(&self) -> Value {
        let mut knn = Map::new();
        knn.insert("field".to_string(), json!(self.field));
        knn.insert("k".to_string(), json!(self.k));
        knn.insert("num_candidates".to_string(), json!(self.num_candidates));
        if let Some(filter) = self.filter.as_ref().and_then(BoolQueryBuilder::build) {
            knn.insert("filter".to_string(), filter);
        }
        knn.insert("query_vector".to_string(), json!(self.query_vector));
        Value::Object(knn)
    }
}
