//! Inner hits returned for each collapsed group.

use serde_json::{Map, Value, json};

use super::sort::SortOrder;

/// Builds one entry of `collapse.inner_hits`.
#[derive(Debug, Clone, PartialEq)]
pub struct InnerHitsBuilder {
    name: String,
    size: usize,
    sorts: Vec<Value>,
    params: Map<String, Value>,
}

impl InnerHitsBuilder {
    /// Returns up to `size` documents per group.
    pub fn new(name: &str, size: usize) -> Self {
        Self {
            name: name.to_string(),
            size,
            sorts: Vec::new(),
            params: Map::new(),
        }
    }

    /// Returns the name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Sorts the documents of each group by a field.
    pub fn order(mut self, field: &str, order: SortOrder) -> Self {
        self.sorts.push(json!({ field: {"order": order.as_str()} }));
        self
    }

    /// Sorts ascending by a field.
    pub fn order_asc(self, field: &str) -> Self {
        self.order(field, SortOrder::Asc)
    }

    /// Sorts descending by a field.
    pub fn order_desc(self, field: &str) -> Self {
        self.order(field, SortOrder::Desc)
    }

    /// Adds another parameter, e.g. `_source`.
    pub fn param(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.params.insert(name.to_string(), value.into());
        self
    }

    /// Renders the inner hits specification.
    pub fn build(&self) -> Value {
        let mut inner_hits = Map::new();
        inner_hits.insert("name".to_string(), json!(self.name));
        inner_hits.insert("size".to_string(), json!(self.size));
        if !self.sorts.is_empty() {
            inner_hits.insert("sort".to_string(), json!(self.sorts));
        }
        inner_hits.extend(self.params.clone());
        Value::Object(inner_hits)
    }
}
