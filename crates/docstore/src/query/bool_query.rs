//! Accumulates clauses of a `bool` query.

use serde_json::{Map, Value, json};

/// Builder of a `bool` query.
///
/// Clauses are added as `Option<Value>` so that filters which turned out to be empty
/// (see [`Filters`](super::Filters)) can be passed straight through.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BoolQueryBuilder {
    must: Vec<Value>,
    must_not: Vec<Value>,
    should: Vec<Value>,
    filter: Vec<Value>,
    name: Option<String>,
}

impl BoolQueryBuilder {
    /// Creates an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a scoring clause which must match.
    pub fn must(&mut self, clause: impl Into<Option<Value>>) -> &mut Self {
        if let Some(clause) = clause.into() {
            self.must.push(clause);
        }
        self
    }

    /// Adds a clause which must not match.
    pub fn must_not(&mut self, clause: impl Into<Option<Value>>) -> &mut Self {
        if let Some(clause) = clause.into() {
            self.must_not.push(clause);
        }
        self
    }

    /// Adds a clause of which at least one should match.
    pub fn should(&mut self, clause: impl Into<Option<Value>>) -> &mut Self {
        if let Some(clause) = clause.into() {
            self.should.push(clause);
        }
        self
    }

    /// Adds a non-scoring clause which must match.
    pub fn filter(&mut self, clause: impl Into<Option<Value>>) -> &mut Self {
        if let Some(clause) = clause.into() {
            self.filter.push(clause);
        }
        self
    }

    /// Names the query so that matching documents report it in `matched_queries`.
    pub fn named(&mut self, name: &str) -> &mut Self {
        self.name = Some(name.to_string());
        self
    }

    /// Returns true if no clause was added.
    pub fn is_empty(&self) -> bool {
        self.must.is_empty()
            && self.must_not.is_empty()
            && self.should.is_empty()
            && self.filter.is_empty()
    }

    /// Removes all `must` and `filter` clauses matching the predicate and returns them.
    pub fn remove_filter_if(&mut self, mut predicate: impl FnMut(&Value) -> bool) -> Vec<Value> {
        let mut removed = Vec::new();
        for clauses in [&mut self.must, &mut self.filter] {
            let (matching, kept): (Vec<Value>, Vec<Value>) =
                clauses.drain(..).partition(|clause| predicate(clause));
            *clauses = kept;
            removed.extend(matching);
        }
        removed
    }

    /// Renders the query, `None` if it has no clauses.
    ///
    /// A single unnamed `must` clause is returned as is.
    pub fn build(&self) -> Option<Value> {
        if self.is_empty() {
            return None;
        }

        if self.must.len() == 1
            && self.must_not.is_empty()
            && self.should.is_empty()
            && self.filter.is_empty()
            && self.name.is_none()
        {
            return self.must.first().cloned();
        }

        let mut query = Map::new();
        for (key, clauses) in [
            ("must", &self.must),
            ("must_not", &self.must_not),
            ("should", &self.should),
            ("filter", &self.filter),
        ] {
            if !clauses.is_empty() {
                query.insert(key.to_string(), json!(clauses));
            }
        }
        if let Some(ref name) = self.name {
            query.insert("_name".to_string(), json!(name));
        }

        Some(json!({ "bool": query }))
    }
}
