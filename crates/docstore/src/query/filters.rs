//! Factory for the query clauses used with [`ElasticQuery`](super::ElasticQuery).
//!
//! Clauses derived from user input return `Option<Value>`: an empty input yields `None`,
//! which every builder method of the query engine silently skips.

use serde_json::{Value, json};

use super::bool_query::BoolQueryBuilder;

/// Name of the document id in queries.
pub const ID_FIELD: &str = "_id";

const ID_PROPERTY: &str = "id";
const DEFAULT_FUZZINESS: &str = "AUTO";
const DEFAULT_FUZZY_REWRITE: &str = "constant_score";
const PREFIX_REWRITE: &str = "top_terms_256";

/// Creates query clauses.
#[derive(Debug, Clone, Copy, Default)]
pub struct Filters;

fn field_name(field: &str) -> &str {
    if field.eq_ignore_ascii_case(ID_PROPERTY) {
        ID_FIELD
    } else {
        field
    }
}

impl Filters {
    /// Matches documents whose field equals the value. A `null` value matches documents
    /// without the field.
    pub fn eq(field: &str, value: impl Into<Value>) -> Value {
        let value = value.into();
        if value.is_null() {
            return Self::not_filled(field);
        }
        json!({"term": {field_name(field): value}})
    }

    /// Matches documents whose field does not equal the value. A `null` value matches
    /// documents with the field.
    pub fn ne(field: &str, value: impl Into<Value>) -> Value {
        let value = value.into();
        if value.is_null() {
            return Self::filled(field);
        }
        Self::not(Self::eq(field, value))
    }

    fn range(field: &str, bound: &str, value: Value) -> Value {
        json!({"range": {field_name(field): {bound: value}}})
    }

    /// Matches documents whose field is greater than the value.
    pub fn gt(field: &str, value: impl Into<Value>) -> Value {
        Self::range(field, "gt", value.into())
    }

    /// Matches documents whose field is greater than or equal to the value.
    pub fn gte(field: &str, value: impl Into<Value>) -> Value {
        Self::range(field, "gte", value.into())
    }

    /// Matches documents whose field is less than the value.
    pub fn lt(field: &str, value: impl Into<Value>) -> Value {
        Self::range(field, "lt", value.into())
    }

    /// Matches documents whose field is less than or equal to the value.
    pub fn lte(field: &str, value: impl Into<Value>) -> Value {
        Self::range(field, "lte", value.into())
    }

    /// Matches documents whose field lies within `[from, to]`.
    pub fn between(field: &str, from: impl Into<Value>, to: impl Into<Value>) -> Value {
        let from: Value = from.into();
        let to: Value = to.into();
        json!({"range": {field_name(field): {"gte": from, "lte": to}}})
    }

    /// Matches the clause or documents without the field.
    pub fn or_empty(field: &str, clause: Value) -> Value {
        json!({"bool": {"should": [clause, Self::not_filled(field)]}})
    }

    /// Matches documents whose field contains one of the values. `None` for no values.
    pub fn one_in<V: Into<Value>>(field: &str, values: impl IntoIterator<Item = V>) -> Option<Value> {
        let values: Vec<Value> = values
            .into_iter()
            .map(Into::into)
            .filter(|value| !value.is_null())
            .collect();
        if values.is_empty() {
            return None;
        }
        Some(json!({"terms": {field_name(field): values}}))
    }

    /// Matches documents whose field contains none of the values. `None` for no values.
    pub fn none_in<V: Into<Value>>(
        field: &str,
        values: impl IntoIterator<Item = V>,
    ) -> Option<Value> {
        Self::one_in(field, values).map(Self::not)
    }

    /// Matches documents which have a value for the field.
    pub fn filled(field: &str) -> Value {
        json!({"exists": {"field": field_name(field)}})
    }

    /// Matches documents which have no value for the field.
    pub fn not_filled(field: &str) -> Value {
        Self::not(Self::filled(field))
    }

    /// Alias of [`filled`](Self::filled).
    pub fn exists(field: &str) -> Value {
        Self::filled(field)
    }

    /// Alias of [`not_filled`](Self::not_filled).
    pub fn not_exists(field: &str) -> Value {
        Self::not_filled(field)
    }

    /// Inverts the clause.
    pub fn not(clause: Value) -> Value {
        json!({"bool": {"must_not": [clause]}})
    }

    /// Matches if all clauses match. `None` if there are no clauses.
    pub fn and(clauses: impl IntoIterator<Item = Value>) -> Option<Value> {
        let mut builder = BoolQueryBuilder::new();
        for clause in clauses {
            builder.must(clause);
        }
        builder.build()
    }

    /// Matches if any clause matches. `None` if there are no clauses.
    pub fn or(clauses: impl IntoIterator<Item = Value>) -> Option<Value> {
        let mut builder = BoolQueryBuilder::new();
        for clause in clauses {
            builder.should(clause);
        }
        builder.build()
    }

    /// Like [`and`](Self::and), reporting `name` in the matched queries of each hit.
    pub fn named_and(name: &str, clauses: impl IntoIterator<Item = Value>) -> Option<Value> {
        let mut builder = BoolQueryBuilder::new();
        for clause in clauses {
            builder.filter(clause);
        }
        if builder.is_empty() {
            return None;
        }
        builder.named(name).build()
    }

    /// Like [`or`](Self::or), reporting `name` in the matched queries of each hit.
    pub fn named_or(name: &str, clauses: impl IntoIterator<Item = Value>) -> Option<Value> {
        let mut builder = BoolQueryBuilder::new();
        for clause in clauses {
            builder.should(clause);
        }
        if builder.is_empty() {
            return None;
        }
        builder.named(name).build()
    }

    /// Applies the clause to the objects of a nested field.
    pub fn nested(path: &str, clause: Value) -> Value {
        json!({"nested": {"path": path, "query": clause}})
    }

    /// Matches values starting with the given prefix. `None` for an empty prefix.
    pub fn prefix(field: &str, value: &str) -> Option<Value> {
        if value.is_empty() {
            return None;
        }
        Some(json!({"prefix": {field_name(field): {"value": value, "rewrite": PREFIX_REWRITE}}}))
    }

    /// Matches the given phrase. `None` for empty input.
    pub fn phrase(field: &str, text: &str) -> Option<Value> {
        if text.trim().is_empty() {
            return None;
        }
        Some(json!({"match_phrase": {field: text}}))
    }

    /// Full text match. `None` for empty input.
    pub fn match_text(field: &str, text: &str) -> Option<Value> {
        if text.trim().is_empty() {
            return None;
        }
        Some(json!({"match": {field: text}}))
    }

    /// Matches a regular expression. `None` for an empty expression.
    pub fn regexp(field: &str, expression: &str) -> Option<Value> {
        if expression.is_empty() {
            return None;
        }
        Some(json!({"regexp": {field_name(field): {"value": expression}}}))
    }

    /// Matches a wildcard pattern (`*` and `?`). `None` for an empty pattern.
    pub fn wildcard(field: &str, pattern: &str) -> Option<Value> {
        if pattern.is_empty() {
            return None;
        }
        Some(json!({"wildcard": {field_name(field): {"value": pattern}}}))
    }

    /// Fuzzy term match with automatic fuzziness. `None` for empty input.
    pub fn fuzzy(field: &str, value: &str) -> Option<Value> {
        Self::fuzzy_with(field, value, DEFAULT_FUZZINESS, DEFAULT_FUZZY_REWRITE)
    }

    /// Fuzzy term match with explicit fuzziness and rewrite method. `None` for empty input.
    pub fn fuzzy_with(field: &str, value: &str, fuzziness: &str, rewrite: &str) -> Option<Value> {
        if value.is_empty() {
            return None;
        }
        Some(json!({
            "fuzzy": {
                field_name(field): {
                    "value": value,
                    "fuzziness": fuzziness,
                    "rewrite": rewrite,
                }
            }
        }))
    }

    /// Matches every document.
    pub fn match_all() -> Value {
        json!({"match_all": {}})
    }

    /// Matches no document.
    pub fn match_none() -> Value {
        json!({"match_none": {}})
    }

    /// Runs the clause as a filter and gives every match the same score.
    pub fn constant_score(clause: Value, boost: f32) -> Value {
        json!({"constant_score": {"filter": clause, "boost": boost}})
    }
}
