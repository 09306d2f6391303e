//! Sort specifications.

use serde_json::{Map, Value, json};

const GEO_DISTANCE: &str = "_geo_distance";
const SCRIPT: &str = "_script";

/// Direction of a sort.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    /// Smallest first.
    #[default]
    Asc,
    /// Largest first.
    Desc,
}

impl SortOrder {
    /// Returns the value used in the sort specification.
    pub fn as_str(&self) -> &'static str {
        match self {
            SortOrder::Asc => "asc",
            SortOrder::Desc => "desc",
        }
    }
}

/// How a multi-valued field is reduced to one sort value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortMode {
    /// The lowest value.
    Min,
    /// The highest value.
    Max,
    /// The sum of all values.
    Sum,
    /// The average of all values.
    Avg,
    /// The median of all values.
    Median,
}

impl SortMode {
    /// Returns the value used in the sort specification.
    pub fn as_str(&self) -> &'static str {
        match self {
            SortMode::Min => "min",
            SortMode::Max => "max",
            SortMode::Sum => "sum",
            SortMode::Avg => "avg",
            SortMode::Median => "median",
        }
    }
}

/// Builds one entry of the `sort` array.
#[derive(Debug, Clone, PartialEq)]
pub struct SortBuilder {
    key: String,
    body: Map<String, Value>,
}

impl SortBuilder {
    /// Sorts by a field.
    pub fn field(field: &str) -> Self {
        Self {
            key: field.to_string(),
            body: Map::new(),
        }
    }

    /// Sorts by distance to the given point, in kilometers.
    pub fn geo_distance(field: &str, lat: f64, lon: f64) -> Self {
        let mut body = Map::new();
        body.insert(field.to_string(), json!({"lat": lat, "lon": lon}));
        body.insert("unit".to_string(), json!("km"));
        Self {
            key: GEO_DISTANCE.to_string(),
            body,
        }
    }

    /// Sorts by the value of a script, `value_type` is `number` or `string`.
    pub fn script(source: &str, value_type: &str) -> Self {
        let mut body = Map::new();
        body.insert("type".to_string(), json!(value_type));
        body.insert("script".to_string(), json!({"source": source}));
        Self {
            key: SCRIPT.to_string(),
            body,
        }
    }

    /// Sets the direction.
    pub fn order(mut self, order: SortOrder) -> Self {
        self.body.insert("order".to_string(), json!(order.as_str()));
        self
    }

    /// Sets how multi-valued fields are reduced.
    pub fn mode(mut self, mode: SortMode) -> Self {
        self.body.insert("mode".to_string(), json!(mode.as_str()));
        self
    }

    /// Sorts by a field of nested objects, optionally only considering matching objects.
    pub fn nested(mut self, path: &str, filter: Option<Value>) -> Self {
        let mut nested = Map::new();
        nested.insert("path".to_string(), json!(path));
        if let Some(filter) = filter {
            nested.insert("filter".to_string(), filter);
        }
        self.body.insert("nested".to_string(), Value::Object(nested));
        self
    }

    /// Adds another parameter, e.g. `missing` or `unmapped_type`.
    pub fn param(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.body.insert(name.to_string(), value.into());
        self
    }

    /// Renders the sort specification.
    pub fn build(&self) -> Value {
        let mut spec = Map::new();
        spec.insert(self.key.clone(), Value::Object(self.body.clone()));
        Value::Object(spec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_sort() {
        let sort = SortBuilder::field("age")
            .order(SortOrder::Desc)
            .mode(SortMode::Max)
            .nested("children", Some(json!({"term": {"children.active": true}})));

        assert_eq!(
            sort.build(),
            json!({"age": {
                "order": "desc",
                "mode": "max",
                "nested": {"path": "children", "filter": {"term": {"children.active": true}}}
            }})
        );
    }

    #[test]
    fn test_special_sorts() {
        assert_eq!(
            SortBuilder::geo_distance("location", 50.0, 9.0).build(),
            json!({"_geo_distance": {"location": {"lat": 50.0, "lon": 9.0}, "unit": "km"}})
        );
        assert_eq!(
            SortBuilder::script("doc['age'].value * 2", "number")
                .order(SortOrder::Asc)
                .build(),
            json!({"_script": {"type": "number", "script": {"source": "doc['age'].value * 2"}, "order": "asc"}})
        );
    }
}
