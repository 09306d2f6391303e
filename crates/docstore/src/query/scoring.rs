//! Custom scoring via `function_score` and `script_score`.

use serde_json::{Map, Value, json};

use super::filters::Filters;

const FUNCTION_SCORE: &str = "function_score";
const SCRIPT_SCORE: &str = "script_score";
const KEY_QUERY: &str = "query";
const KEY_FUNCTIONS: &str = "functions";

/// Shape of a decay function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecayFunction {
    /// Linear decay down to zero.
    Linear,
    /// Normal distribution.
    Gauss,
    /// Exponential decay.
    Exp,
}

impl DecayFunction {
    fn as_str(&self) -> &'static str {
        match self {
            DecayFunction::Linear => "linear",
            DecayFunction::Gauss => "gauss",
            DecayFunction::Exp => "exp",
        }
    }
}

/// Builds a `function_score` query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FunctionScoreBuilder {
    functions: Vec<Value>,
    parameters: Map<String, Value>,
}

impl FunctionScoreBuilder {
    /// Creates a builder without functions.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a parameter of the `function_score` object, e.g. `max_boost`.
    pub fn parameter(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.parameters.insert(name.to_string(), value.into());
        self
    }

    /// Sets how the function scores are combined.
    pub fn score_mode(self, mode: &str) -> Self {
        self.parameter("score_mode", mode)
    }

    /// Sets how the combined function score is merged with the query score.
    pub fn boost_mode(self, mode: &str) -> Self {
        self.parameter("boost_mode", mode)
    }

    /// Adds a raw function.
    pub fn function(mut self, function: Value) -> Self {
        self.functions.push(function);
        self
    }

    /// Scores by the value of a numeric field.
    pub fn field_value_factor(self, field: &str, factor: f64, modifier: &str, missing: f64) -> Self {
        self.function(json!({
            "field_value_factor": {
                "field": field,
                "factor": factor,
                "modifier": modifier,
                "missing": missing,
            }
        }))
    }

    /// Scores by a script.
    pub fn script_function(self, source: &str) -> Self {
        self.function(json!({"script_score": {"script": {"source": source}}}))
    }

    /// Scores by distance of a field value to an origin.
    pub fn decay(
        self,
        function: DecayFunction,
        field: &str,
        origin: impl Into<Value>,
        scale: &str,
        offset: Option<&str>,
        decay: Option<f64>,
    ) -> Self {
        let mut settings = Map::new();
        settings.insert("origin".to_string(), origin.into());
        settings.insert("scale".to_string(), json!(scale));
        if let Some(offset) = offset {
            settings.insert("offset".to_string(), json!(offset));
        }
        if let Some(decay) = decay {
            settings.insert("decay".to_string(), json!(decay));
        }
        self.function(json!({ function.as_str(): { field: settings } }))
    }

    /// Multiplies the score of documents matching the filter.
    pub fn weight(self, filter: Value, weight: f64) -> Self {
        self.function(json!({"filter": filter, "weight": weight}))
    }

    /// Returns true if no function was added.
    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    /// Wraps the query; a missing query scores all documents.
    pub fn apply(&self, query: Option<Value>) -> Value {
        let mut body = Map::new();
        body.insert(
            KEY_QUERY.to_string(),
            query.unwrap_or_else(Filters::match_all),
        );
        body.insert(KEY_FUNCTIONS.to_string(), json!(self.functions));
        body.extend(self.parameters.clone());
        json!({ FUNCTION_SCORE: body })
    }

    /// Renders the query without an inner query.
    pub fn build(&self) -> Value {
        let mut body = Map::new();
        body.insert(KEY_FUNCTIONS.to_string(), json!(self.functions));
        body.extend(self.parameters.clone());
        json!({ FUNCTION_SCORE: body })
    }
}

/// Builds a `script_score` query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScriptScoreBuilder {
    source: String,
    params: Map<String, Value>,
}

impl ScriptScoreBuilder {
    /// Scores by the given script.
    pub fn new(source: &str) -> Self {
        Self {
            source: source.to_string(),
            params: Map::new(),
        }
    }

    /// Scores randomly but reproducibly for the same seed.
    pub fn random_score(seed: i64) -> Self {
        Self::new(&format!("randomScore({seed})"))
    }

    /// Adds a script parameter.
    pub fn param(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.params.insert(name.to_string(), value.into());
        self
    }

    fn script(&self) -> Value {
        let mut script = Map::new();
        script.insert("source".to_string(), json!(self.source));
        if !self.params.is_empty() {
            script.insert("params".to_string(), Value::Object(self.params.clone()));
        }
        Value::Object(script)
    }

    /// Wraps the query; a missing query scores all documents.
    pub fn apply(&self, query: Option<Value>) -> Value {
        json!({
            SCRIPT_SCORE: {
                KEY_QUERY: query.unwrap_or_else(Filters::match_all),
                "script": self.script(),
            }
        })
    }

    /// Renders the query without an inner query.
    pub fn build(&self) -> Value {
        json!({ SCRIPT_SCORE: { "script": self.script() } })
    }
}
