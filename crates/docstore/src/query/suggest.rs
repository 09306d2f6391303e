//! Term and phrase suggesters.
//!
//! Suggesters run alongside a search via [`ElasticQuery::add_suggester`] or on their own
//! via a [`SuggestionQuery`], which fetches no hits at all.
//!
//! [`ElasticQuery::add_suggester`]: super::ElasticQuery::add_suggester

use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::{Map, Value, json};

use crate::error::StorageResult;
use crate::mapper::Elastic;
use crate::schema::{Entity, EntityDescriptor};

pub(crate) const KEY_SUGGEST: &str = "suggest";

const TERM: &str = "term";
const PHRASE: &str = "phrase";

const KEY_TEXT: &str = "text";
const KEY_FIELD: &str = "field";
const KEY_SIZE: &str = "size";
const KEY_SUGGEST_MODE: &str = "suggest_mode";
const KEY_HIGHLIGHT: &str = "highlight";
const KEY_COLLATE: &str = "collate";

/// Which input terms receive suggestions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuggestMode {
    /// Only terms which are not in the index.
    Missing,
    /// Only terms for which more frequent alternatives exist.
    Popular,
    /// Every term.
    Always,
}

impl SuggestMode {
    /// Returns the value of the `suggest_mode` parameter.
    pub fn as_str(&self) -> &'static str {
        match self {
            SuggestMode::Missing => "missing",
            SuggestMode::Popular => "popular",
            SuggestMode::Always => "always",
        }
    }
}

/// One named entry of the `suggest` section.
#[derive(Debug, Clone, PartialEq)]
pub struct SuggestBuilder {
    name: String,
    suggester_type: String,
    text: Option<String>,
    body: Map<String, Value>,
}

impl SuggestBuilder {
    /// Creates a suggester of any type.
    pub fn create(suggester_type: &str, name: &str) -> Self {
        Self {
            name: name.to_string(),
            suggester_type: suggester_type.to_string(),
            text: None,
            body: Map::new(),
        }
    }

    /// Suggests corrections per term of `text`, taken from `field`.
    pub fn term(name: &str, field: &str, text: &str) -> Self {
        Self::create(TERM, name).on(field).for_text(text)
    }

    /// Suggests corrections of `text` as a whole, taken from `field`.
    pub fn phrase(name: &str, field: &str, text: &str) -> Self {
        Self::create(PHRASE, name).on(field).for_text(text)
    }

    /// Returns the name results are reported under.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Sets the field suggestions are taken from.
    pub fn on(self, field: &str) -> Self {
        self.param(KEY_FIELD, json!(field))
    }

    /// Sets the input to generate suggestions for.
    pub fn for_text(mut self, text: &str) -> Self {
        self.text = Some(text.to_string());
        self
    }

    /// Sets the maximal number of options per term.
    pub fn size(self, size: usize) -> Self {
        self.param(KEY_SIZE, json!(size))
    }

    /// Sets which input terms receive suggestions.
    pub fn suggest_mode(self, mode: SuggestMode) -> Self {
        self.param(KEY_SUGGEST_MODE, json!(mode.as_str()))
    }

    /// Wraps the changed tokens of phrase suggestions in the given tags.
    pub fn highlight(self, pre_tag: &str, post_tag: &str) -> Self {
        self.param(
            KEY_HIGHLIGHT,
            json!({"pre_tag": pre_tag, "post_tag": post_tag}),
        )
    }

    /// Checks phrase suggestions against `query`.
    ///
    /// The query may reference the suggestion as `{{suggestion}}`. With `prune` set,
    /// non-matching options are kept and flagged via [`SuggestOption::collate_match`].
    pub fn collate(self, query: Value, prune: bool) -> Self {
        self.param(
            KEY_COLLATE,
            json!({"query": {"source": query}, "prune": prune}),
        )
    }

    /// Sets an arbitrary parameter of the suggester body.
    pub fn param(mut self, name: &str, value: Value) -> Self {
        self.body.insert(name.to_string(), value);
        self
    }

    /// Renders the suggester as `{"text": ..., "<type>": {...}}`.
    pub fn build(&self) -> Value {
        let mut suggester = Map::new();
        if let Some(ref text) = self.text {
            suggester.insert(KEY_TEXT.to_string(), json!(text));
        }
        suggester.insert(self.suggester_type.clone(), Value::Object(self.body.clone()));
        Value::Object(suggester)
    }
}

/// Renders the `suggest` section, `None` if there are no suggesters.
pub(crate) fn build_suggest_section(suggesters: &[SuggestBuilder]) -> Option<Value> {
    if suggesters.is_empty() {
        return None;
    }
    Some(Value::Object(
        suggesters
            .iter()
            .map(|suggester| (suggester.name().to_string(), suggester.build()))
            .collect(),
    ))
}

/// One proposed replacement.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SuggestOption {
    /// The replacement text.
    pub text: String,
    /// How close the option is to the input.
    #[serde(default)]
    pub score: f64,
    /// Number of documents containing the option, reported by term suggesters.
    #[serde(default)]
    pub freq: Option<u64>,
    /// The option with its changes wrapped in the highlight tags.
    #[serde(default)]
    pub highlighted: Option<String>,
    /// False if the option did not match the collate query.
    #[serde(default = "collate_match_default")]
    pub collate_match: bool,
}

fn collate_match_default() -> bool {
    true
}

/// The options for one part of the input text.
///
/// Term suggesters report one part per analyzed term, phrase suggesters one for the
/// whole input.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TermSuggestion {
    /// The part of the input the options replace.
    pub text: String,
    /// Character offset of the part within the input.
    #[serde(default)]
    pub offset: usize,
    /// Character length of the part.
    #[serde(default)]
    pub length: usize,
    /// The proposed replacements, best first.
    #[serde(default)]
    pub options: Vec<SuggestOption>,
}

/// Reads the parts reported for the suggester `name`, empty if the response lacks it.
pub(crate) fn parse_suggestions(response: &Value, name: &str) -> StorageResult<Vec<TermSuggestion>> {
    match response.get(KEY_SUGGEST).and_then(|suggest| suggest.get(name)) {
        Some(parts) => Ok(serde_json::from_value(parts.clone())?),
        None => Ok(Vec::new()),
    }
}

/// The suggestions of all suggesters of a [`SuggestionQuery`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SuggestionResult {
    suggestions: HashMap<String, Vec<TermSuggestion>>,
}

impl SuggestionResult {
    pub(crate) fn from_response(response: &Value) -> StorageResult<Self> {
        let mut suggestions = HashMap::new();
        if let Some(Value::Object(section)) = response.get(KEY_SUGGEST) {
            for name in section.keys() {
                suggestions.insert(name.clone(), parse_suggestions(response, name)?);
            }
        }
        Ok(Self { suggestions })
    }

    /// Returns the parts reported for the suggester `name`.
    pub fn suggestions(&self, name: &str) -> &[TermSuggestion] {
        self.suggestions.get(name).map(Vec::as_slice).unwrap_or_default()
    }

    /// Returns the options of the first part, for inputs consisting of a single term.
    pub fn single_term_suggestions(&self, name: &str) -> &[SuggestOption] {
        self.suggestions(name)
            .first()
            .map(|part| part.options.as_slice())
            .unwrap_or_default()
    }
}

/// Runs suggesters against the read alias of `E` without fetching hits.
pub struct SuggestionQuery<E: Entity> {
    elastic: Elastic,
    descriptor: Arc<EntityDescriptor>,
    suggesters: Vec<SuggestBuilder>,
    _marker: PhantomData<fn() -> E>,
}

impl<E: Entity> SuggestionQuery<E> {
    pub(crate) fn new(elastic: Elastic, descriptor: Arc<EntityDescriptor>) -> Self {
        Self {
            elastic,
            descriptor,
            suggesters: Vec::new(),
            _marker: PhantomData,
        }
    }

    /// Adds a term suggester named like the field.
    pub fn with_term_suggester(self, field: &str, text: &str) -> Self {
        self.with_suggester(SuggestBuilder::term(field, field, text))
    }

    /// Adds a suggester, replacing one with the same name.
    pub fn with_suggester(mut self, suggester: SuggestBuilder) -> Self {
        self.suggesters
            .retain(|existing| existing.name() != suggester.name());
        self.suggesters.push(suggester);
        self
    }

    /// Renders the search request this query executes.
    pub fn payload(&self) -> Value {
        let mut payload = Map::new();
        if let Some(section) = build_suggest_section(&self.suggesters) {
            payload.insert(KEY_SUGGEST.to_string(), section);
        }
        Value::Object(payload)
    }

    /// Runs all suggesters in one search without hits.
    pub async fn execute(&self) -> StorageResult<SuggestionResult> {
        let response = self
            .elastic
            .client()
            .search(
                &self.elastic.determine_read_alias(&self.descriptor),
                None,
                0,
                0,
                self.payload(),
            )
            .await?;
        SuggestionResult::from_response(&response)
    }
}

impl<E: Entity> fmt::Debug for SuggestionQuery<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SuggestionQuery")
            .field("entity", &self.descriptor.type_name())
            .field("suggesters", &self.suggesters)
            .finish()
    }
}
