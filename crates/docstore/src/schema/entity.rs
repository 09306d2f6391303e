//! The contract entity types implement, plus the per-instance persistence state.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{ConfigurationError, StorageResult};

use super::descriptor::EntityDescriptor;

/// Name of the inner hits section when no explicit name is given.
pub const DEFAULT_INNER_HITS: &str = "default_inner_hits";

/// Keyword field every document carries a copy of its id in.
///
/// `_id` can't be sorted on, so streams break ties on this field instead.
pub const DOCUMENT_ID_FIELD: &str = "id";

const FIELD_ID: &str = "_id";
const FIELD_SOURCE: &str = "_source";
const FIELD_PRIMARY_TERM: &str = "_primary_term";
const FIELD_SEQ_NO: &str = "_seq_no";
const FIELD_SCORE: &str = "_score";
const FIELD_MATCHED_QUERIES: &str = "matched_queries";
const FIELD_EXPLANATION: &str = "_explanation";
const FIELD_SORT: &str = "sort";
const FIELD_INNER_HITS: &str = "inner_hits";

/// Concurrency tokens returned by the server for each write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionTokens {
    /// The primary term of the shard which accepted the write.
    pub primary_term: i64,
    /// The sequence number of the write.
    pub seq_no: i64,
}

impl VersionTokens {
    /// Extracts the tokens from a write or get response.
    pub fn from_response(response: &Value) -> Option<Self> {
        Some(Self {
            primary_term: response.get(FIELD_PRIMARY_TERM)?.as_i64()?,
            seq_no: response.get(FIELD_SEQ_NO)?.as_i64()?,
        })
    }
}

/// Search metadata of an entity which was loaded by a query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HitInfo {
    score: Option<f64>,
    matched_queries: Vec<String>,
    explanation: Option<Value>,
    sort: Vec<Value>,
    inner_hits: Map<String, Value>,
}

impl HitInfo {
    fn from_hit(hit: &Value) -> Self {
        Self {
            score: hit.get(FIELD_SCORE).and_then(Value::as_f64),
            matched_queries: hit
                .get(FIELD_MATCHED_QUERIES)
                .and_then(Value::as_array)
                .map(|queries| {
                    queries
                        .iter()
                        .filter_map(|q| q.as_str().map(str::to_string))
                        .collect()
                })
                .unwrap_or_default(),
            explanation: hit.get(FIELD_EXPLANATION).cloned(),
            sort: hit
                .get(FIELD_SORT)
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default(),
            inner_hits: hit
                .get(FIELD_INNER_HITS)
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default(),
        }
    }

    /// Returns the relevance score.
    pub fn score(&self) -> Option<f64> {
        self.score
    }

    /// Returns the names of the queries which matched.
    pub fn matched_queries(&self) -> &[String] {
        &self.matched_queries
    }

    /// Returns the explanation, if the query requested one.
    pub fn explanation(&self) -> Option<&Value> {
        self.explanation.as_ref()
    }

    /// Returns the sort values of the hit.
    pub fn sort(&self) -> &[Value] {
        &self.sort
    }
}

/// Persistence state carried by every entity instance.
///
/// Entities hold it in a field marked `#[serde(skip)]`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntityState {
    id: Option<String>,
    tokens: Option<VersionTokens>,
    snapshot: Option<Map<String, Value>>,
    hit: Option<HitInfo>,
}

impl EntityState {
    /// Returns the id, `None` until the entity was written or assigned one.
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// Assigns an id. Only meaningful before the first write.
    pub fn set_id(&mut self, id: impl Into<String>) {
        self.id = Some(id.into());
    }

    /// Returns true until the entity has an id.
    pub fn is_new(&self) -> bool {
        self.id.is_none()
    }

    /// Returns true if this instance was written or read, so changes can be detected.
    pub fn is_loaded(&self) -> bool {
        self.snapshot.is_some()
    }

    /// Returns the concurrency tokens of the last write or read.
    pub fn tokens(&self) -> Option<VersionTokens> {
        self.tokens
    }

    /// Returns the property values as last written or read.
    pub fn snapshot(&self) -> Option<&Map<String, Value>> {
        self.snapshot.as_ref()
    }

    /// Returns search metadata, if the entity was loaded by a query.
    pub fn hit(&self) -> Option<&HitInfo> {
        self.hit.as_ref()
    }

    pub(crate) fn mark_persisted(
        &mut self,
        id: String,
        tokens: Option<VersionTokens>,
        snapshot: Map<String, Value>,
    ) {
        self.id = Some(id);
        self.tokens = tokens;
        self.snapshot = Some(snapshot);
    }

    /// Returns the names of all properties whose value differs from the snapshot.
    pub(crate) fn changed_properties(&self, source: &Map<String, Value>) -> Vec<String> {
        match self.snapshot {
            None => source.keys().cloned().collect(),
            Some(ref snapshot) => source
                .iter()
                .filter(|(name, value)| snapshot.get(*name) != Some(*value))
                .map(|(name, _)| name.clone())
                .chain(
                    snapshot
                        .keys()
                        .filter(|name| !source.contains_key(*name))
                        .cloned(),
                )
                .collect(),
        }
    }
}

/// An application record stored as a document.
///
/// The serialized form of an entity (minus its [`EntityState`]) is its `_source`. Every
/// serialized field must be declared as a property in [`Entity::descriptor`].
///
/// # Example
///
/// ```
/// use helios_docstore::schema::{Entity, EntityDescriptor, EntityState, PropertyMapping};
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Debug, Default, Serialize, Deserialize)]
/// struct Person {
///     #[serde(skip)]
///     state: EntityState,
///     #[serde(default)]
///     name: String,
/// }
///
/// impl Entity for Person {
///     fn descriptor() -> EntityDescriptor {
///         EntityDescriptor::builder("Person", "person")
///             .property("name", PropertyMapping::keyword())
///             .versioned()
///             .build()
///     }
///
///     fn state(&self) -> &EntityState {
///         &self.state
///     }
///
///     fn state_mut(&mut self) -> &mut EntityState {
///         &mut self.state
///     }
/// }
///
/// assert!(Person::default().is_new());
/// ```
pub trait Entity: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Describes how the type is stored.
    fn descriptor() -> EntityDescriptor;

    /// Returns the persistence state.
    fn state(&self) -> &EntityState;

    /// Returns the mutable persistence state.
    fn state_mut(&mut self) -> &mut EntityState;

    /// Returns the id.
    fn id(&self) -> Option<&str> {
        self.state().id()
    }

    /// Returns true until the entity has an id.
    fn is_new(&self) -> bool {
        self.state().is_new()
    }

    /// Returns the relevance score if the entity was loaded by a query.
    fn score(&self) -> Option<f64> {
        self.state().hit().and_then(HitInfo::score)
    }

    /// Returns the names of the matching named queries.
    fn matched_queries(&self) -> &[String] {
        self.state()
            .hit()
            .map(HitInfo::matched_queries)
            .unwrap_or_default()
    }

    /// Decodes the inner hits with the given name.
    fn inner_hits<F: Entity>(&self, name: &str) -> StorageResult<Vec<F>> {
        let section = self
            .state()
            .hit()
            .and_then(|hit| hit.inner_hits.get(name))
            .and_then(|section| section.pointer("/hits/hits"))
            .and_then(Value::as_array);

        let descriptor = F::descriptor();
        match section {
            Some(hits) => hits.iter().map(|hit| load_hit(&descriptor, hit)).collect(),
            None => Ok(Vec::new()),
        }
    }

    /// Returns the total number of inner hits with the given name.
    fn inner_hits_total(&self, name: &str) -> u64 {
        self.state()
            .hit()
            .and_then(|hit| hit.inner_hits.get(name))
            .and_then(|section| section.pointer("/hits/total/value"))
            .and_then(Value::as_u64)
            .unwrap_or(0)
    }
}

/// Serializes the properties of an entity, rejecting undeclared fields.
pub(crate) fn extract_source<E: Entity>(
    descriptor: &EntityDescriptor,
    entity: &E,
) -> StorageResult<Map<String, Value>> {
    let source = match serde_json::to_value(entity)? {
        Value::Object(source) => source,
        _ => Map::new(),
    };

    if let Some(undeclared) = source.keys().find(|key| descriptor.property(key).is_none()) {
        return Err(ConfigurationError::UndeclaredProperty {
            entity: descriptor.type_name().to_string(),
            property: undeclared.clone(),
        }
        .into());
    }

    Ok(source)
}

/// Builds the document sent to the server: the properties plus the id field.
pub(crate) fn document_body(source: &Map<String, Value>, id: &str) -> Value {
    let mut document = source.clone();
    document.insert(DOCUMENT_ID_FIELD.to_string(), Value::String(id.to_string()));
    Value::Object(document)
}

/// Reads the routing value from the serialized properties.

pub(crate) fn routing_value(
    descriptor: &EntityDescriptor,
    source: &Map<String, Value>,
) -> Option<String> {
    let property = descriptor.routing_property()?;
    match source.get(property)? {
        Value::Null => None,
        Value::String(value) if value.is_empty() => None,
        Value::String(value) => Some(value.clone()),
        other => Some(other.to_string()),
    }
}

/// Reconstructs an entity from a get response or search hit.
pub(crate) fn load_hit<E: Entity>(descriptor: &EntityDescriptor, hit: &Value) -> StorageResult<E> {
    let mut source = hit
        .get(FIELD_SOURCE)
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();
    source.remove(DOCUMENT_ID_FIELD);

    let mut entity: E = serde_json::from_value(Value::Object(source.clone()))?;
    let id = hit
        .get(FIELD_ID)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let tokens = if descriptor.is_versioned() {
        VersionTokens::from_response(hit)
    } else {
        None
    };

    let state = entity.state_mut();
    state.mark_persisted(id, tokens, source);
    if hit.get(FIELD_SCORE).is_some() || hit.get(FIELD_SORT).is_some() {
        state.hit = Some(HitInfo::from_hit(hit));
    }

    Ok(entity)
}

#[cfg(test)]
pub(crate) mod tests {
    use serde_json::json;

    use super::*;
    use crate::schema::PropertyMapping;

    #[derive(Debug, Default, Clone, Serialize, Deserialize)]
    pub(crate) struct Person {
        #[serde(skip)]
        pub state: EntityState,
        #[serde(default)]
        pub tenant: String,
        #[serde(default)]
        pub name: String,
        #[serde(default)]
        pub age: i64,
    }

    impl Entity for Person {
        fn descriptor() -> EntityDescriptor {
            EntityDescriptor::builder("Person", "person")
                .property("tenant", PropertyMapping::keyword())
                .property("name", PropertyMapping::keyword())
                .property("age", PropertyMapping::long())
                .versioned()
                .build()
        }

        fn state(&self) -> &EntityState {
            &self.state
        }

        fn state_mut(&mut self) -> &mut EntityState {
            &mut self.state
        }
    }

    #[derive(Debug, Default, Clone, Serialize, Deserialize)]
    pub(crate) struct Event {
        #[serde(skip)]
        pub state: EntityState,
        #[serde(default)]
        pub tenant: String,
        #[serde(default)]
        pub kind: String,
    }

    impl Entity for Event {
        fn descriptor() -> EntityDescriptor {
            EntityDescriptor::builder("Event", "event")
                .property("tenant", PropertyMapping::keyword())
                .property("kind", PropertyMapping::keyword())
                .routed_by("tenant")
                .build()
        }

        fn state(&self) -> &EntityState {
            &self.state
        }

        fn state_mut(&mut self) -> &mut EntityState {
            &mut self.state
        }
    }

    pub(crate) fn person(name: &str, age: i64) -> Person {
        Person {
            name: name.to_string(),
            age,
            ..Default::default()
        }
    }

    #[test]
    fn test_load_hit() {
        let hit = json!({
            "_index": "person-2024-01-01",
            "_id": "p1",
            "_primary_term": 2,
            "_seq_no": 7,
            "_score": 1.5,
            "matched_queries": ["by-name"],
            "_source": {"name": "Ada", "age": 36},
        });

        let person: Person = load_hit(&Person::descriptor(), &hit).unwrap();
        assert_eq!(person.name, "Ada");
        assert_eq!(person.id(), Some("p1"));
        assert!(!person.is_new());
        assert_eq!(
            person.state().tokens(),
            Some(VersionTokens {
                primary_term: 2,
                seq_no: 7
            })
        );
        assert_eq!(person.score(), Some(1.5));
        assert_eq!(person.matched_queries(), ["by-name".to_string()]);
    }

    #[test]
    fn test_id_field_is_not_a_property() {
        let hit = json!({
            "_id": "p1",
            "_source": {"tenant": "t1", "name": "Ada", "age": 36, "id": "p1"},
        });
        let person: Person = load_hit(&Person::descriptor(), &hit).unwrap();
        assert!(!person.state().snapshot().unwrap().contains_key(DOCUMENT_ID_FIELD));

        let source = extract_source(&Person::descriptor(), &person).unwrap();
        assert!(person.state().changed_properties(&source).is_empty());
        assert_eq!(
            document_body(&source, "p1"),
            json!({"tenant": "t1", "name": "Ada", "age": 36, "id": "p1"})
        );
    }

    #[test]
    fn test_unversioned_has_no_tokens() {
        let hit = json!({"_id": "e1", "_primary_term": 1, "_seq_no": 0, "_source": {"kind": "x"}});
        let event: Event = load_hit(&Event::descriptor(), &hit).unwrap();
        assert_eq!(event.state().tokens(), None);
        assert_eq!(event.score(), None);
    }

    #[test]
    fn test_changed_properties() {
        let descriptor = Person::descriptor();
        let mut person = person("Ada", 36);
        let source = extract_source(&descriptor, &person).unwrap();
        assert_eq!(person.state().changed_properties(&source).len(), 3);

        person
            .state_mut()
            .mark_persisted("p1".to_string(), None, source.clone());
        assert!(person.state().changed_properties(&source).is_empty());

        person.age = 37;
        let source = extract_source(&descriptor, &person).unwrap();
        assert_eq!(person.state().changed_properties(&source), vec!["age"]);
    }

    #[test]
    fn test_assigned_id_is_not_new() {
        let mut person = person("Ada", 36);
        assert!(person.is_new());
        assert!(!person.state().is_loaded());

        person.state_mut().set_id("ada-1");
        assert!(!person.is_new());
        assert!(!person.state().is_loaded());
        assert_eq!(person.state().tokens(), None);
    }

    #[test]
    fn test_undeclared_property() {
        let descriptor = EntityDescriptor::builder("Person", "person")
            .property("name", PropertyMapping::keyword())
            .build();
        let err = extract_source(&descriptor, &person("Ada", 1)).unwrap_err();
        assert!(err.to_string().contains("no declared property"));
    }

    #[test]
    fn test_routing_value() {
        let descriptor = Event::descriptor();
        let mut source = Map::new();
        assert_eq!(routing_value(&descriptor, &source), None);
        source.insert("tenant".to_string(), json!(""));
        assert_eq!(routing_value(&descriptor, &source), None);
        source.insert("tenant".to_string(), json!("t1"));
        assert_eq!(routing_value(&descriptor, &source), Some("t1".to_string()));
        assert_eq!(routing_value(&Person::descriptor(), &source), None);
    }

    #[test]
    fn test_inner_hits() {
        let hit = json!({
            "_id": "p1",
            "_score": 1.0,
            "_source": {"name": "Ada"},
            "inner_hits": {
                "default_inner_hits": {
                    "hits": {
                        "total": {"value": 4, "relation": "eq"},
                        "hits": [
                            {"_id": "p2", "_source": {"name": "Bob"}},
                            {"_id": "p3", "_source": {"name": "Cy"}},
                        ]
                    }
                }
            }
        });

        let person: Person = load_hit(&Person::descriptor(), &hit).unwrap();
        let inner: Vec<Person> = person.inner_hits(DEFAULT_INNER_HITS).unwrap();
        assert_eq!(inner.len(), 2);
        assert_eq!(inner[1].id(), Some("p3"));
        assert_eq!(person.inner_hits_total(DEFAULT_INNER_HITS), 4);
        assert!(person.inner_hits::<Person>("other").unwrap().is_empty());
    }
}
