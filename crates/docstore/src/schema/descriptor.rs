//! Static description of entity types and their index mapping.

use serde_json::{Map, Value, json};

use crate::config::DynamicMapping;

const MAPPING_TYPE: &str = "type";
const MAPPING_STORED: &str = "store";
const MAPPING_INDEX: &str = "index";
const MAPPING_DOC_VALUES: &str = "doc_values";
const MAPPING_NORMS: &str = "norms";
const MAPPING_ENABLED: &str = "enabled";
const MAPPING_DYNAMIC: &str = "dynamic";
const MAPPING_ANALYZER: &str = "analyzer";
const MAPPING_PROPERTIES: &str = "properties";

/// Field types supported in mappings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldType {
    /// Exact-value string.
    Keyword,
    /// Analyzed full-text string.
    Text,
    /// 64-bit integer.
    Long,
    /// 32-bit integer.
    Integer,
    /// 64-bit float.
    Double,
    /// 32-bit float.
    Float,
    /// Boolean.
    Boolean,
    /// Date or timestamp.
    Date,
    /// Inner object, flattened into the parent document.
    Object,
    /// Inner object indexed as a separate hidden document.
    Nested,
    /// Dense vector used by nearest-neighbor searches.
    DenseVector {
        /// Number of dimensions.
        dims: usize,
        /// Similarity metric, e.g. `cosine`.
        similarity: String,
    },
    /// Latitude/longitude pair.
    GeoPoint,
    /// Base64 encoded binary value.
    Binary,
}

impl FieldType {
    /// Returns the type name used in mappings.
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::Keyword => "keyword",
            FieldType::Text => "text",
            FieldType::Long => "long",
            FieldType::Integer => "integer",
            FieldType::Double => "double",
            FieldType::Float => "float",
            FieldType::Boolean => "boolean",
            FieldType::Date => "date",
            FieldType::Object => "object",
            FieldType::Nested => "nested",
            FieldType::DenseVector { .. } => "dense_vector",
            FieldType::GeoPoint => "geo_point",
            FieldType::Binary => "binary",
        }
    }

    fn has_children(&self) -> bool {
        matches!(self, FieldType::Object | FieldType::Nested)
    }
}

/// Mapping description of one property.
///
/// Options left unset are omitted so that the server defaults apply.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyMapping {
    field_type: FieldType,
    store: Option<bool>,
    index: Option<bool>,
    doc_values: Option<bool>,
    norms: Option<bool>,
    enabled: Option<bool>,
    analyzer: Option<String>,
    exclude_from_source: bool,
    dynamic_enabled: bool,
    children: Vec<PropertyDescriptor>,
}

impl PropertyMapping {
    /// Creates a mapping of the given type with server defaults.
    pub fn new(field_type: FieldType) -> Self {
        Self {
            field_type,
            store: None,
            index: None,
            doc_values: None,
            norms: None,
            enabled: None,
            analyzer: None,
            exclude_from_source: false,
            dynamic_enabled: false,
            children: Vec::new(),
        }
    }

    /// A `keyword` mapping.
    pub fn keyword() -> Self {
        Self::new(FieldType::Keyword)
    }

    /// A `text` mapping.
    pub fn text() -> Self {
        Self::new(FieldType::Text)
    }

    /// A `long` mapping.
    pub fn long() -> Self {
        Self::new(FieldType::Long)
    }

    /// An `integer` mapping.
    pub fn integer() -> Self {
        Self::new(FieldType::Integer)
    }

    /// A `double` mapping.
    pub fn double() -> Self {
        Self::new(FieldType::Double)
    }

    /// A `boolean` mapping.
    pub fn boolean() -> Self {
        Self::new(FieldType::Boolean)
    }

    /// A `date` mapping.
    pub fn date() -> Self {
        Self::new(FieldType::Date)
    }

    /// A `nested` mapping with the given inner properties.
    pub fn nested(children: Vec<PropertyDescriptor>) -> Self {
        Self::new(FieldType::Nested).with_children(children)
    }

    /// An `object` mapping with the given inner properties.
    pub fn object(children: Vec<PropertyDescriptor>) -> Self {
        Self::new(FieldType::Object).with_children(children)
    }

    /// A `dense_vector` mapping.
    pub fn dense_vector(dims: usize, similarity: &str) -> Self {
        Self::new(FieldType::DenseVector {
            dims,
            similarity: similarity.to_string(),
        })
    }

    /// Sets whether the value is stored apart from `_source`.
    pub fn stored(mut self, store: bool) -> Self {
        self.store = Some(store);
        self
    }

    /// Sets whether the value is indexed.
    pub fn indexed(mut self, index: bool) -> Self {
        self.index = Some(index);
        self
    }

    /// Sets whether doc values are kept.
    pub fn doc_values(mut self, doc_values: bool) -> Self {
        self.doc_values = Some(doc_values);
        self
    }

    /// Sets whether norms are kept.
    pub fn norms(mut self, norms: bool) -> Self {
        self.norms = Some(norms);
        self
    }

    /// Sets whether an object property is parsed at all.
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = Some(enabled);
        self
    }

    /// Sets the analyzer of a text property.
    pub fn analyzer(mut self, analyzer: &str) -> Self {
        self.analyzer = Some(analyzer.to_string());
        self
    }

    /// Removes the value from `_source`. Use with care: it cannot be read back.
    pub fn exclude_from_source(mut self) -> Self {
        self.exclude_from_source = true;
        self
    }

    /// Allows unknown fields below an object or nested property regardless of the index mode.
    pub fn allow_dynamic(mut self) -> Self {
        self.dynamic_enabled = true;
        self
    }

    /// Sets the inner properties of an object or nested property.
    pub fn with_children(mut self, children: Vec<PropertyDescriptor>) -> Self {
        self.children = children;
        self
    }

    /// Returns the field type.
    pub fn field_type(&self) -> &FieldType {
        &self.field_type
    }

    /// Returns true if the value is excluded from `_source`.
    pub fn is_excluded_from_source(&self) -> bool {
        self.exclude_from_source
    }

    /// Returns the inner properties.
    pub fn children(&self) -> &[PropertyDescriptor] {
        &self.children
    }

    /// Renders the mapping fragment of this property.
    ///
    /// Object and nested properties inherit `mode` unless dynamic fields were explicitly allowed.
    /// Fails with the name of the first inner property lacking a mapping.
    pub fn describe(&self, mode: DynamicMapping) -> Result<Value, String> {
        let mut description = Map::new();
        description.insert(MAPPING_TYPE.to_string(), json!(self.field_type.as_str()));

        if let FieldType::DenseVector { dims, similarity } = &self.field_type {
            description.insert("dims".to_string(), json!(dims));
            description.insert("index".to_string(), json!(true));
            description.insert("similarity".to_string(), json!(similarity));
        }

        transfer_option(&mut description, MAPPING_STORED, self.store);
        transfer_option(&mut description, MAPPING_INDEX, self.index);
        transfer_option(&mut description, MAPPING_DOC_VALUES, self.doc_values);
        transfer_option(&mut description, MAPPING_NORMS, self.norms);
        transfer_option(&mut description, MAPPING_ENABLED, self.enabled);

        if let Some(ref analyzer) = self.analyzer {
            description.insert(MAPPING_ANALYZER.to_string(), json!(analyzer));
        }

        if self.field_type.has_children() {
            if !self.dynamic_enabled {
                description.insert(MAPPING_DYNAMIC.to_string(), json!(mode.as_str()));
            }
            if !self.children.is_empty() {
                let mut properties = Map::new();
                for child in &self.children {
                    let mapping = child.mapping.as_ref().ok_or_else(|| child.name.clone())?;
                    properties.insert(child.name.clone(), mapping.describe(mode)?);
                }
                description.insert(MAPPING_PROPERTIES.to_string(), Value::Object(properties));
            }
        }

        Ok(Value::Object(description))
    }
}

fn transfer_option(description: &mut Map<String, Value>, key: &str, option: Option<bool>) {
    if let Some(value) = option {
        description.insert(key.to_string(), json!(value));
    }
}

/// A named property of an entity.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyDescriptor {
    name: String,
    mapping: Option<PropertyMapping>,
}

impl PropertyDescriptor {
    /// Creates a mapped property.
    pub fn new(name: &str, mapping: PropertyMapping) -> Self {
        Self {
            name: name.to_string(),
            mapping: Some(mapping),
        }
    }

    /// Creates a property without a mapping. Installing such a schema fails.
    pub fn unmapped(name: &str) -> Self {
        Self {
            name: name.to_string(),
            mapping: None,
        }
    }

    /// Returns the property name, which is also the field name in `_source`.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the mapping, if any.
    pub fn mapping(&self) -> Option<&PropertyMapping> {
        self.mapping.as_ref()
    }
}

/// Describes how an entity type is stored.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityDescriptor {
    type_name: String,
    relation: String,
    realm: String,
    properties: Vec<PropertyDescriptor>,
    versioned: bool,
    routing: Option<String>,
}

impl EntityDescriptor {
    /// Starts a descriptor for the given type and relation (index) name.
    pub fn builder(type_name: &str, relation: &str) -> EntityDescriptorBuilder {
        EntityDescriptorBuilder {
            descriptor: EntityDescriptor {
                type_name: type_name.to_string(),
                relation: relation.to_string(),
                realm: DEFAULT_REALM.to_string(),
                properties: Vec::new(),
                versioned: false,
                routing: None,
            },
        }
    }

    /// Returns the type name used in log and error messages.
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Returns the relation name, which is the base of all index and alias names.
    pub fn relation(&self) -> &str {
        &self.relation
    }

    /// Returns the realm determining the shard layout.
    pub fn realm(&self) -> &str {
        &self.realm
    }

    /// Returns the declared properties in declaration order.
    pub fn properties(&self) -> &[PropertyDescriptor] {
        &self.properties
    }

    /// Looks up a property by name.
    pub fn property(&self, name: &str) -> Option<&PropertyDescriptor> {
        self.properties.iter().find(|p| p.name == name)
    }

    /// Returns true if writes are guarded by concurrency tokens.
    pub fn is_versioned(&self) -> bool {
        self.versioned
    }

    /// Returns the property providing the routing value.
    pub fn routing_property(&self) -> Option<&str> {
        self.routing.as_deref()
    }

    /// Returns true if documents are routed by a property value.
    pub fn is_routed(&self) -> bool {
        self.routing.is_some()
    }
}

/// Realm used when a descriptor does not name one.
pub const DEFAULT_REALM: &str = "default";

/// Builder for [`EntityDescriptor`].
#[derive(Debug, Clone)]
pub struct EntityDescriptorBuilder {
    descriptor: EntityDescriptor,
}

impl EntityDescriptorBuilder {
    /// Sets the realm.
    pub fn realm(mut self, realm: &str) -> Self {
        self.descriptor.realm = realm.to_string();
        self
    }

    /// Appends a mapped property.
    pub fn property(mut self, name: &str, mapping: PropertyMapping) -> Self {
        self.descriptor
            .properties
            .push(PropertyDescriptor::new(name, mapping));
        self
    }

    /// Appends a prepared property descriptor.
    pub fn descriptor(mut self, property: PropertyDescriptor) -> Self {
        self.descriptor.properties.push(property);
        self
    }

    /// Enables optimistic concurrency control.
    pub fn versioned(mut self) -> Self {
        self.descriptor.versioned = true;
        self
    }

    /// Routes documents by the value of the given property.
    pub fn routed_by(mut self, property: &str) -> Self {
        self.descriptor.routing = Some(property.to_string());
        self
    }

    /// Finishes the descriptor. Validation happens when it is registered.
    pub fn build(self) -> EntityDescriptor {
        self.descriptor
    }
}
