//! Validated descriptors of all registered entity types.

use std::any::TypeId;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;
use regex::Regex;

use crate::error::{ConfigurationError, StorageResult};

use super::descriptor::EntityDescriptor;
use super::entity::{DOCUMENT_ID_FIELD, Entity};

/// Relation names become index names, so they follow the index naming rules.
const RELATION_PATTERN: &str = r"^[a-z0-9][a-z0-9_\-]*$";

/// Holds one descriptor per registered entity type.
#[derive(Debug, Default)]
pub struct DescriptorRegistry {
    descriptors: RwLock<HashMap<TypeId, Arc<EntityDescriptor>>>,
}

impl DescriptorRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates and registers the descriptor of `E`.
    ///
    /// Registering a type twice returns the descriptor of the first registration.
    pub fn register<E: Entity>(&self) -> StorageResult<Arc<EntityDescriptor>> {
        if let Some(existing) = self.descriptors.read().get(&TypeId::of::<E>()) {
            return Ok(existing.clone());
        }

        let descriptor = E::descriptor();
        validate(&descriptor)?;

        let mut descriptors = self.descriptors.write();
        if let Some(clash) = descriptors
            .values()
            .find(|other| other.relation() == descriptor.relation())
        {
            return Err(ConfigurationError::InvalidName {
                name: descriptor.relation().to_string(),
                message: format!("relation is already used by {}", clash.type_name()),
            }
            .into());
        }

        tracing::debug!(
            "Registered entity {} (relation: {}, realm: {})",
            descriptor.type_name(),
            descriptor.relation(),
            descriptor.realm()
        );

        let descriptor = Arc::new(descriptor);
        descriptors.insert(TypeId::of::<E>(), descriptor.clone());
        Ok(descriptor)
    }

    /// Returns the descriptor of `E`.
    pub fn get<E: Entity>(&self) -> StorageResult<Arc<EntityDescriptor>> {
        self.descriptors
            .read()
            .get(&TypeId::of::<E>())
            .cloned()
            .ok_or_else(|| {
                ConfigurationError::UnregisteredEntity {
                    type_name: std::any::type_name::<E>().to_string(),
                }
                .into()
            })
    }

    /// Looks up a descriptor by relation name.
    pub fn find_by_relation(&self, relation: &str) -> Option<Arc<EntityDescriptor>> {
        self.descriptors
            .read()
            .values()
            .find(|descriptor| descriptor.relation() == relation)
            .cloned()
    }

    /// Returns all descriptors ordered by relation name.
    pub fn all(&self) -> Vec<Arc<EntityDescriptor>> {
        let mut all: Vec<_> = self.descriptors.read().values().cloned().collect();
        all.sort_by(|a, b| a.relation().cmp(b.relation()));
        all
    }
}

fn validate(descriptor: &EntityDescriptor) -> StorageResult<()> {
    let relation_pattern =
        Regex::new(RELATION_PATTERN).map_err(|e| invalid_name(RELATION_PATTERN, &e.to_string()))?;
    if !relation_pattern.is_match(descriptor.relation()) {
        return Err(invalid_name(
            descriptor.relation(),
            "relation names must be lowercase and may only contain letters, digits, '-' and '_'",
        ));
    }

    let mut seen = HashSet::new();
    for property in descriptor.properties() {
        if property.name().is_empty() || property.name().starts_with('_') {
            return Err(invalid_name(
                property.name(),
                "property names must not be empty or start with '_'",
            ));
        }
        if property.name() == DOCUMENT_ID_FIELD {
            return Err(invalid_name(DOCUMENT_ID_FIELD, "the id is indexed under this name"));
        }
        if !seen.insert(property.name()) {
            return Err(invalid_name(property.name(), "property is declared twice"));
        }
    }

    if let Some(routing) = descriptor.routing_property() {
        if descriptor.property(routing).is_none() {
            return Err(invalid_name(routing, "the routing property is not declared"));
        }
    }

    Ok(())
}

fn invalid_name(name: &str, message: &str) -> crate::error::StorageError {
    ConfigurationError::InvalidName {
        name: name.to_string(),
        message: message.to_string(),
    }
    .into()
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};

    use super::*;
    use crate::error::StorageError;
    use crate::schema::entity::tests::{Event, Person};
    use crate::schema::{EntityState, PropertyMapping};

    #[derive(Debug, Default, Serialize, Deserialize)]
    struct Broken {
        #[serde(skip)]
        state: EntityState,
    }

    impl Entity for Broken {
        fn descriptor() -> EntityDescriptor {
            EntityDescriptor::builder("Broken", "Broken Relation")
                .property("name", PropertyMapping::keyword())
                .build()
        }

        fn state(&self) -> &EntityState {
            &self.state
        }

        fn state_mut(&mut self) -> &mut EntityState {
            &mut self.state
        }
    }

    #[test]
    fn test_register_and_get() {
        let registry = DescriptorRegistry::new();
        assert!(matches!(
            registry.get::<Person>(),
            Err(StorageError::Configuration(
                ConfigurationError::UnregisteredEntity { .. }
            ))
        ));

        registry.register::<Person>().unwrap();
        registry.register::<Event>().unwrap();
        registry.register::<Person>().unwrap();

        assert_eq!(registry.get::<Person>().unwrap().relation(), "person");
        assert_eq!(
            registry
                .all()
                .iter()
                .map(|d| d.relation().to_string())
                .collect::<Vec<_>>(),
            vec!["event", "person"]
        );
        assert!(registry.find_by_relation("event").is_some());
        assert!(registry.find_by_relation("order").is_none());
    }

    #[test]
    fn test_invalid_relation() {
        let registry = DescriptorRegistry::new();
        assert!(registry.register::<Broken>().is_err());
    }

    #[test]
    fn test_validate_properties() {
        let duplicate = EntityDescriptor::builder("A", "a")
            .property("x", PropertyMapping::keyword())
            .property("x", PropertyMapping::long())
            .build();
        assert!(validate(&duplicate).is_err());

        let reserved = EntityDescriptor::builder("A", "a")
            .property("_score", PropertyMapping::keyword())
            .build();
        assert!(validate(&reserved).is_err());

        let routing = EntityDescriptor::builder("A", "a")
            .property("x", PropertyMapping::keyword())
            .routed_by("tenant")
            .build();
        assert!(validate(&routing).is_err());

        assert!(validate(&Person::descriptor()).is_ok());
    }
}
