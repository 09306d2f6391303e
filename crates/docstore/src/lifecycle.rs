//! Physical indices, mappings and the read/write alias indirection.
//!
//! Every entity type is read through the alias `{relation}-active`, which points to
//! exactly one physical index. Writes go through the same alias unless a new write index
//! was installed. In that case writes are redirected to the new index until it is either
//! committed (the read alias moves over) or rolled back.
//!
//! ```text
//! {no index} -> {index, no alias} -> {aliased, read = write}
//!            -> {aliased, write redirected} -> {aliased, read = write (new index)}
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use serde_json::{Map, Value, json};

use crate::client::LowLevelClient;
use crate::config::{DynamicMapping, ElasticConfig};
use crate::error::{ConfigurationError, StorageResult};
use crate::schema::{DOCUMENT_ID_FIELD, EntityDescriptor};

/// Suffix of the read alias of each relation.
pub const ACTIVE_ALIAS: &str = "-active";

/// Number of suffixed names tried when the dated index name is taken.
const MAX_INDEX_NAME_RUNS: u32 = 10;

/// Outcome of the schema check performed at startup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SetupReport {
    /// Number of entity types whose index and mapping are in place.
    pub succeeded: usize,
    /// Number of entity types which could not be set up.
    pub failed: usize,
}

/// Current read and write indices of an entity type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexStatus {
    /// The type name.
    pub type_name: String,
    /// The relation name.
    pub relation: String,
    /// The read alias.
    pub read_alias: String,
    /// The physical index the read alias points to.
    pub read_index: Option<String>,
    /// The installed write index, if writes are redirected.
    pub write_index: Option<String>,
}

/// Keeps indices and mappings in sync with entity descriptors.
#[derive(Debug)]
pub struct IndexMappings {
    client: Arc<LowLevelClient>,
    config: Arc<ElasticConfig>,
    write_indices: RwLock<HashMap<String, String>>,
}

impl IndexMappings {
    /// Creates the manager.
    pub fn new(client: Arc<LowLevelClient>, config: Arc<ElasticConfig>) -> Self {
        Self {
            client,
            config,
            write_indices: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the alias all reads go through.
    pub fn read_alias(descriptor: &EntityDescriptor) -> String {
        format!("{}{}", descriptor.relation(), ACTIVE_ALIAS)
    }

    /// Returns the name of the physical index created for a type which has none yet.
    pub fn initial_index(descriptor: &EntityDescriptor) -> String {
        descriptor.relation().to_string()
    }

    /// Returns the index or alias all writes go to.
    pub fn write_alias(&self, descriptor: &EntityDescriptor) -> String {
        self.write_index(descriptor)
            .unwrap_or_else(|| Self::read_alias(descriptor))
    }

    /// Returns the installed write index, if writes are currently redirected.
    pub fn write_index(&self, descriptor: &EntityDescriptor) -> Option<String> {
        self.write_indices.read().get(descriptor.relation()).cloned()
    }

    /// Ensures alias and mapping of all given types, using the configured dynamic mode.
    ///
    /// Failures are logged and counted; they do not stop the remaining types.
    pub async fn check_and_update_indices(
        &self,
        descriptors: &[Arc<EntityDescriptor>],
    ) -> SetupReport {
        tracing::info!("Elasticsearch is starting up and checking the database schema...");

        let mut report = SetupReport::default();
        for descriptor in descriptors {
            match self.setup_entity(descriptor).await {
                Ok(()) => report.succeeded += 1,
                Err(e) => {
                    tracing::error!(
                        "Cannot create mapping for type {} ({}): {}",
                        descriptor.type_name(),
                        descriptor.relation(),
                        e
                    );
                    report.failed += 1;
                }
            }
        }

        tracing::info!(
            "Setup completed: Updated {} indices / {} failures occurred",
            report.succeeded,
            report.failed
        );
        report
    }

    /// Ensures that the read alias exists and carries the current mapping.
    pub async fn setup_entity(&self, descriptor: &EntityDescriptor) -> StorageResult<()> {
        let added_alias = self.setup_alias(descriptor).await?;

        tracing::debug!(
            "Updating mapping {} for {}...",
            descriptor.relation(),
            descriptor.type_name()
        );

        let target = if added_alias {
            Self::read_alias(descriptor)
        } else {
            Self::initial_index(descriptor)
        };
        self.create_mapping(descriptor, &target, self.config.dynamic_mapping)
            .await?;

        if !added_alias {
            // The index did not exist before, so the alias can only be attached now.
            self.setup_alias(descriptor).await?;
        }

        Ok(())
    }

    /// Makes sure the read alias exists. Returns false if there is no index to attach it to.
    pub async fn setup_alias(&self, descriptor: &EntityDescriptor) -> StorageResult<bool> {
        let alias = Self::read_alias(descriptor);
        if self.client.alias_exists(&alias).await? {
            tracing::debug!("Alias for mapping '{}' already present.", descriptor.relation());
            return Ok(true);
        }

        let index = Self::initial_index(descriptor);
        if !self.client.index_exists(&index).await? {
            tracing::debug!(
                "Found no index to attach an alias to for mapping '{}'.",
                descriptor.relation()
            );
            return Ok(false);
        }

        tracing::debug!("Creating alias for index {}.", index);
        self.client.add_alias(&index, &alias).await?;
        Ok(true)
    }

    /// Suggests an unused physical index name: the relation plus today's date,
    /// followed by a counter if that name is taken.
    pub async fn determine_next_index_name(
        &self,
        descriptor: &EntityDescriptor,
    ) -> StorageResult<String> {
        let base = format!(
            "{}-{}",
            descriptor.relation(),
            chrono::Utc::now().date_naive().format("%Y-%m-%d")
        );

        let mut candidate = base.clone();
        for run in 1..=MAX_INDEX_NAME_RUNS {
            if !self.client.index_exists(&candidate).await? {
                return Ok(candidate);
            }
            candidate = format!("{}-{}", base, run);
        }

        Err(ConfigurationError::IndexNameExhausted {
            relation: descriptor.relation().to_string(),
            attempts: MAX_INDEX_NAME_RUNS,
        }
        .into())
    }

    /// Renders the mapping document of a type.
    pub fn build_mapping(descriptor: &EntityDescriptor, mode: DynamicMapping) -> StorageResult<Value> {
        let mut properties = Map::new();
        let mut excludes = Vec::new();

        for property in descriptor.properties() {
            let unmappable = |name: String| ConfigurationError::UnmappableProperty {
                entity: descriptor.type_name().to_string(),
                property: name,
            };

            let mapping = property
                .mapping()
                .ok_or_else(|| unmappable(property.name().to_string()))?;
            let description = mapping
                .describe(mode)
                .map_err(|child| unmappable(format!("{}.{}", property.name(), child)))?;

            if mapping.is_excluded_from_source() {
                excludes.push(property.name().to_string());
            }
            properties.insert(property.name().to_string(), description);
        }
        properties.insert(DOCUMENT_ID_FIELD.to_string(), json!({"type": "keyword"}));

        let mut mapping = json!({
            "dynamic": mode.as_str(),
            "properties": properties,
        });
        if !excludes.is_empty() {
            mapping["_source"] = json!({ "excludes": excludes });
        }

        Ok(mapping)
    }

    /// Installs the mapping of a type in `index`, creating the index if necessary.
    pub async fn create_mapping(
        &self,
        descriptor: &EntityDescriptor,
        index: &str,
        mode: DynamicMapping,
    ) -> StorageResult<()> {
        let mapping = Self::build_mapping(descriptor, mode)?;

        if !self.client.index_exists(index).await? {
            let realm = self.config.realm_settings(descriptor.realm());
            tracing::debug!("Creating index {} in Elasticsearch....", index);
            self.client
                .create_index(index, realm.number_of_shards, realm.number_of_replicas)
                .await?;
        }

        tracing::debug!(
            "Creating mapping {} for {} in index {} in Elasticsearch....",
            descriptor.relation(),
            descriptor.type_name(),
            index
        );
        self.client.put_mapping(index, mapping).await?;
        Ok(())
    }

    /// Creates a new physical index with a strict mapping and redirects all writes to it.
    ///
    /// Reads keep using the current index until [`commit_write_index`](Self::commit_write_index).
    pub async fn create_and_install_write_index(
        &self,
        descriptor: &EntityDescriptor,
    ) -> StorageResult<String> {
        let index = self.determine_next_index_name(descriptor).await?;
        self.create_mapping(descriptor, &index, DynamicMapping::Strict)
            .await?;

        tracing::info!(
            "Installed {} as write index for {}",
            index,
            descriptor.relation()
        );
        self.write_indices
            .write()
            .insert(descriptor.relation().to_string(), index.clone());
        Ok(index)
    }

    /// Moves the read alias to the installed write index and ends the redirection.
    pub async fn commit_write_index(&self, descriptor: &EntityDescriptor) -> StorageResult<String> {
        let index = self.write_index(descriptor).ok_or_else(|| {
            ConfigurationError::NoWriteIndex {
                entity: descriptor.type_name().to_string(),
            }
        })?;

        self.client
            .create_or_move_alias(&Self::read_alias(descriptor), &index)
            .await?;
        self.write_indices.write().remove(descriptor.relation());

        tracing::info!("Committed {} as index of {}", index, descriptor.relation());
        Ok(index)
    }

    /// Ends the redirection of writes without touching any index or alias.
    ///
    /// Returns the write index which was installed.
    pub fn rollback_write_index(&self, descriptor: &EntityDescriptor) -> Option<String> {
        let index = self.write_indices.write().remove(descriptor.relation());
        if let Some(ref index) = index {
            tracing::info!(
                "Rolled back write index {} of {}",
                index,
                descriptor.relation()
            );
        }
        index
    }

    /// Reports the read and write index of a type.
    pub async fn status(&self, descriptor: &EntityDescriptor) -> StorageResult<IndexStatus> {
        let read_alias = Self::read_alias(descriptor);
        let read_index = self.client.resolve_index_for_alias(&read_alias).await?;

        Ok(IndexStatus {
            type_name: descriptor.type_name().to_string(),
            relation: descriptor.relation().to_string(),
            read_alias,
            read_index,
            write_index: self.write_index(descriptor),
        })
    }

    /// Deletes a physical index of a type which is neither read from nor written to.
    pub async fn drop_index(&self, descriptor: &EntityDescriptor, index: &str) -> StorageResult<()> {
        let read_alias = Self::read_alias(descriptor);
        let in_use = if self.write_index(descriptor).as_deref() == Some(index) {
            Some(format!("{} (write index)", read_alias))
        } else if self.client.resolve_index_for_alias(&read_alias).await?.as_deref() == Some(index) {
            Some(read_alias)
        } else {
            None
        };

        if let Some(alias) = in_use {
            return Err(ConfigurationError::IndexInUse {
                index: index.to_string(),
                alias,
            }
            .into());
        }

        tracing::info!("Deleting index {} of {}", index, descriptor.relation());
        self.client.delete_index(index).await
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::client::HttpMethod;
    use crate::client::mock::MockTransport;
    use crate::error::StorageError;
    use crate::schema::{PropertyDescriptor, PropertyMapping};

    fn setup() -> (Arc<MockTransport>, IndexMappings) {
        let transport = Arc::new(MockTransport::new());
        let client = Arc::new(LowLevelClient::new(
            transport.clone(),
            Duration::from_secs(1),
        ));
        let mut config = ElasticConfig::default();
        config.default_realm.number_of_shards = 2;
        (transport, IndexMappings::new(client, Arc::new(config)))
    }

    fn descriptor() -> EntityDescriptor {
        EntityDescriptor::builder("Person", "person")
            .property("name", PropertyMapping::keyword())
            .property("blob", PropertyMapping::object(vec![]).enabled(false).exclude_from_source())
            .property(
                "addresses",
                PropertyMapping::nested(vec![PropertyDescriptor::new(
                    "city",
                    PropertyMapping::keyword(),
                )]),
            )
            .build()
    }

    #[test]
    fn test_build_mapping() {
        let mapping = IndexMappings::build_mapping(&descriptor(), DynamicMapping::False).unwrap();
        assert_eq!(
            mapping,
            json!({
                "dynamic": "false",
                "properties": {
                    "name": {"type": "keyword"},
                    "blob": {"type": "object", "enabled": false, "dynamic": "false"},
                    "addresses": {
                        "type": "nested",
                        "dynamic": "false",
                        "properties": {"city": {"type": "keyword"}},
                    },
                    "id": {"type": "keyword"},
                },
                "_source": {"excludes": ["blob"]},
            })
        );
    }

    #[test]
    fn test_build_mapping_unmappable() {
        let descriptor = EntityDescriptor::builder("Person", "person")
            .descriptor(PropertyDescriptor::unmapped("raw"))
            .build();
        let err = IndexMappings::build_mapping(&descriptor, DynamicMapping::Strict).unwrap_err();
        assert!(matches!(
            err,
            StorageError::Configuration(ConfigurationError::UnmappableProperty { ref property, .. })
                if property == "raw"
        ));
    }

    #[tokio::test]
    async fn test_setup_entity_without_index() {
        let (transport, mappings) = setup();
        transport.respond_empty(404); // HEAD /_alias/person-active
        transport.respond_empty(404); // HEAD /person
        transport.respond_empty(404); // HEAD /person
        transport.respond(200, json!({"acknowledged": true})); // PUT /person
        transport.respond(200, json!({"acknowledged": true})); // PUT /person/_mapping
        transport.respond_empty(404); // HEAD /_alias/person-active
        transport.respond_empty(200); // HEAD /person
        transport.respond(200, json!({"acknowledged": true})); // PUT /person/_alias/person-active

        mappings.setup_entity(&descriptor()).await.unwrap();

        let requests = transport.requests();
        assert_eq!(requests.len(), 8);
        assert_eq!(requests[3].method, HttpMethod::Put);
        assert_eq!(requests[3].path, "/person");
        assert_eq!(
            requests[3].json_body().unwrap()["settings"]["index"]["number_of_shards"],
            2
        );
        assert_eq!(requests[4].path, "/person/_mapping");
        assert_eq!(requests[4].json_body().unwrap()["dynamic"], "strict");
        assert_eq!(requests[7].path, "/person/_alias/person-active");
    }

    #[tokio::test]
    async fn test_setup_entity_with_alias() {
        let (transport, mappings) = setup();
        transport.respond_empty(200); // HEAD /_alias/person-active
        transport.respond_empty(200); // HEAD /person-active
        transport.respond(200, json!({"acknowledged": true}));

        mappings.setup_entity(&descriptor()).await.unwrap();

        let requests = transport.requests();
        assert_eq!(requests.len(), 3);
        assert_eq!(requests[2].path, "/person-active/_mapping");
    }

    #[tokio::test]
    async fn test_check_and_update_counts_failures() {
        let (transport, mappings) = setup();
        transport.respond_empty(200);
        transport.respond_empty(200);
        transport.respond(400, json!({"error": {"type": "illegal_argument_exception", "reason": "mapper conflict"}}));

        let report = mappings
            .check_and_update_indices(&[Arc::new(descriptor())])
            .await;
        assert_eq!(report, SetupReport { succeeded: 0, failed: 1 });
    }

    #[tokio::test]
    async fn test_next_index_name() {
        let (transport, mappings) = setup();
        transport.respond_empty(200);
        transport.respond_empty(200);
        transport.respond_empty(404);

        let name = mappings.determine_next_index_name(&descriptor()).await.unwrap();
        let today = chrono::Utc::now().date_naive().format("%Y-%m-%d").to_string();
        assert_eq!(name, format!("person-{}-2", today));
    }

    #[tokio::test]
    async fn test_next_index_name_exhausted() {
        let (transport, mappings) = setup();
        for _ in 0..MAX_INDEX_NAME_RUNS {
            transport.respond_empty(200);
        }

        let err = mappings.determine_next_index_name(&descriptor()).await.unwrap_err();
        assert!(matches!(
            err,
            StorageError::Configuration(ConfigurationError::IndexNameExhausted { attempts: 10, .. })
        ));
    }

    #[tokio::test]
    async fn test_write_index_lifecycle() {
        let (transport, mappings) = setup();
        let descriptor = descriptor();

        let err = mappings.commit_write_index(&descriptor).await.unwrap_err();
        assert!(matches!(
            err,
            StorageError::Configuration(ConfigurationError::NoWriteIndex { .. })
        ));

        transport.respond_empty(404); // name is free
        transport.respond_empty(404); // index does not exist
        transport.respond(200, json!({"acknowledged": true}));
        transport.respond(200, json!({"acknowledged": true}));

        let index = mappings
            .create_and_install_write_index(&descriptor)
            .await
            .unwrap();
        assert_eq!(mappings.write_alias(&descriptor), index);
        assert_eq!(
            transport.requests()[3].json_body().unwrap()["dynamic"],
            "strict"
        );

        transport.respond_empty(200); // HEAD new index
        transport.respond(200, json!({"person": {"aliases": {"person-active": {}}}}));
        transport.respond(200, json!({"acknowledged": true}));

        assert_eq!(mappings.commit_write_index(&descriptor).await.unwrap(), index);
        assert_eq!(mappings.write_alias(&descriptor), "person-active");

        let actions = transport.requests()[6].json_body().unwrap()["actions"].clone();
        assert_eq!(
            actions,
            json!([
                {"add": {"index": index, "alias": "person-active"}},
                {"remove": {"index": "person", "alias": "person-active"}},
            ])
        );
    }

    #[tokio::test]
    async fn test_rollback_write_index() {
        let (transport, mappings) = setup();
        let descriptor = descriptor();
        assert_eq!(mappings.rollback_write_index(&descriptor), None);

        transport.respond_empty(404);
        transport.respond_empty(404);
        let index = mappings
            .create_and_install_write_index(&descriptor)
            .await
            .unwrap();
        let requests_before = transport.request_count();

        assert_eq!(mappings.rollback_write_index(&descriptor), Some(index));
        assert_eq!(mappings.write_alias(&descriptor), "person-active");
        assert_eq!(transport.request_count(), requests_before);
    }

    #[tokio::test]
    async fn test_status_and_drop_index() {
        let (transport, mappings) = setup();
        let descriptor = descriptor();

        transport.respond(200, json!({"person-2024-01-01": {"aliases": {"person-active": {}}}}));
        let status = mappings.status(&descriptor).await.unwrap();
        assert_eq!(status.read_index.as_deref(), Some("person-2024-01-01"));
        assert_eq!(status.write_index, None);

        transport.respond(200, json!({"person-2024-01-01": {"aliases": {"person-active": {}}}}));
        let err = mappings
            .drop_index(&descriptor, "person-2024-01-01")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StorageError::Configuration(ConfigurationError::IndexInUse { .. })
        ));

        transport.respond(200, json!({"person-2024-01-01": {"aliases": {"person-active": {}}}}));
        transport.respond(200, json!({"acknowledged": true}));
        mappings.drop_index(&descriptor, "person").await.unwrap();
        let last = transport.requests().pop().unwrap();
        assert_eq!(last.method, HttpMethod::Delete);
        assert_eq!(last.path, "/person");
    }
}
