//! Create, update, delete and find entities.

use std::future::Future;
use std::sync::Arc;

use serde_json::{Map, Value, json};
use uuid::Uuid;

use crate::bulk::{BatchContext, BulkContext};
use crate::client::{LowLevelClient, Transport, doc_path};
use crate::config::ElasticConfig;
use crate::error::{BackendError, ConfigurationError, StorageResult};
use crate::lifecycle::{IndexMappings, SetupReport};
use crate::query::{ElasticQuery, SuggestionQuery};
use crate::routing::{AccessMode, RoutingTable};
use crate::schema::entity::{document_body, extract_source, load_hit, routing_value};
use crate::schema::{DescriptorRegistry, Entity, EntityDescriptor, VersionTokens};

use super::retry::retry_on_conflict;

const FIELD_FOUND: &str = "found";
const FIELD_SOURCE: &str = "_source";

/// Entry point of the document store.
///
/// Owns the protocol client, the configuration, the descriptor registry, the index
/// lifecycle manager and the routing table. Cloning is cheap and all clones share
/// the same state.
#[derive(Debug, Clone)]
pub struct Elastic {
    client: Arc<LowLevelClient>,
    config: Arc<ElasticConfig>,
    registry: Arc<DescriptorRegistry>,
    mappings: Arc<IndexMappings>,
    routing: Arc<RoutingTable>,
}

impl Elastic {
    /// Creates a store talking to the configured cluster.
    pub fn new(config: ElasticConfig) -> StorageResult<Self> {
        let client = LowLevelClient::from_config(&config)?;
        Ok(Self::assemble(client, config))
    }

    /// Creates a store on top of a custom transport.
    pub fn with_transport(
        config: ElasticConfig,
        transport: Arc<dyn Transport>,
    ) -> StorageResult<Self> {
        let client = LowLevelClient::new(transport, config.slow_call_threshold()?);
        Ok(Self::assemble(client, config))
    }

    fn assemble(client: LowLevelClient, config: ElasticConfig) -> Self {
        let client = Arc::new(client);
        let config = Arc::new(config);
        Self {
            mappings: Arc::new(IndexMappings::new(client.clone(), config.clone())),
            routing: Arc::new(RoutingTable::from_config(&config.routing)),
            registry: Arc::new(DescriptorRegistry::new()),
            client,
            config,
        }
    }

    /// Returns the protocol client.
    pub fn client(&self) -> &LowLevelClient {
        &self.client
    }

    /// Returns the configuration.
    pub fn config(&self) -> &ElasticConfig {
        &self.config
    }

    /// Returns the descriptor registry.
    pub fn registry(&self) -> &DescriptorRegistry {
        &self.registry
    }

    /// Returns the index lifecycle manager.
    pub fn mappings(&self) -> &IndexMappings {
        &self.mappings
    }

    /// Returns the routing table, which may be changed at runtime.
    pub fn routing(&self) -> &RoutingTable {
        &self.routing
    }

    /// Validates and registers an entity type.
    pub fn register<E: Entity>(&self) -> StorageResult<Arc<EntityDescriptor>> {
        self.registry.register::<E>()
    }

    /// Returns the descriptor of `E`, registering the type on first use.
    pub fn descriptor<E: Entity>(&self) -> StorageResult<Arc<EntityDescriptor>> {
        match self.registry.get::<E>() {
            Ok(descriptor) => Ok(descriptor),
            Err(_) => self.registry.register::<E>(),
        }
    }

    /// Waits until the cluster answers requests.
    ///
    /// Polls the cluster up to `readiness_retries` times, pausing `readiness_interval_ms`
    /// between attempts.
    pub async fn wait_until_ready(&self) -> StorageResult<()> {
        let retries = self.config.readiness_retries.max(1);
        let mut last_error = String::new();

        for attempt in 1..=retries {
            match self.client.list_indices().await {
                Ok(_) => {
                    tracing::debug!("Elasticsearch is ready after {} attempt(s)", attempt);
                    return Ok(());
                }
                Err(e) => {
                    tracing::info!(
                        "Elasticsearch is not ready yet ({}/{}): {}",
                        attempt,
                        retries,
                        e
                    );
                    last_error = e.to_string();
                }
            }

            if attempt < retries {
                tokio::time::sleep(self.config.readiness_interval()).await;
            }
        }

        tracing::error!(
            "Elasticsearch ({}) did not become ready after {} attempts",
            self.client.host(),
            retries
        );
        Err(BackendError::Unavailable {
            backend_name: "elasticsearch".to_string(),
            message: format!("not ready after {} attempts: {}", retries, last_error),
        }
        .into())
    }

    /// Waits for the cluster and brings indices and mappings of all registered types up to date.
    pub async fn initialize(&self) -> StorageResult<SetupReport> {
        self.wait_until_ready().await?;
        Ok(self
            .mappings
            .check_and_update_indices(&self.registry.all())
            .await)
    }

    /// Returns the alias reads of the given type go through.
    pub fn determine_read_alias(&self, descriptor: &EntityDescriptor) -> String {
        IndexMappings::read_alias(descriptor)
    }

    /// Returns the alias or index writes of the given type go to.
    pub fn determine_write_alias(&self, descriptor: &EntityDescriptor) -> String {
        self.mappings.write_alias(descriptor)
    }

    /// Returns the physical index the read alias currently points to.
    ///
    /// Falls back to the alias itself if it cannot be resolved.
    pub async fn determine_effective_index(
        &self,
        descriptor: &EntityDescriptor,
    ) -> StorageResult<String> {
        let alias = self.determine_read_alias(descriptor);
        Ok(self
            .client
            .resolve_index_for_alias(&alias)
            .await?
            .unwrap_or(alias))
    }

    /// Starts copying all documents of `E` from the read index into the installed write index.
    ///
    /// Returns the id of the server-side reindex task.
    pub async fn reindex_into_write_index<E: Entity>(&self) -> StorageResult<String> {
        let descriptor = self.descriptor::<E>()?;
        let destination = self.mappings.write_index(&descriptor).ok_or_else(|| {
            ConfigurationError::NoWriteIndex {
                entity: descriptor.type_name().to_string(),
            }
        })?;
        let source = self.determine_effective_index(&descriptor).await?;

        tracing::info!("Reindexing {} into {}", source, destination);
        self.client.start_reindex(&source, &destination).await
    }

    /// Writes the entity, checking its concurrency tokens if the type is versioned.
    ///
    /// Entities without changes since they were loaded are not written at all.
    pub async fn update<E: Entity>(&self, entity: &mut E) -> StorageResult<()> {
        self.perform_update(entity, false).await
    }

    /// Writes the entity without checking its concurrency tokens.
    pub async fn override_update<E: Entity>(&self, entity: &mut E) -> StorageResult<()> {
        self.perform_update(entity, true).await
    }

    async fn perform_update<E: Entity>(&self, entity: &mut E, force: bool) -> StorageResult<()> {
        let descriptor = self.descriptor::<E>()?;
        let source = extract_source(&descriptor, entity)?;

        if entity.state().is_loaded() && entity.state().changed_properties(&source).is_empty() {
            tracing::debug!(
                "Skipping update of unchanged {} {}",
                descriptor.type_name(),
                entity.id().unwrap_or_default()
            );
            return Ok(());
        }

        let id = entity
            .id()
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let routing = self.write_routing(&descriptor, &source, "update");
        let tokens = self.conditional_tokens(&descriptor, entity, force);

        let response = self
            .client
            .index(
                &self.determine_write_alias(&descriptor),
                &id,
                routing.as_deref(),
                tokens,
                document_body(&source, &id),
            )
            .await?;

        let tokens = if descriptor.is_versioned() {
            VersionTokens::from_response(&response)
        } else {
            None
        };
        entity.state_mut().mark_persisted(id, tokens, source);
        Ok(())
    }

    /// Deletes the entity, checking its concurrency tokens if the type is versioned.
    ///
    /// Deleting an entity without an id is a no-op.
    pub async fn delete<E: Entity>(&self, entity: &E) -> StorageResult<()> {
        self.perform_delete(entity, false).await
    }

    /// Deletes the entity without checking its concurrency tokens.
    pub async fn force_delete<E: Entity>(&self, entity: &E) -> StorageResult<()> {
        self.perform_delete(entity, true).await
    }

    async fn perform_delete<E: Entity>(&self, entity: &E, force: bool) -> StorageResult<()> {
        let Some(id) = entity.id() else {
            return Ok(());
        };

        let descriptor = self.descriptor::<E>()?;
        let source = extract_source(&descriptor, entity)?;
        let routing = self.write_routing(&descriptor, &source, "delete");
        let tokens = self.conditional_tokens(&descriptor, entity, force);

        self.client
            .delete(
                &self.determine_write_alias(&descriptor),
                id,
                routing.as_deref(),
                tokens,
            )
            .await?;
        Ok(())
    }

    /// Loads an entity by id.
    pub async fn find<E: Entity>(&self, id: &str, routing: Option<&str>) -> StorageResult<Option<E>> {
        let descriptor = self.descriptor::<E>()?;
        let routing = self.read_routing(&descriptor, routing, "find");

        let response = self
            .client
            .get(
                &self.determine_read_alias(&descriptor),
                id,
                routing.as_deref(),
                true,
            )
            .await?;

        if response.get(FIELD_FOUND).and_then(Value::as_bool) != Some(true) {
            return Ok(None);
        }

        load_hit(&descriptor, &response).map(Some)
    }

    /// Re-reads an entity, failing if it no longer exists.
    pub async fn refresh_or_fail<E: Entity>(&self, entity: &E) -> StorageResult<E> {
        match self.try_refresh(entity).await? {
            Some(refreshed) => Ok(refreshed),
            None => Err(BackendError::EntityNotFound {
                entity: E::descriptor().type_name().to_string(),
                id: entity.id().unwrap_or_default().to_string(),
            }
            .into()),
        }
    }

    /// Re-reads an entity using its id and routing value.
    ///
    /// Returns `None` for entities without an id and entities which no longer exist.
    pub async fn try_refresh<E: Entity>(&self, entity: &E) -> StorageResult<Option<E>> {
        let Some(id) = entity.id() else {
            return Ok(None);
        };

        let descriptor = self.descriptor::<E>()?;
        let source = extract_source(&descriptor, entity)?;
        let routing = routing_value(&descriptor, &source);
        self.find::<E>(id, routing.as_deref()).await
    }

    /// Loads a single source field of a document without loading the entity.
    ///
    /// Nested fields are addressed with dots, e.g. `address.city`.
    pub async fn fetch_field<E: Entity>(
        &self,
        id: &str,
        routing: Option<&str>,
        field: &str,
    ) -> StorageResult<Option<Value>> {
        let descriptor = self.descriptor::<E>()?;
        let routing = self.read_routing(&descriptor, routing, "fetch a field of");

        let response = self
            .client
            .perform_get()
            .routing(routing.as_deref())
            .param("_source_includes", field)
            .on_not_found(|_| Some(json!({"found": false})))
            .execute(&doc_path(&self.determine_read_alias(&descriptor), id))
            .await?
            .into_json()?;

        if response.get(FIELD_FOUND).and_then(Value::as_bool) != Some(true) {
            return Ok(None);
        }

        let pointer = format!("/{}/{}", FIELD_SOURCE, field.replace('.', "/"));
        Ok(response.pointer(&pointer).cloned())
    }

    /// Makes all writes of `E` visible to searches.
    pub async fn refresh<E: Entity>(&self) -> StorageResult<()> {
        let descriptor = self.descriptor::<E>()?;
        self.client
            .refresh(&self.determine_read_alias(&descriptor))
            .await?;
        if let Some(write_index) = self.mappings.write_index(&descriptor) {
            self.client.refresh(&write_index).await?;
        }
        Ok(())
    }

    /// Starts a query for entities of type `E`.
    pub fn select<E: Entity>(&self) -> StorageResult<ElasticQuery<E>> {
        Ok(ElasticQuery::new(self.clone(), self.descriptor::<E>()?))
    }

    /// Starts a suggestion-only query against the read alias of `E`.
    pub fn suggest<E: Entity>(&self) -> StorageResult<SuggestionQuery<E>> {
        Ok(SuggestionQuery::new(self.clone(), self.descriptor::<E>()?))
    }

    /// Creates a bulk pipeline which reports failures per command.
    pub fn batch(&self) -> BulkContext {
        BulkContext::new(self.clone())
    }

    /// Creates a bulk pipeline which only reports success as a flag.
    pub fn batch_context(&self) -> BatchContext {
        BatchContext::new(self.clone())
    }

    /// Runs `task`, retrying it on concurrency conflicts as configured in `retry`.
    pub async fn retry<T, F, Fut>(&self, task: F) -> StorageResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = StorageResult<T>>,
    {
        retry_on_conflict(&self.config.retry, task).await
    }

    /// Returns the routing value to send for a write of the given source.
    pub(crate) fn write_routing(
        &self,
        descriptor: &EntityDescriptor,
        source: &Map<String, Value>,
        action: &str,
    ) -> Option<String> {
        let routing = self.routing.filter_routing(
            descriptor,
            AccessMode::Write,
            routing_value(descriptor, source).as_deref(),
        );
        self.routing
            .check_routing(descriptor, AccessMode::Write, routing.as_deref(), action);
        routing
    }

    fn read_routing(
        &self,
        descriptor: &EntityDescriptor,
        routing: Option<&str>,
        action: &str,
    ) -> Option<String> {
        let routing = self
            .routing
            .filter_routing(descriptor, AccessMode::Read, routing);
        self.routing
            .check_routing(descriptor, AccessMode::Read, routing.as_deref(), action);
        routing
    }

    /// Returns the tokens a conditional write of the entity has to carry.
    pub(crate) fn conditional_tokens<E: Entity>(
        &self,
        descriptor: &EntityDescriptor,
        entity: &E,
        force: bool,
    ) -> Option<VersionTokens> {
        if force || !descriptor.is_versioned() || entity.is_new() {
            return None;
        }
        entity.state().tokens()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::HttpMethod;
    use crate::client::mock::MockTransport;
    use crate::error::{ConcurrencyError, StorageError};
    use crate::schema::entity::tests::{Event, Person, person};

    fn setup() -> (Arc<MockTransport>, Elastic) {
        let transport = Arc::new(MockTransport::new());
        let elastic = Elastic::with_transport(ElasticConfig::default(), transport.clone()).unwrap();
        (transport, elastic)
    }

    fn written(seq_no: i64) -> Value {
        json!({"result": "created", "_primary_term": 1, "_seq_no": seq_no})
    }

    #[tokio::test]
    async fn test_create_assigns_id_and_tokens() {
        let (transport, elastic) = setup();
        transport.respond(201, written(0));

        let mut ada = person("Ada", 36);
        elastic.update(&mut ada).await.unwrap();

        assert!(!ada.is_new());
        assert!(ada.id().is_some());
        assert_eq!(
            ada.state().tokens(),
            Some(VersionTokens {
                primary_term: 1,
                seq_no: 0
            })
        );

        let request = &transport.requests()[0];
        assert_eq!(request.method, HttpMethod::Put);
        assert!(request.path.starts_with("/person-active/_doc/"));
        assert_eq!(request.param("if_seq_no"), None);
        assert_eq!(request.json_body().unwrap()["name"], "Ada");
        assert_eq!(request.json_body().unwrap()["id"], json!(ada.id().unwrap()));
        assert!(!ada.state().snapshot().unwrap().contains_key("id"));
    }

    #[tokio::test]
    async fn test_unchanged_update_is_skipped() {
        let (transport, elastic) = setup();
        transport.respond(201, written(0));

        let mut ada = person("Ada", 36);
        elastic.update(&mut ada).await.unwrap();
        elastic.update(&mut ada).await.unwrap();
        elastic.override_update(&mut ada).await.unwrap();

        assert_eq!(transport.request_count(), 1);
    }

    #[tokio::test]
    async fn test_update_sends_tokens_unless_forced() {
        let (transport, elastic) = setup();
        transport.respond(201, written(0));
        transport.respond(200, written(1));
        transport.respond(200, written(2));

        let mut ada = person("Ada", 36);
        elastic.update(&mut ada).await.unwrap();
        ada.age = 37;
        elastic.update(&mut ada).await.unwrap();
        ada.age = 38;
        elastic.override_update(&mut ada).await.unwrap();

        let requests = transport.requests();
        assert_eq!(requests[1].param("if_seq_no"), Some("0"));
        assert_eq!(requests[1].param("if_primary_term"), Some("1"));
        assert_eq!(requests[2].param("if_seq_no"), None);
        assert_eq!(ada.state().tokens().map(|t| t.seq_no), Some(2));
    }

    #[tokio::test]
    async fn test_stale_update_is_a_conflict() {
        let (transport, elastic) = setup();
        transport.respond(201, written(0));
        transport.respond(
            409,
            json!({"error": {"type": "version_conflict_engine_exception", "reason": "version conflict"}, "status": 409}),
        );

        let mut ada = person("Ada", 36);
        elastic.update(&mut ada).await.unwrap();
        ada.age = 40;
        let err = elastic.update(&mut ada).await.unwrap_err();

        assert!(err.is_concurrency_conflict());
        assert!(matches!(
            err,
            StorageError::Concurrency(ConcurrencyError::OptimisticLockFailure { .. })
        ));
    }

    #[tokio::test]
    async fn test_delete() {
        let (transport, elastic) = setup();
        elastic.delete(&person("Ada", 1)).await.unwrap();
        assert_eq!(transport.request_count(), 0);

        transport.respond(201, written(3));
        transport.respond(200, json!({"result": "deleted"}));
        transport.respond(200, json!({"result": "deleted"}));

        let mut ada = person("Ada", 36);
        elastic.update(&mut ada).await.unwrap();
        elastic.delete(&ada).await.unwrap();
        elastic.force_delete(&ada).await.unwrap();

        let requests = transport.requests();
        assert_eq!(requests[1].method, HttpMethod::Delete);
        assert_eq!(requests[1].param("if_seq_no"), Some("3"));
        assert_eq!(requests[2].param("if_seq_no"), None);

        let mut carl = person("Carl", 50);
        carl.state_mut().set_id("carl-1");
        elastic.delete(&carl).await.unwrap();
        let requests = transport.requests();
        assert_eq!(requests.len(), 4);
        assert_eq!(requests[3].path, "/person-active/_doc/carl-1");
        assert_eq!(requests[3].param("if_seq_no"), None);
    }

    #[tokio::test]
    async fn test_find() {
        let (transport, elastic) = setup();
        transport.respond(
            200,
            json!({
                "_index": "person",
                "_id": "p1",
                "found": true,
                "_primary_term": 1,
                "_seq_no": 4,
                "_source": {"name": "Ada", "age": 36}
            }),
        );
        transport.respond(404, json!({"_index": "person", "_id": "p2", "found": false}));

        let ada: Person = elastic.find("p1", None).await.unwrap().unwrap();
        assert_eq!(ada.name, "Ada");
        assert_eq!(ada.state().tokens().map(|t| t.seq_no), Some(4));
        assert_eq!(transport.requests()[0].path, "/person-active/_doc/p1");

        assert!(elastic.find::<Person>("p2", None).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_routed_writes_carry_routing() {
        let (transport, elastic) = setup();
        transport.respond(201, written(0));

        let mut event = Event {
            tenant: "t1".to_string(),
            kind: "login".to_string(),
            ..Default::default()
        };
        elastic.update(&mut event).await.unwrap();
        assert_eq!(transport.requests()[0].param("routing"), Some("t1"));
        assert_eq!(event.state().tokens(), None);

        elastic.routing().suppress("event", AccessMode::Write);
        event.kind = "logout".to_string();
        elastic.update(&mut event).await.unwrap();
        assert_eq!(transport.requests()[1].param("routing"), None);
    }

    #[tokio::test]
    async fn test_refresh_or_fail() {
        let (transport, elastic) = setup();
        transport.respond(201, written(0));
        transport.respond(404, json!({"found": false}));

        let mut ada = person("Ada", 36);
        elastic.update(&mut ada).await.unwrap();
        let err = elastic.refresh_or_fail(&ada).await.unwrap_err();
        assert!(matches!(
            err,
            StorageError::Backend(BackendError::EntityNotFound { .. })
        ));
        assert!(elastic.try_refresh(&person("Bob", 1)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_fetch_field() {
        let (transport, elastic) = setup();
        transport.respond(200, json!({"found": true, "_source": {"name": "Ada"}}));

        let name = elastic.fetch_field::<Person>("p1", None, "name").await.unwrap();
        assert_eq!(name, Some(json!("Ada")));
        assert_eq!(
            transport.requests()[0].param("_source_includes"),
            Some("name")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_until_ready_gives_up() {
        let transport = Arc::new(MockTransport::new());
        let mut config = ElasticConfig::default();
        config.readiness_retries = 2;
        for _ in 0..2 {
            transport.respond(503, json!({"error": {"type": "unavailable", "reason": "starting"}}));
        }
        let elastic = Elastic::with_transport(config, transport.clone()).unwrap();

        let err = elastic.wait_until_ready().await.unwrap_err();
        assert!(matches!(
            err,
            StorageError::Backend(BackendError::Unavailable { .. })
        ));
        assert_eq!(transport.request_count(), 2);
    }

    #[tokio::test]
    async fn test_reindex_requires_write_index() {
        let (_, elastic) = setup();
        let err = elastic.reindex_into_write_index::<Person>().await.unwrap_err();
        assert!(matches!(
            err,
            StorageError::Configuration(ConfigurationError::NoWriteIndex { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_refetches() {
        let (transport, elastic) = setup();
        transport.respond(409, json!({"error": {"type": "conflict", "reason": "stale"}}));
        transport.respond(200, written(5));

        let mut attempts = 0;
        let result = elastic
            .retry(|| {
                attempts += 1;
                let elastic = elastic.clone();
                async move {
                    let mut ada = person("Ada", 36);
                    elastic.update(&mut ada).await.map(|_| ada)
                }
            })
            .await
            .unwrap();
        assert_eq!(attempts, 2);
        assert_eq!(result.state().tokens().map(|t| t.seq_no), Some(5));
    }
}
