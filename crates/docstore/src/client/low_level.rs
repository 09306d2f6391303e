//! Logical operations of the Elasticsearch REST API.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};

use crate::config::{ElasticConfig, es_time_value};
use crate::error::{ConfigurationError, ProtocolError, StorageResult};
use crate::schema::VersionTokens;

use super::metrics::CallMetrics;
use super::request::{RefreshPolicy, RequestBuilder};
use super::transport::{ElasticsearchTransport, HttpMethod, Transport};

const API_DOC: &str = "_doc";
const API_SEARCH: &str = "_search";
const API_COUNT: &str = "_count";
const API_DELETE_BY_QUERY: &str = "_delete_by_query";
const API_ALIAS: &str = "_alias";
const API_ALIASES: &str = "_aliases";
const API_MAPPING: &str = "_mapping";
const API_REFRESH: &str = "_refresh";
const API_BULK: &str = "_bulk";
const API_PIT: &str = "_pit";
const API_REINDEX: &str = "_reindex";

/// Issues single REST calls and parses their responses.
///
/// Cheap to share behind an `Arc`; holds no lock around requests.
pub struct LowLevelClient {
    transport: Arc<dyn Transport>,
    metrics: CallMetrics,
    slow_call_threshold: Duration,
}

impl fmt::Debug for LowLevelClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LowLevelClient")
            .field("transport", &self.transport)
            .field("slow_call_threshold", &self.slow_call_threshold)
            .finish_non_exhaustive()
    }
}

impl LowLevelClient {
    /// Creates a client on top of the given transport.
    pub fn new(transport: Arc<dyn Transport>, slow_call_threshold: Duration) -> Self {
        Self {
            transport,
            metrics: CallMetrics::default(),
            slow_call_threshold,
        }
    }

    /// Creates a client talking to the first configured node.
    pub fn from_config(config: &ElasticConfig) -> StorageResult<Self> {
        let transport = ElasticsearchTransport::new(config)?;
        Ok(Self::new(
            Arc::new(transport),
            config.slow_call_threshold()?,
        ))
    }

    pub(crate) fn transport(&self) -> &dyn Transport {
        self.transport.as_ref()
    }

    /// Returns the host reported in error messages.
    pub fn host(&self) -> &str {
        self.transport.host()
    }

    /// Returns the call statistics.
    pub fn metrics(&self) -> &CallMetrics {
        &self.metrics
    }

    /// Returns the duration above which calls are considered slow.
    pub fn slow_call_threshold(&self) -> Duration {
        self.slow_call_threshold
    }

    /// Starts a GET request.
    pub fn perform_get(&self) -> RequestBuilder<'_> {
        RequestBuilder::new(self, HttpMethod::Get)
    }

    /// Starts a POST request.
    pub fn perform_post(&self) -> RequestBuilder<'_> {
        RequestBuilder::new(self, HttpMethod::Post)
    }

    /// Starts a PUT request.
    pub fn perform_put(&self) -> RequestBuilder<'_> {
        RequestBuilder::new(self, HttpMethod::Put)
    }

    /// Starts a DELETE request.
    pub fn perform_delete(&self) -> RequestBuilder<'_> {
        RequestBuilder::new(self, HttpMethod::Delete)
    }

    /// Starts a HEAD request.
    pub fn perform_head(&self) -> RequestBuilder<'_> {
        RequestBuilder::new(self, HttpMethod::Head)
    }

    /// Indexes a document, conditionally if tokens are given.
    pub async fn index(
        &self,
        index: &str,
        id: &str,
        routing: Option<&str>,
        tokens: Option<VersionTokens>,
        data: Value,
    ) -> StorageResult<Value> {
        self.perform_put()
            .routing(routing)
            .version(tokens)
            .data(data)
            .try_execute(&doc_path(index, id))
            .await?
            .into_json()
    }

    /// Fetches a document. A missing document yields a body with `found: false`.
    pub async fn get(
        &self,
        index: &str,
        id: &str,
        routing: Option<&str>,
        with_source: bool,
    ) -> StorageResult<Value> {
        let mut request = self.perform_get().routing(routing);
        if !with_source {
            request = request.param("_source", false);
        }

        request
            .on_not_found(|body| match body {
                Some(body) if body.get("found").is_some() => Some(body.clone()),
                _ => Some(json!({"found": false})),
            })
            .execute(&doc_path(index, id))
            .await?
            .into_json()
    }

    /// Deletes a document, conditionally if tokens are given.
    pub async fn delete(
        &self,
        index: &str,
        id: &str,
        routing: Option<&str>,
        tokens: Option<VersionTokens>,
    ) -> StorageResult<Value> {
        self.perform_delete()
            .routing(routing)
            .version(tokens)
            .on_not_found(|body| body.filter(|body| body.get("result").is_some()).cloned())
            .try_execute(&doc_path(index, id))
            .await?
            .into_json()
    }

    /// Deletes all documents matching the query.
    pub async fn delete_by_query(
        &self,
        alias: &str,
        routing: Option<&str>,
        query: Value,
    ) -> StorageResult<Value> {
        self.perform_post()
            .routing(routing)
            .data(query)
            .try_execute(&format!("/{}/{}", alias, API_DELETE_BY_QUERY))
            .await?
            .into_json()
    }

    /// Executes a search.
    pub async fn search(
        &self,
        alias: &str,
        routing: Option<&str>,
        from: usize,
        size: usize,
        query: Value,
    ) -> StorageResult<Value> {
        self.perform_post()
            .routing(routing)
            .from(from)
            .size(size)
            .data(query)
            .execute(&format!("/{}/{}", alias, API_SEARCH))
            .await?
            .into_json()
    }

    /// Starts copying all documents of one index into another without waiting for completion.
    ///
    /// Returns the id of the server-side task.
    pub async fn start_reindex(&self, source: &str, destination: &str) -> StorageResult<String> {
        let response = self
            .perform_post()
            .param("wait_for_completion", false)
            .data(json!({
                "source": {"index": source},
                "dest": {"index": destination},
            }))
            .execute(&format!("/{}", API_REINDEX))
            .await?
            .into_json()?;

        Ok(response
            .get("task")
            .and_then(|t| t.as_str())
            .unwrap_or_default()
            .to_string())
    }

    /// Adds an alias to an index.
    pub async fn add_alias(&self, index: &str, alias: &str) -> StorageResult<Value> {
        self.perform_put()
            .execute(&format!("/{}/{}/{}", index, API_ALIAS, alias))
            .await?
            .into_json()
    }

    /// Determines if an alias exists.
    pub async fn alias_exists(&self, alias: &str) -> StorageResult<bool> {
        let response = self
            .perform_head()
            .on_not_found(|_| Some(Value::Null))
            .execute(&format!("/{}/{}", API_ALIAS, alias))
            .await?;
        Ok(response.status() == 200)
    }

    /// Resolves the physical index an alias points to.
    ///
    /// An alias pointing to more than one index is a configuration error.
    pub async fn resolve_index_for_alias(&self, alias: &str) -> StorageResult<Option<String>> {
        let response = self
            .perform_get()
            .on_not_found(|_| Some(json!({})))
            .execute(&format!("/{}/{}", API_ALIAS, alias))
            .await?
            .into_json()?;

        let indices: Vec<String> = response
            .as_object()
            .map(|obj| obj.keys().cloned().collect())
            .unwrap_or_default();

        match indices.len() {
            0 => Ok(None),
            1 => Ok(indices.into_iter().next()),
            _ => Err(ConfigurationError::AmbiguousAlias {
                alias: alias.to_string(),
                indices,
            }
            .into()),
        }
    }

    /// Points `alias` to `destination`, removing it from its previous index in the same call.
    pub async fn create_or_move_alias(&self, alias: &str, destination: &str) -> StorageResult<Value> {
        if !self.index_exists(destination).await? {
            return Err(ConfigurationError::IndexMissing {
                index: destination.to_string(),
            }
            .into());
        }

        let mut actions = vec![json!({"add": {"index": destination, "alias": alias}})];
        if let Some(current) = self.resolve_index_for_alias(alias).await? {
            if current != destination {
                actions.push(json!({"remove": {"index": current, "alias": alias}}));
            }
        }

        self.perform_post()
            .data(json!({ "actions": actions }))
            .execute(&format!("/{}", API_ALIASES))
            .await?
            .into_json()
    }

    /// Opens a point-in-time cursor and returns its id.
    pub async fn open_point_in_time(
        &self,
        alias: &str,
        routing: Option<&str>,
        keep_alive: Duration,
    ) -> StorageResult<String> {
        let response = self
            .perform_post()
            .routing(routing)
            .param("keep_alive", es_time_value(keep_alive))
            .execute(&format!("/{}/{}", alias, API_PIT))
            .await?
            .into_json()?;

        response
            .get("id")
            .and_then(|id| id.as_str())
            .map(str::to_string)
            .ok_or_else(|| {
                ProtocolError::MalformedResponse {
                    message: format!("opening a point in time on {} returned no id", alias),
                }
                .into()
            })
    }

    /// Searches within a point-in-time cursor. The payload carries the `pit` section.
    pub async fn search_point_in_time(&self, payload: Value) -> StorageResult<Value> {
        self.perform_post()
            .data(payload)
            .execute(&format!("/{}", API_SEARCH))
            .await?
            .into_json()
    }

    /// Releases a point-in-time cursor. Releasing an expired cursor is not an error.
    pub async fn close_point_in_time(&self, pit_id: &str) -> StorageResult<()> {
        self.perform_delete()
            .data(json!({ "id": pit_id }))
            .on_not_found(|_| Some(json!({})))
            .execute(&format!("/{}", API_PIT))
            .await?;
        Ok(())
    }

    /// Determines if at least one document matches the query.
    pub async fn exists(&self, alias: &str, routing: Option<&str>, query: Value) -> StorageResult<bool> {
        let response = self
            .perform_post()
            .routing(routing)
            .size(0)
            .param("terminate_after", 1)
            .data(query)
            .execute(&format!("/{}/{}", alias, API_SEARCH))
            .await?
            .into_json()?;

        Ok(response["hits"]["total"]["value"].as_u64().unwrap_or(0) >= 1)
    }

    /// Counts the documents matching the query.
    pub async fn count(&self, alias: &str, routing: Option<&str>, query: Value) -> StorageResult<u64> {
        let response = self
            .perform_post()
            .routing(routing)
            .data(query)
            .execute(&format!("/{}/{}", alias, API_COUNT))
            .await?
            .into_json()?;

        response["count"].as_u64().ok_or_else(|| {
            ProtocolError::MalformedResponse {
                message: format!("count on {} returned no count", alias),
            }
            .into()
        })
    }

    /// Submits newline delimited bulk commands.
    pub async fn bulk(&self, lines: &[Value], refresh: RefreshPolicy) -> StorageResult<Value> {
        self.perform_post()
            .refresh(refresh)
            .raw_data(ndjson(lines))
            .execute(&format!("/{}", API_BULK))
            .await?
            .into_json()
    }

    /// Creates an index with the given shard layout.
    pub async fn create_index(
        &self,
        index: &str,
        number_of_shards: u32,
        number_of_replicas: u32,
    ) -> StorageResult<Value> {
        self.perform_put()
            .data(json!({
                "settings": {
                    "index": {
                        "number_of_shards": number_of_shards,
                        "number_of_replicas": number_of_replicas,
                    }
                }
            }))
            .execute(&format!("/{}", index))
            .await?
            .into_json()
    }

    /// Installs a mapping.
    pub async fn put_mapping(&self, index: &str, mapping: Value) -> StorageResult<Value> {
        self.perform_put()
            .data(mapping)
            .execute(&format!("/{}/{}", index, API_MAPPING))
            .await?
            .into_json()
    }

    /// Determines if an index (or alias) exists.
    pub async fn index_exists(&self, index: &str) -> StorageResult<bool> {
        let response = self
            .perform_head()
            .on_not_found(|_| Some(Value::Null))
            .execute(&format!("/{}", index))
            .await?;
        Ok(response.status() == 200)
    }

    /// Makes all changes of an index visible to searches.
    pub async fn refresh(&self, index: &str) -> StorageResult<()> {
        self.perform_post()
            .execute(&format!("/{}/{}", index, API_REFRESH))
            .await?;
        Ok(())
    }

    /// Deletes an index.
    pub async fn delete_index(&self, index: &str) -> StorageResult<()> {
        self.perform_delete().execute(&format!("/{}", index)).await?;
        Ok(())
    }

    /// Lists all indices.
    pub async fn list_indices(&self) -> StorageResult<Value> {
        self.perform_get()
            .param("format", "json")
            .execute("/_cat/indices")
            .await?
            .into_json()
    }
}

/// Returns the path of a document, with the id percent-encoded.
pub(crate) fn doc_path(index: &str, id: &str) -> String {
    format!("/{}/{}/{}", index, API_DOC, encode_id(id))
}

/// Percent-encodes a document id for use as a path segment.
fn encode_id(id: &str) -> String {
    url::form_urlencoded::byte_serialize(id.as_bytes())
        .collect::<String>()
        .replace('+', "%20")
}

/// Frames bulk lines as newline delimited JSON with a trailing newline.
pub(crate) fn ndjson(lines: &[Value]) -> String {
    let mut body = String::new();
    for line in lines {
        body.push_str(&line.to_string());
        body.push('\n');
    }
    body
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::mock::MockTransport;
    use crate::client::transport::RequestBody;
    use crate::error::StorageError;

    fn setup() -> (Arc<MockTransport>, LowLevelClient) {
        let transport = Arc::new(MockTransport::new());
        let client = LowLevelClient::new(transport.clone(), Duration::from_secs(1));
        (transport, client)
    }

    #[tokio::test]
    async fn test_index_path_and_params() {
        let (transport, client) = setup();
        transport.respond(201, json!({"_id": "a b", "_primary_term": 1, "_seq_no": 0}));

        client
            .index(
                "person-active",
                "a b",
                Some("tenant-a"),
                None,
                json!({"name": "x"}),
            )
            .await
            .unwrap();

        let request = &transport.requests()[0];
        assert_eq!(request.method, HttpMethod::Put);
        assert_eq!(request.path, "/person-active/_doc/a%20b");
        assert_eq!(request.param("routing"), Some("tenant-a"));
        assert_eq!(request.param("if_seq_no"), None);
    }

    #[tokio::test]
    async fn test_get_not_found() {
        let (transport, client) = setup();
        transport.respond(404, json!({"_index": "person", "_id": "1", "found": false}));
        transport.respond(404, json!({"error": {"type": "index_not_found_exception", "reason": "no such index"}}));

        let doc = client.get("person-active", "1", None, false).await.unwrap();
        assert_eq!(doc["found"], false);
        assert_eq!(transport.requests()[0].param("_source"), Some("false"));

        let doc = client.get("person-active", "1", None, true).await.unwrap();
        assert_eq!(doc["found"], false);
    }

    #[tokio::test]
    async fn test_delete_not_found() {
        let (transport, client) = setup();
        transport.respond(404, json!({"_index": "person", "_id": "1", "result": "not_found"}));
        transport.respond(404, json!({"error": {"type": "index_not_found_exception", "reason": "no such index"}}));

        let doc = client.delete("person-active", "1", None, None).await.unwrap();
        assert_eq!(doc["result"], "not_found");

        let err = client.delete("person-active", "1", None, None).await.unwrap_err();
        assert!(err.to_string().contains("no such index"));
        assert!(!err.is_concurrency_conflict());
    }

    #[tokio::test]
    async fn test_resolve_alias() {
        let (transport, client) = setup();
        transport.respond(200, json!({"person-2024-01-01": {"aliases": {"person-active": {}}}}));
        transport.respond(404, json!({"error": "alias [x] missing", "status": 404}));
        transport.respond(
            200,
            json!({"person-a": {"aliases": {}}, "person-b": {"aliases": {}}}),
        );

        assert_eq!(
            client.resolve_index_for_alias("person-active").await.unwrap(),
            Some("person-2024-01-01".to_string())
        );
        assert_eq!(client.resolve_index_for_alias("x").await.unwrap(), None);

        let err = client.resolve_index_for_alias("person-active").await.unwrap_err();
        assert!(matches!(
            err,
            StorageError::Configuration(ConfigurationError::AmbiguousAlias { .. })
        ));
    }

    #[tokio::test]
    async fn test_create_or_move_alias() {
        let (transport, client) = setup();
        transport.respond_empty(200);
        transport.respond(200, json!({"person-old": {"aliases": {"person-active": {}}}}));
        transport.respond(200, json!({"acknowledged": true}));

        client
            .create_or_move_alias("person-active", "person-new")
            .await
            .unwrap();

        let requests = transport.requests();
        assert_eq!(requests.len(), 3);
        assert_eq!(requests[0].method, HttpMethod::Head);
        assert_eq!(requests[0].path, "/person-new");
        assert_eq!(requests[2].path, "/_aliases");
        assert_eq!(
            requests[2].json_body().unwrap(),
            &json!({"actions": [
                {"add": {"index": "person-new", "alias": "person-active"}},
                {"remove": {"index": "person-old", "alias": "person-active"}},
            ]})
        );
    }

    #[tokio::test]
    async fn test_create_or_move_alias_requires_index() {
        let (transport, client) = setup();
        transport.respond_empty(404);

        let err = client
            .create_or_move_alias("person-active", "person-new")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StorageError::Configuration(ConfigurationError::IndexMissing { .. })
        ));
        assert_eq!(transport.request_count(), 1);
    }

    #[tokio::test]
    async fn test_exists_and_count() {
        let (transport, client) = setup();
        transport.respond(200, json!({"hits": {"total": {"value": 1, "relation": "eq"}, "hits": []}}));
        transport.respond(200, json!({"count": 42}));

        assert!(client.exists("person-active", None, json!({})).await.unwrap());
        assert_eq!(client.count("person-active", None, json!({})).await.unwrap(), 42);

        let requests = transport.requests();
        assert_eq!(requests[0].param("terminate_after"), Some("1"));
        assert_eq!(requests[0].param("size"), Some("0"));
        assert_eq!(requests[1].path, "/person-active/_count");
    }

    #[tokio::test]
    async fn test_bulk_framing() {
        let (transport, client) = setup();
        transport.respond(200, json!({"errors": false, "items": []}));

        client
            .bulk(
                &[
                    json!({"index": {"_index": "person-active", "_id": "1"}}),
                    json!({"name": "x"}),
                    json!({"delete": {"_index": "person-active", "_id": "2"}}),
                ],
                RefreshPolicy::Immediate,
            )
            .await
            .unwrap();

        let request = &transport.requests()[0];
        assert_eq!(request.path, "/_bulk");
        assert_eq!(request.param("refresh"), Some("true"));
        match &request.body {
            Some(RequestBody::NdJson(body)) => {
                assert!(body.ends_with('\n'));
                assert_eq!(body.lines().count(), 3);
            }
            other => panic!("unexpected body: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_point_in_time() {
        let (transport, client) = setup();
        transport.respond(200, json!({"id": "pit-1"}));
        transport.respond(404, json!({"succeeded": false, "num_freed": 0}));

        let id = client
            .open_point_in_time("person-active", Some("r"), Duration::from_secs(300))
            .await
            .unwrap();
        assert_eq!(id, "pit-1");
        client.close_point_in_time(&id).await.unwrap();

        let requests = transport.requests();
        assert_eq!(requests[0].path, "/person-active/_pit");
        assert_eq!(requests[0].param("keep_alive"), Some("300s"));
        assert_eq!(requests[0].param("routing"), Some("r"));
        assert_eq!(requests[1].method, HttpMethod::Delete);
        assert_eq!(requests[1].json_body().unwrap(), &json!({"id": "pit-1"}));
    }

    #[tokio::test]
    async fn test_create_index_settings() {
        let (transport, client) = setup();
        transport.respond(200, json!({"acknowledged": true}));

        client.create_index("person-2024-01-01", 3, 0).await.unwrap();
        assert_eq!(
            transport.requests()[0].json_body().unwrap()["settings"]["index"],
            json!({"number_of_shards": 3, "number_of_replicas": 0})
        );
    }

    #[test]
    fn test_encode_id() {
        assert_eq!(encode_id("abc123"), "abc123");
        assert_eq!(encode_id("a/b"), "a%2Fb");
        assert_eq!(encode_id("a b"), "a%20b");
    }
}
