//! Configuration of the document store.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigurationError, StorageResult};

/// Port used for hosts given without an explicit port.
pub const DEFAULT_PORT: u16 = 9200;

/// Authentication configuration for Elasticsearch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ElasticAuth {
    /// Basic username/password authentication.
    Basic {
        /// The username for basic auth.
        username: String,
        /// The password for basic auth.
        password: String,
    },
    /// Bearer token authentication.
    Bearer {
        /// The bearer token.
        token: String,
    },
}

/// Controls how unknown fields are treated by an index mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DynamicMapping {
    /// Unknown fields are rejected.
    #[default]
    Strict,
    /// Unknown fields are kept in `_source` but not indexed.
    False,
    /// Unknown fields are mapped on the fly.
    True,
}

impl DynamicMapping {
    /// Returns the value of the `dynamic` mapping parameter.
    pub fn as_str(&self) -> &'static str {
        match self {
            DynamicMapping::Strict => "strict",
            DynamicMapping::False => "false",
            DynamicMapping::True => "true",
        }
    }
}

impl fmt::Display for DynamicMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shard layout used when creating indices of a realm.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RealmSettings {
    /// Number of primary shards per index (default: 1).
    #[serde(default = "default_shards")]
    pub number_of_shards: u32,

    /// Number of replica shards per index (default: 1).
    #[serde(default = "default_replicas")]
    pub number_of_replicas: u32,
}

fn default_shards() -> u32 {
    1
}

fn default_replicas() -> u32 {
    1
}

impl Default for RealmSettings {
    fn default() -> Self {
        Self {
            number_of_shards: default_shards(),
            number_of_replicas: default_replicas(),
        }
    }
}

/// Relation names for which routing is ignored.
///
/// Used while migrating an entity type between a routed and an unrouted layout.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoutingConfig {
    /// Relations whose reads ignore the routing value.
    #[serde(default)]
    pub suppressed_reads: Vec<String>,

    /// Relations whose writes ignore the routing value.
    #[serde(default)]
    pub suppressed_writes: Vec<String>,
}

/// Retry behaviour for units of work failing with concurrency conflicts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of attempts (default: 3).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Backoff factor in milliseconds (default: 50).
    #[serde(default = "default_backoff_factor_ms")]
    pub backoff_factor_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_factor_ms() -> u64 {
    50
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_factor_ms: default_backoff_factor_ms(),
        }
    }
}

/// Configuration for the document store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElasticConfig {
    /// Elasticsearch node URLs (e.g., `["http://localhost:9200"]`).
    /// Currently uses the first node (single-node connection pool).
    pub nodes: Vec<String>,

    /// Request timeout in milliseconds (default: 30000).
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Optional authentication.
    #[serde(default)]
    pub auth: Option<ElasticAuth>,

    /// Whether to disable certificate validation (default: false).
    /// Only use for development/testing.
    #[serde(default)]
    pub disable_certificate_validation: bool,

    /// Calls taking longer than this are counted and logged (default: "1s").
    #[serde(default = "default_slow_call_threshold")]
    pub slow_call_threshold: String,

    /// Shard layout for realms without an entry in `realms`.
    #[serde(default)]
    pub default_realm: RealmSettings,

    /// Shard layout per realm.
    #[serde(default)]
    pub realms: HashMap<String, RealmSettings>,

    /// Dynamic mapping mode used when mappings are installed at startup (default: strict).
    #[serde(default)]
    pub dynamic_mapping: DynamicMapping,

    /// Routing suppression per relation.
    #[serde(default)]
    pub routing: RoutingConfig,

    /// Number of readiness checks before giving up (default: 15).
    #[serde(default = "default_readiness_retries")]
    pub readiness_retries: u32,

    /// Pause between readiness checks in milliseconds (default: 2000).
    #[serde(default = "default_readiness_interval_ms")]
    pub readiness_interval_ms: u64,

    /// Number of queued bulk commands after which a flush is advised (default: 256).
    #[serde(default = "default_bulk_batch_size")]
    pub bulk_batch_size: usize,

    /// Largest limit served by a single search request (default: 1000).
    #[serde(default = "default_max_page_size")]
    pub max_page_size: usize,

    /// Keep-alive of point-in-time cursors (default: "5m").
    #[serde(default = "default_stream_keep_alive")]
    pub stream_keep_alive: String,

    /// Retry behaviour for concurrency conflicts.
    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_nodes() -> Vec<String> {
    vec![format!("http://localhost:{}", DEFAULT_PORT)]
}

fn default_request_timeout_ms() -> u64 {
    30000
}

fn default_slow_call_threshold() -> String {
    "1s".to_string()
}

fn default_readiness_retries() -> u32 {
    15
}

fn default_readiness_interval_ms() -> u64 {
    2000
}

fn default_bulk_batch_size() -> usize {
    256
}

fn default_max_page_size() -> usize {
    1000
}

fn default_stream_keep_alive() -> String {
    "5m".to_string()
}

impl Default for ElasticConfig {
    fn default() -> Self {
        Self {
            nodes: default_nodes(),
            request_timeout_ms: default_request_timeout_ms(),
            auth: None,
            disable_certificate_validation: false,
            slow_call_threshold: default_slow_call_threshold(),
            default_realm: RealmSettings::default(),
            realms: HashMap::new(),
            dynamic_mapping: DynamicMapping::default(),
            routing: RoutingConfig::default(),
            readiness_retries: default_readiness_retries(),
            readiness_interval_ms: default_readiness_interval_ms(),
            bulk_batch_size: default_bulk_batch_size(),
            max_page_size: default_max_page_size(),
            stream_keep_alive: default_stream_keep_alive(),
            retry: RetryConfig::default(),
        }
    }
}

impl ElasticConfig {
    /// Creates a configuration from a comma separated list of `host[:port]` entries.
    ///
    /// Entries without a scheme use `http`, entries without a port use [`DEFAULT_PORT`].
    pub fn with_hosts(hosts: &str) -> Self {
        let nodes: Vec<String> = hosts
            .split(',')
            .map(str::trim)
            .filter(|host| !host.is_empty())
            .map(normalize_host)
            .collect();

        Self {
            nodes: if nodes.is_empty() {
                default_nodes()
            } else {
                nodes
            },
            ..Self::default()
        }
    }

    /// Returns the shard layout for the given realm.
    pub fn realm_settings(&self, realm: &str) -> &RealmSettings {
        self.realms.get(realm).unwrap_or(&self.default_realm)
    }

    /// Returns the parsed slow call threshold.
    pub fn slow_call_threshold(&self) -> StorageResult<Duration> {
        parse_duration("slow_call_threshold", &self.slow_call_threshold)
    }

    /// Returns the parsed keep-alive of point-in-time cursors.
    pub fn stream_keep_alive(&self) -> StorageResult<Duration> {
        parse_duration("stream_keep_alive", &self.stream_keep_alive)
    }

    /// Returns the request timeout.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Returns the pause between readiness checks.
    pub fn readiness_interval(&self) -> Duration {
        Duration::from_millis(self.readiness_interval_ms)
    }
}

fn normalize_host(host: &str) -> String {
    let (scheme, rest) = match host.split_once("://") {
        Some((scheme, rest)) => (scheme, rest),
        None => ("http", host),
    };

    if rest.contains(':') {
        format!("{}://{}", scheme, rest)
    } else {
        format!("{}://{}:{}", scheme, rest, DEFAULT_PORT)
    }
}

fn parse_duration(key: &str, value: &str) -> StorageResult<Duration> {
    humantime::parse_duration(value).map_err(|e| {
        ConfigurationError::InvalidSetting {
            key: key.to_string(),
            message: format!("'{}' is not a duration: {}", value, e),
        }
        .into()
    })
}

/// Renders a duration in the unit syntax accepted by Elasticsearch (e.g. `300s`).
pub(crate) fn es_time_value(duration: Duration) -> String {
    if duration.subsec_millis() == 0 {
        format!("{}s", duration.as_secs())
    } else {
        format!("{}ms", duration.as_millis())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = ElasticConfig::default();
        assert_eq!(config.nodes, vec!["http://localhost:9200"]);
        assert_eq!(config.request_timeout_ms, 30000);
        assert_eq!(config.dynamic_mapping, DynamicMapping::Strict);
        assert_eq!(config.readiness_retries, 15);
        assert_eq!(config.bulk_batch_size, 256);
        assert_eq!(config.max_page_size, 1000);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.slow_call_threshold().unwrap(), Duration::from_secs(1));
        assert_eq!(config.stream_keep_alive().unwrap(), Duration::from_secs(300));
    }

    #[test]
    fn test_with_hosts() {
        let config = ElasticConfig::with_hosts("es1, es2:9300,https://es3");
        assert_eq!(
            config.nodes,
            vec![
                "http://es1:9200".to_string(),
                "http://es2:9300".to_string(),
                "https://es3:9200".to_string(),
            ]
        );

        let config = ElasticConfig::with_hosts("");
        assert_eq!(config.nodes, vec!["http://localhost:9200"]);
    }

    #[test]
    fn test_realm_settings() {
        let mut config = ElasticConfig::default();
        config.realms.insert(
            "analytics".to_string(),
            RealmSettings {
                number_of_shards: 5,
                number_of_replicas: 2,
            },
        );

        assert_eq!(config.realm_settings("analytics").number_of_shards, 5);
        assert_eq!(config.realm_settings("default").number_of_shards, 1);
    }

    #[test]
    fn test_invalid_duration() {
        let config = ElasticConfig {
            slow_call_threshold: "soon".to_string(),
            ..Default::default()
        };
        assert!(config.slow_call_threshold().is_err());
    }

    #[test]
    fn test_deserialize_partial() {
        let config: ElasticConfig = serde_json::from_str(
            r#"{"nodes": ["http://es:9200"], "dynamic_mapping": "false", "routing": {"suppressed_reads": ["person"]}}"#,
        )
        .unwrap();
        assert_eq!(config.dynamic_mapping, DynamicMapping::False);
        assert_eq!(config.routing.suppressed_reads, vec!["person"]);
        assert!(config.routing.suppressed_writes.is_empty());
        assert_eq!(config.max_page_size, 1000);
    }

    #[test]
    fn test_es_time_value() {
        assert_eq!(es_time_value(Duration::from_secs(300)), "300s");
        assert_eq!(es_time_value(Duration::from_millis(1500)), "1500ms");
    }
}
