//! The HTTP seam between the protocol client and the cluster.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use elasticsearch::Elasticsearch;
use elasticsearch::auth::Credentials;
use elasticsearch::cert::CertificateValidation;
use elasticsearch::http::Method;
use elasticsearch::http::headers::{CONTENT_TYPE, HeaderMap, HeaderValue};
use elasticsearch::http::transport::{SingleNodeConnectionPool, TransportBuilder};
use serde_json::Value;

use crate::config::{DEFAULT_PORT, ElasticAuth, ElasticConfig};
use crate::error::{ProtocolError, StorageError, StorageResult};

/// HTTP methods used by the protocol client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    /// GET
    Get,
    /// PUT
    Put,
    /// POST
    Post,
    /// DELETE
    Delete,
    /// HEAD
    Head,
}

impl HttpMethod {
    /// Returns the method name as sent on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Put => "PUT",
            HttpMethod::Post => "POST",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Head => "HEAD",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Body of a request.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    /// A single JSON document.
    Json(Value),
    /// Newline delimited JSON, already framed.
    NdJson(String),
}

impl RequestBody {
    /// Renders the body as sent on the wire.
    pub fn to_wire(&self) -> String {
        match self {
            RequestBody::Json(value) => value.to_string(),
            RequestBody::NdJson(lines) => lines.clone(),
        }
    }
}

/// A fully assembled request.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    /// The HTTP method.
    pub method: HttpMethod,
    /// Absolute path, e.g. `/person-active/_doc/1`.
    pub path: String,
    /// Query string parameters in insertion order.
    pub params: Vec<(String, String)>,
    /// Optional body.
    pub body: Option<RequestBody>,
}

impl HttpRequest {
    /// Returns the value of a query parameter.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// Returns the JSON body, if any.
    pub fn json_body(&self) -> Option<&Value> {
        match &self.body {
            Some(RequestBody::Json(value)) => Some(value),
            _ => None,
        }
    }
}

/// Status and raw body of a response.
#[derive(Debug, Clone, PartialEq)]
pub struct RawResponse {
    /// HTTP status code.
    pub status: u16,
    /// Body text, `None` when the response was empty.
    pub body: Option<String>,
}

/// Executes requests against a cluster.
#[async_trait]
pub trait Transport: Send + Sync + fmt::Debug {
    /// Returns the host reported in error messages.
    fn host(&self) -> &str;

    /// Performs a request. Error statuses are returned as responses, not errors.
    async fn perform(&self, request: &HttpRequest) -> StorageResult<RawResponse>;
}

/// [`Transport`] backed by the official Elasticsearch client.
pub struct ElasticsearchTransport {
    client: Elasticsearch,
    host: String,
}

impl fmt::Debug for ElasticsearchTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ElasticsearchTransport")
            .field("host", &self.host)
            .finish_non_exhaustive()
    }
}

impl ElasticsearchTransport {
    /// Builds the transport from configuration.
    pub fn new(config: &ElasticConfig) -> StorageResult<Self> {
        let url = config
            .nodes
            .first()
            .cloned()
            .unwrap_or_else(|| format!("http://localhost:{}", DEFAULT_PORT));

        let parsed_url: elasticsearch::http::Url =
            url.parse().map_err(|e| ProtocolError::Transport {
                host: url.clone(),
                message: format!("Invalid URL: {}", e),
                source: None,
            })?;

        let host = match (parsed_url.host_str(), parsed_url.port()) {
            (Some(host), Some(port)) => format!("{}:{}", host, port),
            (Some(host), None) => host.to_string(),
            _ => url.clone(),
        };

        let conn_pool = SingleNodeConnectionPool::new(parsed_url);

        let mut builder = TransportBuilder::new(conn_pool).timeout(config.request_timeout());

        if config.disable_certificate_validation {
            builder = builder.cert_validation(CertificateValidation::None);
        }

        if let Some(ref auth) = config.auth {
            builder = match auth {
                ElasticAuth::Basic { username, password } => {
                    builder.auth(Credentials::Basic(username.clone(), password.clone()))
                }
                ElasticAuth::Bearer { token } => builder.auth(Credentials::Bearer(token.clone())),
            };
        }

        let transport = builder.build().map_err(|e| ProtocolError::Transport {
            host: host.clone(),
            message: format!("Failed to build transport: {}", e),
            source: Some(Box::new(e)),
        })?;

        Ok(Self {
            client: Elasticsearch::new(transport),
            host,
        })
    }

    fn transport_error(&self, message: String, err: elasticsearch::Error) -> StorageError {
        tracing::error!("Elasticsearch ({}) request failed: {}", self.host, message);
        ProtocolError::Transport {
            host: self.host.clone(),
            message,
            source: Some(Box::new(err)),
        }
        .into()
    }
}

#[async_trait]
impl Transport for ElasticsearchTransport {
    fn host(&self) -> &str {
        &self.host
    }

    async fn perform(&self, request: &HttpRequest) -> StorageResult<RawResponse> {
        let method = match request.method {
            HttpMethod::Get => Method::Get,
            HttpMethod::Put => Method::Put,
            HttpMethod::Post => Method::Post,
            HttpMethod::Delete => Method::Delete,
            HttpMethod::Head => Method::Head,
        };

        let mut headers = HeaderMap::new();
        if let Some(RequestBody::NdJson(_)) = request.body {
            headers.insert(
                CONTENT_TYPE,
                HeaderValue::from_static("application/x-ndjson"),
            );
        }

        let body = request.body.as_ref().map(RequestBody::to_wire);
        let query: Option<&[(String, String)]> = if request.params.is_empty() {
            None
        } else {
            Some(request.params.as_slice())
        };

        let response = self
            .client
            .send(
                method,
                &request.path,
                headers,
                query,
                body,
                None::<Duration>,
            )
            .await
            .map_err(|e| {
                self.transport_error(format!("{} {}: {}", request.method, request.path, e), e)
            })?;

        let status = response.status_code().as_u16();
        if request.method == HttpMethod::Head {
            return Ok(RawResponse { status, body: None });
        }

        let text = response.text().await.map_err(|e| {
            self.transport_error(
                format!("{} {}: failed to read body: {}", request.method, request.path, e),
                e,
            )
        })?;

        Ok(RawResponse {
            status,
            body: if text.trim().is_empty() {
                None
            } else {
                Some(text)
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_host() {
        let config = ElasticConfig::with_hosts("es-node:9201");
        let transport = ElasticsearchTransport::new(&config).unwrap();
        assert_eq!(transport.host(), "es-node:9201");
    }

    #[test]
    fn test_invalid_url() {
        let config = ElasticConfig {
            nodes: vec!["not a url".to_string()],
            ..Default::default()
        };
        assert!(ElasticsearchTransport::new(&config).is_err());
    }

    #[test]
    fn test_request_param_lookup() {
        let request = HttpRequest {
            method: HttpMethod::Get,
            path: "/person-active/_doc/1".to_string(),
            params: vec![("routing".to_string(), "tenant-a".to_string())],
            body: None,
        };
        assert_eq!(request.param("routing"), Some("tenant-a"));
        assert_eq!(request.param("size"), None);
        assert!(request.json_body().is_none());
    }
}
