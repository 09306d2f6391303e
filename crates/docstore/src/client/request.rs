//! Assembly and execution of single requests.

use std::fmt;
use std::time::Instant;

use serde_json::Value;

use crate::error::{ConcurrencyError, ProtocolError, StorageError, StorageResult};
use crate::schema::VersionTokens;

use super::low_level::LowLevelClient;
use super::metrics::{MAX_LOGGED_CONTENT, call_site, truncate};
use super::transport::{HttpMethod, HttpRequest, RequestBody};

const PARAM_ROUTING: &str = "routing";
const PARAM_IF_PRIMARY_TERM: &str = "if_primary_term";
const PARAM_IF_SEQ_NO: &str = "if_seq_no";
const PARAM_SIZE: &str = "size";
const PARAM_FROM: &str = "from";
const PARAM_REFRESH: &str = "refresh";

/// When changes made by a request become visible to searches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RefreshPolicy {
    /// Visible after the next scheduled refresh.
    #[default]
    None,
    /// Refresh the affected shards right away.
    Immediate,
    /// Wait until the next scheduled refresh made the changes visible.
    WaitFor,
}

impl RefreshPolicy {
    /// Returns the value of the `refresh` parameter, `None` if it is omitted.
    pub fn as_param(&self) -> Option<&'static str> {
        match self {
            RefreshPolicy::None => None,
            RefreshPolicy::Immediate => Some("true"),
            RefreshPolicy::WaitFor => Some("wait_for"),
        }
    }
}

type NotFoundHandler<'a> = Box<dyn FnOnce(Option<&Value>) -> Option<Value> + Send + 'a>;

/// Builds and executes one request.
pub struct RequestBuilder<'a> {
    client: &'a LowLevelClient,
    method: HttpMethod,
    params: Vec<(String, String)>,
    body: Option<RequestBody>,
    not_found: Option<NotFoundHandler<'a>>,
}

impl fmt::Debug for RequestBuilder<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestBuilder")
            .field("method", &self.method)
            .field("params", &self.params)
            .field("body", &self.body)
            .finish_non_exhaustive()
    }
}

/// Parsed outcome of a request.
#[derive(Debug, Clone, PartialEq)]
pub struct ElasticResponse {
    status: u16,
    body: Option<Value>,
}

impl ElasticResponse {
    /// Returns the HTTP status code.
    pub fn status(&self) -> u16 {
        self.status
    }

    /// Returns the parsed body, if the response had one.
    pub fn body(&self) -> Option<&Value> {
        self.body.as_ref()
    }

    /// Returns the parsed body, failing if the response had none.
    pub fn into_json(self) -> StorageResult<Value> {
        self.body.ok_or_else(|| ProtocolError::NoResponse.into())
    }
}

impl<'a> RequestBuilder<'a> {
    pub(crate) fn new(client: &'a LowLevelClient, method: HttpMethod) -> Self {
        Self {
            client,
            method,
            params: Vec::new(),
            body: None,
            not_found: None,
        }
    }

    /// Adds a query parameter.
    pub fn param(mut self, name: &str, value: impl ToString) -> Self {
        self.params.push((name.to_string(), value.to_string()));
        self
    }

    /// Adds the routing parameter if a routing value is given.
    pub fn routing(self, routing: Option<&str>) -> Self {
        match routing {
            Some(routing) if !routing.is_empty() => self.param(PARAM_ROUTING, routing),
            _ => self,
        }
    }

    /// Makes the request conditional on the given concurrency tokens.
    pub fn version(self, tokens: Option<VersionTokens>) -> Self {
        match tokens {
            Some(tokens) => self
                .param(PARAM_IF_PRIMARY_TERM, tokens.primary_term)
                .param(PARAM_IF_SEQ_NO, tokens.seq_no),
            None => self,
        }
    }

    /// Sets the number of hits to return.
    pub fn size(self, size: usize) -> Self {
        self.param(PARAM_SIZE, size)
    }

    /// Sets the number of hits to skip.
    pub fn from(self, from: usize) -> Self {
        self.param(PARAM_FROM, from)
    }

    /// Applies a refresh policy.
    pub fn refresh(self, policy: RefreshPolicy) -> Self {
        match policy.as_param() {
            Some(value) => self.param(PARAM_REFRESH, value),
            None => self,
        }
    }

    /// Sets a JSON body.
    pub fn data(mut self, data: Value) -> Self {
        self.body = Some(RequestBody::Json(data));
        self
    }

    /// Sets a newline delimited JSON body.
    pub fn raw_data(mut self, data: String) -> Self {
        self.body = Some(RequestBody::NdJson(data));
        self
    }

    /// Substitutes the body computed by `handler` for a 404 response instead of failing.
    ///
    /// The handler receives the parsed body of the 404 response, if any. Returning `None`
    /// reports the 404 as an error after all.
    pub fn on_not_found(
        mut self,
        handler: impl FnOnce(Option<&Value>) -> Option<Value> + Send + 'a,
    ) -> Self {
        self.not_found = Some(Box::new(handler));
        self
    }

    /// Executes the request, reporting a 409 as a [`ConcurrencyError`].
    pub async fn try_execute(self, path: &str) -> StorageResult<ElasticResponse> {
        let request = HttpRequest {
            method: self.method,
            path: normalize_path(path),
            params: self.params,
            body: self.body,
        };

        let watch = Instant::now();
        let result = self.client.transport().perform(&request).await;
        let duration = watch.elapsed();
        let slow = duration >= self.client.slow_call_threshold();
        self.client.metrics().record(duration, slow);

        if slow {
            let content = request
                .body
                .as_ref()
                .map(RequestBody::to_wire)
                .unwrap_or_default();
            tracing::warn!(
                "Slow Elasticsearch call ({:?}): {} {}\n{}\n{}",
                duration,
                request.method,
                request.path,
                truncate(&content, MAX_LOGGED_CONTENT),
                call_site()
            );
        }

        let raw = result?;
        tracing::debug!(
            "{} {} -> {} ({:?})",
            request.method,
            request.path,
            raw.status,
            duration
        );

        let body = match raw.body {
            Some(ref text) => Some(serde_json::from_str::<Value>(text).map_err(|e| {
                ProtocolError::MalformedResponse {
                    message: format!(
                        "{} {} returned invalid JSON: {}",
                        request.method, request.path, e
                    ),
                }
            })?),
            None => None,
        };

        if (200..300).contains(&raw.status) {
            return Ok(ElasticResponse {
                status: raw.status,
                body,
            });
        }

        if raw.status == 404 {
            if let Some(substitute) = self.not_found.and_then(|handler| handler(body.as_ref())) {
                return Ok(ElasticResponse {
                    status: raw.status,
                    body: Some(substitute),
                });
            }
        }

        let (reason, error_type) = error_details(body.as_ref(), raw.status);
        if raw.status == 409 {
            return Err(ConcurrencyError::OptimisticLockFailure { reason }.into());
        }

        Err(ProtocolError::Status {
            host: self.client.host().to_string(),
            status: raw.status,
            reason,
            error_type,
        }
        .into())
    }

    /// Executes a request which is not expected to run into a conflict.
    ///
    /// A 409 is reported as a protocol error instead of a retryable conflict.
    pub async fn execute(self, path: &str) -> StorageResult<ElasticResponse> {
        match self.try_execute(path).await {
            Err(StorageError::Concurrency(ConcurrencyError::OptimisticLockFailure { reason })) => {
                Err(ProtocolError::UnexpectedConflict { reason }.into())
            }
            other => other,
        }
    }
}

fn normalize_path(path: &str) -> String {
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{}", path)
    }
}

/// Extracts reason and type from an error envelope.
fn error_details(body: Option<&Value>, status: u16) -> (String, String) {
    let error = body.and_then(|b| b.get("error"));
    match error {
        Some(Value::Object(error)) => {
            let reason = error
                .get("reason")
                .and_then(|r| r.as_str())
                .map(str::to_string)
                .unwrap_or_else(|| format!("HTTP {}", status));
            let error_type = error
                .get("type")
                .and_then(|t| t.as_str())
                .unwrap_or("unknown")
                .to_string();
            (reason, error_type)
        }
        Some(Value::String(reason)) => (reason.clone(), "unknown".to_string()),
        _ => (format!("HTTP {}", status), "unknown".to_string()),
    }
}
