//! The protocol client.
//!
//! [`LowLevelClient`] translates logical operations into REST calls, measures them and
//! maps error statuses into [`StorageError`](crate::error::StorageError)s. The actual
//! HTTP exchange goes through the [`Transport`] trait.

mod low_level;
mod metrics;
mod request;
mod transport;

#[cfg(test)]
pub(crate) mod mock;

pub use low_level::LowLevelClient;
pub(crate) use low_level::doc_path;
pub use metrics::{CallMetrics, CallStatistics};
pub(crate) use metrics::call_site;
pub use request::{ElasticResponse, RefreshPolicy, RequestBuilder};
pub use transport::{ElasticsearchTransport, HttpMethod, HttpRequest, RawResponse, RequestBody, Transport};
