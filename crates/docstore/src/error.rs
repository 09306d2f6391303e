//! Error types for the document store.
//!
//! Errors are grouped by how a caller is expected to react to them:
//! concurrency conflicts are retryable, protocol and backend errors are
//! reported, configuration errors fail fast and query errors signal misuse
//! of the query builder.

// Error enum variant fields are self-documenting via their #[error(...)] messages
#![allow(missing_docs)]

use thiserror::Error;

/// The primary error type for all document store operations.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Optimistic concurrency errors
    #[error(transparent)]
    Concurrency(#[from] ConcurrencyError),

    /// HTTP and transport errors reported while talking to the cluster
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Invalid entity schema or index layout
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    /// Misuse of the query builder
    #[error(transparent)]
    Query(#[from] QueryError),

    /// Bulk pipeline errors
    #[error(transparent)]
    Bulk(#[from] BulkError),

    /// Backend errors not covered by the categories above
    #[error(transparent)]
    Backend(#[from] BackendError),
}

impl StorageError {
    /// Returns true if the error is a concurrency conflict which may succeed when retried.
    pub fn is_concurrency_conflict(&self) -> bool {
        matches!(
            self,
            StorageError::Concurrency(
                ConcurrencyError::OptimisticLockFailure { .. }
                    | ConcurrencyError::TruncateConflict { .. }
            )
        )
    }
}

/// Errors related to optimistic concurrency control.
#[derive(Error, Debug)]
pub enum ConcurrencyError {
    /// The server rejected a conditional write (HTTP 409).
    #[error("optimistic lock failure: {reason}")]
    OptimisticLockFailure { reason: String },

    /// A delete-by-query timed out or ran into version conflicts.
    #[error("truncate of {alias} ran into a conflict: {reason}")]
    TruncateConflict { alias: String, reason: String },

    /// A retried unit of work kept failing with conflicts.
    #[error("giving up after {attempts} attempts: {reason}")]
    RetriesExhausted { attempts: u32, reason: String },
}

/// Errors raised while executing an HTTP request.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// The server answered with an error status.
    #[error("Elasticsearch ({host}) reported an error: {reason} ({error_type})")]
    Status {
        host: String,
        status: u16,
        reason: String,
        error_type: String,
    },

    /// The request never produced a response.
    #[error("request to Elasticsearch ({host}) failed: {message}")]
    Transport {
        host: String,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The response body could not be interpreted.
    #[error("malformed response from Elasticsearch: {message}")]
    MalformedResponse { message: String },

    /// A response body was requested for a call which did not produce one.
    #[error("No response is available before making a request.")]
    NoResponse,

    /// A conditional write failed although none was expected.
    #[error("An unexpected optimistic locking error occurred: {reason}")]
    UnexpectedConflict { reason: String },
}

/// Errors caused by an invalid schema, alias layout or setting.
#[derive(Error, Debug)]
pub enum ConfigurationError {
    /// A read alias resolved to more than one physical index.
    #[error("The alias {alias} points to more than one index: {}", indices.join(", "))]
    AmbiguousAlias { alias: String, indices: Vec<String> },

    /// A property has no mapping description.
    #[error("unmappable property {property} of {entity}: no mapping is declared")]
    UnmappableProperty { entity: String, property: String },

    /// An entity carries a value for a property its descriptor does not declare.
    #[error("{entity} has no declared property named {property}")]
    UndeclaredProperty { entity: String, property: String },

    /// A write index operation was requested but none is installed.
    #[error("no write index is installed for {entity}")]
    NoWriteIndex { entity: String },

    /// The entity type was never registered.
    #[error("entity type {type_name} is not registered")]
    UnregisteredEntity { type_name: String },

    /// A relation, index or property name is not acceptable.
    #[error("invalid name '{name}': {message}")]
    InvalidName { name: String, message: String },

    /// No free physical index name could be found.
    #[error("cannot determine a new index name for {relation} after {attempts} attempts")]
    IndexNameExhausted { relation: String, attempts: u32 },

    /// An index required by an alias operation does not exist.
    #[error("index {index} does not exist")]
    IndexMissing { index: String },

    /// The index is still the target of a read alias.
    #[error("index {index} is in use by alias {alias}")]
    IndexInUse { index: String, alias: String },

    /// A configuration value could not be parsed.
    #[error("invalid setting {key}: {message}")]
    InvalidSetting { key: String, message: String },
}

/// Errors caused by using the query builder in an unsupported way.
#[derive(Error, Debug)]
pub enum QueryError {
    /// A skip value was combined with block-wise streaming.
    #[error("skip ({skip}) cannot be combined with block-wise streaming")]
    SkipWithStreaming { skip: usize },

    /// An explicit stream was requested for a bounded query.
    #[error("a stream cannot be opened for a query with limit {limit} and skip {skip}")]
    BoundedStream { limit: usize, skip: usize },

    /// Aggregations were computed for a query which would also fetch hits.
    #[error(
        "When using 'compute_aggregations' no search items are fetched, but the limit parameter was set to {limit}"
    )]
    AggregationWithLimit { limit: usize },

    /// A response accessor was used before the query was executed.
    #[error("'{accessor}' not possible before the query was executed")]
    NotExecuted { accessor: String },

    /// A response accessor was used for a streaming query.
    #[error("'{accessor}' not possible when streaming")]
    Streaming { accessor: String },

    /// A compound after-key could not be decoded.
    #[error("invalid compound after-key: {key}")]
    InvalidAfterKey { key: String },
}

/// Errors raised by the bulk pipeline.
#[derive(Error, Debug)]
pub enum BulkError {
    /// At least one command of a bulk request failed.
    #[error("One or more commands failed within a bulk update: {message}")]
    CommandsFailed { message: String },

    /// The bulk response contained an item of unknown type.
    #[error("unknown object type within bulk response: {item}")]
    UnknownItemType { item: String },
}

/// Errors originating from the backend which are neither protocol nor configuration errors.
#[derive(Error, Debug)]
pub enum BackendError {
    /// The cluster could not be reached or is not ready.
    #[error("backend unavailable: {backend_name}: {message}")]
    Unavailable {
        backend_name: String,
        message: String,
    },

    /// Internal backend error.
    #[error("internal error in {backend_name}: {message}")]
    Internal {
        backend_name: String,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// An entity expected to exist could not be found.
    #[error("{entity} with id {id} does not exist")]
    EntityNotFound { entity: String, id: String },

    /// Serialization/deserialization error.
    #[error("serialization error: {message}")]
    SerializationError { message: String },

    /// A delete-by-query failed on one or more shards.
    #[error("Truncate aborted due to unrecoverable error(s): {}", reasons.join("; "))]
    TruncateAborted { reasons: Vec<String> },
}

/// Result type alias for document store operations.
pub type StorageResult<T> = Result<T, StorageError>;

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Backend(BackendError::SerializationError {
            message: err.to_string(),
        })
    }
}

impl From<elasticsearch::Error> for StorageError {
    fn from(err: elasticsearch::Error) -> Self {
        StorageError::Backend(BackendError::Internal {
            backend_name: "elasticsearch".to_string(),
            message: err.to_string(),
            source: Some(Box::new(err)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_error_display() {
        let err = StorageError::Protocol(ProtocolError::Status {
            host: "localhost:9200".to_string(),
            status: 400,
            reason: "failed to parse".to_string(),
            error_type: "mapper_parsing_exception".to_string(),
        });
        assert_eq!(
            err.to_string(),
            "Elasticsearch (localhost:9200) reported an error: failed to parse (mapper_parsing_exception)"
        );
    }

    #[test]
    fn test_conflict_detection() {
        let err: StorageError = ConcurrencyError::OptimisticLockFailure {
            reason: "version conflict".to_string(),
        }
        .into();
        assert!(err.is_concurrency_conflict());

        let err: StorageError = ConcurrencyError::TruncateConflict {
            alias: "person-active".to_string(),
            reason: "timed out".to_string(),
        }
        .into();
        assert!(err.is_concurrency_conflict());

        let err: StorageError = ConcurrencyError::RetriesExhausted {
            attempts: 3,
            reason: "version conflict".to_string(),
        }
        .into();
        assert!(!err.is_concurrency_conflict());

        let err: StorageError = ProtocolError::NoResponse.into();
        assert!(!err.is_concurrency_conflict());
    }

    #[test]
    fn test_ambiguous_alias_display() {
        let err = ConfigurationError::AmbiguousAlias {
            alias: "person-active".to_string(),
            indices: vec!["person-a".to_string(), "person-b".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "The alias person-active points to more than one index: person-a, person-b"
        );
    }

    #[test]
    fn test_bulk_error_display() {
        let err = BulkError::CommandsFailed {
            message: "index: person type: x reason: y\n".to_string(),
        };
        assert!(
            err.to_string()
                .starts_with("One or more commands failed within a bulk update")
        );
    }

    #[test]
    fn test_truncate_aborted_display() {
        let err = BackendError::TruncateAborted {
            reasons: vec!["shard 0 failed".to_string(), "shard 1 failed".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "Truncate aborted due to unrecoverable error(s): shard 0 failed; shard 1 failed"
        );
    }

    #[test]
    fn test_from_serde_error() {
        let err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let storage_err: StorageError = err.into();
        assert!(matches!(
            storage_err,
            StorageError::Backend(BackendError::SerializationError { .. })
        ));
    }
}
