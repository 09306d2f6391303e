//! Helios Document Store
//!
//! An object-document mapper and query engine for Elasticsearch. Application records
//! implement [`Entity`](schema::Entity) and are stored as documents behind per-type
//! aliases, with optimistic concurrency control, per-type shard routing, bulk pipelines
//! and zero-downtime index migration.
//!
//! # Architecture
//!
//! - [`client`] - Protocol client translating logical operations into REST calls
//! - [`schema`] - Entity contract, descriptors and the descriptor registry
//! - [`lifecycle`] - Aliases, mappings and write index migration
//! - [`mapper`] - Create, update, delete, find and conflict retries
//! - [`bulk`] - Buffered bulk pipelines
//! - [`query`] - Filters, sorts, aggregations, suggesters, scoring and streaming
//! - [`routing`] - Per-type routing and its suppression
//! - [`config`] - Configuration
//! - [`error`] - Error types for all operations
//!
//! # Quick Start
//!
//! ```no_run
//! use helios_docstore::query::Filters;
//! use helios_docstore::schema::{Entity, EntityDescriptor, EntityState, PropertyMapping};
//! use helios_docstore::{Elastic, ElasticConfig, StorageResult};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, Default, Serialize, Deserialize)]
//! struct Person {
//!     #[serde(skip)]
//!     state: EntityState,
//!     #[serde(default)]
//!     name: String,
//!     #[serde(default)]
//!     age: i64,
//! }
//!
//! impl Entity for Person {
//!     fn descriptor() -> EntityDescriptor {
//!         EntityDescriptor::builder("Person", "person")
//!             .property("name", PropertyMapping::keyword())
//!             .property("age", PropertyMapping::long())
//!             .versioned()
//!             .build()
//!     }
//!
//!     fn state(&self) -> &EntityState {
//!         &self.state
//!     }
//!
//!     fn state_mut(&mut self) -> &mut EntityState {
//!         &mut self.state
//!     }
//! }
//!
//! # async fn example() -> StorageResult<()> {
//! let elastic = Elastic::new(ElasticConfig::with_hosts("localhost:9200"))?;
//! elastic.register::<Person>()?;
//! elastic.wait_until_ready().await?;
//! elastic.initialize().await?;
//!
//! let mut ada = Person {
//!     name: "Ada".to_string(),
//!     age: 36,
//!     ..Default::default()
//! };
//! elastic.update(&mut ada).await?;
//!
//! let adults = elastic
//!     .select::<Person>()?
//!     .filter(Filters::gte("age", 18))
//!     .order_asc("name")
//!     .limit(20)
//!     .query_list()
//!     .await?;
//! # let _ = adults;
//! # Ok(())
//! # }
//! ```
//!
//! # Concurrency
//!
//! Writes of versioned types carry the `if_primary_term`/`if_seq_no` tokens of the last
//! read. A stale write fails with a concurrency conflict, which
//! [`Elastic::retry`] retries with backoff:
//!
//! ```no_run
//! # use helios_docstore::{Elastic, StorageResult};
//! # use helios_docstore::schema::Entity;
//! # async fn example<E: Entity>(elastic: &Elastic, id: &str) -> StorageResult<()> {
//! elastic
//!     .retry(|| async move {
//!         if let Some(mut entity) = elastic.find::<E>(id, None).await? {
//!             elastic.update(&mut entity).await?;
//!         }
//!         Ok(())
//!     })
//!     .await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod bulk;
pub mod client;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod mapper;
pub mod query;
pub mod routing;
pub mod schema;
pub mod task;

// Re-export commonly used types at crate root
pub use bulk::{BatchContext, BulkContext, BulkResult};
pub use config::ElasticConfig;
pub use error::{StorageError, StorageResult};
pub use mapper::Elastic;
pub use query::{ElasticQuery, EntityStream, Filters};
pub use routing::AccessMode;
pub use task::{TaskContext, TaskHandle};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name.
pub const NAME: &str = env!("CARGO_PKG_NAME");
