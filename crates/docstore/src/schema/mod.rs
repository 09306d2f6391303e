//! Entity metadata.
//!
//! Each entity type describes itself through an [`EntityDescriptor`]: its relation name,
//! its ordered properties with their mapping fragments, whether writes are guarded by
//! concurrency tokens and which property routes documents to shards. Descriptors are
//! validated once when the type is registered with a [`DescriptorRegistry`].

mod descriptor;
pub(crate) mod entity;
mod registry;

pub use descriptor::{
    DEFAULT_REALM, EntityDescriptor, EntityDescriptorBuilder, FieldType, PropertyDescriptor,
    PropertyMapping,
};
pub use entity::{DEFAULT_INNER_HITS, DOCUMENT_ID_FIELD, Entity, EntityState, HitInfo, VersionTokens};
pub use registry::DescriptorRegistry;
