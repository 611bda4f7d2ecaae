//! Schema catalog for keep.
//!
//! Resolves schema names to bundled TOML resources, resolves where a
//! store's backing file lives, parses resources into a validated
//! [`SchemaModel`], and infers the [`MappingModel`] that carries a store
//! from one schema version to the next.
//!
//! # Key Types
//!
//! - [`SchemaCatalog`] -- name → [`SchemaDescriptor`] lookup with a per-catalog cache
//! - [`StoreLocation`] -- path of a backing file
//! - [`SchemaModel`] -- entity kinds, attributes, and relationships
//! - [`MappingModel`] -- inferred old → new schema mapping
//! - [`MigrationPolicy`] -- whether and how stores are migrated on open

pub mod catalog;
pub mod error;
pub mod mapping;
pub mod model;
pub mod names;

pub use catalog::{
    CatalogConfig, SchemaCatalog, SchemaDescriptor, StoreLocation, SCHEMA_EXTENSION,
    STORE_EXTENSION,
};
pub use error::{MappingError, SchemaError, SchemaResult};
pub use mapping::{
    AttributeMapping, AttributeSource, KindMapping, MappingModel, MigrationPolicy, RenamePolicy,
    RelationshipMapping, RelationshipSource,
};
pub use model::{Attribute, Cardinality, EntityKind, Relationship, SchemaModel};
