//! Foundation types for keep.
//!
//! This crate provides the identity, fingerprint, and value types shared by
//! the schema catalog and the store. Every other keep crate depends on
//! `keep-types`.
//!
//! # Key Types
//!
//! - [`EntityId`] -- Store-wide identity of a persisted or pending entity
//! - [`SchemaFingerprint`] -- BLAKE3 digest identifying a schema version
//! - [`Value`] -- A single attribute value
//! - [`AttributeType`] -- The semantic type an attribute is declared with

pub mod entity;
pub mod error;
pub mod fingerprint;
pub mod value;

pub use entity::EntityId;
pub use error::TypeError;
pub use fingerprint::SchemaFingerprint;
pub use value::{AttributeType, Value};
