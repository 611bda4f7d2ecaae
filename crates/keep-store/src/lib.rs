//! Single-file entity store for keep.
//!
//! A [`Store`] owns one SQLite backing file. Opening it brings the file up
//! to date with the expected schema, migrating it in place when the
//! recorded schema differs. Entities are edited in memory and written back
//! by [`Store::save`] in a single transaction.
//!
//! # Key Types
//!
//! - [`Store`] -- the open store and its working set
//! - [`Entity`] -- an entity's kind, attributes, and relationships
//! - [`EntityStatus`] -- where an entity stands relative to the file
//! - [`OpenOutcome`] -- whether open created, opened, or migrated the file
//! - [`StoreConfig`] -- lock timeout, durability, and migration policy
//!
//! # Design Rules
//!
//! 1. One store per file. A second open fails with [`StoreError::Locked`].
//! 2. A migration applies completely or not at all.
//! 3. A save validates every pending entity before writing any of them.
//! 4. A failed save leaves the file untouched and the edits pending.
//! 5. A save with nothing pending does not touch the file.

mod backing;
mod codec;
pub mod config;
pub mod entity;
pub mod error;
mod migrate;
pub mod store;
mod validate;
mod working_set;

pub use config::{StoreConfig, SyncMode};
pub use entity::{Entity, EntityStatus};
pub use error::{StoreError, StoreResult};
pub use store::{OpenOutcome, SaveSummary, Store};
