use std::path::PathBuf;

use keep_schema::{MappingError, SchemaError};
use keep_types::EntityId;

/// Errors from opening, reading, and saving a store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The schema resource is missing or malformed.
    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),

    /// The file exists but is not a backing file of any known schema.
    #[error("store {path} is corrupt: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    /// Another handle holds the write lock on the file.
    #[error("store {path} is locked by another handle")]
    Locked { path: PathBuf },

    /// The recorded schema cannot be migrated to the current one.
    #[error("migration failed: {0}")]
    MigrationFailed(#[from] MappingError),

    /// A pending entity violates the schema. Nothing was written.
    #[error("validation failed for entity {entity}: {reason}")]
    ValidationFailed { entity: EntityId, reason: String },

    /// The save transaction failed and was rolled back.
    #[error("persist failed: {0}")]
    PersistFailed(#[source] rusqlite::Error),

    /// No live entity has this id.
    #[error("entity not found: {0}")]
    EntityNotFound(EntityId),

    /// SQLite error outside a save transaction.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// The schema could not be encoded for the metadata table.
    #[error("schema cannot be recorded: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
