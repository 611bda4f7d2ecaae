use std::path::PathBuf;

/// Errors from schema lookup, parsing, and store location resolution.
#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    /// No bundled resource exists for the requested schema name.
    #[error("schema not found: {name} (looked for {path})")]
    NotFound { name: String, path: PathBuf },

    /// The schema resource exists but does not describe a valid model.
    #[error("schema {name} is invalid: {reason}")]
    Invalid { name: String, reason: String },

    /// The per-user writable directory could not be resolved or created.
    #[error("data directory unavailable: {reason}")]
    DirectoryUnavailable {
        path: Option<PathBuf>,
        reason: String,
    },

    /// I/O error while reading a schema resource.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SchemaError {
    pub(crate) fn invalid(name: &str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            name: name.to_string(),
            reason: reason.into(),
        }
    }
}

/// Result alias for schema operations.
pub type SchemaResult<T> = Result<T, SchemaError>;

/// Reasons an old schema cannot be mapped onto a new one.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MappingError {
    /// The store needs migrating but automatic migration is switched off.
    #[error("store was written with schema {recorded} and automatic migration is disabled")]
    MigrationDisabled { recorded: String },

    /// Mapping inference is switched off and no explicit mapping exists.
    #[error("no mapping from schema {recorded} and mapping inference is disabled")]
    InferenceDisabled { recorded: String },

    /// An attribute kept its name but changed type.
    #[error("{kind}.{attribute} changed type from {from} to {to}")]
    AttributeTypeChanged {
        kind: String,
        attribute: String,
        from: String,
        to: String,
    },

    /// A relationship kept its name but changed target or cardinality.
    #[error("{kind}.{relationship} changed shape: {reason}")]
    RelationshipChanged {
        kind: String,
        relationship: String,
        reason: String,
    },

    /// A removed member and an added member look like a rename.
    #[error("ambiguous rename of {from} to {to}; renames are not inferred")]
    AmbiguousRename { from: String, to: String },

    /// A new required member has no value to give existing rows.
    #[error("{kind}.{member} is required but existing rows have no derivable value")]
    NoDefault { kind: String, member: String },
}
