use thiserror::Error;

/// Errors produced by type operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid hex string: {0}")]
    InvalidHex(String),

    #[error("invalid byte length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("invalid entity id: {0}")]
    InvalidEntityId(String),

    #[error("cannot convert {value} to {expected}")]
    Conversion { value: String, expected: String },
}
