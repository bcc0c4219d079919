use thiserror::Error;

/// Errors produced by type operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid hex string: {0}")]
    InvalidHex(String),

    #[error("invalid byte length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("unknown cardinality: {0}")]
    UnknownCardinality(String),

    #[error("value of type {actual} where {expected} was expected")]
    Mismatch {
        expected: &'static str,
        actual: &'static str,
    },
}
