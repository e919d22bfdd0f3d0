//! Typed errors shared by the core pipeline.
//!
//! Most of the crate returns `anyhow::Result`; these variants exist so
//! callers can downcast and tell a broken vectorizer contract apart from
//! an I/O failure.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EmbedError {
    #[error("vectorizer returned {got} vectors for {expected} inputs")]
    CountMismatch { expected: usize, got: usize },

    #[error("vector {index} has {got} dimensions, expected {expected}")]
    DimensionMismatch {
        index: usize,
        expected: usize,
        got: usize,
    },

    #[error("vector {index} contains a non-finite value")]
    NonFiniteValue { index: usize },

    #[error("unknown block kind: '{0}'")]
    UnknownBlockKind(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}
