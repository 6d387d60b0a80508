//! Error types for SetuGraph.

use thiserror::Error;

use crate::problem::ParamBlockKey;

/// SetuGraph error type
#[derive(Error, Debug)]
pub enum GraphError {
    /// A constraint descriptor failed validation at construction time.
    #[error("Invalid constraint descriptor: {0}")]
    InvalidDescriptor(String),

    /// A registered parameter block refers to a node that has left the
    /// store between problem construction and the solve.
    #[error("Parameter block {0:?} no longer resolves to a stored node")]
    MissingBlock(ParamBlockKey),
}

pub type Result<T> = std::result::Result<T, GraphError>;
