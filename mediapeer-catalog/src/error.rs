//! Error types for the catalog layer.

use mediapeer_edge::EdgeError;
use mediapeer_types::HashAlgo;
use thiserror::Error;

/// Result type for catalog operations.
pub type CatalogResult<T> = Result<T, CatalogError>;

/// Errors that can occur in catalog operations.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// Media store failure.
    #[error("storage error: {0}")]
    Storage(String),

    /// Filesystem failure while executing a file operation.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// No record for the given path or catalog id.
    #[error("not found: {0}")]
    NotFound(String),

    /// The requested hash algorithm is not supported by this node.
    #[error("unsupported hash algorithm: {0}")]
    UnsupportedAlgo(HashAlgo),

    /// Edge layer failure while sending.
    #[error(transparent)]
    Edge(#[from] EdgeError),
}
