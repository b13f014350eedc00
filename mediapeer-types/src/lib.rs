//! Core type definitions for the mediapeer node.
//!
//! This crate defines the fundamental types shared by the edge, catalog and
//! streaming layers:
//! - Peer, catalog, session and correlation identifiers (UUID-backed)
//! - Content hashes and path fingerprints
//! - The local media file record and its sync lifecycle
//!
//! Anything that talks to the network or to storage lives in the layer
//! crates, not here.

mod hash;
mod ids;
mod media;

pub use hash::{path_fingerprint, ContentHash, HashAlgo};
pub use ids::{CatalogId, CorrelationId, PeerId, SessionId};
pub use media::{MediaFile, MediaKind, SyncStatus};

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in type operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid UUID: {0}")]
    InvalidUuid(#[from] uuid::Error),

    #[error("unknown hash algorithm: {0}")]
    UnknownHashAlgo(String),
}
