//! Error types for the edge connection layer.

use crate::protocol::EdgeKind;
use thiserror::Error;

/// Result type for edge operations.
pub type EdgeResult<T> = Result<T, EdgeError>;

/// Errors that can occur in the edge connection layer.
#[derive(Debug, Error)]
pub enum EdgeError {
    /// Stream-level failure; drives the Degraded/Reconnecting transitions.
    #[error("transport error: {0}")]
    Transport(String),

    /// Registration handshake rejected or timed out. Retried like a
    /// transport failure but logged distinctly.
    #[error("authentication error: {0}")]
    Auth(String),

    /// A pending request passed its deadline. Affects only that request,
    /// never the connection state.
    #[error("request timed out")]
    Timeout,

    /// The connection was lost while the request was in flight.
    #[error("connection lost")]
    ConnectionLost,

    /// The outbound queue is full. Local backpressure signal; the caller
    /// must retry or drop.
    #[error("outbound queue at capacity")]
    CapacityExceeded,

    /// Malformed or unroutable frame. The frame is discarded; the
    /// connection is not torn down for one bad frame.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A handler was already registered for this message kind.
    #[error("handler already registered for kind: {0}")]
    DuplicateHandler(EdgeKind),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Internal channel closed (shutdown in progress).
    #[error("channel closed")]
    ChannelClosed,
}
