//! Error types for the streaming layer.

use crate::session::SessionState;
use mediapeer_edge::EdgeError;
use mediapeer_types::SessionId;
use thiserror::Error;

/// Result type for streaming operations.
pub type StreamResult<T> = Result<T, StreamError>;

/// Errors that can occur during session negotiation.
#[derive(Debug, Error)]
pub enum StreamError {
    /// No session with the given id.
    #[error("unknown session: {0}")]
    UnknownSession(SessionId),

    /// The signaling event is not valid in the session's current state.
    #[error("invalid transition: {event} in state {from}")]
    InvalidTransition {
        from: SessionState,
        event: &'static str,
    },

    /// The media source could not produce a description.
    #[error("media source error: {0}")]
    Media(String),

    /// Edge layer failure while sending signaling.
    #[error(transparent)]
    Edge(#[from] EdgeError),
}
