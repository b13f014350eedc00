//! Streaming session negotiation for the mediapeer node.
//!
//! Owns the signaling side of real-time streaming: one state machine per
//! session, fed in arrival order through the message dispatcher. Once a
//! session is Active the media bytes themselves are handed off to the
//! (external) media transport; this crate never touches them.

mod error;
pub mod negotiator;
pub mod session;

pub use error::{StreamError, StreamResult};
pub use negotiator::{MediaSource, SessionNegotiator, SignalingHandler, StreamConfig};
pub use session::{SessionState, StreamingSession};
