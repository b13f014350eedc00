//! Edge connection layer for the mediapeer node.
//!
//! Owns the single long-lived control connection to the central edge
//! service and the message traffic that flows over it.
//!
//! # Architecture
//!
//! - **Protocol**: the tagged message kinds exchanged with the edge service
//! - **Codec**: length-prefixed JSON framing over any duplex byte stream
//! - **Dispatcher**: correlation of request/response pairs and routing of
//!   server-initiated messages to registered handlers
//! - **Connection**: lifecycle of the physical link (connect, register,
//!   heartbeat, degrade, backoff-and-reconnect)
//!
//! The dispatcher never touches a socket directly. Each connection epoch
//! drains the dispatcher's outbound queue through a fresh writer and feeds
//! inbound frames back through `Dispatcher::route`, so a reconnect simply
//! reissues the duplex handle without the dispatcher noticing.

pub mod codec;
pub mod connection;
pub mod dispatcher;
mod error;
pub mod handler;
pub mod protocol;

pub use connection::{ConnectionEvent, ConnectionManager, ConnectionState, EdgeConfig};
pub use dispatcher::Dispatcher;
pub use error::{EdgeError, EdgeResult};
pub use handler::EdgeHandler;
