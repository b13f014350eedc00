//! Identifier types used throughout the mediapeer node.
//!
//! Peer and session identifiers use UUID v7 for time-ordered uniqueness;
//! correlation ids use UUID v4 since only collision resistance matters.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

macro_rules! uuid_id {
    ($(#[$doc:meta])* $name:ident, $ctor:expr) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Creates a new random identifier.
            #[must_use]
            pub fn new() -> Self {
                Self($ctor)
            }

            /// Creates an identifier from an existing UUID.
            #[must_use]
            pub const fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Returns the underlying UUID.
            #[must_use]
            pub const fn as_uuid(&self) -> Uuid {
                self.0
            }

            /// Parses an identifier from a string.
            pub fn parse(s: &str) -> Result<Self, uuid::Error> {
                Ok(Self(Uuid::parse_str(s)?))
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(Uuid::parse_str(s)?))
            }
        }
    };
}

uuid_id!(
    /// Unique identifier for this peer node. Generated once and persisted;
    /// attached to every connection attempt as authentication metadata.
    PeerId,
    Uuid::now_v7()
);

uuid_id!(
    /// Server-assigned identifier for a piece of media, distinct from its
    /// local path.
    CatalogId,
    Uuid::now_v7()
);

uuid_id!(
    /// Identifier for a streaming session; assigned by whichever side
    /// initiates the session.
    SessionId,
    Uuid::now_v7()
);

uuid_id!(
    /// Identifier linking an outbound request to its eventual inbound
    /// response.
    CorrelationId,
    Uuid::new_v4()
);
