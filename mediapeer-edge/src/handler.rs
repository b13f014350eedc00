//! Handler seam for server-initiated messages.

use crate::error::EdgeResult;
use crate::protocol::{EdgeFrame, PeerPayload};
use async_trait::async_trait;

/// A processing routine for one message kind.
///
/// Handlers are registered with the dispatcher at startup and invoked off
/// the read path, so a slow handler never stalls the decode loop. A
/// returned payload is sent back echoing the request's correlation id;
/// `None` means the kind has no result frame. Errors are logged and
/// isolated; they never crash the read/write loops.
#[async_trait]
pub trait EdgeHandler: Send + Sync {
    async fn handle(&self, frame: EdgeFrame) -> EdgeResult<Option<PeerPayload>>;
}
