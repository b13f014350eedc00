//! Message dispatcher: request/response correlation and kind routing.
//!
//! The dispatcher sits between the connection manager and everything
//! else. Outbound frames go into a bounded queue that the active
//! connection's writer drains; inbound frames either resolve a pending
//! request (matched by correlation id) or are dispatched by kind to a
//! registered handler. A frame that resolves a pending request is never
//! also delivered to a kind handler.
//!
//! Each registered kind gets its own worker task with a bounded queue.
//! Forwarding happens on the read path, so frames of one kind are
//! processed strictly in arrival order (which is what preserves
//! per-session signaling order), while different kinds run concurrently
//! and a slow handler can never stall the decode loop.

use crate::error::{EdgeError, EdgeResult};
use crate::handler::EdgeHandler;
use crate::protocol::{EdgeFrame, EdgeKind, EdgePayload, PeerFrame, PeerPayload};
use mediapeer_types::CorrelationId;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Default capacity of the outbound queue.
pub const DEFAULT_OUTBOUND_CAPACITY: usize = 64;

/// Capacity of each handler's inbound queue.
const HANDLER_QUEUE_CAPACITY: usize = 32;

type PendingSlot = oneshot::Sender<EdgeResult<EdgePayload>>;

struct HandlerEntry {
    tx: mpsc::Sender<EdgeFrame>,
    _task: JoinHandle<()>,
}

/// Routes messages between the edge connection and the rest of the node.
pub struct Dispatcher {
    /// Bounded outbound queue; `send` fails fast when it is full.
    outbound_tx: mpsc::Sender<PeerFrame>,
    /// Receiver side, drained by the active connection's writer.
    outbound_rx: tokio::sync::Mutex<mpsc::Receiver<PeerFrame>>,
    /// Outstanding request slots, keyed by correlation id. Each slot is
    /// resolved exactly once: by a matching response, by its timeout, or
    /// by connection loss.
    pending: Mutex<HashMap<CorrelationId, PendingSlot>>,
    /// Handler registration table, built at startup.
    handlers: Mutex<HashMap<EdgeKind, HandlerEntry>>,
}

impl Dispatcher {
    /// Creates a dispatcher with the given outbound queue capacity.
    pub fn new(outbound_capacity: usize) -> Arc<Self> {
        let (outbound_tx, outbound_rx) = mpsc::channel(outbound_capacity);
        Arc::new(Self {
            outbound_tx,
            outbound_rx: tokio::sync::Mutex::new(outbound_rx),
            pending: Mutex::new(HashMap::new()),
            handlers: Mutex::new(HashMap::new()),
        })
    }

    // ── Registration ─────────────────────────────────────────────

    /// Associates a message kind with a handler.
    ///
    /// Registering the same kind twice is an error, not a silent
    /// last-wins replacement.
    pub fn register_handler(
        self: &Arc<Self>,
        kind: EdgeKind,
        handler: Arc<dyn EdgeHandler>,
    ) -> EdgeResult<()> {
        let mut handlers = self.handlers.lock().unwrap();
        if handlers.contains_key(&kind) {
            return Err(EdgeError::DuplicateHandler(kind));
        }

        let (tx, rx) = mpsc::channel(HANDLER_QUEUE_CAPACITY);
        let task = tokio::spawn(Self::handler_worker(
            Arc::downgrade(self),
            kind,
            handler,
            rx,
        ));
        handlers.insert(kind, HandlerEntry { tx, _task: task });
        Ok(())
    }

    /// Processes frames of one kind strictly in arrival order.
    async fn handler_worker(
        dispatcher: Weak<Dispatcher>,
        kind: EdgeKind,
        handler: Arc<dyn EdgeHandler>,
        mut rx: mpsc::Receiver<EdgeFrame>,
    ) {
        while let Some(frame) = rx.recv().await {
            let correlation_id = frame.correlation_id;
            match handler.handle(frame).await {
                Ok(Some(reply)) => {
                    let Some(dispatcher) = dispatcher.upgrade() else {
                        return;
                    };
                    if let Err(e) = dispatcher.enqueue(PeerFrame::reply(correlation_id, reply)) {
                        warn!(%kind, error = %e, "failed to enqueue handler reply");
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    // Handler failures are isolated; the loops stay up.
                    warn!(%kind, error = %e, "handler failed");
                }
            }
        }
    }

    // ── Outbound ─────────────────────────────────────────────────

    /// Enqueues a message for sending and returns its correlation id.
    ///
    /// Never blocks: a full queue fails fast with `CapacityExceeded`
    /// instead of letting a stalled connection exhaust memory.
    pub fn send(&self, payload: PeerPayload) -> EdgeResult<CorrelationId> {
        let frame = PeerFrame::new(payload);
        let id = frame.correlation_id;
        self.enqueue(frame)?;
        Ok(id)
    }

    /// Enqueues a pre-built frame (used for replies that echo a server
    /// correlation id).
    pub fn enqueue(&self, frame: PeerFrame) -> EdgeResult<()> {
        match self.outbound_tx.try_send(frame) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => Err(EdgeError::CapacityExceeded),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(EdgeError::ChannelClosed),
        }
    }

    /// Sends a message and waits for the correlated response.
    ///
    /// Resolves with the response payload, `Timeout` once the deadline
    /// passes, or `ConnectionLost` immediately if the connection drops
    /// while the request is outstanding.
    pub async fn request(
        &self,
        payload: PeerPayload,
        timeout: Duration,
    ) -> EdgeResult<EdgePayload> {
        let frame = PeerFrame::new(payload);
        let id = frame.correlation_id;

        let (tx, mut rx) = oneshot::channel();
        self.pending.lock().unwrap().insert(id, tx);

        if let Err(e) = self.enqueue(frame) {
            self.pending.lock().unwrap().remove(&id);
            return Err(e);
        }

        match tokio::time::timeout(timeout, &mut rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(EdgeError::ChannelClosed),
            Err(_) => {
                let still_pending = self.pending.lock().unwrap().remove(&id).is_some();
                if still_pending {
                    Err(EdgeError::Timeout)
                } else {
                    // Resolved just as the deadline hit; prefer the result.
                    rx.try_recv().unwrap_or(Err(EdgeError::Timeout))
                }
            }
        }
    }

    /// Hands the next outbound frame to the active connection's writer.
    /// Returns `None` only when the dispatcher is dropped.
    pub async fn next_outbound(&self) -> Option<PeerFrame> {
        self.outbound_rx.lock().await.recv().await
    }

    // ── Inbound ──────────────────────────────────────────────────

    /// Routes one inbound frame.
    ///
    /// If the correlation id matches a pending request, the request is
    /// resolved and the frame goes no further. Otherwise the frame is
    /// forwarded to its kind's worker queue; an unknown kind or a full
    /// queue discards the frame with a log line, never a teardown.
    pub fn route(&self, frame: EdgeFrame) {
        let slot = self.pending.lock().unwrap().remove(&frame.correlation_id);
        if let Some(slot) = slot {
            // Receiver may have given up (timed out); that is fine.
            let _ = slot.send(Ok(frame.payload));
            return;
        }

        let kind = frame.payload.kind();
        let tx = {
            let handlers = self.handlers.lock().unwrap();
            handlers.get(&kind).map(|entry| entry.tx.clone())
        };
        let Some(tx) = tx else {
            warn!(%kind, "no handler for message kind, frame discarded");
            return;
        };

        match tx.try_send(frame) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(%kind, "handler queue full, frame discarded");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!(%kind, "handler worker gone, frame discarded");
            }
        }
    }

    /// Resolves every outstanding request with `ConnectionLost`.
    ///
    /// Called by the connection manager the moment the link drops, so
    /// callers fail immediately instead of waiting out their timeouts.
    pub fn fail_pending(&self) {
        let drained: Vec<PendingSlot> = {
            let mut pending = self.pending.lock().unwrap();
            pending.drain().map(|(_, slot)| slot).collect()
        };
        if !drained.is_empty() {
            debug!(count = drained.len(), "failing pending requests: connection lost");
        }
        for slot in drained {
            let _ = slot.send(Err(EdgeError::ConnectionLost));
        }
    }

    /// Number of requests currently awaiting a response.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().unwrap().len()
    }
}
