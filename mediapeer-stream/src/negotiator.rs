//! Session negotiator: one signaling state machine per active session.
//!
//! All signaling flows through a single worker consuming an ordered
//! queue, so messages for a given session are applied strictly in
//! arrival order. The worker also reaps idle half-negotiated sessions
//! and renegotiates surviving sessions after a reconnect.

use crate::error::{StreamError, StreamResult};
use crate::session::{SessionState, StreamingSession};
use async_trait::async_trait;
use mediapeer_catalog::MediaStore;
use mediapeer_edge::protocol::{
    EdgeFrame, EdgePayload, IceCandidateMessage, PeerPayload, SessionDescriptionMessage,
};
use mediapeer_edge::{ConnectionEvent, Dispatcher, EdgeHandler, EdgeResult};
use mediapeer_types::{CatalogId, SessionId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant};
use tracing::{debug, info, warn};

/// Configuration for session negotiation.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// How long a session may sit idle before becoming Active.
    pub idle_timeout: Duration,
    /// Window for renegotiating sessions after a reconnect.
    pub renegotiation_grace: Duration,
    /// How often idle sessions are checked.
    pub reap_interval: Duration,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(300),
            renegotiation_grace: Duration::from_secs(30),
            reap_interval: Duration::from_secs(5),
        }
    }
}

/// Produces and consumes session descriptions for local media.
///
/// The actual media pipeline (encoding, transport) is an external
/// collaborator; this trait is its signaling surface.
#[async_trait]
pub trait MediaSource: Send + Sync {
    /// Builds a local offer for streaming the given catalog entry.
    async fn create_offer(&self, catalog_id: CatalogId) -> StreamResult<String>;

    /// Builds a local answer to a remote offer.
    async fn create_answer(
        &self,
        catalog_id: Option<CatalogId>,
        remote_sdp: &str,
    ) -> StreamResult<String>;

    /// Releases media resources held for a session.
    async fn release(&self, session_id: SessionId);
}

/// Inbound signaling, in arrival order.
enum SignalEvent {
    RemoteOffer(SessionDescriptionMessage),
    RemoteAnswer(SessionDescriptionMessage),
    RemoteCandidate(IceCandidateMessage),
}

/// Maintains the signaling state machines for all active sessions.
pub struct SessionNegotiator {
    config: StreamConfig,
    dispatcher: Arc<Dispatcher>,
    media: Arc<dyn MediaSource>,
    store: Arc<dyn MediaStore>,
    sessions: Mutex<HashMap<SessionId, StreamingSession>>,
    signal_tx: mpsc::Sender<SignalEvent>,
    signal_rx: Mutex<Option<mpsc::Receiver<SignalEvent>>>,
}

impl SessionNegotiator {
    /// Creates a negotiator. Call `spawn_worker` to start processing.
    pub fn new(
        config: StreamConfig,
        dispatcher: Arc<Dispatcher>,
        media: Arc<dyn MediaSource>,
        store: Arc<dyn MediaStore>,
    ) -> Arc<Self> {
        let (signal_tx, signal_rx) = mpsc::channel(64);
        Arc::new(Self {
            config,
            dispatcher,
            media,
            store,
            sessions: Mutex::new(HashMap::new()),
            signal_tx,
            signal_rx: Mutex::new(Some(signal_rx)),
        })
    }

    /// Returns the dispatcher handler that feeds signaling into this
    /// negotiator. Register it for the SdpOffer, SdpAnswer and
    /// IceCandidate kinds.
    pub fn handler(self: &Arc<Self>) -> Arc<SignalingHandler> {
        Arc::new(SignalingHandler {
            signal_tx: self.signal_tx.clone(),
        })
    }

    // ── Public API ───────────────────────────────────────────────

    /// Opens a peer-initiated session for the given catalog entry and
    /// sends the offer.
    pub async fn open_session(&self, catalog_id: CatalogId) -> StreamResult<SessionId> {
        let session_id = SessionId::new();
        let sdp = self.media.create_offer(catalog_id).await?;

        {
            let mut sessions = self.sessions.lock().unwrap();
            let mut session = StreamingSession::new(session_id);
            session.set_local_offer(catalog_id, sdp.clone())?;
            sessions.insert(session_id, session);
        }

        self.dispatcher
            .send(PeerPayload::SdpOffer(SessionDescriptionMessage {
                session_id,
                catalog_id: Some(catalog_id),
                sdp,
            }))
            .map_err(StreamError::from)?;

        self.count_view(catalog_id);
        info!(%session_id, %catalog_id, "streaming session opened");
        Ok(session_id)
    }

    /// Bumps the view count for the streamed file. Best effort; a store
    /// failure never fails the session.
    fn count_view(&self, catalog_id: CatalogId) {
        if let Err(e) = self.store.increment_view_count(catalog_id) {
            warn!(%catalog_id, error = %e, "failed to record view");
        }
    }

    /// Marks a session Active. Called by the media transport once
    /// connectivity is established; signaling hands off here.
    pub fn mark_active(&self, session_id: SessionId) -> StreamResult<()> {
        let mut sessions = self.sessions.lock().unwrap();
        let session = sessions
            .get_mut(&session_id)
            .ok_or(StreamError::UnknownSession(session_id))?;
        session.mark_active()?;
        info!(%session_id, "session active, signaling handed off");
        Ok(())
    }

    /// Closes a session and releases its media resources.
    pub async fn close_session(&self, session_id: SessionId) -> StreamResult<()> {
        {
            let mut sessions = self.sessions.lock().unwrap();
            let session = sessions
                .get_mut(&session_id)
                .ok_or(StreamError::UnknownSession(session_id))?;
            session.begin_close()?;
            session.finish_close()?;
            sessions.remove(&session_id);
        }
        self.media.release(session_id).await;
        info!(%session_id, "session closed");
        Ok(())
    }

    /// Current state of a session, if it exists.
    pub fn session_state(&self, session_id: SessionId) -> Option<SessionState> {
        self.sessions
            .lock()
            .unwrap()
            .get(&session_id)
            .map(|s| s.state())
    }

    /// Buffered and applied candidate counts for a session.
    pub fn candidate_counts(&self, session_id: SessionId) -> Option<(usize, usize)> {
        self.sessions
            .lock()
            .unwrap()
            .get(&session_id)
            .map(|s| (s.buffered_candidates().len(), s.applied_candidates().len()))
    }

    /// Number of live sessions.
    pub fn session_count(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    // ── Worker ───────────────────────────────────────────────────

    /// Spawns the negotiator worker. Idempotent; a second call is a
    /// no-op.
    pub fn spawn_worker(
        self: &Arc<Self>,
        mut connection_events: broadcast::Receiver<ConnectionEvent>,
    ) -> JoinHandle<()> {
        let negotiator = Arc::clone(self);
        tokio::spawn(async move {
            let Some(mut signal_rx) = negotiator.signal_rx.lock().unwrap().take() else {
                warn!("negotiator worker already running");
                return;
            };

            let mut reap = interval(negotiator.config.reap_interval);
            loop {
                tokio::select! {
                    event = signal_rx.recv() => match event {
                        Some(event) => negotiator.apply_signal(event).await,
                        None => break,
                    },

                    event = connection_events.recv() => match event {
                        Ok(ConnectionEvent::Lost) => negotiator.on_connection_lost(),
                        Ok(ConnectionEvent::Established) => {
                            negotiator.on_connection_established().await;
                        }
                        Ok(ConnectionEvent::Exhausted) => negotiator.teardown_all().await,
                        Ok(ConnectionEvent::ShuttingDown) => {
                            negotiator.close_all().await;
                            break;
                        }
                        Ok(_) => {}
                        Err(broadcast::error::RecvError::Lagged(missed)) => {
                            warn!(missed, "negotiator lagged behind connection events");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },

                    _ = reap.tick() => negotiator.reap(),
                }
            }
            debug!("negotiator worker stopped");
        })
    }

    async fn apply_signal(&self, event: SignalEvent) {
        match event {
            SignalEvent::RemoteOffer(offer) => self.on_remote_offer(offer).await,
            SignalEvent::RemoteAnswer(answer) => self.on_remote_answer(&answer),
            SignalEvent::RemoteCandidate(candidate) => self.on_remote_candidate(candidate),
        }
    }

    async fn on_remote_offer(&self, offer: SessionDescriptionMessage) {
        let session_id = offer.session_id;
        let catalog_id = offer.catalog_id;

        {
            let mut sessions = self.sessions.lock().unwrap();
            let session = sessions
                .entry(session_id)
                .or_insert_with(|| StreamingSession::new(session_id));
            if let Err(e) = session.apply_remote_offer(&offer) {
                warn!(%session_id, error = %e, "offer rejected, failing session");
                session.fail();
                return;
            }
        }

        if let Some(catalog_id) = catalog_id {
            self.count_view(catalog_id);
        }

        let answer = match self.media.create_answer(catalog_id, &offer.sdp).await {
            Ok(sdp) => sdp,
            Err(e) => {
                warn!(%session_id, error = %e, "could not build answer, failing session");
                self.fail_session(session_id);
                return;
            }
        };

        {
            let mut sessions = self.sessions.lock().unwrap();
            let Some(session) = sessions.get_mut(&session_id) else {
                return;
            };
            if let Err(e) = session.set_local_answer(answer.clone()) {
                warn!(%session_id, error = %e, "answer no longer applicable");
                return;
            }
        }

        if let Err(e) = self
            .dispatcher
            .send(PeerPayload::SdpAnswer(SessionDescriptionMessage {
                session_id,
                catalog_id: None,
                sdp: answer,
            }))
        {
            warn!(%session_id, error = %e, "failed to send answer, failing session");
            self.fail_session(session_id);
        }
    }

    fn on_remote_answer(&self, answer: &SessionDescriptionMessage) {
        let mut sessions = self.sessions.lock().unwrap();
        let Some(session) = sessions.get_mut(&answer.session_id) else {
            warn!(session_id = %answer.session_id, "answer for unknown session, dropping");
            return;
        };
        if let Err(e) = session.apply_remote_answer(answer) {
            warn!(session_id = %answer.session_id, error = %e, "answer rejected, failing session");
            session.fail();
        }
    }

    fn on_remote_candidate(&self, candidate: IceCandidateMessage) {
        let mut sessions = self.sessions.lock().unwrap();
        let session = sessions
            .entry(candidate.session_id)
            .or_insert_with(|| StreamingSession::new(candidate.session_id));
        if let Err(e) = session.add_candidate(candidate) {
            debug!(error = %e, "candidate for terminal session, dropping");
        }
    }

    // ── Lifecycle reactions ──────────────────────────────────────

    fn on_connection_lost(&self) {
        let deadline = Instant::now() + self.config.renegotiation_grace;
        let mut sessions = self.sessions.lock().unwrap();
        for session in sessions.values_mut() {
            if !session.state().is_terminal() {
                session.set_renegotiate_by(Some(deadline));
            }
        }
    }

    /// Renegotiates surviving sessions after a reconnect. This peer
    /// re-initiates sessions it opened; remotely initiated sessions are
    /// torn down for the remote side to restart.
    async fn on_connection_established(&self) {
        let now = Instant::now();
        let mut to_reoffer = Vec::new();
        let mut to_drop = Vec::new();

        {
            let mut sessions = self.sessions.lock().unwrap();
            for session in sessions.values_mut() {
                let Some(deadline) = session.renegotiate_by() else {
                    continue;
                };
                if now <= deadline && session.is_initiator() {
                    // catalog_id is always set for initiated sessions
                    if let Some(catalog_id) = session.catalog_id() {
                        to_reoffer.push((session.id(), catalog_id));
                        continue;
                    }
                }
                to_drop.push(session.id());
            }
        }

        for session_id in to_drop {
            debug!(%session_id, "session not renegotiable, tearing down");
            self.fail_session(session_id);
            self.remove_session(session_id).await;
        }

        for (session_id, catalog_id) in to_reoffer {
            if let Err(e) = self.reoffer(session_id, catalog_id).await {
                warn!(%session_id, error = %e, "renegotiation failed");
                self.fail_session(session_id);
                self.remove_session(session_id).await;
            }
        }
    }

    async fn reoffer(&self, session_id: SessionId, catalog_id: CatalogId) -> StreamResult<()> {
        let sdp = self.media.create_offer(catalog_id).await?;
        {
            let mut sessions = self.sessions.lock().unwrap();
            let session = sessions
                .get_mut(&session_id)
                .ok_or(StreamError::UnknownSession(session_id))?;
            session.reset_for_renegotiation()?;
            session.set_local_offer(catalog_id, sdp.clone())?;
        }
        self.dispatcher
            .send(PeerPayload::SdpOffer(SessionDescriptionMessage {
                session_id,
                catalog_id: Some(catalog_id),
                sdp,
            }))
            .map_err(StreamError::from)?;
        info!(%session_id, "session renegotiation offer sent");
        Ok(())
    }

    /// Fails and removes idle or expired sessions.
    fn reap(&self) {
        let now = Instant::now();
        let mut dead = Vec::new();
        {
            let mut sessions = self.sessions.lock().unwrap();
            sessions.retain(|id, session| {
                if session.state().is_terminal() {
                    dead.push(*id);
                    return false;
                }
                // Renegotiation window expired while still disconnected.
                if session.renegotiate_by().is_some_and(|d| now > d) {
                    debug!(session_id = %id, "renegotiation window expired");
                    session.fail();
                    dead.push(*id);
                    return false;
                }
                // Half-negotiated sessions must not leak.
                if session.state() != SessionState::Active
                    && session.idle_for() > self.config.idle_timeout
                {
                    debug!(session_id = %id, "session idle too long, failing");
                    session.fail();
                    dead.push(*id);
                    return false;
                }
                true
            });
        }
        for id in dead {
            let media = Arc::clone(&self.media);
            tokio::spawn(async move { media.release(id).await });
        }
    }

    async fn teardown_all(&self) {
        let ids: Vec<SessionId> = {
            let mut sessions = self.sessions.lock().unwrap();
            sessions.values_mut().for_each(|s| s.fail());
            sessions.drain().map(|(id, _)| id).collect()
        };
        for id in ids {
            self.media.release(id).await;
        }
    }

    /// Drives every session to Closing then Closed during shutdown.
    async fn close_all(&self) {
        let ids: Vec<SessionId> = {
            let mut sessions = self.sessions.lock().unwrap();
            for session in sessions.values_mut() {
                if !session.state().is_terminal() {
                    let _ = session.begin_close();
                    let _ = session.finish_close();
                }
            }
            sessions.drain().map(|(id, _)| id).collect()
        };
        for id in ids {
            self.media.release(id).await;
        }
    }

    fn fail_session(&self, session_id: SessionId) {
        if let Some(session) = self.sessions.lock().unwrap().get_mut(&session_id) {
            session.fail();
        }
    }

    async fn remove_session(&self, session_id: SessionId) {
        if self.sessions.lock().unwrap().remove(&session_id).is_some() {
            self.media.release(session_id).await;
        }
    }
}

/// Dispatcher handler forwarding signaling frames into the negotiator's
/// ordered queue.
pub struct SignalingHandler {
    signal_tx: mpsc::Sender<SignalEvent>,
}

#[async_trait]
impl EdgeHandler for SignalingHandler {
    async fn handle(&self, frame: EdgeFrame) -> EdgeResult<Option<PeerPayload>> {
        let event = match frame.payload {
            EdgePayload::SdpOffer(offer) => SignalEvent::RemoteOffer(offer),
            EdgePayload::SdpAnswer(answer) => SignalEvent::RemoteAnswer(answer),
            EdgePayload::IceCandidate(candidate) => SignalEvent::RemoteCandidate(candidate),
            _ => return Ok(None),
        };
        if self.signal_tx.send(event).await.is_err() {
            warn!("negotiator gone, signaling frame dropped");
        }
        Ok(None)
    }
}
