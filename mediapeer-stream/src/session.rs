//! Per-session signaling state machine.

use crate::error::{StreamError, StreamResult};
use mediapeer_edge::protocol::{IceCandidateMessage, SessionDescriptionMessage};
use mediapeer_types::{CatalogId, SessionId};
use std::fmt;
use tokio::time::Instant;

/// Negotiation state of a streaming session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Session id seen, no description exchanged yet.
    Proposed,
    /// We sent the offer and await the answer.
    OfferSent,
    /// The remote offered; we owe an answer.
    OfferReceived,
    /// Both descriptions are in place.
    AnswerExchanged,
    /// The media transport reported connectivity; signaling is done.
    Active,
    /// Orderly teardown in progress.
    Closing,
    /// Torn down cleanly.
    Closed,
    /// Negotiation error or timeout. Terminal.
    Failed,
}

impl SessionState {
    /// Whether this state is terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed | Self::Failed)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Proposed => "proposed",
            Self::OfferSent => "offer_sent",
            Self::OfferReceived => "offer_received",
            Self::AnswerExchanged => "answer_exchanged",
            Self::Active => "active",
            Self::Closing => "closing",
            Self::Closed => "closed",
            Self::Failed => "failed",
        };
        write!(f, "{name}")
    }
}

/// One streaming session's signaling state.
///
/// Candidates arriving before the remote description are buffered and
/// applied the moment the description lands, never dropped.
#[derive(Debug)]
pub struct StreamingSession {
    id: SessionId,
    catalog_id: Option<CatalogId>,
    state: SessionState,
    /// True once this side has sent the opening offer.
    initiated: bool,
    local_description: Option<String>,
    remote_description: Option<String>,
    buffered_candidates: Vec<IceCandidateMessage>,
    applied_candidates: Vec<IceCandidateMessage>,
    created_at: Instant,
    last_activity: Instant,
    /// Deadline for renegotiation after a connection loss.
    renegotiate_by: Option<Instant>,
}

impl StreamingSession {
    /// Creates a session in the Proposed state.
    pub fn new(id: SessionId) -> Self {
        let now = Instant::now();
        Self {
            id,
            catalog_id: None,
            state: SessionState::Proposed,
            initiated: false,
            local_description: None,
            remote_description: None,
            buffered_candidates: Vec::new(),
            applied_candidates: Vec::new(),
            created_at: now,
            last_activity: now,
            renegotiate_by: None,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn catalog_id(&self) -> Option<CatalogId> {
        self.catalog_id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn local_description(&self) -> Option<&str> {
        self.local_description.as_deref()
    }

    pub fn remote_description(&self) -> Option<&str> {
        self.remote_description.as_deref()
    }

    /// Candidates applied so far, in application order.
    pub fn applied_candidates(&self) -> &[IceCandidateMessage] {
        &self.applied_candidates
    }

    /// Candidates waiting for the remote description.
    pub fn buffered_candidates(&self) -> &[IceCandidateMessage] {
        &self.buffered_candidates
    }

    /// Time since the last signaling traffic on this session.
    pub fn idle_for(&self) -> std::time::Duration {
        self.last_activity.elapsed()
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn renegotiate_by(&self) -> Option<Instant> {
        self.renegotiate_by
    }

    pub fn set_renegotiate_by(&mut self, deadline: Option<Instant>) {
        self.renegotiate_by = deadline;
    }

    /// Whether this side initiated the session (sent the opening offer).
    pub fn is_initiator(&self) -> bool {
        self.initiated
    }

    fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    // ── Transitions ──────────────────────────────────────────────

    /// Records our outbound offer. `Proposed → OfferSent`.
    pub fn set_local_offer(
        &mut self,
        catalog_id: CatalogId,
        sdp: impl Into<String>,
    ) -> StreamResult<()> {
        if self.state != SessionState::Proposed {
            return Err(self.invalid("local offer"));
        }
        self.catalog_id = Some(catalog_id);
        self.initiated = true;
        self.local_description = Some(sdp.into());
        self.state = SessionState::OfferSent;
        self.touch();
        Ok(())
    }

    /// Applies a remote offer. `Proposed → OfferReceived`; flushes any
    /// buffered candidates.
    pub fn apply_remote_offer(&mut self, offer: &SessionDescriptionMessage) -> StreamResult<()> {
        if self.state != SessionState::Proposed {
            return Err(self.invalid("remote offer"));
        }
        self.catalog_id = offer.catalog_id;
        self.remote_description = Some(offer.sdp.clone());
        self.state = SessionState::OfferReceived;
        self.flush_buffered();
        self.touch();
        Ok(())
    }

    /// Records our outbound answer. `OfferReceived → AnswerExchanged`.
    pub fn set_local_answer(&mut self, sdp: impl Into<String>) -> StreamResult<()> {
        if self.state != SessionState::OfferReceived {
            return Err(self.invalid("local answer"));
        }
        self.local_description = Some(sdp.into());
        self.state = SessionState::AnswerExchanged;
        self.touch();
        Ok(())
    }

    /// Applies the remote answer to our offer. `OfferSent →
    /// AnswerExchanged`; flushes any buffered candidates.
    pub fn apply_remote_answer(&mut self, answer: &SessionDescriptionMessage) -> StreamResult<()> {
        if self.state != SessionState::OfferSent {
            return Err(self.invalid("remote answer"));
        }
        self.remote_description = Some(answer.sdp.clone());
        self.state = SessionState::AnswerExchanged;
        self.flush_buffered();
        self.touch();
        Ok(())
    }

    /// Adds a remote candidate. Buffered until the remote description is
    /// applied; applied immediately afterwards.
    pub fn add_candidate(&mut self, candidate: IceCandidateMessage) -> StreamResult<()> {
        if self.state.is_terminal() {
            return Err(self.invalid("candidate"));
        }
        if self.remote_description.is_some() {
            self.applied_candidates.push(candidate);
        } else {
            self.buffered_candidates.push(candidate);
        }
        self.touch();
        Ok(())
    }

    /// Marks the session Active once the media transport reports
    /// connectivity. `AnswerExchanged → Active`.
    pub fn mark_active(&mut self) -> StreamResult<()> {
        if self.state != SessionState::AnswerExchanged {
            return Err(self.invalid("activate"));
        }
        self.state = SessionState::Active;
        self.touch();
        Ok(())
    }

    /// Begins orderly teardown from any non-terminal state.
    pub fn begin_close(&mut self) -> StreamResult<()> {
        if self.state.is_terminal() || self.state == SessionState::Closing {
            return Err(self.invalid("close"));
        }
        self.state = SessionState::Closing;
        self.touch();
        Ok(())
    }

    /// Completes teardown. `Closing → Closed`.
    pub fn finish_close(&mut self) -> StreamResult<()> {
        if self.state != SessionState::Closing {
            return Err(self.invalid("finish close"));
        }
        self.state = SessionState::Closed;
        Ok(())
    }

    /// Fails the session from any non-terminal state.
    pub fn fail(&mut self) {
        if !self.state.is_terminal() {
            self.state = SessionState::Failed;
        }
    }

    /// Resets the machine for peer-initiated renegotiation after a
    /// reconnect, keeping the session id and catalog id.
    pub fn reset_for_renegotiation(&mut self) -> StreamResult<()> {
        if self.state.is_terminal() {
            return Err(self.invalid("renegotiate"));
        }
        self.local_description = None;
        self.remote_description = None;
        self.buffered_candidates.clear();
        self.applied_candidates.clear();
        self.state = SessionState::Proposed;
        self.renegotiate_by = None;
        self.touch();
        Ok(())
    }

    fn flush_buffered(&mut self) {
        self.applied_candidates.append(&mut self.buffered_candidates);
    }

    fn invalid(&self, event: &'static str) -> StreamError {
        StreamError::InvalidTransition {
            from: self.state,
            event,
        }
    }
}
