//! Tests for negotiator.rs: session lifecycle under signaling, idle
//! reaping and reconnects.

use async_trait::async_trait;
use chrono::Utc;
use mediapeer_catalog::{MediaStore, SqliteMediaStore};
use mediapeer_edge::protocol::{
    EdgeFrame, EdgePayload, IceCandidateMessage, PeerFrame, PeerPayload,
    SessionDescriptionMessage,
};
use mediapeer_edge::{ConnectionEvent, Dispatcher, EdgeHandler};
use mediapeer_stream::{
    MediaSource, SessionNegotiator, SessionState, StreamConfig, StreamResult,
};
use mediapeer_types::{CatalogId, CorrelationId, MediaFile, SessionId, SyncStatus};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{sleep, timeout};

struct FakeMedia {
    released: Mutex<Vec<SessionId>>,
}

impl FakeMedia {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            released: Mutex::new(Vec::new()),
        })
    }

    fn released(&self) -> Vec<SessionId> {
        self.released.lock().unwrap().clone()
    }
}

#[async_trait]
impl MediaSource for FakeMedia {
    async fn create_offer(&self, catalog_id: CatalogId) -> StreamResult<String> {
        Ok(format!("offer for {catalog_id}"))
    }

    async fn create_answer(
        &self,
        _catalog_id: Option<CatalogId>,
        _remote_sdp: &str,
    ) -> StreamResult<String> {
        Ok("answer sdp".to_string())
    }

    async fn release(&self, session_id: SessionId) {
        self.released.lock().unwrap().push(session_id);
    }
}

struct Fixture {
    dispatcher: Arc<Dispatcher>,
    negotiator: Arc<SessionNegotiator>,
    media: Arc<FakeMedia>,
    store: Arc<dyn MediaStore>,
    handler: Arc<dyn EdgeHandler>,
    conn_tx: broadcast::Sender<ConnectionEvent>,
}

fn fixture(config: StreamConfig) -> Fixture {
    let dispatcher = Dispatcher::new(16);
    let media = FakeMedia::new();
    let store: Arc<dyn MediaStore> = Arc::new(SqliteMediaStore::open_in_memory().unwrap());
    let negotiator = SessionNegotiator::new(
        config,
        Arc::clone(&dispatcher),
        Arc::clone(&media) as Arc<dyn MediaSource>,
        Arc::clone(&store),
    );
    let handler: Arc<dyn EdgeHandler> = negotiator.handler();
    let (conn_tx, _) = broadcast::channel(16);
    negotiator.spawn_worker(conn_tx.subscribe());
    Fixture {
        dispatcher,
        negotiator,
        media,
        store,
        handler,
        conn_tx,
    }
}

/// Seeds a confirmed record so view counting has something to hit.
fn seed_confirmed(store: &dyn MediaStore, catalog_id: CatalogId) {
    let mut file = MediaFile::new("/media/movie.mkv", 1024, Utc::now(), vec![]);
    file.catalog_id = Some(catalog_id);
    file.status = SyncStatus::Confirmed;
    store.upsert(&file).unwrap();
}

fn fast_config() -> StreamConfig {
    StreamConfig {
        idle_timeout: Duration::from_millis(100),
        renegotiation_grace: Duration::from_millis(500),
        reap_interval: Duration::from_millis(20),
    }
}

fn edge_frame(payload: EdgePayload) -> EdgeFrame {
    EdgeFrame {
        correlation_id: CorrelationId::new(),
        payload,
    }
}

fn remote_offer(session_id: SessionId, catalog_id: CatalogId) -> EdgeFrame {
    edge_frame(EdgePayload::SdpOffer(SessionDescriptionMessage {
        session_id,
        catalog_id: Some(catalog_id),
        sdp: "v=0 remote offer".to_string(),
    }))
}

fn remote_candidate(session_id: SessionId, line: &str) -> EdgeFrame {
    edge_frame(EdgePayload::IceCandidate(IceCandidateMessage {
        session_id,
        candidate: line.to_string(),
        mid: None,
    }))
}

async fn next_frame(dispatcher: &Dispatcher) -> PeerFrame {
    timeout(Duration::from_secs(1), dispatcher.next_outbound())
        .await
        .expect("no outbound frame")
        .expect("outbound queue closed")
}

async fn settle() {
    sleep(Duration::from_millis(50)).await;
}

// ── Peer-initiated sessions ─────────────────────────────────────

#[tokio::test]
async fn open_session_sends_an_offer() {
    let fx = fixture(StreamConfig::default());
    let catalog_id = CatalogId::new();

    let session_id = fx.negotiator.open_session(catalog_id).await.unwrap();
    assert_eq!(fx.negotiator.session_state(session_id), Some(SessionState::OfferSent));

    let frame = next_frame(&fx.dispatcher).await;
    let PeerPayload::SdpOffer(offer) = frame.payload else {
        panic!("expected an offer");
    };
    assert_eq!(offer.session_id, session_id);
    assert_eq!(offer.catalog_id, Some(catalog_id));
    assert!(offer.sdp.contains("offer for"));
}

#[tokio::test]
async fn opening_a_session_counts_a_view() {
    let fx = fixture(StreamConfig::default());
    let catalog_id = CatalogId::new();
    seed_confirmed(fx.store.as_ref(), catalog_id);

    fx.negotiator.open_session(catalog_id).await.unwrap();

    let record = fx.store.get_by_catalog_id(catalog_id).unwrap().unwrap();
    assert_eq!(record.view_count, 1);

    // Renegotiating the same session is not a second view.
    fx.conn_tx.send(ConnectionEvent::Lost).unwrap();
    settle().await;
    fx.conn_tx.send(ConnectionEvent::Established).unwrap();
    settle().await;
    let record = fx.store.get_by_catalog_id(catalog_id).unwrap().unwrap();
    assert_eq!(record.view_count, 1);
}

// ── Remote-initiated sessions ───────────────────────────────────

#[tokio::test]
async fn remote_offer_is_answered() {
    let fx = fixture(StreamConfig::default());
    let session_id = SessionId::new();
    let catalog_id = CatalogId::new();

    fx.handler
        .handle(remote_offer(session_id, catalog_id))
        .await
        .unwrap();

    let frame = next_frame(&fx.dispatcher).await;
    let PeerPayload::SdpAnswer(answer) = frame.payload else {
        panic!("expected an answer");
    };
    assert_eq!(answer.session_id, session_id);
    assert_eq!(answer.sdp, "answer sdp");
    assert_eq!(
        fx.negotiator.session_state(session_id),
        Some(SessionState::AnswerExchanged)
    );
}

#[tokio::test]
async fn remote_offer_counts_a_view() {
    let fx = fixture(StreamConfig::default());
    let catalog_id = CatalogId::new();
    seed_confirmed(fx.store.as_ref(), catalog_id);

    fx.handler
        .handle(remote_offer(SessionId::new(), catalog_id))
        .await
        .unwrap();
    next_frame(&fx.dispatcher).await;

    let record = fx.store.get_by_catalog_id(catalog_id).unwrap().unwrap();
    assert_eq!(record.view_count, 1);
}

#[tokio::test]
async fn candidate_before_description_is_buffered_then_applied() {
    let fx = fixture(StreamConfig::default());
    let session_id = SessionId::new();

    // Candidate outruns the offer; it must not be dropped.
    fx.handler
        .handle(remote_candidate(session_id, "early-candidate"))
        .await
        .unwrap();
    settle().await;
    assert_eq!(fx.negotiator.candidate_counts(session_id), Some((1, 0)));

    fx.handler
        .handle(remote_offer(session_id, CatalogId::new()))
        .await
        .unwrap();
    next_frame(&fx.dispatcher).await;

    assert_eq!(fx.negotiator.candidate_counts(session_id), Some((0, 1)));
}

#[tokio::test]
async fn answer_for_unknown_session_is_dropped() {
    let fx = fixture(StreamConfig::default());

    fx.handler
        .handle(edge_frame(EdgePayload::SdpAnswer(SessionDescriptionMessage {
            session_id: SessionId::new(),
            catalog_id: None,
            sdp: "v=0".to_string(),
        })))
        .await
        .unwrap();

    settle().await;
    assert_eq!(fx.negotiator.session_count(), 0);
}

// ── Idle reaping ────────────────────────────────────────────────

#[tokio::test]
async fn idle_half_negotiated_session_is_failed_and_removed() {
    let fx = fixture(fast_config());
    let session_id = SessionId::new();

    fx.handler
        .handle(remote_offer(session_id, CatalogId::new()))
        .await
        .unwrap();
    next_frame(&fx.dispatcher).await;
    fx.handler
        .handle(remote_candidate(session_id, "cand-1"))
        .await
        .unwrap();
    fx.handler
        .handle(remote_candidate(session_id, "cand-2"))
        .await
        .unwrap();
    settle().await;
    assert_eq!(fx.negotiator.session_count(), 1);

    // Never marked active: the reaper collects it after the idle window.
    sleep(Duration::from_millis(400)).await;
    assert_eq!(fx.negotiator.session_state(session_id), None);
    assert_eq!(fx.negotiator.session_count(), 0);
    assert!(fx.media.released().contains(&session_id));
}

#[tokio::test]
async fn active_session_is_not_reaped() {
    let fx = fixture(fast_config());
    let session_id = SessionId::new();

    fx.handler
        .handle(remote_offer(session_id, CatalogId::new()))
        .await
        .unwrap();
    next_frame(&fx.dispatcher).await;

    // The media transport reports connectivity.
    fx.negotiator.mark_active(session_id).unwrap();

    sleep(Duration::from_millis(400)).await;
    assert_eq!(fx.negotiator.session_state(session_id), Some(SessionState::Active));
}

// ── Teardown ────────────────────────────────────────────────────

#[tokio::test]
async fn close_session_releases_media_and_forgets_the_session() {
    let fx = fixture(StreamConfig::default());
    let session_id = fx.negotiator.open_session(CatalogId::new()).await.unwrap();
    next_frame(&fx.dispatcher).await;

    fx.negotiator.close_session(session_id).await.unwrap();
    assert_eq!(fx.negotiator.session_state(session_id), None);
    assert!(fx.media.released().contains(&session_id));
}

// ── Reconnects ──────────────────────────────────────────────────

#[tokio::test]
async fn initiated_session_is_reoffered_after_reconnect_within_grace() {
    let fx = fixture(fast_config());
    let catalog_id = CatalogId::new();
    let session_id = fx.negotiator.open_session(catalog_id).await.unwrap();
    next_frame(&fx.dispatcher).await;

    fx.conn_tx.send(ConnectionEvent::Lost).unwrap();
    settle().await;
    fx.conn_tx.send(ConnectionEvent::Established).unwrap();

    let frame = next_frame(&fx.dispatcher).await;
    let PeerPayload::SdpOffer(offer) = frame.payload else {
        panic!("expected a renegotiation offer");
    };
    assert_eq!(offer.session_id, session_id);
    assert_eq!(offer.catalog_id, Some(catalog_id));
    assert_eq!(fx.negotiator.session_state(session_id), Some(SessionState::OfferSent));
}

#[tokio::test]
async fn remote_initiated_session_is_torn_down_on_reconnect() {
    let fx = fixture(fast_config());
    let session_id = SessionId::new();

    fx.handler
        .handle(remote_offer(session_id, CatalogId::new()))
        .await
        .unwrap();
    next_frame(&fx.dispatcher).await;

    fx.conn_tx.send(ConnectionEvent::Lost).unwrap();
    settle().await;
    fx.conn_tx.send(ConnectionEvent::Established).unwrap();
    settle().await;

    // The remote side restarts its own sessions.
    assert_eq!(fx.negotiator.session_state(session_id), None);
    assert!(fx.media.released().contains(&session_id));
}

#[tokio::test]
async fn session_is_torn_down_when_grace_expires_while_disconnected() {
    let mut config = fast_config();
    config.renegotiation_grace = Duration::from_millis(50);
    let fx = fixture(config);

    let session_id = fx.negotiator.open_session(CatalogId::new()).await.unwrap();
    next_frame(&fx.dispatcher).await;

    fx.conn_tx.send(ConnectionEvent::Lost).unwrap();

    // No reconnect arrives inside the grace window.
    sleep(Duration::from_millis(300)).await;
    assert_eq!(fx.negotiator.session_state(session_id), None);
    assert!(fx.media.released().contains(&session_id));
}

#[tokio::test]
async fn shutdown_closes_every_session() {
    let fx = fixture(StreamConfig::default());
    let a = fx.negotiator.open_session(CatalogId::new()).await.unwrap();
    let b = fx.negotiator.open_session(CatalogId::new()).await.unwrap();

    fx.conn_tx.send(ConnectionEvent::ShuttingDown).unwrap();
    settle().await;

    assert_eq!(fx.negotiator.session_count(), 0);
    let released = fx.media.released();
    assert!(released.contains(&a) && released.contains(&b));
}
