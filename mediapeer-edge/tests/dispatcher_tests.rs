//! Tests for dispatcher.rs: request correlation and kind routing.

use async_trait::async_trait;
use mediapeer_edge::protocol::{
    CatalogAckMessage, EdgeFrame, EdgeKind, EdgePayload, IceCandidateMessage, PeerPayload,
    RemapAckMessage, RemapStatus, SessionDescriptionMessage,
};
use mediapeer_edge::{Dispatcher, EdgeError, EdgeHandler, EdgeResult};
use mediapeer_types::{CorrelationId, SessionId};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::timeout;

/// Records the frames it sees; optionally replies with a fixed payload.
struct RecordingHandler {
    seen: Mutex<Vec<EdgeFrame>>,
    reply: Option<PeerPayload>,
}

impl RecordingHandler {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            seen: Mutex::new(Vec::new()),
            reply: None,
        })
    }

    fn replying(reply: PeerPayload) -> Arc<Self> {
        Arc::new(Self {
            seen: Mutex::new(Vec::new()),
            reply: Some(reply),
        })
    }

    fn seen_count(&self) -> usize {
        self.seen.lock().unwrap().len()
    }
}

#[async_trait]
impl EdgeHandler for RecordingHandler {
    async fn handle(&self, frame: EdgeFrame) -> EdgeResult<Option<PeerPayload>> {
        self.seen.lock().unwrap().push(frame);
        Ok(self.reply.clone())
    }
}

fn candidate_frame(session_id: SessionId, candidate: &str) -> EdgeFrame {
    EdgeFrame {
        correlation_id: CorrelationId::new(),
        payload: EdgePayload::IceCandidate(IceCandidateMessage {
            session_id,
            candidate: candidate.to_string(),
            mid: None,
        }),
    }
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

// ── Outbound queue ──────────────────────────────────────────────

#[tokio::test]
async fn send_queues_frame_with_fresh_correlation_id() {
    let dispatcher = Dispatcher::new(8);
    let id = dispatcher.send(PeerPayload::Heartbeat(1)).unwrap();

    let frame = dispatcher.next_outbound().await.unwrap();
    assert_eq!(frame.correlation_id, id);
    assert!(matches!(frame.payload, PeerPayload::Heartbeat(1)));
}

#[tokio::test]
async fn full_outbound_queue_fails_fast() {
    let dispatcher = Dispatcher::new(1);
    dispatcher.send(PeerPayload::Heartbeat(1)).unwrap();

    let err = dispatcher.send(PeerPayload::Heartbeat(2)).unwrap_err();
    assert!(matches!(err, EdgeError::CapacityExceeded));

    // Draining frees capacity again.
    dispatcher.next_outbound().await.unwrap();
    dispatcher.send(PeerPayload::Heartbeat(3)).unwrap();
}

// ── Registration ────────────────────────────────────────────────

#[tokio::test]
async fn duplicate_handler_registration_is_rejected() {
    let dispatcher = Dispatcher::new(8);
    dispatcher
        .register_handler(EdgeKind::CatalogAck, RecordingHandler::new())
        .unwrap();

    let err = dispatcher
        .register_handler(EdgeKind::CatalogAck, RecordingHandler::new())
        .unwrap_err();
    assert!(matches!(err, EdgeError::DuplicateHandler(EdgeKind::CatalogAck)));
}

// ── Request / response ──────────────────────────────────────────

#[tokio::test]
async fn response_resolves_pending_request() {
    let dispatcher = Dispatcher::new(8);

    let requester = Arc::clone(&dispatcher);
    let request = tokio::spawn(async move {
        requester
            .request(PeerPayload::Heartbeat(9), Duration::from_secs(5))
            .await
    });

    let sent = dispatcher.next_outbound().await.unwrap();
    dispatcher.route(EdgeFrame {
        correlation_id: sent.correlation_id,
        payload: EdgePayload::HeartbeatAck(9),
    });

    let result = request.await.unwrap().unwrap();
    assert!(matches!(result, EdgePayload::HeartbeatAck(9)));
    assert_eq!(dispatcher.pending_count(), 0);
}

#[tokio::test]
async fn response_to_pending_request_never_reaches_handlers() {
    let dispatcher = Dispatcher::new(8);
    let handler = RecordingHandler::new();
    dispatcher
        .register_handler(EdgeKind::CatalogAck, Arc::clone(&handler) as Arc<dyn EdgeHandler>)
        .unwrap();

    let requester = Arc::clone(&dispatcher);
    let request = tokio::spawn(async move {
        requester
            .request(PeerPayload::Heartbeat(1), Duration::from_secs(5))
            .await
    });

    let sent = dispatcher.next_outbound().await.unwrap();
    dispatcher.route(EdgeFrame {
        correlation_id: sent.correlation_id,
        payload: EdgePayload::CatalogAck(CatalogAckMessage { assignments: vec![] }),
    });

    assert!(request.await.unwrap().is_ok());
    settle().await;
    assert_eq!(handler.seen_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn request_times_out_at_the_deadline() {
    let dispatcher = Dispatcher::new(8);

    let result = dispatcher
        .request(PeerPayload::Heartbeat(1), Duration::from_secs(2))
        .await;

    assert!(matches!(result, Err(EdgeError::Timeout)));
    assert_eq!(dispatcher.pending_count(), 0);
}

#[tokio::test]
async fn connection_loss_fails_outstanding_requests_exactly_once() {
    let dispatcher = Dispatcher::new(8);

    let first = {
        let d = Arc::clone(&dispatcher);
        tokio::spawn(
            async move { d.request(PeerPayload::Heartbeat(1), Duration::from_secs(5)).await },
        )
    };
    let second = {
        let d = Arc::clone(&dispatcher);
        tokio::spawn(
            async move { d.request(PeerPayload::Heartbeat(2), Duration::from_secs(5)).await },
        )
    };

    // Both requests are on the wire.
    let a = dispatcher.next_outbound().await.unwrap();
    let b = dispatcher.next_outbound().await.unwrap();
    settle().await;
    assert_eq!(dispatcher.pending_count(), 2);

    dispatcher.fail_pending();

    assert!(matches!(first.await.unwrap(), Err(EdgeError::ConnectionLost)));
    assert!(matches!(second.await.unwrap(), Err(EdgeError::ConnectionLost)));
    assert_eq!(dispatcher.pending_count(), 0);

    // Late responses after the failure are quietly discarded.
    dispatcher.route(EdgeFrame {
        correlation_id: a.correlation_id,
        payload: EdgePayload::HeartbeatAck(1),
    });
    dispatcher.route(EdgeFrame {
        correlation_id: b.correlation_id,
        payload: EdgePayload::HeartbeatAck(2),
    });
    assert_eq!(dispatcher.pending_count(), 0);
}

// ── Kind routing ────────────────────────────────────────────────

#[tokio::test]
async fn frames_of_one_kind_are_handled_in_arrival_order() {
    let dispatcher = Dispatcher::new(8);
    let handler = RecordingHandler::new();
    dispatcher
        .register_handler(EdgeKind::IceCandidate, Arc::clone(&handler) as Arc<dyn EdgeHandler>)
        .unwrap();

    let session_id = SessionId::new();
    for n in 1..=4 {
        dispatcher.route(candidate_frame(session_id, &format!("candidate-{n}")));
    }

    settle().await;
    let seen = handler.seen.lock().unwrap();
    let order: Vec<String> = seen
        .iter()
        .map(|frame| match &frame.payload {
            EdgePayload::IceCandidate(c) => c.candidate.clone(),
            other => panic!("unexpected payload: {other:?}"),
        })
        .collect();
    assert_eq!(order, ["candidate-1", "candidate-2", "candidate-3", "candidate-4"]);
}

#[tokio::test]
async fn handler_reply_echoes_the_server_correlation_id() {
    let dispatcher = Dispatcher::new(8);
    let handler = RecordingHandler::replying(PeerPayload::RemapAck(RemapAckMessage {
        fingerprint: "abc".to_string(),
        status: RemapStatus::NotFound,
    }));
    dispatcher
        .register_handler(EdgeKind::SdpOffer, handler)
        .unwrap();

    let server_id = CorrelationId::new();
    dispatcher.route(EdgeFrame {
        correlation_id: server_id,
        payload: EdgePayload::SdpOffer(SessionDescriptionMessage {
            session_id: SessionId::new(),
            catalog_id: None,
            sdp: "v=0".to_string(),
        }),
    });

    let reply = timeout(Duration::from_secs(1), dispatcher.next_outbound())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reply.correlation_id, server_id);
    assert!(matches!(reply.payload, PeerPayload::RemapAck(_)));
}

#[tokio::test]
async fn unhandled_kind_is_discarded_without_teardown() {
    let dispatcher = Dispatcher::new(8);

    dispatcher.route(EdgeFrame {
        correlation_id: CorrelationId::new(),
        payload: EdgePayload::CatalogAck(CatalogAckMessage { assignments: vec![] }),
    });

    // Dispatcher still works afterwards.
    dispatcher.send(PeerPayload::Heartbeat(1)).unwrap();
    assert!(dispatcher.next_outbound().await.is_some());
}
