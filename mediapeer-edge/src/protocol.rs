//! Wire protocol messages exchanged with the edge service.
//!
//! Every frame is an envelope carrying a correlation id and a tagged
//! payload. The edge service answers a peer request by echoing the
//! request's correlation id; server-initiated requests carry a fresh id
//! that the peer echoes back in its result frame. Responses and
//! independently-initiated requests are mutually exclusive framings.

use mediapeer_types::{CatalogId, ContentHash, CorrelationId, HashAlgo, PeerId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Protocol version for compatibility checking during registration.
pub const PROTOCOL_VERSION: u32 = 1;

/// Maximum number of catalog entries in a single announcement frame.
pub const MAX_ANNOUNCE_BATCH: usize = 200;

// ── Envelopes ────────────────────────────────────────────────────

/// A frame received from the edge service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeFrame {
    /// Correlation id; echoes a peer request id for responses.
    pub correlation_id: CorrelationId,
    /// The message payload.
    pub payload: EdgePayload,
}

/// A frame sent to the edge service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerFrame {
    /// Correlation id; echoes a server request id for results.
    pub correlation_id: CorrelationId,
    /// The message payload.
    pub payload: PeerPayload,
}

impl PeerFrame {
    /// Wraps a payload in a frame with a fresh correlation id.
    pub fn new(payload: PeerPayload) -> Self {
        Self {
            correlation_id: CorrelationId::new(),
            payload,
        }
    }

    /// Wraps a payload echoing an existing correlation id.
    pub fn reply(correlation_id: CorrelationId, payload: PeerPayload) -> Self {
        Self {
            correlation_id,
            payload,
        }
    }
}

// ── Inbound payloads (edge service → peer) ───────────────────────

/// A message payload from the edge service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EdgePayload {
    /// Response to a Register message.
    RegisterAck(RegisterAckMessage),

    /// Catalog id assignments for previously announced files.
    CatalogAck(CatalogAckMessage),

    /// Request to delete local files by catalog id.
    FileDeleteRequest(FileDeleteRequestMessage),

    /// Request to compute content hashes for a file.
    FileHashRequest(FileHashRequestMessage),

    /// Request to re-tag a path with a different catalog id
    /// (e.g. post-deduplication).
    FileRemapRequest(FileRemapRequestMessage),

    /// Request to capture screenshots of a media file.
    ScreenshotRequest(ScreenshotRequestMessage),

    /// Session description offered by the remote side.
    SdpOffer(SessionDescriptionMessage),

    /// Session description answering our offer.
    SdpAnswer(SessionDescriptionMessage),

    /// Connectivity candidate for an active negotiation.
    IceCandidate(IceCandidateMessage),

    /// Response to a heartbeat.
    HeartbeatAck(u64),
}

impl EdgePayload {
    /// Returns the kind tag used for handler routing.
    pub fn kind(&self) -> EdgeKind {
        match self {
            Self::RegisterAck(_) => EdgeKind::RegisterAck,
            Self::CatalogAck(_) => EdgeKind::CatalogAck,
            Self::FileDeleteRequest(_) => EdgeKind::FileDelete,
            Self::FileHashRequest(_) => EdgeKind::FileHash,
            Self::FileRemapRequest(_) => EdgeKind::FileRemap,
            Self::ScreenshotRequest(_) => EdgeKind::Screenshot,
            Self::SdpOffer(_) => EdgeKind::SdpOffer,
            Self::SdpAnswer(_) => EdgeKind::SdpAnswer,
            Self::IceCandidate(_) => EdgeKind::IceCandidate,
            Self::HeartbeatAck(_) => EdgeKind::HeartbeatAck,
        }
    }
}

/// Message-kind tag for handler registration and routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EdgeKind {
    RegisterAck,
    CatalogAck,
    FileDelete,
    FileHash,
    FileRemap,
    Screenshot,
    SdpOffer,
    SdpAnswer,
    IceCandidate,
    HeartbeatAck,
}

impl fmt::Display for EdgeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::RegisterAck => "register_ack",
            Self::CatalogAck => "catalog_ack",
            Self::FileDelete => "file_delete",
            Self::FileHash => "file_hash",
            Self::FileRemap => "file_remap",
            Self::Screenshot => "screenshot",
            Self::SdpOffer => "sdp_offer",
            Self::SdpAnswer => "sdp_answer",
            Self::IceCandidate => "ice_candidate",
            Self::HeartbeatAck => "heartbeat_ack",
        };
        write!(f, "{name}")
    }
}

// ── Outbound payloads (peer → edge service) ──────────────────────

/// A message payload sent by the peer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PeerPayload {
    /// Registration handshake carrying the peer identity.
    Register(RegisterMessage),

    /// Catalog announcement, bulk or incremental.
    CatalogAnnounce(CatalogAnnounceMessage),

    /// Notice that a file was removed locally.
    FileRemoval(FileRemovalMessage),

    /// Results of a file delete request.
    FileDeleteResult(FileDeleteResultMessage),

    /// Result of a file hash request.
    FileHashResult(FileHashResultMessage),

    /// Acknowledgment of a remap request.
    RemapAck(RemapAckMessage),

    /// Result of a screenshot request.
    ScreenshotResult(ScreenshotResultMessage),

    /// Session description offered by this peer.
    SdpOffer(SessionDescriptionMessage),

    /// Session description answering a remote offer.
    SdpAnswer(SessionDescriptionMessage),

    /// Connectivity candidate for an active negotiation.
    IceCandidate(IceCandidateMessage),

    /// Liveness heartbeat.
    Heartbeat(u64),
}

// ── Registration ─────────────────────────────────────────────────

/// Registration handshake sent as the first frame on every connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterMessage {
    /// Protocol version.
    pub version: u32,
    /// This node's persistent peer identity.
    pub peer_id: PeerId,
}

impl RegisterMessage {
    /// Creates a registration message for this peer.
    pub fn new(peer_id: PeerId) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            peer_id,
        }
    }
}

/// Response to a Register message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterAckMessage {
    /// Protocol version.
    pub version: u32,
    /// Whether the registration was accepted.
    pub accepted: bool,
    /// Reason if not accepted.
    pub reason: Option<String>,
}

// ── Catalog ──────────────────────────────────────────────────────

/// One announced file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnounceEntry {
    /// Stable fingerprint of the local path.
    pub fingerprint: String,
    /// File size in bytes.
    pub size_bytes: u64,
    /// Algorithm-tagged content hashes.
    pub hashes: Vec<ContentHash>,
}

/// Catalog announcement for one or more local files.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogAnnounceMessage {
    /// Announced files.
    pub entries: Vec<AnnounceEntry>,
    /// True for the full resynchronization sent after (re)connecting.
    pub bulk: bool,
}

/// A single fingerprint → catalog id assignment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogAssignment {
    /// The fingerprint from the announcement.
    pub fingerprint: String,
    /// The catalog id assigned by the edge service.
    pub catalog_id: CatalogId,
}

/// Catalog id assignments for previously announced files.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogAckMessage {
    /// Assignments, keyed by path fingerprint.
    pub assignments: Vec<CatalogAssignment>,
}

/// Notice that a file no longer exists locally.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRemovalMessage {
    /// Fingerprint of the removed path.
    pub fingerprint: String,
}

// ── File operations ──────────────────────────────────────────────

/// Request to delete local files.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileDeleteRequestMessage {
    /// Catalog ids of the files to delete.
    pub catalog_ids: Vec<CatalogId>,
}

/// Outcome for one deleted file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileDeleteOutcome {
    pub catalog_id: CatalogId,
    pub success: bool,
    pub error: Option<String>,
}

/// Results of a file delete request, one outcome per catalog id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileDeleteResultMessage {
    pub outcomes: Vec<FileDeleteOutcome>,
}

/// Request to compute content hashes for a file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileHashRequestMessage {
    /// Catalog id of the file.
    pub catalog_id: CatalogId,
    /// Requested hash algorithms.
    pub algos: Vec<HashAlgo>,
}

/// Result of a file hash request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileHashResultMessage {
    pub catalog_id: CatalogId,
    /// Computed hashes; may be a subset if some algorithms failed.
    pub hashes: Vec<ContentHash>,
    pub success: bool,
    pub error: Option<String>,
}

/// Request to re-tag a path with a different catalog id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRemapRequestMessage {
    /// Fingerprint of the path to re-tag.
    pub fingerprint: String,
    /// The catalog id to assign.
    pub catalog_id: CatalogId,
}

/// Whether a remap target was found locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemapStatus {
    /// The record was updated.
    Found,
    /// The path no longer exists locally; the edge service should
    /// retract the mapping.
    NotFound,
}

/// Acknowledgment of a remap request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemapAckMessage {
    pub fingerprint: String,
    pub status: RemapStatus,
}

// ── Screenshots ──────────────────────────────────────────────────

/// Request to capture screenshots of a media file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScreenshotRequestMessage {
    /// Catalog id of the file.
    pub catalog_id: CatalogId,
    /// Capture positions, in seconds from the start of the media.
    pub timestamps_secs: Vec<f64>,
}

/// One captured screenshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScreenshotImage {
    /// Capture position in seconds.
    pub timestamp_secs: f64,
    /// Image format (e.g. "jpeg").
    pub format: String,
    /// Encoded image bytes.
    pub data: Vec<u8>,
}

/// Result of a screenshot request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScreenshotResultMessage {
    pub catalog_id: CatalogId,
    pub images: Vec<ScreenshotImage>,
    pub success: bool,
    pub error: Option<String>,
}

// ── Streaming signaling ──────────────────────────────────────────

use mediapeer_types::SessionId;

/// A session description (SDP) for a streaming session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionDescriptionMessage {
    /// The session this description belongs to.
    pub session_id: SessionId,
    /// Catalog id of the media to stream; set on offers that open a
    /// session, absent on answers.
    pub catalog_id: Option<CatalogId>,
    /// The SDP text.
    pub sdp: String,
}

/// A connectivity (ICE) candidate for a streaming session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IceCandidateMessage {
    /// The session this candidate belongs to.
    pub session_id: SessionId,
    /// The candidate line.
    pub candidate: String,
    /// Media stream identification tag.
    pub mid: Option<String>,
}
