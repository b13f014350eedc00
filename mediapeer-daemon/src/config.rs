//! Daemon configuration.
//!
//! Every knob has a default and a `MEDIAPEER_*` environment override;
//! command line flags take precedence over both.

use mediapeer_edge::EdgeConfig;
use mediapeer_stream::StreamConfig;
use mediapeer_types::PeerId;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

/// Full configuration for a peer node.
#[derive(Debug, Clone)]
pub struct PeerConfig {
    /// Address of the edge service.
    pub edge_address: String,
    /// Base delay between reconnect attempts.
    pub reconnect_interval: Duration,
    /// Upper bound on the reconnect backoff.
    pub reconnect_interval_max: Duration,
    /// Consecutive failed attempts before giving up.
    pub max_reconnect_attempts: u32,
    /// Interval between heartbeats while connected.
    pub heartbeat_interval: Duration,
    /// Missed heartbeat intervals before the link is degraded.
    pub degraded_after: u32,
    /// Missed heartbeat intervals before the link is torn down.
    pub disconnect_after: u32,
    /// Deadline for exchanges issued through `Dispatcher::request`. The
    /// built-in message flows are all fire-and-forget or server-initiated;
    /// this knob is the seam for callers that issue requests.
    pub request_timeout: Duration,
    /// Idle window before a half-negotiated session is reaped.
    pub session_idle_timeout: Duration,
    /// Window for renegotiating sessions after a reconnect.
    pub renegotiation_grace: Duration,
    /// Bound on the outbound frame queue.
    pub outbound_queue_capacity: usize,
    /// SQLite database for the media catalog.
    pub db_path: PathBuf,
    /// File holding the persistent peer identity.
    pub identity_path: PathBuf,
    /// Fixed peer id, overriding the identity file.
    pub peer_id: Option<PeerId>,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            edge_address: "127.0.0.1:50051".to_string(),
            reconnect_interval: Duration::from_secs(10),
            reconnect_interval_max: Duration::from_secs(60),
            max_reconnect_attempts: 5,
            heartbeat_interval: Duration::from_secs(30),
            degraded_after: 2,
            disconnect_after: 4,
            request_timeout: Duration::from_secs(5),
            session_idle_timeout: Duration::from_secs(300),
            renegotiation_grace: Duration::from_secs(30),
            outbound_queue_capacity: 64,
            db_path: PathBuf::from("mediapeer.db"),
            identity_path: PathBuf::from("peer-identity"),
            peer_id: None,
        }
    }
}

impl PeerConfig {
    /// Defaults with `MEDIAPEER_*` environment overrides applied.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(addr) = env_var::<String>("MEDIAPEER_EDGE_ADDRESS") {
            config.edge_address = addr;
        }
        if let Some(secs) = env_var("MEDIAPEER_RECONNECT_INTERVAL_SECS") {
            config.reconnect_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = env_var("MEDIAPEER_RECONNECT_INTERVAL_MAX_SECS") {
            config.reconnect_interval_max = Duration::from_secs(secs);
        }
        if let Some(attempts) = env_var("MEDIAPEER_MAX_RECONNECT_ATTEMPTS") {
            config.max_reconnect_attempts = attempts;
        }
        if let Some(secs) = env_var("MEDIAPEER_HEARTBEAT_INTERVAL_SECS") {
            config.heartbeat_interval = Duration::from_secs(secs);
        }
        if let Some(misses) = env_var("MEDIAPEER_DEGRADED_AFTER") {
            config.degraded_after = misses;
        }
        if let Some(misses) = env_var("MEDIAPEER_DISCONNECT_AFTER") {
            config.disconnect_after = misses;
        }
        if let Some(secs) = env_var("MEDIAPEER_REQUEST_TIMEOUT_SECS") {
            config.request_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = env_var("MEDIAPEER_SESSION_IDLE_TIMEOUT_SECS") {
            config.session_idle_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = env_var("MEDIAPEER_RENEGOTIATION_GRACE_SECS") {
            config.renegotiation_grace = Duration::from_secs(secs);
        }
        if let Some(capacity) = env_var("MEDIAPEER_OUTBOUND_QUEUE_CAPACITY") {
            config.outbound_queue_capacity = capacity;
        }
        if let Some(path) = env_var::<String>("MEDIAPEER_DB_PATH") {
            config.db_path = PathBuf::from(path);
        }
        if let Some(path) = env_var::<String>("MEDIAPEER_IDENTITY_PATH") {
            config.identity_path = PathBuf::from(path);
        }
        if let Some(peer_id) = env_var("MEDIAPEER_PEER_ID") {
            config.peer_id = Some(peer_id);
        }
        config
    }

    /// Edge layer view of this configuration.
    pub fn edge_config(&self) -> EdgeConfig {
        EdgeConfig {
            edge_address: self.edge_address.clone(),
            reconnect_interval: self.reconnect_interval,
            reconnect_interval_max: self.reconnect_interval_max,
            max_reconnect_attempts: self.max_reconnect_attempts,
            heartbeat_interval: self.heartbeat_interval,
            degraded_after: self.degraded_after,
            disconnect_after: self.disconnect_after,
            ..EdgeConfig::default()
        }
    }

    /// Streaming layer view of this configuration.
    pub fn stream_config(&self) -> StreamConfig {
        StreamConfig {
            idle_timeout: self.session_idle_timeout,
            renegotiation_grace: self.renegotiation_grace,
            ..StreamConfig::default()
        }
    }
}

/// Reads and parses one environment variable. Unset returns None;
/// unparseable values are logged and ignored.
fn env_var<T: FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(name, value = %raw, "ignoring unparseable environment override");
            None
        }
    }
}
