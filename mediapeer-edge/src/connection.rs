//! Edge connection lifecycle: connect, register, heartbeat, reconnect.
//!
//! Exactly one physical link to the edge service exists at a time, owned
//! by the `ConnectionManager`. Each successful connection is an "epoch":
//! the socket is split into a read half feeding `Dispatcher::route` and a
//! write half draining the dispatcher's outbound queue. On any failure
//! the epoch ends, outstanding requests resolve with `ConnectionLost`,
//! and a fresh epoch is attempted after exponential backoff.
//!
//! Every state transition is published on a broadcast channel so other
//! components can observe the lifecycle without coupling to connection
//! internals.

use crate::codec::{EdgeFrameStream, PeerFrameSink};
use crate::dispatcher::Dispatcher;
use crate::error::{EdgeError, EdgeResult};
use crate::protocol::{EdgePayload, PeerFrame, PeerPayload, RegisterMessage};
use mediapeer_types::PeerId;
use rand::Rng;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, timeout, Instant, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

/// Configuration for the edge connection.
#[derive(Debug, Clone)]
pub struct EdgeConfig {
    /// Address of the edge service.
    pub edge_address: String,
    /// TCP connect timeout.
    pub connect_timeout: Duration,
    /// Deadline for the registration handshake.
    pub auth_timeout: Duration,
    /// Base delay between reconnect attempts (doubles per failure).
    pub reconnect_interval: Duration,
    /// Upper bound on the backoff delay.
    pub reconnect_interval_max: Duration,
    /// Consecutive failed attempts before giving up entirely.
    pub max_reconnect_attempts: u32,
    /// Interval between heartbeats while connected.
    pub heartbeat_interval: Duration,
    /// Missed heartbeat intervals before the link is considered degraded.
    pub degraded_after: u32,
    /// Missed heartbeat intervals before the link is torn down.
    pub disconnect_after: u32,
}

impl Default for EdgeConfig {
    fn default() -> Self {
        Self {
            edge_address: "127.0.0.1:50051".to_string(),
            connect_timeout: Duration::from_secs(10),
            auth_timeout: Duration::from_secs(10),
            reconnect_interval: Duration::from_secs(10),
            reconnect_interval_max: Duration::from_secs(60),
            max_reconnect_attempts: 5,
            heartbeat_interval: Duration::from_secs(30),
            degraded_after: 2,
            disconnect_after: 4,
        }
    }
}

/// Lifecycle state of the edge connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection and none being attempted.
    Disconnected,
    /// Transport-level connect in progress.
    Connecting,
    /// Connected; registration handshake in flight.
    Authenticating,
    /// Registered and healthy.
    Connected,
    /// Heartbeats missed past the degraded threshold; link still open.
    Degraded,
    /// Waiting out the backoff delay before the next attempt.
    Reconnecting,
    /// Reconnect attempts exhausted. Terminal until externally restarted.
    Failed,
}

impl ConnectionState {
    /// Whether this state is terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Failed)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Authenticating => "authenticating",
            Self::Connected => "connected",
            Self::Degraded => "degraded",
            Self::Reconnecting => "reconnecting",
            Self::Failed => "failed",
        };
        write!(f, "{name}")
    }
}

/// Lifecycle events published by the connection manager.
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    /// The connection changed state.
    StateChanged {
        from: ConnectionState,
        to: ConnectionState,
    },
    /// Registration acknowledged; the link is live. Consumers use this to
    /// trigger a full catalog announcement and session renegotiation.
    Established,
    /// The link dropped; outstanding requests were failed.
    Lost,
    /// Reconnect attempts exhausted; the connection will not recover on
    /// its own.
    Exhausted,
    /// Orderly shutdown has begun.
    ShuttingDown,
}

/// Why a connection epoch ended.
enum EpochEnd {
    /// Shutdown was requested.
    Shutdown,
    /// The remote closed the stream.
    Closed,
    /// Traffic stayed absent past the disconnect threshold.
    HeartbeatLost,
    /// A stream read or write failed.
    Error(EdgeError),
}

/// Owns the single physical link to the edge service.
pub struct ConnectionManager {
    config: EdgeConfig,
    peer_id: PeerId,
    dispatcher: Arc<Dispatcher>,
    state: Mutex<ConnectionState>,
    events: broadcast::Sender<ConnectionEvent>,
    shutdown_tx: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionManager {
    /// Creates a connection manager. Call `start` to begin connecting.
    pub fn new(config: EdgeConfig, peer_id: PeerId, dispatcher: Arc<Dispatcher>) -> Arc<Self> {
        let (events, _) = broadcast::channel(32);
        let (shutdown_tx, _) = watch::channel(false);
        Arc::new(Self {
            config,
            peer_id,
            dispatcher,
            state: Mutex::new(ConnectionState::Disconnected),
            events,
            shutdown_tx,
            task: Mutex::new(None),
        })
    }

    /// Returns the current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.state.lock().unwrap()
    }

    /// Subscribes to lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.events.subscribe()
    }

    /// Spawns the connection loop. Idempotent; a second call is a no-op.
    pub fn start(self: &Arc<Self>) {
        let mut task = self.task.lock().unwrap();
        if task.is_some() {
            return;
        }
        let manager = Arc::clone(self);
        *task = Some(tokio::spawn(async move { manager.run().await }));
    }

    /// Tears the connection down: cancels timers, fails outstanding
    /// requests with `ConnectionLost`, and leaves the state Disconnected.
    pub async fn shutdown(&self) {
        let _ = self.events.send(ConnectionEvent::ShuttingDown);
        let _ = self.shutdown_tx.send(true);

        let task = self.task.lock().unwrap().take();
        if let Some(task) = task {
            let _ = task.await;
        }

        self.dispatcher.fail_pending();
        self.set_state(ConnectionState::Disconnected);
    }

    fn set_state(&self, to: ConnectionState) {
        let from = {
            let mut state = self.state.lock().unwrap();
            let from = *state;
            if from == to {
                return;
            }
            *state = to;
            from
        };
        debug!(%from, %to, "connection state changed");
        let _ = self.events.send(ConnectionEvent::StateChanged { from, to });
    }

    // ── Connection loop ──────────────────────────────────────────

    async fn run(self: Arc<Self>) {
        let mut shutdown = self.shutdown_tx.subscribe();
        let mut attempts: u32 = 0;

        loop {
            if *shutdown.borrow() {
                break;
            }

            self.set_state(ConnectionState::Connecting);
            match self.connect_and_register().await {
                Ok((reader, sink)) => {
                    attempts = 0;
                    info!(address = %self.config.edge_address, "registered with edge service");
                    self.set_state(ConnectionState::Connected);
                    let _ = self.events.send(ConnectionEvent::Established);

                    let end = self.run_epoch(reader, sink, &mut shutdown).await;

                    // Outstanding requests die with the epoch, exactly once.
                    self.dispatcher.fail_pending();
                    let _ = self.events.send(ConnectionEvent::Lost);

                    match end {
                        EpochEnd::Shutdown => break,
                        EpochEnd::Closed => {
                            info!("edge service closed the stream");
                        }
                        EpochEnd::HeartbeatLost => {
                            warn!("no traffic past disconnect threshold, tearing down");
                        }
                        EpochEnd::Error(e) => {
                            warn!(error = %e, "stream failure");
                        }
                    }
                }
                Err(EdgeError::Auth(reason)) => {
                    // Retried like a transport failure, logged distinctly.
                    warn!(%reason, "registration rejected by edge service");
                }
                Err(e) => {
                    debug!(error = %e, "connection attempt failed");
                }
            }

            if *shutdown.borrow() {
                break;
            }

            attempts += 1;
            if attempts >= self.config.max_reconnect_attempts {
                warn!(
                    attempts,
                    "reconnect attempts exhausted, giving up until restarted"
                );
                self.set_state(ConnectionState::Failed);
                let _ = self.events.send(ConnectionEvent::Exhausted);
                return;
            }

            let delay = self.backoff_delay(attempts);
            debug!(attempt = attempts, ?delay, "waiting before reconnect");
            self.set_state(ConnectionState::Reconnecting);
            tokio::select! {
                _ = sleep(delay) => {}
                _ = shutdown.changed() => break,
            }
        }

        self.set_state(ConnectionState::Disconnected);
    }

    /// Dials the edge service and completes the registration handshake.
    async fn connect_and_register(
        &self,
    ) -> EdgeResult<(EdgeFrameStream<OwnedReadHalf>, PeerFrameSink<OwnedWriteHalf>)> {
        let stream = timeout(
            self.config.connect_timeout,
            TcpStream::connect(&self.config.edge_address),
        )
        .await
        .map_err(|_| EdgeError::Transport("connect timed out".to_string()))?
        .map_err(|e| EdgeError::Transport(format!("connect failed: {e}")))?;

        self.set_state(ConnectionState::Authenticating);

        let (read_half, write_half) = stream.into_split();
        let mut reader = EdgeFrameStream::new(read_half);
        let mut sink = PeerFrameSink::new(write_half);

        let register = PeerFrame::new(PeerPayload::Register(RegisterMessage::new(self.peer_id)));
        sink.send(&register).await?;

        let ack = timeout(self.config.auth_timeout, reader.recv())
            .await
            .map_err(|_| EdgeError::Auth("registration timed out".to_string()))??;

        match ack {
            Some(frame) => match frame.payload {
                EdgePayload::RegisterAck(ack) if ack.accepted => Ok((reader, sink)),
                EdgePayload::RegisterAck(ack) => Err(EdgeError::Auth(
                    ack.reason.unwrap_or_else(|| "rejected".to_string()),
                )),
                other => Err(EdgeError::Auth(format!(
                    "unexpected first frame: {}",
                    other.kind()
                ))),
            },
            None => Err(EdgeError::Transport(
                "stream closed during handshake".to_string(),
            )),
        }
    }

    /// Runs one connection epoch until it ends.
    ///
    /// The read loop and the write loop are independent tasks: reads
    /// demultiplex arriving frames while the writer drains the outbound
    /// queue, and neither blocks the other.
    async fn run_epoch(
        &self,
        mut reader: EdgeFrameStream<OwnedReadHalf>,
        mut sink: PeerFrameSink<OwnedWriteHalf>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> EpochEnd {
        let dispatcher = Arc::clone(&self.dispatcher);
        let mut writer: JoinHandle<EdgeResult<()>> = tokio::spawn(async move {
            while let Some(frame) = dispatcher.next_outbound().await {
                sink.send(&frame).await?;
            }
            Ok(())
        });

        let mut heartbeat = interval(self.config.heartbeat_interval);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_traffic = Instant::now();
        let mut seq: u64 = 0;

        let end = loop {
            tokio::select! {
                _ = shutdown.changed() => break EpochEnd::Shutdown,

                result = &mut writer => {
                    break match result {
                        Ok(Ok(())) => EpochEnd::Closed,
                        Ok(Err(e)) => EpochEnd::Error(e),
                        Err(_) => EpochEnd::Error(EdgeError::ChannelClosed),
                    };
                }

                received = reader.recv() => match received {
                    Ok(Some(frame)) => {
                        last_traffic = Instant::now();
                        if self.state() == ConnectionState::Degraded {
                            info!("traffic resumed, leaving degraded state");
                            self.set_state(ConnectionState::Connected);
                        }
                        if let EdgePayload::HeartbeatAck(n) = frame.payload {
                            trace!(seq = n, "heartbeat acknowledged");
                        } else {
                            self.dispatcher.route(frame);
                        }
                    }
                    Ok(None) => break EpochEnd::Closed,
                    Err(EdgeError::Protocol(msg)) => {
                        // One bad frame is discarded, not a teardown.
                        warn!(%msg, "discarding malformed frame");
                    }
                    Err(e) => break EpochEnd::Error(e),
                },

                _ = heartbeat.tick() => {
                    seq += 1;
                    if let Err(e) = self
                        .dispatcher
                        .enqueue(PeerFrame::new(PeerPayload::Heartbeat(seq)))
                    {
                        warn!(error = %e, "could not enqueue heartbeat");
                    }

                    let silent = last_traffic.elapsed();
                    let interval_ms = self.config.heartbeat_interval.as_millis().max(1);
                    let misses = (silent.as_millis() / interval_ms) as u32;

                    if misses >= self.config.disconnect_after {
                        break EpochEnd::HeartbeatLost;
                    }
                    if misses >= self.config.degraded_after
                        && self.state() == ConnectionState::Connected
                    {
                        warn!(misses, "heartbeats missed, marking connection degraded");
                        self.set_state(ConnectionState::Degraded);
                    }
                }
            }
        };

        writer.abort();
        end
    }

    /// Exponential backoff with jitter, never exceeding the configured
    /// maximum. Jitter pulls the delay downward so the cap stays a hard
    /// bound.
    fn backoff_delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(6);
        let base = self.config.reconnect_interval.saturating_mul(1 << exp);
        let capped = base.min(self.config.reconnect_interval_max);
        capped.mul_f64(rand::thread_rng().gen_range(0.8..1.0))
    }
}
