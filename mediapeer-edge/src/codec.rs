//! Length-prefixed JSON framing over any duplex byte stream.
//!
//! Built on tokio-util's `LengthDelimitedCodec` so no manual buffer
//! management is needed. A decode failure on one frame is a protocol
//! error for that frame only; the length prefix keeps the stream in
//! sync, so reading can continue.

use crate::error::{EdgeError, EdgeResult};
use crate::protocol::{EdgeFrame, PeerFrame};
use futures::{SinkExt, StreamExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{FramedRead, FramedWrite, LengthDelimitedCodec};

/// Maximum frame size (16 MB).
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

fn codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .max_frame_length(MAX_FRAME_SIZE)
        .new_codec()
}

/// Framed writer for sending messages over a byte stream.
pub struct FrameSink<W, T> {
    inner: FramedWrite<W, LengthDelimitedCodec>,
    _marker: PhantomData<T>,
}

impl<W: AsyncWrite + Unpin, T: Serialize> FrameSink<W, T> {
    pub fn new(writer: W) -> Self {
        Self {
            inner: FramedWrite::new(writer, codec()),
            _marker: PhantomData,
        }
    }

    /// Sends one length-prefixed frame.
    pub async fn send(&mut self, frame: &T) -> EdgeResult<()> {
        let bytes = serde_json::to_vec(frame)?;
        self.inner
            .send(bytes.into())
            .await
            .map_err(|e| EdgeError::Transport(format!("write failed: {e}")))
    }
}

/// Framed reader for receiving messages from a byte stream.
pub struct FrameStream<R, T> {
    inner: FramedRead<R, LengthDelimitedCodec>,
    _marker: PhantomData<T>,
}

impl<R: AsyncRead + Unpin, T: DeserializeOwned> FrameStream<R, T> {
    pub fn new(reader: R) -> Self {
        Self {
            inner: FramedRead::new(reader, codec()),
            _marker: PhantomData,
        }
    }

    /// Receives the next frame, or `None` once the stream is closed.
    ///
    /// A malformed frame returns `EdgeError::Protocol`; the caller may
    /// keep reading, the framing itself is still intact.
    pub async fn recv(&mut self) -> EdgeResult<Option<T>> {
        match self.inner.next().await {
            Some(Ok(bytes)) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| EdgeError::Protocol(format!("undecodable frame: {e}"))),
            Some(Err(e)) => Err(EdgeError::Transport(format!("read failed: {e}"))),
            None => Ok(None),
        }
    }
}

/// Reader for frames arriving from the edge service.
pub type EdgeFrameStream<R> = FrameStream<R, EdgeFrame>;
/// Writer for frames sent to the edge service.
pub type PeerFrameSink<W> = FrameSink<W, PeerFrame>;

/// Reader for the edge-service side of the protocol (tests and tooling).
pub type PeerFrameStream<R> = FrameStream<R, PeerFrame>;
/// Writer for the edge-service side of the protocol (tests and tooling).
pub type EdgeFrameSink<W> = FrameSink<W, EdgeFrame>;
