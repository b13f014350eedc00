//! Stand-in media collaborators.
//!
//! The real media pipeline lives outside this process and plugs in
//! through the `MediaSource` and `ScreenshotExecutor` traits. Until it
//! is wired in, the daemon runs with these placeholders so signaling
//! and catalog sync stay exercisable end to end.

use async_trait::async_trait;
use mediapeer_catalog::{CatalogError, CatalogResult, ScreenshotExecutor};
use mediapeer_edge::protocol::ScreenshotImage;
use mediapeer_stream::{MediaSource, StreamError, StreamResult};
use mediapeer_types::{CatalogId, SessionId};
use std::path::Path;
use tracing::debug;

/// Produces minimal placeholder session descriptions.
pub struct PlaceholderMediaSource;

#[async_trait]
impl MediaSource for PlaceholderMediaSource {
    async fn create_offer(&self, catalog_id: CatalogId) -> StreamResult<String> {
        Ok(format!(
            "v=0\r\no=- 0 0 IN IP4 127.0.0.1\r\ns=mediapeer {catalog_id}\r\nt=0 0\r\n"
        ))
    }

    async fn create_answer(
        &self,
        _catalog_id: Option<CatalogId>,
        remote_sdp: &str,
    ) -> StreamResult<String> {
        if remote_sdp.trim().is_empty() {
            return Err(StreamError::Media("empty remote description".to_string()));
        }
        Ok("v=0\r\no=- 0 0 IN IP4 127.0.0.1\r\ns=mediapeer answer\r\nt=0 0\r\n".to_string())
    }

    async fn release(&self, session_id: SessionId) {
        debug!(%session_id, "released placeholder media resources");
    }
}

/// Reports screenshot capture as unavailable.
pub struct NoCaptureExecutor;

#[async_trait]
impl ScreenshotExecutor for NoCaptureExecutor {
    async fn capture(
        &self,
        _path: &Path,
        _timestamps_secs: &[f64],
    ) -> CatalogResult<Vec<ScreenshotImage>> {
        Err(CatalogError::Storage(
            "no screenshot capture backend configured".to_string(),
        ))
    }
}
