//! Persistent peer identity.

use anyhow::{Context, Result};
use mediapeer_types::PeerId;
use std::fs;
use std::path::Path;
use tracing::info;

/// Loads the peer id from `path`, generating and persisting a fresh one
/// on first run.
pub fn load_or_generate(path: &Path) -> Result<PeerId> {
    if path.exists() {
        info!(path = %path.display(), "loading peer identity");
        let raw = fs::read_to_string(path).context("failed to read identity file")?;
        raw.trim()
            .parse()
            .context("identity file does not contain a valid peer id")
    } else {
        info!(path = %path.display(), "generating new peer identity");
        let peer_id = PeerId::new();
        fs::write(path, format!("{peer_id}\n")).context("failed to write identity file")?;
        Ok(peer_id)
    }
}
