//! The local media file record and its sync lifecycle.

use crate::{path_fingerprint, CatalogId, ContentHash};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Coarse media classification, inferred from the file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Video,
    Audio,
    Image,
    Unknown,
}

impl MediaKind {
    /// Infers the media kind from a path's extension.
    pub fn from_path(path: &Path) -> Self {
        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "mp4" | "mkv" | "avi" | "mov" | "webm" | "m4v" => Self::Video,
            "mp3" | "flac" | "ogg" | "wav" | "m4a" => Self::Audio,
            "jpg" | "jpeg" | "png" | "gif" | "webp" => Self::Image,
            _ => Self::Unknown,
        }
    }
}

/// Sync lifecycle of a media file record.
///
/// `Unannounced → Announced → Confirmed`, or `Removed` once the file is
/// deleted locally. Local deletion is authoritative for the local view;
/// the server's bookkeeping is eventually consistent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    /// File known locally, not yet announced to the edge service.
    Unannounced,
    /// Announcement sent, catalog id not yet assigned.
    Announced,
    /// Catalog id received from the edge service.
    Confirmed,
    /// File deleted locally; removal propagated.
    Removed,
}

/// A media file on the local filesystem, as tracked by the catalog layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaFile {
    /// Absolute path to the file.
    pub path: PathBuf,
    /// Stable fingerprint of the path, used to correlate catalog acks.
    pub fingerprint: String,
    /// File size in bytes.
    pub size_bytes: u64,
    /// Last modification time.
    pub modified_at: DateTime<Utc>,
    /// Algorithm-tagged content hashes.
    pub hashes: Vec<ContentHash>,
    /// Server-assigned catalog id, once confirmed. Written exclusively by
    /// the catalog synchronizer.
    pub catalog_id: Option<CatalogId>,
    /// Position in the sync lifecycle.
    pub status: SyncStatus,
    /// Coarse media classification.
    pub kind: MediaKind,
    /// Number of streaming sessions created for this file.
    pub view_count: u64,
}

impl MediaFile {
    /// Creates a new, unannounced record for a scanned file.
    pub fn new(
        path: impl Into<PathBuf>,
        size_bytes: u64,
        modified_at: DateTime<Utc>,
        hashes: Vec<ContentHash>,
    ) -> Self {
        let path = path.into();
        let fingerprint = path_fingerprint(&path);
        let kind = MediaKind::from_path(&path);
        Self {
            path,
            fingerprint,
            size_bytes,
            modified_at,
            hashes,
            catalog_id: None,
            status: SyncStatus::Unannounced,
            kind,
            view_count: 0,
        }
    }

    /// Returns true once a catalog id has been assigned and confirmed.
    pub fn is_confirmed(&self) -> bool {
        self.status == SyncStatus::Confirmed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_record_is_unannounced() {
        let file = MediaFile::new("/media/movie.mkv", 1024, Utc::now(), vec![]);
        assert_eq!(file.status, SyncStatus::Unannounced);
        assert_eq!(file.kind, MediaKind::Video);
        assert!(file.catalog_id.is_none());
        assert!(!file.fingerprint.is_empty());
    }

    #[test]
    fn kind_inference() {
        assert_eq!(MediaKind::from_path(Path::new("a.FLAC")), MediaKind::Audio);
        assert_eq!(MediaKind::from_path(Path::new("a.png")), MediaKind::Image);
        assert_eq!(MediaKind::from_path(Path::new("a.bin")), MediaKind::Unknown);
    }
}
