//! Collaborator contract with the filesystem scanner.
//!
//! The scanner enumerates files and computes content hashes; the catalog
//! layer only consumes its events.

use chrono::{DateTime, Utc};
use mediapeer_types::ContentHash;
use std::path::PathBuf;

/// A discrete inventory event reported by the scanner.
#[derive(Debug, Clone)]
pub enum ScanEvent {
    /// A file was seen for the first time.
    FileDiscovered {
        path: PathBuf,
        size_bytes: u64,
        modified_at: DateTime<Utc>,
        hashes: Vec<ContentHash>,
    },
    /// A known file's contents changed.
    FileChanged {
        path: PathBuf,
        size_bytes: u64,
        modified_at: DateTime<Utc>,
        hashes: Vec<ContentHash>,
    },
    /// A known file disappeared.
    FileRemoved { path: PathBuf },
}
