//! Catalog layer for the mediapeer node.
//!
//! Reconciles the local media inventory against the catalog kept by the
//! edge service:
//!
//! - **Store**: SQLite-backed records of every known media file
//! - **Scanner contract**: discrete file events emitted by the (external)
//!   filesystem scanner
//! - **Sync**: turns inventory deltas into announcements and removal
//!   notices, and applies server-assigned catalog ids back onto local
//!   records
//! - **Ops**: handlers for server-initiated file operations (delete,
//!   hash, remap, screenshot)
//!
//! The synchronizer never walks the filesystem itself; it only reacts to
//! scanner events and connection lifecycle events.

mod error;
pub mod ops;
pub mod scanner;
pub mod store;
pub mod sync;

pub use error::{CatalogError, CatalogResult};
pub use ops::{FileHasher, FileOpsHandler, ScreenshotExecutor, ScreenshotHandler, Sha256Hasher};
pub use scanner::ScanEvent;
pub use store::{MediaStore, SqliteMediaStore};
pub use sync::{CatalogAckHandler, CatalogSync, RemapHandler};
