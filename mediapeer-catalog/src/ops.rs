//! Handlers for server-initiated file operations.
//!
//! Each request is executed against the local store and filesystem and
//! answered with a typed result frame; failures are reported per item,
//! never propagated into the dispatch loops.

use crate::error::{CatalogError, CatalogResult};
use crate::store::MediaStore;
use async_trait::async_trait;
use mediapeer_edge::protocol::{
    EdgeFrame, EdgePayload, FileDeleteOutcome, FileDeleteResultMessage, FileHashResultMessage,
    PeerPayload, ScreenshotImage, ScreenshotResultMessage,
};
use mediapeer_edge::{EdgeHandler, EdgeResult};
use mediapeer_types::{ContentHash, HashAlgo, SyncStatus};
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// Computes content hashes for local files on request.
#[async_trait]
pub trait FileHasher: Send + Sync {
    async fn hash_file(&self, path: &Path, algo: HashAlgo) -> CatalogResult<ContentHash>;
}

/// Captures screenshots of a media file. The capture and encoding
/// routine itself is an external collaborator.
#[async_trait]
pub trait ScreenshotExecutor: Send + Sync {
    async fn capture(
        &self,
        path: &Path,
        timestamps_secs: &[f64],
    ) -> CatalogResult<Vec<ScreenshotImage>>;
}

/// SHA-256 file hasher; other algorithms are reported as unsupported.
pub struct Sha256Hasher;

#[async_trait]
impl FileHasher for Sha256Hasher {
    async fn hash_file(&self, path: &Path, algo: HashAlgo) -> CatalogResult<ContentHash> {
        if algo != HashAlgo::Sha256 {
            return Err(CatalogError::UnsupportedAlgo(algo));
        }
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || {
            let bytes = std::fs::read(&path)?;
            let mut hasher = Sha256::new();
            hasher.update(&bytes);
            Ok(ContentHash::new(HashAlgo::Sha256, hex::encode(hasher.finalize())))
        })
        .await
        .map_err(|e| CatalogError::Storage(format!("hash task failed: {e}")))?
    }
}

/// Handles file delete and file hash requests.
pub struct FileOpsHandler {
    store: Arc<dyn MediaStore>,
    hasher: Arc<dyn FileHasher>,
}

impl FileOpsHandler {
    pub fn new(store: Arc<dyn MediaStore>, hasher: Arc<dyn FileHasher>) -> Arc<Self> {
        Arc::new(Self { store, hasher })
    }

    async fn delete_one(&self, catalog_id: mediapeer_types::CatalogId) -> FileDeleteOutcome {
        let file = match self.store.get_by_catalog_id(catalog_id) {
            Ok(Some(file)) => file,
            Ok(None) => {
                return FileDeleteOutcome {
                    catalog_id,
                    success: false,
                    error: Some("unknown catalog id".to_string()),
                }
            }
            Err(e) => {
                return FileDeleteOutcome {
                    catalog_id,
                    success: false,
                    error: Some(e.to_string()),
                }
            }
        };

        if let Err(e) = tokio::fs::remove_file(&file.path).await {
            // Already-gone files still count as deleted.
            if e.kind() != std::io::ErrorKind::NotFound {
                return FileDeleteOutcome {
                    catalog_id,
                    success: false,
                    error: Some(format!("delete failed: {e}")),
                };
            }
        }

        let mut file = file;
        file.status = SyncStatus::Removed;
        if let Err(e) = self.store.upsert(&file) {
            return FileDeleteOutcome {
                catalog_id,
                success: false,
                error: Some(e.to_string()),
            };
        }

        info!(%catalog_id, path = %file.path.display(), "file deleted on request");
        FileDeleteOutcome {
            catalog_id,
            success: true,
            error: None,
        }
    }

    async fn hash_one(
        &self,
        catalog_id: mediapeer_types::CatalogId,
        algos: &[HashAlgo],
    ) -> FileHashResultMessage {
        let file = match self.store.get_by_catalog_id(catalog_id) {
            Ok(Some(file)) => file,
            Ok(None) => {
                return FileHashResultMessage {
                    catalog_id,
                    hashes: Vec::new(),
                    success: false,
                    error: Some("unknown catalog id".to_string()),
                }
            }
            Err(e) => {
                return FileHashResultMessage {
                    catalog_id,
                    hashes: Vec::new(),
                    success: false,
                    error: Some(e.to_string()),
                }
            }
        };

        let mut file = file;
        let mut hashes = Vec::new();
        let mut first_error = None;
        for &algo in algos {
            // Stored hashes are reused; only missing ones are computed.
            if let Some(existing) = file.hashes.iter().find(|h| h.algo == algo) {
                hashes.push(existing.clone());
                continue;
            }
            match self.hasher.hash_file(&file.path, algo).await {
                Ok(hash) => {
                    file.hashes.push(hash.clone());
                    hashes.push(hash);
                }
                Err(e) => {
                    warn!(%catalog_id, %algo, error = %e, "hash computation failed");
                    first_error.get_or_insert_with(|| e.to_string());
                }
            }
        }

        if let Err(e) = self.store.upsert(&file) {
            warn!(%catalog_id, error = %e, "failed to persist computed hashes");
        }

        FileHashResultMessage {
            catalog_id,
            success: first_error.is_none(),
            error: first_error,
            hashes,
        }
    }
}

#[async_trait]
impl EdgeHandler for FileOpsHandler {
    async fn handle(&self, frame: EdgeFrame) -> EdgeResult<Option<PeerPayload>> {
        match frame.payload {
            EdgePayload::FileDeleteRequest(request) => {
                let mut outcomes = Vec::with_capacity(request.catalog_ids.len());
                for catalog_id in request.catalog_ids {
                    outcomes.push(self.delete_one(catalog_id).await);
                }
                Ok(Some(PeerPayload::FileDeleteResult(FileDeleteResultMessage {
                    outcomes,
                })))
            }
            EdgePayload::FileHashRequest(request) => {
                let result = self.hash_one(request.catalog_id, &request.algos).await;
                Ok(Some(PeerPayload::FileHashResult(result)))
            }
            _ => Ok(None),
        }
    }
}

/// Handles screenshot capture requests by delegating to the executor.
pub struct ScreenshotHandler {
    store: Arc<dyn MediaStore>,
    executor: Arc<dyn ScreenshotExecutor>,
}

impl ScreenshotHandler {
    pub fn new(store: Arc<dyn MediaStore>, executor: Arc<dyn ScreenshotExecutor>) -> Arc<Self> {
        Arc::new(Self { store, executor })
    }
}

#[async_trait]
impl EdgeHandler for ScreenshotHandler {
    async fn handle(&self, frame: EdgeFrame) -> EdgeResult<Option<PeerPayload>> {
        let EdgePayload::ScreenshotRequest(request) = frame.payload else {
            return Ok(None);
        };

        let file = match self.store.get_by_catalog_id(request.catalog_id) {
            Ok(Some(file)) => file,
            Ok(None) => {
                return Ok(Some(PeerPayload::ScreenshotResult(ScreenshotResultMessage {
                    catalog_id: request.catalog_id,
                    images: Vec::new(),
                    success: false,
                    error: Some("unknown catalog id".to_string()),
                })))
            }
            Err(e) => {
                return Ok(Some(PeerPayload::ScreenshotResult(ScreenshotResultMessage {
                    catalog_id: request.catalog_id,
                    images: Vec::new(),
                    success: false,
                    error: Some(e.to_string()),
                })))
            }
        };

        let result = match self
            .executor
            .capture(&file.path, &request.timestamps_secs)
            .await
        {
            Ok(images) => ScreenshotResultMessage {
                catalog_id: request.catalog_id,
                images,
                success: true,
                error: None,
            },
            Err(e) => {
                warn!(catalog_id = %request.catalog_id, error = %e, "screenshot capture failed");
                ScreenshotResultMessage {
                    catalog_id: request.catalog_id,
                    images: Vec::new(),
                    success: false,
                    error: Some(e.to_string()),
                }
            }
        };
        Ok(Some(PeerPayload::ScreenshotResult(result)))
    }
}
