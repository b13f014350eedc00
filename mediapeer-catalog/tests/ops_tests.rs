//! Tests for ops.rs: server-initiated file operations against real
//! files in a temp directory.

use async_trait::async_trait;
use chrono::Utc;
use mediapeer_catalog::{
    CatalogError, CatalogResult, FileHasher, FileOpsHandler, MediaStore, ScreenshotExecutor,
    ScreenshotHandler, Sha256Hasher, SqliteMediaStore,
};
use mediapeer_edge::protocol::{
    EdgeFrame, EdgePayload, FileDeleteRequestMessage, FileHashRequestMessage, PeerPayload,
    ScreenshotImage, ScreenshotRequestMessage,
};
use mediapeer_edge::EdgeHandler;
use mediapeer_types::{CatalogId, ContentHash, HashAlgo, MediaFile, SyncStatus};
use mediapeer_types::CorrelationId;
use std::path::{Path, PathBuf};
use std::sync::Arc;

fn edge_frame(payload: EdgePayload) -> EdgeFrame {
    EdgeFrame {
        correlation_id: CorrelationId::new(),
        payload,
    }
}

/// Writes a file and registers a confirmed record for it.
fn seed_file(
    store: &dyn MediaStore,
    dir: &Path,
    name: &str,
    contents: &[u8],
) -> (PathBuf, CatalogId) {
    let path = dir.join(name);
    std::fs::write(&path, contents).unwrap();

    let mut file = MediaFile::new(path.clone(), contents.len() as u64, Utc::now(), vec![]);
    let catalog_id = CatalogId::new();
    file.catalog_id = Some(catalog_id);
    file.status = SyncStatus::Confirmed;
    store.upsert(&file).unwrap();
    (path, catalog_id)
}

// ── File deletion ───────────────────────────────────────────────

#[tokio::test]
async fn delete_request_removes_file_and_marks_record() {
    let dir = tempfile::tempdir().unwrap();
    let store: Arc<dyn MediaStore> = Arc::new(SqliteMediaStore::open_in_memory().unwrap());
    let (path, catalog_id) = seed_file(store.as_ref(), dir.path(), "gone.mkv", b"bytes");

    let handler = FileOpsHandler::new(Arc::clone(&store), Arc::new(Sha256Hasher));
    let reply = handler
        .handle(edge_frame(EdgePayload::FileDeleteRequest(
            FileDeleteRequestMessage {
                catalog_ids: vec![catalog_id],
            },
        )))
        .await
        .unwrap();

    let Some(PeerPayload::FileDeleteResult(result)) = reply else {
        panic!("expected a delete result");
    };
    assert_eq!(result.outcomes.len(), 1);
    assert!(result.outcomes[0].success);
    assert!(!path.exists());

    let record = store.get(&path).unwrap().unwrap();
    assert_eq!(record.status, SyncStatus::Removed);
}

#[tokio::test]
async fn delete_reports_per_id_outcomes() {
    let dir = tempfile::tempdir().unwrap();
    let store: Arc<dyn MediaStore> = Arc::new(SqliteMediaStore::open_in_memory().unwrap());
    let (_path, known) = seed_file(store.as_ref(), dir.path(), "known.mkv", b"bytes");
    let unknown = CatalogId::new();

    let handler = FileOpsHandler::new(Arc::clone(&store), Arc::new(Sha256Hasher));
    let reply = handler
        .handle(edge_frame(EdgePayload::FileDeleteRequest(
            FileDeleteRequestMessage {
                catalog_ids: vec![known, unknown],
            },
        )))
        .await
        .unwrap();

    let Some(PeerPayload::FileDeleteResult(result)) = reply else {
        panic!("expected a delete result");
    };
    assert!(result.outcomes[0].success);
    assert!(!result.outcomes[1].success);
    assert!(result.outcomes[1].error.is_some());
}

#[tokio::test]
async fn deleting_an_already_missing_file_still_succeeds() {
    let dir = tempfile::tempdir().unwrap();
    let store: Arc<dyn MediaStore> = Arc::new(SqliteMediaStore::open_in_memory().unwrap());
    let (path, catalog_id) = seed_file(store.as_ref(), dir.path(), "gone.mkv", b"bytes");
    std::fs::remove_file(&path).unwrap();

    let handler = FileOpsHandler::new(Arc::clone(&store), Arc::new(Sha256Hasher));
    let reply = handler
        .handle(edge_frame(EdgePayload::FileDeleteRequest(
            FileDeleteRequestMessage {
                catalog_ids: vec![catalog_id],
            },
        )))
        .await
        .unwrap();

    let Some(PeerPayload::FileDeleteResult(result)) = reply else {
        panic!("expected a delete result");
    };
    assert!(result.outcomes[0].success);
}

// ── Hashing ─────────────────────────────────────────────────────

#[tokio::test]
async fn hash_request_computes_and_persists_sha256() {
    let dir = tempfile::tempdir().unwrap();
    let store: Arc<dyn MediaStore> = Arc::new(SqliteMediaStore::open_in_memory().unwrap());
    let (path, catalog_id) = seed_file(store.as_ref(), dir.path(), "abc.mkv", b"abc");

    let handler = FileOpsHandler::new(Arc::clone(&store), Arc::new(Sha256Hasher));
    let reply = handler
        .handle(edge_frame(EdgePayload::FileHashRequest(
            FileHashRequestMessage {
                catalog_id,
                algos: vec![HashAlgo::Sha256],
            },
        )))
        .await
        .unwrap();

    let Some(PeerPayload::FileHashResult(result)) = reply else {
        panic!("expected a hash result");
    };
    assert!(result.success);
    assert_eq!(result.hashes.len(), 1);
    // SHA-256 of "abc".
    assert_eq!(
        result.hashes[0].value,
        "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
    );

    // The computed hash lands back in the store.
    let record = store.get(&path).unwrap().unwrap();
    assert_eq!(record.hashes, result.hashes);
}

#[tokio::test]
async fn hash_request_reuses_stored_hashes() {
    let dir = tempfile::tempdir().unwrap();
    let store: Arc<dyn MediaStore> = Arc::new(SqliteMediaStore::open_in_memory().unwrap());
    let (path, catalog_id) = seed_file(store.as_ref(), dir.path(), "abc.mkv", b"abc");

    let mut record = store.get(&path).unwrap().unwrap();
    record.hashes = vec![ContentHash::new(HashAlgo::Sha256, "precomputed")];
    store.upsert(&record).unwrap();

    struct PanickingHasher;
    #[async_trait]
    impl FileHasher for PanickingHasher {
        async fn hash_file(&self, _path: &Path, _algo: HashAlgo) -> CatalogResult<ContentHash> {
            panic!("stored hash should have been reused");
        }
    }

    let handler = FileOpsHandler::new(Arc::clone(&store), Arc::new(PanickingHasher));
    let reply = handler
        .handle(edge_frame(EdgePayload::FileHashRequest(
            FileHashRequestMessage {
                catalog_id,
                algos: vec![HashAlgo::Sha256],
            },
        )))
        .await
        .unwrap();

    let Some(PeerPayload::FileHashResult(result)) = reply else {
        panic!("expected a hash result");
    };
    assert!(result.success);
    assert_eq!(result.hashes[0].value, "precomputed");
}

#[tokio::test]
async fn unsupported_algo_is_reported_not_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let store: Arc<dyn MediaStore> = Arc::new(SqliteMediaStore::open_in_memory().unwrap());
    let (_path, catalog_id) = seed_file(store.as_ref(), dir.path(), "abc.mkv", b"abc");

    let handler = FileOpsHandler::new(Arc::clone(&store), Arc::new(Sha256Hasher));
    let reply = handler
        .handle(edge_frame(EdgePayload::FileHashRequest(
            FileHashRequestMessage {
                catalog_id,
                algos: vec![HashAlgo::Md5, HashAlgo::Sha256],
            },
        )))
        .await
        .unwrap();

    let Some(PeerPayload::FileHashResult(result)) = reply else {
        panic!("expected a hash result");
    };
    // The supported algorithm still produced a hash.
    assert!(!result.success);
    assert!(result.error.is_some());
    assert_eq!(result.hashes.len(), 1);
    assert_eq!(result.hashes[0].algo, HashAlgo::Sha256);
}

// ── Screenshots ─────────────────────────────────────────────────

struct OnePixelExecutor;

#[async_trait]
impl ScreenshotExecutor for OnePixelExecutor {
    async fn capture(
        &self,
        _path: &Path,
        timestamps_secs: &[f64],
    ) -> CatalogResult<Vec<ScreenshotImage>> {
        Ok(timestamps_secs
            .iter()
            .map(|&t| ScreenshotImage {
                timestamp_secs: t,
                format: "jpeg".to_string(),
                data: vec![0xff],
            })
            .collect())
    }
}

struct FailingExecutor;

#[async_trait]
impl ScreenshotExecutor for FailingExecutor {
    async fn capture(
        &self,
        _path: &Path,
        _timestamps_secs: &[f64],
    ) -> CatalogResult<Vec<ScreenshotImage>> {
        Err(CatalogError::Storage("codec unavailable".to_string()))
    }
}

#[tokio::test]
async fn screenshot_request_returns_one_image_per_timestamp() {
    let dir = tempfile::tempdir().unwrap();
    let store: Arc<dyn MediaStore> = Arc::new(SqliteMediaStore::open_in_memory().unwrap());
    let (_path, catalog_id) = seed_file(store.as_ref(), dir.path(), "movie.mkv", b"bytes");

    let handler = ScreenshotHandler::new(Arc::clone(&store), Arc::new(OnePixelExecutor));
    let reply = handler
        .handle(edge_frame(EdgePayload::ScreenshotRequest(
            ScreenshotRequestMessage {
                catalog_id,
                timestamps_secs: vec![1.0, 60.0, 3600.0],
            },
        )))
        .await
        .unwrap();

    let Some(PeerPayload::ScreenshotResult(result)) = reply else {
        panic!("expected a screenshot result");
    };
    assert!(result.success);
    assert_eq!(result.images.len(), 3);
    assert_eq!(result.images[1].timestamp_secs, 60.0);
}

#[tokio::test]
async fn screenshot_failures_are_reported_in_the_result() {
    let dir = tempfile::tempdir().unwrap();
    let store: Arc<dyn MediaStore> = Arc::new(SqliteMediaStore::open_in_memory().unwrap());
    let (_path, catalog_id) = seed_file(store.as_ref(), dir.path(), "movie.mkv", b"bytes");

    let handler = ScreenshotHandler::new(Arc::clone(&store), Arc::new(FailingExecutor));
    let reply = handler
        .handle(edge_frame(EdgePayload::ScreenshotRequest(
            ScreenshotRequestMessage {
                catalog_id,
                timestamps_secs: vec![1.0],
            },
        )))
        .await
        .unwrap();

    let Some(PeerPayload::ScreenshotResult(result)) = reply else {
        panic!("expected a screenshot result");
    };
    assert!(!result.success);
    assert!(result.error.unwrap().contains("codec unavailable"));
}

#[tokio::test]
async fn screenshot_for_unknown_catalog_id_reports_failure() {
    let store: Arc<dyn MediaStore> = Arc::new(SqliteMediaStore::open_in_memory().unwrap());

    let handler = ScreenshotHandler::new(Arc::clone(&store), Arc::new(OnePixelExecutor));
    let reply = handler
        .handle(edge_frame(EdgePayload::ScreenshotRequest(
            ScreenshotRequestMessage {
                catalog_id: CatalogId::new(),
                timestamps_secs: vec![1.0],
            },
        )))
        .await
        .unwrap();

    let Some(PeerPayload::ScreenshotResult(result)) = reply else {
        panic!("expected a screenshot result");
    };
    assert!(!result.success);
}
