//! Persistent store for media file records, backed by SQLite.
//!
//! Records are keyed by absolute path with unique fingerprint and
//! catalog-id lookups. No transaction semantics beyond per-record
//! atomicity are offered or assumed.

use crate::error::{CatalogError, CatalogResult};
use chrono::{DateTime, Utc};
use mediapeer_types::{CatalogId, ContentHash, MediaFile, MediaKind, SyncStatus};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Key-by-path access to media file records.
pub trait MediaStore: Send + Sync {
    /// Looks a record up by absolute path.
    fn get(&self, path: &Path) -> CatalogResult<Option<MediaFile>>;

    /// Looks a record up by path fingerprint.
    fn get_by_fingerprint(&self, fingerprint: &str) -> CatalogResult<Option<MediaFile>>;

    /// Looks a record up by assigned catalog id.
    fn get_by_catalog_id(&self, catalog_id: CatalogId) -> CatalogResult<Option<MediaFile>>;

    /// Inserts or replaces a record.
    fn upsert(&self, file: &MediaFile) -> CatalogResult<()>;

    /// Deletes a record.
    fn delete(&self, path: &Path) -> CatalogResult<()>;

    /// Returns all records.
    fn list(&self) -> CatalogResult<Vec<MediaFile>>;

    /// Returns all records that are not yet Confirmed and not Removed.
    fn list_unconfirmed(&self) -> CatalogResult<Vec<MediaFile>>;

    /// Bumps the view count for a confirmed record.
    fn increment_view_count(&self, catalog_id: CatalogId) -> CatalogResult<()>;
}

fn status_to_str(status: SyncStatus) -> &'static str {
    match status {
        SyncStatus::Unannounced => "unannounced",
        SyncStatus::Announced => "announced",
        SyncStatus::Confirmed => "confirmed",
        SyncStatus::Removed => "removed",
    }
}

fn status_from_str(s: &str) -> CatalogResult<SyncStatus> {
    match s {
        "unannounced" => Ok(SyncStatus::Unannounced),
        "announced" => Ok(SyncStatus::Announced),
        "confirmed" => Ok(SyncStatus::Confirmed),
        "removed" => Ok(SyncStatus::Removed),
        other => Err(CatalogError::Storage(format!("bad status column: {other}"))),
    }
}

fn kind_to_str(kind: MediaKind) -> &'static str {
    match kind {
        MediaKind::Video => "video",
        MediaKind::Audio => "audio",
        MediaKind::Image => "image",
        MediaKind::Unknown => "unknown",
    }
}

fn kind_from_str(s: &str) -> MediaKind {
    match s {
        "video" => MediaKind::Video,
        "audio" => MediaKind::Audio,
        "image" => MediaKind::Image,
        _ => MediaKind::Unknown,
    }
}

/// SQLite-backed media store.
pub struct SqliteMediaStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteMediaStore {
    /// Opens (or creates) a store at the given path.
    pub fn open(path: &Path) -> CatalogResult<Self> {
        let conn = Connection::open(path)
            .map_err(|e| CatalogError::Storage(format!("failed to open media store: {e}")))?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Opens an in-memory store (for testing).
    pub fn open_in_memory() -> CatalogResult<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| CatalogError::Storage(format!("failed to open in-memory store: {e}")))?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> CatalogResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS media_files (
                path TEXT PRIMARY KEY,
                fingerprint TEXT NOT NULL UNIQUE,
                size_bytes INTEGER NOT NULL,
                modified_at TEXT NOT NULL,
                hashes TEXT NOT NULL,
                catalog_id TEXT,
                status TEXT NOT NULL,
                kind TEXT NOT NULL,
                view_count INTEGER NOT NULL DEFAULT 0
            );

            CREATE INDEX IF NOT EXISTS idx_media_catalog_id
                ON media_files (catalog_id);
            ",
        )
        .map_err(|e| CatalogError::Storage(format!("failed to init media schema: {e}")))?;
        Ok(())
    }

    fn row_to_file(row: &Row<'_>) -> rusqlite::Result<CatalogResult<MediaFile>> {
        let path: String = row.get(0)?;
        let fingerprint: String = row.get(1)?;
        let size_bytes: i64 = row.get(2)?;
        let modified_at: String = row.get(3)?;
        let hashes_json: String = row.get(4)?;
        let catalog_id: Option<String> = row.get(5)?;
        let status: String = row.get(6)?;
        let kind: String = row.get(7)?;
        let view_count: i64 = row.get(8)?;

        Ok((|| {
            let hashes: Vec<ContentHash> = serde_json::from_str(&hashes_json)?;
            let modified_at = modified_at
                .parse::<DateTime<Utc>>()
                .map_err(|e| CatalogError::Storage(format!("bad mtime column: {e}")))?;
            let catalog_id = catalog_id
                .map(|s| {
                    CatalogId::parse(&s)
                        .map_err(|e| CatalogError::Storage(format!("bad catalog id: {e}")))
                })
                .transpose()?;
            Ok(MediaFile {
                path: PathBuf::from(path),
                fingerprint,
                size_bytes: size_bytes as u64,
                modified_at,
                hashes,
                catalog_id,
                status: status_from_str(&status)?,
                kind: kind_from_str(&kind),
                view_count: view_count as u64,
            })
        })())
    }

    fn query_one(&self, sql: &str, param: &str) -> CatalogResult<Option<MediaFile>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(sql, params![param], Self::row_to_file)
            .optional()
            .map_err(|e| CatalogError::Storage(format!("query failed: {e}")))?
            .transpose()
    }

    fn query_many(&self, sql: &str) -> CatalogResult<Vec<MediaFile>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(sql)
            .map_err(|e| CatalogError::Storage(format!("prepare failed: {e}")))?;
        let rows = stmt
            .query_map([], Self::row_to_file)
            .map_err(|e| CatalogError::Storage(format!("query failed: {e}")))?;

        let mut files = Vec::new();
        for row in rows {
            let file = row.map_err(|e| CatalogError::Storage(format!("row failed: {e}")))??;
            files.push(file);
        }
        Ok(files)
    }
}

const SELECT_COLUMNS: &str = "SELECT path, fingerprint, size_bytes, modified_at, hashes, \
                              catalog_id, status, kind, view_count FROM media_files";

impl MediaStore for SqliteMediaStore {
    fn get(&self, path: &Path) -> CatalogResult<Option<MediaFile>> {
        self.query_one(
            &format!("{SELECT_COLUMNS} WHERE path = ?1"),
            &path.to_string_lossy(),
        )
    }

    fn get_by_fingerprint(&self, fingerprint: &str) -> CatalogResult<Option<MediaFile>> {
        self.query_one(&format!("{SELECT_COLUMNS} WHERE fingerprint = ?1"), fingerprint)
    }

    fn get_by_catalog_id(&self, catalog_id: CatalogId) -> CatalogResult<Option<MediaFile>> {
        self.query_one(
            &format!("{SELECT_COLUMNS} WHERE catalog_id = ?1"),
            &catalog_id.to_string(),
        )
    }

    fn upsert(&self, file: &MediaFile) -> CatalogResult<()> {
        let hashes = serde_json::to_string(&file.hashes)?;
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO media_files
             (path, fingerprint, size_bytes, modified_at, hashes, catalog_id, status, kind, view_count)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                file.path.to_string_lossy(),
                file.fingerprint,
                file.size_bytes as i64,
                file.modified_at.to_rfc3339(),
                hashes,
                file.catalog_id.map(|id| id.to_string()),
                status_to_str(file.status),
                kind_to_str(file.kind),
                file.view_count as i64,
            ],
        )
        .map_err(|e| CatalogError::Storage(format!("upsert failed: {e}")))?;
        Ok(())
    }

    fn delete(&self, path: &Path) -> CatalogResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "DELETE FROM media_files WHERE path = ?1",
            params![path.to_string_lossy()],
        )
        .map_err(|e| CatalogError::Storage(format!("delete failed: {e}")))?;
        Ok(())
    }

    fn list(&self) -> CatalogResult<Vec<MediaFile>> {
        self.query_many(&format!("{SELECT_COLUMNS} ORDER BY path"))
    }

    fn list_unconfirmed(&self) -> CatalogResult<Vec<MediaFile>> {
        self.query_many(&format!(
            "{SELECT_COLUMNS} WHERE status IN ('unannounced', 'announced') ORDER BY path"
        ))
    }

    fn increment_view_count(&self, catalog_id: CatalogId) -> CatalogResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE media_files SET view_count = view_count + 1 WHERE catalog_id = ?1",
            params![catalog_id.to_string()],
        )
        .map_err(|e| CatalogError::Storage(format!("view count update failed: {e}")))?;
        Ok(())
    }
}
