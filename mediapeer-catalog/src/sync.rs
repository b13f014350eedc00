//! Catalog synchronizer: keeps the local inventory and the server
//! catalog in agreement.
//!
//! Announcements flow out through the dispatcher; catalog acknowledgments
//! and remap requests flow back in through registered handlers. A full
//! resynchronization runs on every connection establishment, since the
//! edge service may have lost in-memory state across a reconnect.

use crate::error::CatalogResult;
use crate::scanner::ScanEvent;
use crate::store::MediaStore;
use async_trait::async_trait;
use mediapeer_edge::protocol::{
    AnnounceEntry, CatalogAckMessage, CatalogAnnounceMessage, EdgeFrame, EdgePayload,
    FileRemapRequestMessage, FileRemovalMessage, PeerPayload, RemapAckMessage, RemapStatus,
    MAX_ANNOUNCE_BATCH,
};
use mediapeer_edge::{ConnectionEvent, Dispatcher, EdgeHandler, EdgeResult};
use mediapeer_types::{MediaFile, SyncStatus};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Reconciles the local media inventory with the server catalog.
pub struct CatalogSync {
    store: Arc<dyn MediaStore>,
    dispatcher: Arc<Dispatcher>,
}

impl CatalogSync {
    /// Creates a synchronizer over the given store and dispatcher.
    pub fn new(store: Arc<dyn MediaStore>, dispatcher: Arc<Dispatcher>) -> Arc<Self> {
        Arc::new(Self { store, dispatcher })
    }

    // ── Outbound ─────────────────────────────────────────────────

    /// Announces every record not already Confirmed, in batches.
    ///
    /// Run on each connection establishment; duplicate announcements after
    /// a reconnect are expected and harmless on both sides. Returns the
    /// number of announced files.
    pub fn announce_all(&self) -> CatalogResult<usize> {
        let files = self.store.list_unconfirmed()?;
        if files.is_empty() {
            debug!("nothing to announce");
            return Ok(0);
        }

        let mut announced = 0;
        for chunk in files.chunks(MAX_ANNOUNCE_BATCH) {
            let entries: Vec<AnnounceEntry> = chunk.iter().map(entry_for).collect();
            self.dispatcher.send(PeerPayload::CatalogAnnounce(CatalogAnnounceMessage {
                entries,
                bulk: true,
            }))?;
            for file in chunk {
                self.mark_announced(file)?;
                announced += 1;
            }
        }

        info!(count = announced, "bulk catalog announcement sent");
        Ok(announced)
    }

    /// Applies one scanner event to the store and the wire.
    pub fn handle_scan_event(&self, event: ScanEvent) -> CatalogResult<()> {
        match event {
            ScanEvent::FileDiscovered {
                path,
                size_bytes,
                modified_at,
                hashes,
            }
            | ScanEvent::FileChanged {
                path,
                size_bytes,
                modified_at,
                hashes,
            } => {
                let mut file = MediaFile::new(path, size_bytes, modified_at, hashes);

                if let Some(existing) = self.store.get(&file.path)? {
                    let unchanged = existing.size_bytes == file.size_bytes
                        && existing.hashes == file.hashes
                        && existing.is_confirmed();
                    if unchanged {
                        // Already confirmed and identical: announcing again
                        // would be a no-op, so skip the wire entirely.
                        debug!(path = %file.path.display(), "confirmed file unchanged, skipping");
                        return Ok(());
                    }
                    file.catalog_id = existing.catalog_id;
                    file.view_count = existing.view_count;
                }

                self.dispatcher.send(PeerPayload::CatalogAnnounce(CatalogAnnounceMessage {
                    entries: vec![entry_for(&file)],
                    bulk: false,
                }))?;
                file.status = SyncStatus::Announced;
                self.store.upsert(&file)?;
                Ok(())
            }

            ScanEvent::FileRemoved { path } => {
                let Some(mut file) = self.store.get(&path)? else {
                    debug!(path = %path.display(), "removal for unknown file, ignoring");
                    return Ok(());
                };

                // Local deletion is authoritative for the local view; the
                // server's bookkeeping is eventually consistent.
                file.status = SyncStatus::Removed;
                self.store.upsert(&file)?;

                self.dispatcher.send(PeerPayload::FileRemoval(FileRemovalMessage {
                    fingerprint: file.fingerprint,
                }))?;
                Ok(())
            }
        }
    }

    // ── Inbound ──────────────────────────────────────────────────

    /// Applies server-assigned catalog ids. Returns the number of records
    /// updated.
    ///
    /// Acknowledgments for unknown fingerprints are dropped: the file may
    /// have been removed between announce and ack, which is expected and
    /// not an error. Replaying an identical ack is a no-op.
    pub fn apply_ack(&self, ack: &CatalogAckMessage) -> CatalogResult<usize> {
        let mut updated = 0;
        for assignment in &ack.assignments {
            let Some(mut file) = self.store.get_by_fingerprint(&assignment.fingerprint)? else {
                debug!(
                    fingerprint = %assignment.fingerprint,
                    "ack for unknown file, dropping"
                );
                continue;
            };

            if file.status == SyncStatus::Removed {
                debug!(path = %file.path.display(), "ack for removed file, dropping");
                continue;
            }

            if file.is_confirmed() && file.catalog_id == Some(assignment.catalog_id) {
                continue;
            }

            file.catalog_id = Some(assignment.catalog_id);
            file.status = SyncStatus::Confirmed;
            self.store.upsert(&file)?;
            updated += 1;
        }
        Ok(updated)
    }

    /// Applies a remap request and produces the acknowledgment.
    ///
    /// A missing path is answered with NotFound rather than silence, so
    /// the edge service knows to retract the mapping.
    pub fn apply_remap(&self, request: &FileRemapRequestMessage) -> CatalogResult<RemapAckMessage> {
        match self.store.get_by_fingerprint(&request.fingerprint)? {
            Some(mut file) if file.status != SyncStatus::Removed => {
                file.catalog_id = Some(request.catalog_id);
                file.status = SyncStatus::Confirmed;
                self.store.upsert(&file)?;
                Ok(RemapAckMessage {
                    fingerprint: request.fingerprint.clone(),
                    status: RemapStatus::Found,
                })
            }
            _ => Ok(RemapAckMessage {
                fingerprint: request.fingerprint.clone(),
                status: RemapStatus::NotFound,
            }),
        }
    }

    fn mark_announced(&self, file: &MediaFile) -> CatalogResult<()> {
        let mut file = file.clone();
        file.status = SyncStatus::Announced;
        self.store.upsert(&file)
    }
}

fn entry_for(file: &MediaFile) -> AnnounceEntry {
    AnnounceEntry {
        fingerprint: file.fingerprint.clone(),
        size_bytes: file.size_bytes,
        hashes: file.hashes.clone(),
    }
}

// ── Worker ───────────────────────────────────────────────────────

/// Spawns the synchronizer worker.
///
/// The worker bulk-announces on every connection establishment and feeds
/// scanner events through `handle_scan_event` until the scanner channel
/// closes or shutdown begins.
pub fn spawn_worker(
    sync: Arc<CatalogSync>,
    mut connection_events: broadcast::Receiver<ConnectionEvent>,
    mut scan_events: mpsc::Receiver<ScanEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                event = connection_events.recv() => match event {
                    Ok(ConnectionEvent::Established) => {
                        if let Err(e) = sync.announce_all() {
                            warn!(error = %e, "bulk announcement failed");
                        }
                    }
                    Ok(ConnectionEvent::ShuttingDown) => break,
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(missed, "catalog worker lagged behind connection events");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },

                event = scan_events.recv() => match event {
                    Some(event) => {
                        if let Err(e) = sync.handle_scan_event(event) {
                            warn!(error = %e, "failed to apply scanner event");
                        }
                    }
                    None => break,
                },
            }
        }
        debug!("catalog worker stopped");
    })
}

// ── Handlers ─────────────────────────────────────────────────────

/// Dispatcher handler for catalog acknowledgments.
pub struct CatalogAckHandler(pub Arc<CatalogSync>);

#[async_trait]
impl EdgeHandler for CatalogAckHandler {
    async fn handle(&self, frame: EdgeFrame) -> EdgeResult<Option<PeerPayload>> {
        if let EdgePayload::CatalogAck(ack) = frame.payload {
            match self.0.apply_ack(&ack) {
                Ok(updated) if updated > 0 => {
                    info!(updated, "catalog ids confirmed");
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "failed to apply catalog ack"),
            }
        }
        Ok(None)
    }
}

/// Dispatcher handler for remap requests.
pub struct RemapHandler(pub Arc<CatalogSync>);

#[async_trait]
impl EdgeHandler for RemapHandler {
    async fn handle(&self, frame: EdgeFrame) -> EdgeResult<Option<PeerPayload>> {
        let EdgePayload::FileRemapRequest(request) = frame.payload else {
            return Ok(None);
        };
        match self.0.apply_remap(&request) {
            Ok(ack) => Ok(Some(PeerPayload::RemapAck(ack))),
            Err(e) => {
                warn!(error = %e, fingerprint = %request.fingerprint, "remap failed");
                Ok(Some(PeerPayload::RemapAck(RemapAckMessage {
                    fingerprint: request.fingerprint,
                    status: RemapStatus::NotFound,
                })))
            }
        }
    }
}
