//! mediapeerd: the peer node of the media distribution platform.
//!
//! Maintains the managed connection to the edge service, keeps the local
//! media catalog in sync with it, answers server-initiated file
//! operations and negotiates streaming sessions.
//!
//! Usage:
//!   mediapeerd --edge-address 127.0.0.1:50051
//!
//! All settings also accept `MEDIAPEER_*` environment overrides.

mod config;
mod identity;
mod media;

use anyhow::{Context, Result};
use clap::Parser;
use config::PeerConfig;
use media::{NoCaptureExecutor, PlaceholderMediaSource};
use mediapeer_catalog::{
    CatalogAckHandler, CatalogSync, FileOpsHandler, MediaStore, RemapHandler, ScreenshotHandler,
    Sha256Hasher, SqliteMediaStore,
};
use mediapeer_edge::protocol::EdgeKind;
use mediapeer_edge::{ConnectionEvent, ConnectionManager, Dispatcher, EdgeHandler};
use mediapeer_stream::SessionNegotiator;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "mediapeerd")]
#[command(about = "Peer node daemon for the mediapeer platform")]
struct Args {
    /// Address of the edge service
    #[arg(short, long)]
    edge_address: Option<String>,

    /// Path to the catalog database
    #[arg(long)]
    db: Option<PathBuf>,

    /// Path to the peer identity file
    #[arg(short, long)]
    identity: Option<PathBuf>,

    /// Fixed peer id, overriding the identity file
    #[arg(long)]
    peer_id: Option<String>,

    /// Enable verbose debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let log_level = if args.verbose { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .compact()
        .init();

    let mut config = PeerConfig::from_env();
    if let Some(addr) = args.edge_address {
        config.edge_address = addr;
    }
    if let Some(db) = args.db {
        config.db_path = db;
    }
    if let Some(identity) = args.identity {
        config.identity_path = identity;
    }
    if let Some(raw) = args.peer_id {
        config.peer_id = Some(raw.parse().context("invalid --peer-id")?);
    }
    debug!(?config, "effective configuration");

    let peer_id = match config.peer_id {
        Some(fixed) => fixed,
        None => identity::load_or_generate(&config.identity_path)?,
    };

    let store: Arc<dyn MediaStore> = Arc::new(
        SqliteMediaStore::open(&config.db_path)
            .with_context(|| format!("failed to open catalog db {}", config.db_path.display()))?,
    );

    let dispatcher = Dispatcher::new(config.outbound_queue_capacity);
    let sync = CatalogSync::new(Arc::clone(&store), Arc::clone(&dispatcher));
    let negotiator = SessionNegotiator::new(
        config.stream_config(),
        Arc::clone(&dispatcher),
        Arc::new(PlaceholderMediaSource),
        Arc::clone(&store),
    );

    register_handlers(&dispatcher, &store, &sync, &negotiator)?;

    let connection = ConnectionManager::new(config.edge_config(), peer_id, Arc::clone(&dispatcher));
    let mut events = connection.subscribe();

    // The scanner process feeds this channel; the sender half is held
    // here as the integration seam.
    let (_scan_tx, scan_rx) = mpsc::channel(256);
    let catalog_worker =
        mediapeer_catalog::sync::spawn_worker(Arc::clone(&sync), connection.subscribe(), scan_rx);
    let stream_worker = negotiator.spawn_worker(connection.subscribe());

    connection.start();

    println!("\n========================================");
    println!("  mediapeerd running");
    println!("========================================");
    println!("  PeerId:  {}", peer_id);
    println!("  Edge:    {}", config.edge_address);
    println!("  Catalog: {}", config.db_path.display());
    println!("========================================\n");

    let exhausted = loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown requested");
                break false;
            }
            event = events.recv() => match event {
                Ok(ConnectionEvent::Exhausted) => {
                    error!("edge connection attempts exhausted");
                    break true;
                }
                Ok(_) => {}
                Err(_) => break false,
            },
        }
    };

    connection.shutdown().await;
    let _ = catalog_worker.await;
    let _ = stream_worker.await;

    if exhausted {
        anyhow::bail!("could not reach the edge service");
    }
    info!("mediapeerd stopped");
    Ok(())
}

/// Registers one handler per server-initiated message kind.
fn register_handlers(
    dispatcher: &Arc<Dispatcher>,
    store: &Arc<dyn MediaStore>,
    sync: &Arc<CatalogSync>,
    negotiator: &Arc<SessionNegotiator>,
) -> Result<()> {
    let file_ops: Arc<dyn EdgeHandler> =
        FileOpsHandler::new(Arc::clone(store), Arc::new(Sha256Hasher));
    let screenshots = ScreenshotHandler::new(Arc::clone(store), Arc::new(NoCaptureExecutor));
    let signaling: Arc<dyn EdgeHandler> = negotiator.handler();

    dispatcher.register_handler(
        EdgeKind::CatalogAck,
        Arc::new(CatalogAckHandler(Arc::clone(sync))),
    )?;
    dispatcher.register_handler(EdgeKind::FileRemap, Arc::new(RemapHandler(Arc::clone(sync))))?;
    dispatcher.register_handler(EdgeKind::FileDelete, Arc::clone(&file_ops))?;
    dispatcher.register_handler(EdgeKind::FileHash, file_ops)?;
    dispatcher.register_handler(EdgeKind::Screenshot, screenshots)?;
    dispatcher.register_handler(EdgeKind::SdpOffer, Arc::clone(&signaling))?;
    dispatcher.register_handler(EdgeKind::SdpAnswer, Arc::clone(&signaling))?;
    dispatcher.register_handler(EdgeKind::IceCandidate, signaling)?;
    Ok(())
}
