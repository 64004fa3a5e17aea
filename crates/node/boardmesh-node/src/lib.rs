#![deny(unsafe_code)]

//! Wires config, storage, registries, the secondary index, and gossip into
//! one `AppState`, builds the axum router over it, and runs the periodic
//! index-sync/archive loops a `Full`/`Indexer`/`Archiver` node needs.
//!
//! Kept as a library (with a thin `main.rs` binary) so integration tests
//! can build a router over an in-memory store and drive it with
//! `tower::ServiceExt::oneshot` instead of binding a real port.

pub mod error;
pub mod routes;
pub mod state;

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use boardmesh_config::BoardmeshConfig;
use boardmesh_gossip::gossip_peer_from_config;
use boardmesh_indexer::IndexerStore;
use boardmesh_registry::{BoardRegistry, TrustedIndexerRegistry};
use boardmesh_store::{ContentStore, HttpContentStore, StorageFacade};

pub use state::AppState;

/// Builds `AppState` from a loaded config: opens the registries and (for
/// indexer/full roles) the SQLite secondary index, and constructs the
/// content-store facade pointed at `content_store_endpoint`.
pub async fn build_state(config: BoardmeshConfig) -> anyhow::Result<AppState> {
    std::fs::create_dir_all(&config.data_dir)?;

    let store: Arc<dyn ContentStore> = Arc::new(HttpContentStore::new(config.content_store_endpoint.clone()));
    let facade = StorageFacade::new(store);

    let boards = Arc::new(BoardRegistry::load(config.boards_json_path())?);
    let trusted_indexers = Arc::new(TrustedIndexerRegistry::load(config.trusted_indexers_json_path())?);

    let indexer = if config.role.runs_indexer() {
        let store = IndexerStore::open(config.index_db_path())
            .await?
            .with_search_limits(config.search_limit_default as i64, config.search_limit_max as i64);
        Some(Arc::new(store))
    } else {
        None
    };

    let gossip = gossip_peer_from_config(&config);

    Ok(AppState {
        config: Arc::new(config),
        facade,
        boards,
        trusted_indexers,
        indexer,
        gossip,
    })
}

pub fn build_router(state: AppState) -> axum::Router {
    routes::router(state)
}

/// Periodically re-syncs the secondary index against every registered
/// board's current head. Runs only when `state.indexer` is set.
pub async fn run_index_sync_loop(state: AppState, shutdown: CancellationToken) {
    let Some(indexer) = state.indexer.clone() else {
        return;
    };
    let mut ticker = tokio::time::interval(Duration::from_secs(state.config.index_sync_interval_secs));
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = state.boards.reload() {
                    tracing::warn!(error = %e, "board registry reload failed");
                }
                for (board_id, meta_cid) in state.boards.list() {
                    if let Err(e) = indexer.sync_board_by_meta_cid(&state.facade, &meta_cid).await {
                        tracing::warn!(board_id, error = %e, "index sync failed");
                    }
                }
            }
            _ = shutdown.cancelled() => {
                tracing::info!("index sync loop shutting down");
                return;
            }
        }
    }
}

/// Periodically archives every registered board's full log + posts to
/// `<dataDir>/archive/<cid>.json`. Runs only for archiver/full roles.
pub async fn run_archive_loop(state: AppState, shutdown: CancellationToken) {
    if !state.config.role.runs_archiver() {
        return;
    }
    let mut ticker = tokio::time::interval(Duration::from_secs(state.config.archive_interval_secs));
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = archive_tick(&state).await {
                    tracing::warn!(error = %e, "archive tick failed");
                }
            }
            _ = shutdown.cancelled() => {
                tracing::info!("archive loop shutting down");
                return;
            }
        }
    }
}

async fn archive_tick(state: &AppState) -> anyhow::Result<()> {
    let archive_dir = state.config.archive_dir();
    std::fs::create_dir_all(&archive_dir)?;

    for (_, meta_cid) in state.boards.list() {
        let board_meta = state.facade.load_board_meta(&meta_cid).await?;
        let Some(head) = &board_meta.log_head_cid else {
            continue;
        };
        let chain = boardmesh_log::fetch_chain(&state.facade, head, boardmesh_log::MAX_LOG_DEPTH).await?;
        let path = archive_dir.join(format!("{}.json", meta_cid.as_str()));
        if path.exists() {
            continue;
        }
        let snapshot = serde_json::json!({
            "boardMetaCid": meta_cid.as_str(),
            "boardMeta": board_meta,
            "log": chain.iter().map(|c| serde_json::json!({
                "cid": c.cid.as_str(),
                "entry": c.entry,
                "signatureValid": c.signature_valid,
            })).collect::<Vec<_>>(),
        });
        std::fs::write(&path, serde_json::to_vec_pretty(&snapshot)?)?;
    }
    Ok(())
}
