//! Binary entry point: load config, wire up state, serve HTTP, run the
//! periodic index-sync/archive loops, and shut down cleanly on Ctrl-C.

use std::path::PathBuf;

use tokio_util::sync::CancellationToken;

use boardmesh_config::BoardmeshConfig;

fn config_path() -> PathBuf {
    std::env::var("BOARDMESH_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("boardmesh.toml"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = BoardmeshConfig::load(&config_path())?;
    let listen_addr = config.listen_addr.clone();
    let max_body_bytes = config.max_request_body_bytes;
    tracing::info!(role = %config.role, listen_addr = %listen_addr, "starting boardmesh node");

    let state = boardmesh_node::build_state(config).await?;
    let shutdown = CancellationToken::new();

    let index_sync = tokio::spawn(boardmesh_node::run_index_sync_loop(state.clone(), shutdown.clone()));
    let archive = tokio::spawn(boardmesh_node::run_archive_loop(state.clone(), shutdown.clone()));

    let app = boardmesh_node::build_router(state)
        .layer(tower_http::limit::RequestBodyLimitLayer::new(max_body_bytes))
        .layer(tower_http::trace::TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(&listen_addr).await?;
    let serve_shutdown = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::signal::ctrl_c().await.expect("failed to install Ctrl-C handler");
            tracing::info!("shutdown signal received");
            serve_shutdown.cancel();
        })
        .await?;

    let _ = tokio::join!(index_sync, archive);
    Ok(())
}
