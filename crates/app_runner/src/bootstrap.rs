use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use parking_lot::RwLock;

use crate::state::{AppState, UiSnapshot};
use crate::{control_api, engine_loop, persist};

pub(super) async fn async_main() -> Result<()> {
    let _guard = observability::init_tracing();
    let prometheus = observability::init_metrics();

    let port = std::env::var("DCA_ENGINE_PORT")
        .ok()
        .and_then(|v| v.trim().parse::<u16>().ok())
        .unwrap_or(8000);
    let state_path = std::env::var("DCA_STATE_PATH")
        .ok()
        .filter(|v| !v.trim().is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("state.json"));
    tracing::info!(port, state_path = %state_path.display(), "resolved runtime config");

    let initial = persist::load_state(&state_path);
    let snapshot = Arc::new(RwLock::new(UiSnapshot::default()));
    let (engine, engine_task) = engine_loop::spawn_engine(initial, snapshot.clone(), state_path);

    let app = control_api::build_router(AppState {
        engine,
        snapshot,
        prometheus,
    });

    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("bind control api listener")?;
    tracing::info!(%addr, "control api started");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serve control api")?;

    // The router (and with it the last engine handle) is gone: the loop
    // drains whatever is queued, persists once more and exits.
    engine_task.await.context("join engine loop")?;
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received; draining");
}
