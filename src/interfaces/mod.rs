//! Daemon surface: the HTTP API the extension panel calls and the
//! WebSocket the extension serves browser commands over.

pub mod http;
pub mod ws;

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use crate::core::config::SettingsStore;
use crate::core::orchestrator::Orchestrator;
use crate::core::program_runner::ProgramRunner;
use crate::core::store::activation::ToolActivationStore;
use crate::core::store::conversation::ConversationStore;
use crate::core::store::program::ProgramStore;
use crate::core::store::usage::UsageLedger;
use ws::BridgeHub;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) settings: Arc<SettingsStore>,
    pub(crate) conversation: Arc<ConversationStore>,
    pub(crate) activation: Arc<ToolActivationStore>,
    pub(crate) ledger: Arc<UsageLedger>,
    pub(crate) programs: Arc<ProgramStore>,
    pub(crate) orchestrator: Arc<Orchestrator>,
    pub(crate) runner: Arc<ProgramRunner>,
    pub(crate) bridge: Arc<BridgeHub>,
    pub(crate) log_tx: tokio::sync::broadcast::Sender<String>,
}

/// Binds the API and serves until ctrl-c.
pub(crate) async fn serve(state: AppState, host: &str, port: u16) -> Result<()> {
    let app = http::build_api_router(state);
    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("cannot bind {addr}"))?;
    info!("API listening at http://{addr}");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("API server crashed")?;
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutting down");
}
