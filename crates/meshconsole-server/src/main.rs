//! `MeshConsole` server entry point.
//!
//! Loads configuration, runs the startup checks and then serves either the
//! console or, if any check failed, only the diagnostics page. The key
//! renewal worker runs alongside the console and is cancelled on shutdown.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use meshconsole_client::{Headscale, HeadscaleClient};
use meshconsole_storage::FileBackend;

use meshconsole_server::config::ServerConfig;
use meshconsole_server::diagnostics::{self, InitCheck};
use meshconsole_server::hs_config;
use meshconsole_server::routes;
use meshconsole_server::scheduler;
use meshconsole_server::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let (config, mut checks) = ServerConfig::from_env();

    // Initialize structured logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level)),
        )
        .json()
        .init();

    info!(
        version = %config.build.app_version,
        hs_server = %config.hs_server,
        auth = config.auth.name(),
        "MeshConsole starting"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let bind_addr = config.bind_addr;

    let (app, worker) = match build_console(config.clone(), &mut checks).await {
        Some(state) if checks.is_empty() => {
            let worker = start_renewal_worker(&state, shutdown_rx);
            (routes::router(state), worker)
        }
        _ => (diagnostics::router(&config, &checks), None),
    };

    serve(app, bind_addr, shutdown_tx).await?;

    if let Some(handle) = worker {
        info!("waiting for the key renewal worker to stop");
        let _ = tokio::time::timeout(Duration::from_secs(10), handle).await;
    }

    info!("MeshConsole stopped");
    Ok(())
}

/// Run the remaining startup checks and build the state if they allow it.
///
/// Every failure is appended to `checks`; the state is only built when
/// nothing has failed so far.
async fn build_console(
    mut config: ServerConfig,
    checks: &mut Vec<InitCheck>,
) -> Option<Arc<AppState>> {
    checks.extend(diagnostics::check_filesystem(&config));

    match hs_config::discover(&config) {
        Ok(found) => config.hs_server = hs_config::upstream_url(found.as_ref(), &config.hs_server),
        Err(check) => {
            checks.push(check);
            return None;
        }
    }
    info!(upstream = %config.hs_server, "resolved Headscale server");

    let client = match HeadscaleClient::new(&config.hs_server, config.request_timeout) {
        Ok(client) => client,
        Err(e) => {
            checks.push(InitCheck::unexpected("Headscale client", &e));
            return None;
        }
    };
    checks.extend(diagnostics::check_upstream(&client).await);
    if !checks.is_empty() {
        return None;
    }

    let storage = match FileBackend::open(&config.data_dir) {
        Ok(storage) => storage,
        Err(e) => {
            checks.push(InitCheck::unexpected("storage", &e));
            return None;
        }
    };

    let api: Arc<dyn Headscale> = Arc::new(client);
    match AppState::new(config, api, Arc::new(storage)) {
        Ok(state) => Some(Arc::new(state)),
        Err(e) => {
            checks.push(InitCheck::unexpected("application state", &e));
            None
        }
    }
}

fn start_renewal_worker(
    state: &Arc<AppState>,
    shutdown: watch::Receiver<bool>,
) -> Option<JoinHandle<()>> {
    if !scheduler::try_register() {
        warn!("key renewal worker already registered in this process");
        return None;
    }
    Some(tokio::spawn(scheduler::renewal_worker(
        Arc::clone(&state.lifecycle),
        state.config.renewal_interval,
        shutdown,
    )))
}

async fn serve(
    app: Router,
    bind_addr: std::net::SocketAddr,
    shutdown_tx: watch::Sender<bool>,
) -> anyhow::Result<()> {
    let listener = TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("failed to bind to {bind_addr}"))?;

    info!(addr = %bind_addr, "MeshConsole listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown_tx))
        .await
        .context("server error")
}

/// Wait for SIGINT or SIGTERM, then broadcast shutdown.
async fn shutdown_signal(shutdown_tx: watch::Sender<bool>) {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.ok();
    };

    #[cfg(unix)]
    let terminate = async {
        if let Ok(mut sig) =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        {
            sig.recv().await;
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("shutdown signal received, stopping server");
    let _ = shutdown_tx.send(true);
}
