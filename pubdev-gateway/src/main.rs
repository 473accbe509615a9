//! Entry point for the `pubdev-gateway` HTTP server.

use std::sync::Arc;

use pubdev_gateway::{config::ServerConfig, routes::create_router};
use pubdev_host::{ExecutionHost, FsWorkspaceStore, QuickJsBackend, WorkspaceStore};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = ServerConfig::from_env();
    let store = Arc::new(FsWorkspaceStore::new(&config.root));
    let host = Arc::new(ExecutionHost::new(config.host.clone(), Arc::new(QuickJsBackend::new()), store.clone()));

    let workspaces = match store.list_workspaces().await {
        Ok(workspaces) => workspaces,
        Err(e) => {
            tracing::error!(root = %config.root.display(), error = %e, "failed to list workspaces");
            std::process::exit(1);
        }
    };
    let report = host.setup_endpoints(&workspaces).await;
    if !report.failed.is_empty() {
        tracing::warn!(failed = report.failed.len(), "some endpoints are unavailable");
    }

    let app = create_router(host);

    let listener = match tokio::net::TcpListener::bind(&config.listen_addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!(addr = %config.listen_addr, error = %e, "failed to bind");
            std::process::exit(1);
        }
    };

    info!(addr = %config.listen_addr, root = %config.root.display(), "pubdev-gateway listening");

    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!(error = %e, "server error");
        std::process::exit(1);
    }
}
