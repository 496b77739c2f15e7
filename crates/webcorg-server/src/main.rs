use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

mod config;
mod server;
mod store;
mod telemetry;

pub use config::ServerConfig;

use store::{JsonFileStore, PersistenceGateway};

#[tokio::main]
async fn main() -> Result<()> {
    telemetry::init().map_err(|e| anyhow::anyhow!("Failed to init telemetry: {}", e))?;

    info!("WebCorg Server starting...");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let server_config = ServerConfig::from_env();
    server_config.log_config();

    let store = Arc::new(JsonFileStore::new(&server_config.db_path));
    let persistence = PersistenceGateway::open(store, &server_config.default_admin_password)
        .await
        .with_context(|| {
            format!(
                "Failed to load snapshot from {}",
                server_config.db_path.display()
            )
        })?;
    let persistence = Arc::new(persistence);

    let shutdown = CancellationToken::new();
    tokio::spawn(shutdown_on_signal(shutdown.clone()));

    let result = server::start(server_config, Arc::clone(&persistence), shutdown).await;

    match persistence.flush().await {
        Ok(()) => info!("Snapshot flushed"),
        Err(e) => error!(error = %e, "Failed to flush snapshot"),
    }

    telemetry::shutdown();

    result
}

/// Cancel `token` on SIGINT or SIGTERM.
async fn shutdown_on_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
    }

    info!("Shutting down server...");
    token.cancel();
}
