pub mod router;
pub mod state;

use std::sync::Arc;

use crate::backend::ModelRegistry;
use crate::config::RelayConfig;
use crate::error::{RelayError, Result};

/// Start the HTTP server with the given configuration.
pub async fn start(config: RelayConfig) -> Result<()> {
    config.validate()?;

    let registry = Arc::new(ModelRegistry::from_config(&config)?);
    tracing::info!(models = ?registry.list_ids(), "Initialized model registry");

    let bind_addr = config.bind_address();
    let app_state = state::AppState::new(registry, Arc::new(config));

    let app = router::build(app_state);

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .map_err(|e| RelayError::Server(format!("Failed to bind to {bind_addr}: {e}")))?;

    tracing::info!("Server listening on {bind_addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| RelayError::Server(format!("Server error: {e}")))?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
