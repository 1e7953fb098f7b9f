use crate::config::RelayConfig;
use crate::error::Result;
use crate::server;

/// Execute the `serve` command: start the HTTP server.
pub async fn execute(
    mut config: RelayConfig,
    host: Option<String>,
    port: Option<u16>,
) -> Result<()> {
    if let Some(host) = host {
        config.host = host;
    }
    if let Some(port) = port {
        config.port = port;
    }

    println!("A3S Relay server starting...");
    println!("Listening on http://{}", config.bind_address());
    for model in &config.models {
        println!("  {} ({})", model.id, model.provider);
    }
    println!("Press Ctrl+C to stop");

    server::start(config).await
}
