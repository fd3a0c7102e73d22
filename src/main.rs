use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use maze_duo_server::config::ServerConfig;
use maze_duo_server::lobby::manager::RoomRegistry;
use maze_duo_server::metrics::{self, Metrics};
use maze_duo_server::net::transport::GameServer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    info!("Maze Duo Server v{}", env!("CARGO_PKG_VERSION"));

    let config = ServerConfig::load_or_default();
    config.validate()?;
    info!(
        "Configuration loaded: {}:{}, max_rooms={}, maze={}x{}",
        config.bind_address, config.port, config.max_rooms, config.maze_rows, config.maze_cols
    );

    let metrics = Arc::new(Metrics::new());

    let metrics_clone = metrics.clone();
    let metrics_port = config.metrics_port;
    tokio::spawn(async move {
        if let Err(e) = metrics::start_metrics_server(metrics_clone, metrics_port).await {
            error!("Metrics server error: {}", e);
        }
    });

    let registry = RoomRegistry::new(&config, metrics.clone());
    let server = GameServer::new(config, registry.clone(), metrics);

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Shutdown signal received");
    };

    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                error!("Server error: {}", e);
            }
        }
        _ = shutdown => {
            info!("Shutting down...");
        }
    }

    registry.shutdown();
    info!("Server stopped");

    Ok(())
}
