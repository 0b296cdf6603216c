use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use spore_arena_server::config::{env_file_from_args, ServerConfig};
use spore_arena_server::db::Database;
use spore_arena_server::hub::{HubConfig, SessionHub};
use spore_arena_server::metrics::{self, Metrics};
use spore_arena_server::net::transport::WebTransportServer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env_file = env_file_from_args(std::env::args().skip(1));
    let env_loaded = dotenvy::from_path(&env_file);

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    info!("Spore Arena Server v{}", env!("CARGO_PKG_VERSION"));

    match env_loaded {
        Ok(()) => info!("Loaded environment from {}", env_file.display()),
        Err(e) => warn!("Could not load {}: {}", env_file.display(), e),
    }

    // Load configuration
    let config = ServerConfig::load_or_default();
    config.validate()?;
    info!(
        "Configuration loaded: {}:{}, max_spores={}",
        config.bind_address, config.port, config.max_spores
    );

    // Initialize metrics
    let metrics = Arc::new(Metrics::new());

    let metrics_clone = metrics.clone();
    let metrics_port = config.metrics_port;
    tokio::spawn(async move {
        if let Err(e) = metrics::start_metrics_server(metrics_clone, metrics_port).await {
            error!("Metrics server error: {}", e);
        }
    });

    // Player storage
    let db_url = Database::url_for_data_dir(&config.data_dir());
    let db = Database::connect(&db_url).await?;

    // Session hub
    let hub = SessionHub::new(
        db,
        metrics.clone(),
        HubConfig {
            max_spores: config.max_spores,
            ..Default::default()
        },
    );
    let services = hub.services();
    tokio::spawn(async move {
        if let Err(e) = hub.run().await {
            error!("Session hub stopped: {:#}", e);
        }
    });

    // Create WebTransport server
    let server = WebTransportServer::new(config.clone(), services).await?;

    info!("Server ready on https://{}", server.bind_addr());
    info!(
        "Chrome flag: --ignore-certificate-errors-spki-list={}",
        server.cert_hash()
    );

    // Run server until Ctrl+C
    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                error!("Server error: {}", e);
            }
        }
        result = tokio::signal::ctrl_c() => {
            match result {
                Ok(()) => info!("Shutdown signal received"),
                Err(e) => error!("Failed to listen for Ctrl+C: {}", e),
            }
        }
    }

    info!("Server stopped");
    Ok(())
}
