use anyhow::Result;
use hestia::client::HttpTelemetrySource;
use hestia::events::LogEventSink;
use hestia::logging::{get_logger, init_logging};
use hestia::persistence::JsonFileStore;
use hestia::{Config, Monitor, Poller};
use std::sync::Arc;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    let config = match std::env::args().nth(1) {
        Some(path) => Config::from_file(&path)
            .map_err(|e| anyhow::anyhow!("Failed to load config {}: {}", path, e))?,
        None => Config::load().map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))?,
    };
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {}", e))?;

    init_logging(&config.logging).map_err(|e| anyhow::anyhow!("Logging setup failed: {}", e))?;
    info!(
        "Hestia {} starting, device {} at {}",
        env!("APP_VERSION"),
        config.device.id,
        config.device.base_url()
    );

    let store = Arc::new(
        JsonFileStore::open(&config.store.path)
            .map_err(|e| anyhow::anyhow!("Failed to open state store: {}", e))?,
    );
    let source = Arc::new(
        HttpTelemetrySource::from_config(&config.device)
            .map_err(|e| anyhow::anyhow!("Failed to create HTTP client: {}", e))?,
    );
    let events = Arc::new(LogEventSink::new(&config.device.id));

    let poller = Poller::new(&config, source, store, events)
        .map_err(|e| anyhow::anyhow!("Failed to create poller: {}", e))?;
    let handle = Monitor::spawn_with_config(poller, &config);

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
    }
    get_logger("main").info("Shutting down");

    match handle.shutdown().await {
        Ok(()) => {
            info!("Monitor shutdown complete");
            Ok(())
        }
        Err(e) => {
            error!("Monitor failed during shutdown: {}", e);
            Err(anyhow::anyhow!("Monitor error: {}", e))
        }
    }
}
