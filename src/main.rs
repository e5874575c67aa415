//! uptime-engine server.

use uptime_engine::config::ServerConfig;
use uptime_engine::db::Store;
use uptime_engine::notifier::Notifier;
use uptime_engine::retention::RetentionManager;
use uptime_engine::web::Server;

use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("uptime_engine=info".parse()?),
        )
        .init();

    // Load configuration
    let cfg = ServerConfig::load();
    tracing::info!("Starting uptime-engine on port {}...", cfg.http_port);
    tracing::info!("Using database at {}", cfg.db_path);
    tracing::info!(
        "Status thresholds: up >= {}%, degraded >= {}%",
        cfg.thresholds.up,
        cfg.thresholds.degraded
    );
    tracing::info!("Alerts go to {:?}", cfg.alert_channel);

    // Initialize database
    let store = Arc::new(Store::new(&cfg.db_path)?);
    tracing::info!("Database initialized successfully");

    // Prune old samples hourly
    let retention = RetentionManager::new(store.clone(), store.clone(), cfg.retention_days);
    retention.start(Duration::from_secs(3600));

    // Alert on incident transitions
    let notifier = Notifier::new(
        store.clone(),
        store.clone(),
        store.clone(),
        cfg.incident_policy,
        cfg.alert_channel.clone(),
    )?;
    notifier.start(Duration::from_secs(cfg.alert_interval_sec));

    // Start web server
    let server = Server::new(cfg, store.clone(), store.clone(), store);
    server.start(shutdown_signal()).await?;

    retention.stop();
    notifier.stop();
    tracing::info!("Shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        tracing::info!("Shutdown signal received");
    }
}
