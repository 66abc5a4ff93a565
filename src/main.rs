//! Main entry point for the image generation submission gateway

use imagegen_gateway::{
    broker::AmqpTransport,
    config::Settings,
    logging,
    monitor::BrokerHealthMonitor,
    store,
    Gateway,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Load configuration
    let settings = Settings::load()?;
    settings.validate()?;

    logging::init(&settings.logging)?;
    info!("Starting image generation submission gateway");
    info!(
        broker = %format!("{}:{}", settings.broker.host, settings.broker.port),
        queue = %settings.broker.queue_name,
        "Loaded configuration"
    );

    let store = store::open(&settings.database).await?;

    let transport = Arc::new(AmqpTransport::new(&settings.broker));
    let gateway = Gateway::from_settings(store, transport, &settings);

    // Connect eagerly so the first submission does not pay for it
    if let Err(e) = gateway.connections().acquire_handle().await {
        warn!(error = %e, "Broker not reachable at startup, will retry lazily");
    }

    let health = BrokerHealthMonitor::new(gateway.connections().clone(), &settings.health_check);
    if settings.health_check.enabled {
        health
            .start(Duration::from_secs(settings.health_check.interval_secs))
            .await;
    }

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    health.stop().await;
    gateway.shutdown().await;

    let stats = gateway.stats();
    info!(
        submitted = stats.submitted,
        published = stats.published,
        queue_unavailable = stats.queue_unavailable,
        publish_failed = stats.publish_failed,
        "Gateway stopped"
    );

    Ok(())
}
