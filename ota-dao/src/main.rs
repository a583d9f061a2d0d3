//! Connectivity check: load configuration, open the configured store and
//! ping it. Exits non-zero when the store is unreachable.

use ota_core::observability::init_tracing;
use ota_dao::config::DaoConfig;
use ota_dao::Dao;

#[tokio::main]
async fn main() -> std::io::Result<()> {
    let config = DaoConfig::load()
        .map_err(|e| std::io::Error::other(format!("Configuration error: {}", e)))?;

    init_tracing(
        &config.common.service_name,
        &config.common.log_level,
        config.common.otlp_endpoint.as_deref(),
    )
    .map_err(|e| std::io::Error::other(format!("Tracing initialization error: {}", e)))?;

    let dao = Dao::from_config(&config).await.map_err(|e| {
        tracing::error!("Failed to open store: {}", e);
        std::io::Error::other(format!("Store initialization error: {}", e))
    })?;

    dao.health_check().await.map_err(|e| {
        tracing::error!("Store health check failed: {}", e);
        std::io::Error::other(format!("Store unavailable: {}", e))
    })?;

    tracing::info!(
        backend = ?config.store.backend,
        version = env!("CARGO_PKG_VERSION"),
        "Store is reachable"
    );
    Ok(())
}
