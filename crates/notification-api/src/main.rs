//! 通知提交与查询服务

use std::sync::Arc;

use notification_api::{AppState, app};
use notify_shared::config::AppConfig;
use notify_shared::database::Database;
use notify_shared::inapp::PgInAppStore;
use notify_shared::kafka::KafkaProducer;
use notify_shared::retry::retry_forever;
use notify_shared::{observability, shutdown};
use tokio::net::TcpListener;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load("notification-api")?;

    let _guard = observability::init(&config.service_name, &config.observability).await?;
    info!(environment = %config.environment, "Starting notification-api...");

    let db = retry_forever(
        config.kafka.connect_retry_interval(),
        "database_connect",
        || Database::connect(&config.database),
    )
    .await;
    db.run_migrations().await?;

    let producer = KafkaProducer::new(&config.kafka)?;
    let store = PgInAppStore::new(db.pool().clone());

    let state = AppState::new(Arc::new(producer), Arc::new(store)).with_database(db.clone());
    let router = app(state);

    let listener = TcpListener::bind(config.server_addr()).await?;
    info!("Listening on {}", config.server_addr());

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown::signal())
        .await?;

    db.close().await;
    info!("Server shutdown complete");
    Ok(())
}
