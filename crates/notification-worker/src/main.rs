//! 通知投递 worker
//!
//! 启动顺序：数据库（含迁移）→ 等待 broker 就绪 → 订阅 → 进入调度循环。
//! 数据库和 broker 不可达时以固定间隔无限重试，不会退出。

use std::sync::Arc;

use notification_worker::{DispatchOptions, Dispatcher, SenderRegistry};
use notify_shared::config::AppConfig;
use notify_shared::database::Database;
use notify_shared::inapp::{InAppStore, PgInAppStore};
use notify_shared::kafka::{KafkaConsumer, KafkaProducer};
use notify_shared::retry::retry_forever;
use notify_shared::{observability, shutdown};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load("notification-worker")?;

    let _guard = observability::init(&config.service_name, &config.observability).await?;
    info!(environment = %config.environment, "Starting notification-worker...");

    let retry_interval = config.kafka.connect_retry_interval();

    let db = retry_forever(retry_interval, "database_connect", || {
        Database::connect(&config.database)
    })
    .await;
    db.run_migrations().await?;

    let store: Arc<dyn InAppStore> = Arc::new(PgInAppStore::new(db.pool().clone()));
    let senders = SenderRegistry::from_config(&config, store)?;

    let consumer = KafkaConsumer::new(&config.kafka, None)?;
    consumer.wait_for_broker(retry_interval).await;
    consumer.subscribe()?;
    let producer = KafkaProducer::new(&config.kafka)?;

    let dispatcher = Dispatcher::new(
        consumer,
        Arc::new(producer),
        senders,
        DispatchOptions::from(&config.dispatcher),
    );
    dispatcher.run(shutdown::watch_signal()).await?;

    db.close().await;
    info!("notification-worker shutdown complete");
    Ok(())
}
