use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use common_event_channel::KafkaEventChannel;
use common_stock_ledger::RedisStockLedger;
use rdkafka::consumer::{Consumer, StreamConsumer};
use sqlx::PgPool;
use tokio::net::TcpListener;

use inventory_service::app::AppState;
use inventory_service::inventory::PgInventoryStore;
use inventory_service::reconciliation::spawn_request_consumer;
use inventory_service::{build_router, InventoryServiceConfig, ReconciliationWorker};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let config = InventoryServiceConfig::from_env()?;
    let db = PgPool::connect(&config.database_url).await?;
    let ledger = Arc::new(
        RedisStockLedger::new(&config.redis_url)
            .await
            .context("failed to connect stock ledger")?,
    );
    let channel = Arc::new(
        KafkaEventChannel::new(&config.kafka_bootstrap, config.retry)
            .context("failed to create kafka producer")?,
    );
    let store = Arc::new(PgInventoryStore::new(db));

    let worker = Arc::new(ReconciliationWorker::new(
        store.clone(),
        channel,
        config.response_topic.clone(),
    ));

    let consumer: StreamConsumer = rdkafka::ClientConfig::new()
        .set("bootstrap.servers", &config.kafka_bootstrap)
        .set("group.id", &config.consumer_group)
        .set("enable.auto.commit", "true")
        .create()
        .context("failed to create kafka consumer")?;
    consumer.subscribe(&[config.request_topic.as_str()])?;
    spawn_request_consumer(consumer, worker);

    let state = AppState { store, ledger };
    let app = build_router(state);

    let ip: std::net::IpAddr = config.host.parse()?;
    let addr = SocketAddr::from((ip, config.port));
    println!("starting inventory-service on {addr}");
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
