use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use common_event_channel::KafkaEventChannel;
use common_stock_ledger::RedisStockLedger;
use rdkafka::consumer::{Consumer, StreamConsumer};
use sqlx::PgPool;
use tokio::net::TcpListener;

use order_service::app::AppState;
use order_service::compensation::{spawn_response_consumer, CompensationListener};
use order_service::orders::PgOrderStore;
use order_service::{build_router, AdmissionController, OrderServiceConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let config = OrderServiceConfig::from_env()?;
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
    let orders = Arc::new(PgOrderStore::new(db));

    let admission = Arc::new(AdmissionController::new(
        ledger.clone(),
        orders.clone(),
        channel,
        config.retry,
        config.request_topic.clone(),
    ));

    let consumer: StreamConsumer = rdkafka::ClientConfig::new()
        .set("bootstrap.servers", &config.kafka_bootstrap)
        .set("group.id", &config.consumer_group)
        .set("enable.auto.commit", "true")
        .create()
        .context("failed to create kafka consumer")?;
    consumer.subscribe(&[config.response_topic.as_str()])?;
    let compensation = Arc::new(CompensationListener::new(ledger.clone(), config.retry));
    spawn_response_consumer(consumer, compensation);

    let state = AppState { admission, orders, ledger };
    let app = build_router(state);

    let ip: std::net::IpAddr = config.host.parse()?;
    let addr = SocketAddr::from((ip, config.port));
    println!("starting order-service on {addr}");
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
