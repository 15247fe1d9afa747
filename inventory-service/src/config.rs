use anyhow::{Context, Result};
use common_event_channel::{RetryPolicy, INVENTORY_REQUEST_TOPIC, INVENTORY_RESPONSE_TOPIC};
use std::env;

#[derive(Debug, Clone)]
pub struct InventoryServiceConfig {
    pub database_url: String,
    pub redis_url: String,
    pub kafka_bootstrap: String,
    pub consumer_group: String,
    pub request_topic: String,
    pub response_topic: String,
    pub retry: RetryPolicy,
    pub host: String,
    pub port: u16,
}

impl InventoryServiceConfig {
    pub fn from_env() -> Result<Self> {
        let database_url = env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
        let redis_url = env::var("REDIS_URL").context("REDIS_URL must be set")?;
        let kafka_bootstrap =
            env::var("KAFKA_BOOTSTRAP").unwrap_or_else(|_| "localhost:9092".to_string());
        let consumer_group = env::var("KAFKA_CONSUMER_GROUP")
            .unwrap_or_else(|_| "inventory-service-group".to_string());
        let request_topic = env::var("INVENTORY_REQUEST_TOPIC")
            .unwrap_or_else(|_| INVENTORY_REQUEST_TOPIC.to_string());
        let response_topic = env::var("INVENTORY_RESPONSE_TOPIC")
            .unwrap_or_else(|_| INVENTORY_RESPONSE_TOPIC.to_string());
        let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = env::var("PORT")
            .ok()
            .and_then(|value| value.parse::<u16>().ok())
            .unwrap_or(8087);

        Ok(Self {
            database_url,
            redis_url,
            kafka_bootstrap,
            consumer_group,
            request_topic,
            response_topic,
            retry: RetryPolicy::from_env(),
            host,
            port,
        })
    }
}
