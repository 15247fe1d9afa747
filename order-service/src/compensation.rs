use std::collections::HashSet;
use std::sync::Arc;

use common_event_channel::{with_retry, ReservationResponse, RetryPolicy, StockAction};
use common_stock_ledger::StockLedger;
use futures::StreamExt;
use rdkafka::consumer::StreamConsumer;
use rdkafka::Message;
use tokio::sync::Mutex;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::app::STOCK_COMPENSATIONS_TOTAL;

/// Entries kept in the dedupe set before it is reset wholesale. A reset
/// forgets old request ids, which is the same at-least-once exposure a
/// process restart already has.
pub const SEEN_LIMIT: usize = 8192;

/// Consumes reconciliation responses and undoes the optimistic cache
/// decrement when the durable side rejected one. Responses arrive
/// at-least-once, so effects are applied once per `request_id`.
pub struct CompensationListener {
    ledger: Arc<dyn StockLedger>,
    retry: RetryPolicy,
    seen: Mutex<HashSet<Uuid>>,
}

impl CompensationListener {
    pub fn new(ledger: Arc<dyn StockLedger>, retry: RetryPolicy) -> Self {
        Self { ledger, retry, seen: Mutex::new(HashSet::new()) }
    }

    pub async fn handle(&self, response: &ReservationResponse) {
        {
            let mut seen = self.seen.lock().await;
            if !seen.insert(response.request_id) {
                debug!(request_id = %response.request_id, "duplicate reservation response ignored");
                return;
            }
            if seen.len() > SEEN_LIMIT {
                seen.clear();
                seen.insert(response.request_id);
            }
        }

        if response.success {
            debug!(
                order_id = %response.order_id,
                action = ?response.action,
                "reservation reconciled durably"
            );
            return;
        }

        if response.action != StockAction::Decrement {
            // The cancellation path already applied the increment to the
            // cache synchronously; a failed durable increment is an operator
            // problem, not a cache one.
            error!(
                order_id = %response.order_id,
                product_id = response.product_id,
                reason = %response.reason,
                "durable increment failed; durable store lags the cache"
            );
            return;
        }

        warn!(
            order_id = %response.order_id,
            product_id = response.product_id,
            quantity = response.quantity,
            reason = %response.reason,
            "durable decrement rejected; compensating cache"
        );

        let product_id = response.product_id;
        let quantity = response.quantity;
        let outcome = with_retry(self.retry, "compensating release", || {
            self.ledger.release(product_id, quantity)
        })
        .await;
        match outcome {
            Ok(value) => {
                STOCK_COMPENSATIONS_TOTAL.inc();
                debug!(product_id, quantity, cached = value, "cache compensated");
            }
            Err(err) => {
                error!(
                    order_id = %response.order_id,
                    product_id,
                    quantity,
                    error = %err,
                    "compensating release failed; cache under-counted until corrected"
                );
            }
        }
    }
}

/// Drive the listener from a Kafka consumer subscribed to the response
/// topic. Malformed payloads are logged and skipped.
pub fn spawn_response_consumer(consumer: StreamConsumer, listener: Arc<CompensationListener>) {
    tokio::spawn(async move {
        let mut stream = consumer.stream();
        while let Some(message) = stream.next().await {
            match message {
                Ok(m) => {
                    if let Some(Ok(text)) = m.payload_view::<str>() {
                        match serde_json::from_str::<ReservationResponse>(text) {
                            Ok(response) => listener.handle(&response).await,
                            Err(err) => {
                                error!(?err, payload = text, "failed to parse reservation response")
                            }
                        }
                    }
                }
                Err(err) => error!(?err, "kafka error on response consumer"),
            }
        }
    });
}
