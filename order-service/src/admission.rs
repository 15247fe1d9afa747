use std::sync::Arc;

use common_event_channel::{
    publish_json, with_retry, EventChannel, ReservationRequest, RetryPolicy,
};
use common_stock_ledger::{LedgerError, StockLedger};
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::app::{ORDERS_ADMITTED_TOTAL, ORDERS_REJECTED_TOTAL, STOCK_COMPENSATIONS_TOTAL};
use crate::orders::{NewOrder, Order, OrderStore, OrderStoreError};

#[derive(Debug, Error)]
pub enum AdmissionError {
    #[error("insufficient stock for product {product_id}")]
    Rejected { product_id: i64 },
    #[error("stock ledger unavailable: {0}")]
    LedgerUnavailable(#[from] LedgerError),
    #[error("order persistence failed: {0}")]
    Persistence(String),
}

#[derive(Debug, Error)]
pub enum CancelError {
    #[error("order not found")]
    NotFound,
    #[error("order cannot be cancelled")]
    NotCancellable,
    #[error("order persistence failed: {0}")]
    Persistence(String),
}

/// Owns the admission decision. The cached ledger is the gate; the durable
/// inventory store follows asynchronously via the event channel and is never
/// consulted on the request path.
pub struct AdmissionController {
    ledger: Arc<dyn StockLedger>,
    orders: Arc<dyn OrderStore>,
    channel: Arc<dyn EventChannel>,
    retry: RetryPolicy,
    request_topic: String,
}

impl AdmissionController {
    pub fn new(
        ledger: Arc<dyn StockLedger>,
        orders: Arc<dyn OrderStore>,
        channel: Arc<dyn EventChannel>,
        retry: RetryPolicy,
        request_topic: String,
    ) -> Self {
        Self { ledger, orders, channel, retry, request_topic }
    }

    /// Admit an order: atomic reserve against the ledger, durable pending
    /// record, then an async decrement request toward the durable store.
    /// If the durable order write fails, the reservation is released before
    /// this returns; a reservation must never outlive the order record that
    /// justified it.
    pub async fn admit(&self, new_order: NewOrder) -> Result<Order, AdmissionError> {
        let product_id = new_order.product_id;
        let quantity = new_order.quantity;

        if !self.ledger.try_reserve(product_id, quantity).await? {
            ORDERS_REJECTED_TOTAL.inc();
            return Err(AdmissionError::Rejected { product_id });
        }

        let order = match self.orders.create_pending(new_order).await {
            Ok(order) => order,
            Err(err) => {
                self.release_or_escalate(product_id, quantity, "admission rollback").await;
                return Err(AdmissionError::Persistence(err.to_string()));
            }
        };

        let request = ReservationRequest::decrement(order.id, product_id, quantity);
        self.publish_or_escalate(&request).await;

        ORDERS_ADMITTED_TOTAL.inc();
        info!(order_id = %order.id, product_id, quantity, "order admitted");
        Ok(order)
    }

    /// Cancel a pending order: flip the durable state first, put the
    /// quantity back in the cache immediately, then ask the durable store to
    /// follow via an increment request.
    pub async fn cancel(&self, order_id: Uuid, user_id: i64) -> Result<Order, CancelError> {
        let order = self
            .orders
            .mark_cancelled(order_id, user_id)
            .await
            .map_err(|err| match err {
                OrderStoreError::NotFound => CancelError::NotFound,
                OrderStoreError::NotCancellable => CancelError::NotCancellable,
                OrderStoreError::Backend(message) => CancelError::Persistence(message),
            })?;

        self.release_or_escalate(order.product_id, order.quantity, "cancellation release")
            .await;

        let request = ReservationRequest::increment(order.id, order.product_id, order.quantity);
        self.publish_or_escalate(&request).await;

        info!(order_id = %order.id, product_id = order.product_id, "order cancelled");
        Ok(order)
    }

    /// A lost release leaves the cache permanently under-counted, the worse
    /// failure direction, so it gets bounded retries and a loud escalation.
    async fn release_or_escalate(&self, product_id: i64, quantity: i64, what: &str) {
        let outcome = with_retry(self.retry, what, || self.ledger.release(product_id, quantity)).await;
        match outcome {
            Ok(value) => {
                STOCK_COMPENSATIONS_TOTAL.inc();
                info!(product_id, quantity, cached = value, "released reserved stock");
            }
            Err(err) => {
                error!(
                    product_id,
                    quantity,
                    error = %err,
                    "failed to release reserved stock; cache under-counted until corrected"
                );
            }
        }
    }

    /// Publish failures are logged, never surfaced: by the time a request is
    /// published the caller already has its answer, and the durable store
    /// simply lags until reconciliation traffic resumes.
    async fn publish_or_escalate(&self, request: &ReservationRequest) {
        let key = request.product_id.to_string();
        if let Err(err) = publish_json(self.channel.as_ref(), &self.request_topic, &key, request).await
        {
            warn!(
                request_id = %request.request_id,
                order_id = %request.order_id,
                action = ?request.action,
                error = %err,
                "failed to publish reservation request; durable store will lag"
            );
        }
    }
}
