use std::sync::Arc;

use common_event_channel::{
    publish_json, EventChannel, ReservationRequest, ReservationResponse, StockAction,
};
use futures::StreamExt;
use rdkafka::consumer::StreamConsumer;
use rdkafka::Message;
use tracing::{error, info, warn};

use crate::app::RECONCILIATION_REQUESTS_TOTAL;
use crate::inventory::{ApplyOutcome, InventoryStore};

/// Applies reservation requests to the durable inventory store and always
/// answers with a terminal response, so the order side can compensate. The
/// cache on the order side is the admission gate; this store is its lagging
/// durable mirror.
pub struct ReconciliationWorker {
    store: Arc<dyn InventoryStore>,
    channel: Arc<dyn EventChannel>,
    response_topic: String,
}

impl ReconciliationWorker {
    pub fn new(
        store: Arc<dyn InventoryStore>,
        channel: Arc<dyn EventChannel>,
        response_topic: String,
    ) -> Self {
        Self { store, channel, response_topic }
    }

    /// Compute the terminal outcome for one request. Errors never escape:
    /// they become a failure response carrying the error text.
    pub async fn handle(&self, request: &ReservationRequest) -> ReservationResponse {
        let action = match request.action {
            StockAction::Decrement => "decrement",
            StockAction::Increment => "increment",
        };
        let applied = match request.action {
            StockAction::Decrement => {
                self.store
                    .apply_decrement(request.request_id, request.product_id, request.quantity)
                    .await
            }
            StockAction::Increment => {
                self.store
                    .apply_increment(request.request_id, request.product_id, request.quantity)
                    .await
            }
        };

        let (outcome, response) = match applied {
            Ok(ApplyOutcome::Applied { remaining }) => {
                info!(
                    order_id = %request.order_id,
                    product_id = request.product_id,
                    quantity = request.quantity,
                    remaining,
                    action,
                    "reservation applied durably"
                );
                ("applied", ReservationResponse::succeeded(request))
            }
            Ok(ApplyOutcome::Duplicate) => {
                info!(
                    request_id = %request.request_id,
                    order_id = %request.order_id,
                    "duplicate reservation request skipped"
                );
                let mut response = ReservationResponse::succeeded(request);
                response.reason = "duplicate".into();
                ("duplicate", response)
            }
            Ok(ApplyOutcome::Insufficient { current }) => {
                warn!(
                    order_id = %request.order_id,
                    product_id = request.product_id,
                    requested = request.quantity,
                    current,
                    "durable stock insufficient; rejecting reservation"
                );
                ("insufficient", ReservationResponse::failed(request, "insufficient stock"))
            }
            Ok(ApplyOutcome::NotFound) => {
                warn!(
                    order_id = %request.order_id,
                    product_id = request.product_id,
                    "product missing from durable inventory"
                );
                ("not_found", ReservationResponse::failed(request, "not found"))
            }
            Err(err) => {
                error!(
                    order_id = %request.order_id,
                    product_id = request.product_id,
                    error = %err,
                    "inventory store error while reconciling"
                );
                ("error", ReservationResponse::failed(request, err.to_string()))
            }
        };
        RECONCILIATION_REQUESTS_TOTAL
            .with_label_values(&[action, outcome])
            .inc();
        response
    }

    /// Handle one request and publish its response keyed by product id.
    pub async fn process(&self, request: &ReservationRequest) {
        let response = self.handle(request).await;
        let key = request.product_id.to_string();
        if let Err(err) =
            publish_json(self.channel.as_ref(), &self.response_topic, &key, &response).await
        {
            error!(
                request_id = %request.request_id,
                order_id = %request.order_id,
                error = %err,
                "failed to publish reservation response; order side cannot compensate"
            );
        }
    }
}

/// Drive the worker from a Kafka consumer subscribed to the request topic.
pub fn spawn_request_consumer(consumer: StreamConsumer, worker: Arc<ReconciliationWorker>) {
    tokio::spawn(async move {
        let mut stream = consumer.stream();
        while let Some(message) = stream.next().await {
            match message {
                Ok(m) => {
                    if let Some(Ok(text)) = m.payload_view::<str>() {
                        match serde_json::from_str::<ReservationRequest>(text) {
                            Ok(request) => worker.process(&request).await,
                            Err(err) => {
                                error!(?err, payload = text, "failed to parse reservation request")
                            }
                        }
                    }
                }
                Err(err) => error!(?err, "kafka error on request consumer"),
            }
        }
    });
}
