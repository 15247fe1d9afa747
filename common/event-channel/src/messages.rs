use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Topic carrying reservation requests from the order side to the
/// inventory side.
pub const INVENTORY_REQUEST_TOPIC: &str = "inventory-request";
/// Topic carrying reconciliation outcomes back to the order side.
pub const INVENTORY_RESPONSE_TOPIC: &str = "inventory-response";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StockAction {
    Decrement,
    Increment,
}

/// Asks the inventory side to apply a reservation (or its reversal) to the
/// durable store. Delivery is at-least-once; `request_id` is the
/// deduplication handle consumers key on.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservationRequest {
    pub request_id: Uuid,
    pub order_id: Uuid,
    pub product_id: i64,
    pub quantity: i64,
    pub action: StockAction,
}

impl ReservationRequest {
    pub fn decrement(order_id: Uuid, product_id: i64, quantity: i64) -> Self {
        Self::new(order_id, product_id, quantity, StockAction::Decrement)
    }

    pub fn increment(order_id: Uuid, product_id: i64, quantity: i64) -> Self {
        Self::new(order_id, product_id, quantity, StockAction::Increment)
    }

    fn new(order_id: Uuid, product_id: i64, quantity: i64, action: StockAction) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            order_id,
            product_id,
            quantity,
            action,
        }
    }
}

/// Terminal outcome of a reservation request. Carries everything needed to
/// reverse exactly the operation that failed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservationResponse {
    pub request_id: Uuid,
    pub order_id: Uuid,
    pub product_id: i64,
    pub quantity: i64,
    pub action: StockAction,
    pub success: bool,
    pub reason: String,
}

impl ReservationResponse {
    pub fn succeeded(request: &ReservationRequest) -> Self {
        Self::for_request(request, true, String::new())
    }

    pub fn failed(request: &ReservationRequest, reason: impl Into<String>) -> Self {
        Self::for_request(request, false, reason.into())
    }

    fn for_request(request: &ReservationRequest, success: bool, reason: String) -> Self {
        Self {
            request_id: request.request_id,
            order_id: request.order_id,
            product_id: request.product_id,
            quantity: request.quantity,
            action: request.action,
            success,
            reason,
        }
    }
}
