use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use common_http_errors::ApiError;
use serde::Deserialize;
use uuid::Uuid;

use crate::admission::{AdmissionError, CancelError};
use crate::app::AppState;
use crate::orders::{NewOrder, Order, OrderStoreError};

/// Identity is verified upstream; the service trusts the forwarded user id.
pub fn user_id_from_headers(headers: &HeaderMap) -> Result<i64, ApiError> {
    let Some(hdr) = headers.get("X-User-ID") else {
        return Err(ApiError::BadRequest {
            code: "missing_user_id",
            trace_id: None,
            message: Some("Missing X-User-ID header".into()),
        });
    };
    hdr.to_str()
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .filter(|id| *id >= 1)
        .ok_or(ApiError::BadRequest {
            code: "invalid_user_id",
            trace_id: None,
            message: Some("Invalid X-User-ID header".into()),
        })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderPayload {
    pub product_id: i64,
    pub product_name: String,
    pub price: f64,
    pub quantity: i64,
}

pub async fn create_order(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreateOrderPayload>,
) -> Result<Json<Order>, ApiError> {
    let user_id = user_id_from_headers(&headers)?;
    if payload.product_id < 1 {
        return Err(ApiError::bad_request("invalid_product_id", None));
    }
    if payload.quantity < 1 {
        return Err(ApiError::BadRequest {
            code: "invalid_quantity",
            trace_id: None,
            message: Some("Quantity must be positive".into()),
        });
    }
    if payload.price < 0.0 {
        return Err(ApiError::bad_request("invalid_price", None));
    }

    let new_order = NewOrder {
        user_id,
        product_id: payload.product_id,
        product_name: payload.product_name,
        price: payload.price,
        quantity: payload.quantity,
    };

    let order = state.admission.admit(new_order).await.map_err(|err| match err {
        AdmissionError::Rejected { product_id } => ApiError::conflict(
            "insufficient_stock",
            format!("Insufficient stock for product {product_id}"),
        ),
        AdmissionError::LedgerUnavailable(err) => {
            ApiError::unavailable("stock_ledger_unavailable", err.to_string())
        }
        AdmissionError::Persistence(message) => ApiError::internal(message, None),
    })?;
    Ok(Json(order))
}

pub async fn cancel_order(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(order_id): Path<Uuid>,
) -> Result<Json<Order>, ApiError> {
    let user_id = user_id_from_headers(&headers)?;
    let order = state.admission.cancel(order_id, user_id).await.map_err(|err| match err {
        CancelError::NotFound => ApiError::NotFound { code: "order_not_found", trace_id: None },
        CancelError::NotCancellable => {
            ApiError::conflict("order_not_cancellable", "Order cannot be cancelled")
        }
        CancelError::Persistence(message) => ApiError::internal(message, None),
    })?;
    Ok(Json(order))
}

pub async fn get_order(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(order_id): Path<Uuid>,
) -> Result<Json<Order>, ApiError> {
    let user_id = user_id_from_headers(&headers)?;
    let order = state.orders.find_by_id(order_id, user_id).await.map_err(|err| match err {
        OrderStoreError::NotFound => ApiError::NotFound { code: "order_not_found", trace_id: None },
        other => ApiError::internal(other, None),
    })?;
    Ok(Json(order))
}

pub async fn list_orders(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<Order>>, ApiError> {
    let user_id = user_id_from_headers(&headers)?;
    let orders = state
        .orders
        .find_by_user(user_id)
        .await
        .map_err(|err| ApiError::internal(err, None))?;
    Ok(Json(orders))
}
