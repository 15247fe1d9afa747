use axum::extract::{Path, State};
use axum::Json;
use common_http_errors::ApiError;
use common_stock_ledger::LedgerError;
use serde::{Deserialize, Serialize};

use crate::app::AppState;

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockEntry {
    pub product_id: i64,
    pub quantity: i64,
}

#[derive(Debug, Deserialize)]
pub struct SetStockPayload {
    pub quantity: i64,
}

#[derive(Debug, Serialize)]
pub struct StockHealth {
    pub healthy: bool,
}

fn ledger_error(err: LedgerError) -> ApiError {
    ApiError::unavailable("stock_ledger_unavailable", err.to_string())
}

pub async fn list_stock(State(state): State<AppState>) -> Result<Json<Vec<StockEntry>>, ApiError> {
    let entries = state.ledger.list_all().await.map_err(ledger_error)?;
    Ok(Json(
        entries
            .into_iter()
            .map(|(product_id, quantity)| StockEntry { product_id, quantity })
            .collect(),
    ))
}

pub async fn get_stock(
    State(state): State<AppState>,
    Path(product_id): Path<i64>,
) -> Result<Json<StockEntry>, ApiError> {
    let quantity = state.ledger.get_quantity(product_id).await.map_err(ledger_error)?;
    Ok(Json(StockEntry { product_id, quantity }))
}

pub async fn set_stock(
    State(state): State<AppState>,
    Path(product_id): Path<i64>,
    Json(payload): Json<SetStockPayload>,
) -> Result<Json<StockEntry>, ApiError> {
    if product_id < 1 {
        return Err(ApiError::bad_request("invalid_product_id", None));
    }
    state
        .ledger
        .set_quantity(product_id, payload.quantity)
        .await
        .map_err(ledger_error)?;
    Ok(Json(StockEntry { product_id, quantity: payload.quantity }))
}

pub async fn batch_set_stock(
    State(state): State<AppState>,
    Json(entries): Json<Vec<StockEntry>>,
) -> Result<Json<usize>, ApiError> {
    if entries.iter().any(|entry| entry.product_id < 1) {
        return Err(ApiError::bad_request("invalid_product_id", None));
    }
    let pairs: Vec<(i64, i64)> = entries
        .iter()
        .map(|entry| (entry.product_id, entry.quantity))
        .collect();
    state.ledger.bulk_set(&pairs).await.map_err(ledger_error)?;
    Ok(Json(entries.len()))
}

pub async fn clear_stock(State(state): State<AppState>) -> Result<Json<StockHealth>, ApiError> {
    state.ledger.clear_all().await.map_err(ledger_error)?;
    Ok(Json(StockHealth { healthy: true }))
}

pub async fn stock_health(State(state): State<AppState>) -> Json<StockHealth> {
    Json(StockHealth { healthy: state.ledger.ping().await })
}
