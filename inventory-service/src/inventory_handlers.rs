use axum::extract::{Path, State};
use axum::Json;
use common_http_errors::ApiError;
use serde::Deserialize;
use tracing::info;

use crate::app::AppState;
use crate::inventory::{InventoryRecord, InventoryStoreError, InventoryUpdate, NewInventory};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateInventoryPayload {
    pub product_id: i64,
    pub product_name: String,
    pub quantity: i64,
    pub price: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateInventoryPayload {
    pub quantity: Option<i64>,
    pub price: Option<f64>,
}

fn store_error(err: InventoryStoreError) -> ApiError {
    match err {
        InventoryStoreError::NotFound => {
            ApiError::NotFound { code: "product_not_found", trace_id: None }
        }
        InventoryStoreError::AlreadyExists => {
            ApiError::conflict("product_exists", "Product already exists in inventory")
        }
        InventoryStoreError::Backend(message) => ApiError::internal(message, None),
    }
}

/// Create a durable record and seed the cache with the same absolute
/// quantity, so admission starts from the durable truth.
pub async fn create_inventory(
    State(state): State<AppState>,
    Json(payload): Json<CreateInventoryPayload>,
) -> Result<Json<InventoryRecord>, ApiError> {
    if payload.product_id < 1 {
        return Err(ApiError::bad_request("invalid_product_id", None));
    }
    if payload.quantity < 0 {
        return Err(ApiError::bad_request("invalid_quantity", None));
    }
    if payload.price < 0.0 {
        return Err(ApiError::bad_request("invalid_price", None));
    }

    let record = state
        .store
        .create(NewInventory {
            product_id: payload.product_id,
            product_name: payload.product_name,
            quantity: payload.quantity,
            price: payload.price,
        })
        .await
        .map_err(store_error)?;

    state
        .ledger
        .set_quantity(record.product_id, record.quantity)
        .await
        .map_err(|err| ApiError::unavailable("stock_ledger_unavailable", err.to_string()))?;

    info!(product_id = record.product_id, quantity = record.quantity, "inventory created and cache seeded");
    Ok(Json(record))
}

pub async fn list_inventory(
    State(state): State<AppState>,
) -> Result<Json<Vec<InventoryRecord>>, ApiError> {
    let records = state.store.list().await.map_err(store_error)?;
    Ok(Json(records))
}

pub async fn get_inventory(
    State(state): State<AppState>,
    Path(product_id): Path<i64>,
) -> Result<Json<InventoryRecord>, ApiError> {
    let record = state.store.find(product_id).await.map_err(store_error)?;
    Ok(Json(record))
}

/// Admin correction; a quantity change re-syncs the cache with the new
/// absolute value.
pub async fn update_inventory(
    State(state): State<AppState>,
    Path(product_id): Path<i64>,
    Json(payload): Json<UpdateInventoryPayload>,
) -> Result<Json<InventoryRecord>, ApiError> {
    if let Some(quantity) = payload.quantity {
        if quantity < 0 {
            return Err(ApiError::bad_request("invalid_quantity", None));
        }
    }
    if let Some(price) = payload.price {
        if price < 0.0 {
            return Err(ApiError::bad_request("invalid_price", None));
        }
    }

    let record = state
        .store
        .update(product_id, InventoryUpdate { quantity: payload.quantity, price: payload.price })
        .await
        .map_err(store_error)?;

    if payload.quantity.is_some() {
        state
            .ledger
            .set_quantity(record.product_id, record.quantity)
            .await
            .map_err(|err| ApiError::unavailable("stock_ledger_unavailable", err.to_string()))?;
        info!(product_id = record.product_id, quantity = record.quantity, "inventory updated and cache re-synced");
    }

    Ok(Json(record))
}

/// Remove the record and its cache entry, so admission stops seeing the
/// product at all.
pub async fn delete_inventory(
    State(state): State<AppState>,
    Path(product_id): Path<i64>,
) -> Result<Json<InventoryRecord>, ApiError> {
    let record = state.store.delete(product_id).await.map_err(store_error)?;

    state
        .ledger
        .remove(record.product_id)
        .await
        .map_err(|err| ApiError::unavailable("stock_ledger_unavailable", err.to_string()))?;

    info!(product_id = record.product_id, "inventory deleted and cache entry removed");
    Ok(Json(record))
}
