use std::sync::Arc;

use axum::http::{header::{ACCEPT, CONTENT_TYPE}, HeaderName, HeaderValue, Method, StatusCode};
use axum::{middleware, routing::get, Router};
use common_stock_ledger::StockLedger;
use once_cell::sync::Lazy;
use prometheus::{Encoder, IntCounterVec, Opts, Registry, TextEncoder};
use tower_http::cors::{AllowOrigin, CorsLayer};

use crate::inventory::InventoryStore;
use crate::inventory_handlers::{
    create_inventory, delete_inventory, get_inventory, list_inventory, update_inventory,
};

// --- Service metrics (one registry per service, gathered at /metrics) ---
pub static INVENTORY_REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);
static HTTP_ERRORS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let v = IntCounterVec::new(
        Opts::new("http_errors_total", "Count of HTTP error responses emitted (status >= 400)"),
        &["service", "code", "status"],
    ).unwrap();
    INVENTORY_REGISTRY.register(Box::new(v.clone())).ok();
    v
});
pub static RECONCILIATION_REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let v = IntCounterVec::new(
        Opts::new("reconciliation_requests_total", "Reservation requests applied to the durable store, by action and outcome"),
        &["action", "outcome"],
    ).unwrap();
    INVENTORY_REGISTRY.register(Box::new(v.clone())).ok();
    v
});

pub async fn http_error_metrics(req: axum::http::Request<axum::body::Body>, next: axum::middleware::Next) -> axum::response::Response {
    let resp = next.run(req).await;
    let status = resp.status();
    if status.as_u16() >= 400 {
        let code = resp.headers().get("X-Error-Code").and_then(|v| v.to_str().ok()).unwrap_or("unknown");
        HTTP_ERRORS_TOTAL.with_label_values(&["inventory-service", code, status.as_str()]).inc();
    }
    resp
}

pub async fn health() -> &'static str { "ok" }

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn InventoryStore>,
    pub ledger: Arc<dyn StockLedger>,
}

async fn metrics() -> (StatusCode, String) {
    let encoder = TextEncoder::new();
    let families = INVENTORY_REGISTRY.gather();
    let mut buf = Vec::new();
    if let Err(e) = encoder.encode(&families, &mut buf) {
        return (StatusCode::INTERNAL_SERVER_ERROR, format!("metrics encode error: {e}"));
    }
    (StatusCode::OK, String::from_utf8_lossy(&buf).to_string())
}

pub fn build_router(state: AppState) -> Router {
    let allowed_origins = [
        "http://localhost:3000",
        "http://localhost:3001",
        "http://localhost:5173",
    ];
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(
            allowed_origins.iter().filter_map(|o| o.parse::<HeaderValue>().ok()).collect::<Vec<_>>(),
        ))
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers([
            ACCEPT, CONTENT_TYPE, HeaderName::from_static("x-user-id"),
        ]);

    Router::new()
        .route("/healthz", get(health))
        .route("/inventory", get(list_inventory).post(create_inventory))
        .route(
            "/inventory/:product_id",
            get(get_inventory).put(update_inventory).delete(delete_inventory),
        )
        .route("/metrics", get(metrics))
        .with_state(state)
        .layer(cors)
        .layer(middleware::from_fn(http_error_metrics))
}
