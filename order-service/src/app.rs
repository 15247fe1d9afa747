use std::sync::Arc;

use axum::http::{header::{ACCEPT, CONTENT_TYPE}, HeaderName, HeaderValue, Method, StatusCode};
use axum::{middleware, routing::{get, post}, Router};
use common_stock_ledger::StockLedger;
use once_cell::sync::Lazy;
use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};
use tower_http::cors::{AllowOrigin, CorsLayer};

use crate::admission::AdmissionController;
use crate::order_handlers::{cancel_order, create_order, get_order, list_orders};
use crate::orders::OrderStore;
use crate::stock_handlers::{
    batch_set_stock, clear_stock, get_stock, list_stock, set_stock, stock_health,
};

// --- Service metrics (one registry per service, gathered at /metrics) ---
pub static ORDER_REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);
static HTTP_ERRORS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let v = IntCounterVec::new(
        Opts::new("http_errors_total", "Count of HTTP error responses emitted (status >= 400)"),
        &["service", "code", "status"],
    ).unwrap();
    ORDER_REGISTRY.register(Box::new(v.clone())).ok();
    v
});
pub static ORDERS_ADMITTED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    let c = IntCounter::new("orders_admitted_total", "Orders admitted after a successful cache reservation").unwrap();
    ORDER_REGISTRY.register(Box::new(c.clone())).ok();
    c
});
pub static ORDERS_REJECTED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    let c = IntCounter::new("orders_rejected_total", "Orders rejected by the cache admission gate").unwrap();
    ORDER_REGISTRY.register(Box::new(c.clone())).ok();
    c
});
pub static STOCK_COMPENSATIONS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    let c = IntCounter::new("stock_compensations_total", "Compensating releases applied back to the cache").unwrap();
    ORDER_REGISTRY.register(Box::new(c.clone())).ok();
    c
});

pub async fn http_error_metrics(req: axum::http::Request<axum::body::Body>, next: axum::middleware::Next) -> axum::response::Response {
    let resp = next.run(req).await;
    let status = resp.status();
    if status.as_u16() >= 400 {
        let code = resp.headers().get("X-Error-Code").and_then(|v| v.to_str().ok()).unwrap_or("unknown");
        HTTP_ERRORS_TOTAL.with_label_values(&["order-service", code, status.as_str()]).inc();
    }
    resp
}

pub async fn health() -> &'static str { "ok" }

#[derive(Clone)]
pub struct AppState {
    pub admission: Arc<AdmissionController>,
    pub orders: Arc<dyn OrderStore>,
    pub ledger: Arc<dyn StockLedger>,
}

async fn metrics() -> (StatusCode, String) {
    let encoder = TextEncoder::new();
    let families = ORDER_REGISTRY.gather();
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
        .allow_methods([
            Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS,
        ])
        .allow_headers([
            ACCEPT, CONTENT_TYPE, HeaderName::from_static("x-user-id"),
        ]);

    Router::new()
        .route("/healthz", get(health))
        .route("/orders", post(create_order).get(list_orders))
        .route("/orders/:order_id", get(get_order))
        .route("/orders/:order_id/cancel", post(cancel_order))
        // Administrative stock surface for operational tooling; the
        // transactional flow never goes through these.
        .route("/stock", get(list_stock).delete(clear_stock))
        .route("/stock/batch", post(batch_set_stock))
        .route("/stock/health", get(stock_health))
        .route("/stock/:product_id", get(get_stock).put(set_stock))
        .route("/metrics", get(metrics))
        .with_state(state)
        .layer(cors)
        .layer(middleware::from_fn(http_error_metrics))
}
