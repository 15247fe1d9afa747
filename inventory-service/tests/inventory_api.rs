use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use common_stock_ledger::{InMemoryStockLedger, StockLedger};
use inventory_service::app::AppState;
use inventory_service::build_router;
use inventory_service::inventory::InMemoryInventoryStore;
use tower::ServiceExt;

fn test_state() -> (AppState, Arc<InMemoryStockLedger>) {
    let store = Arc::new(InMemoryInventoryStore::new());
    let ledger = Arc::new(InMemoryStockLedger::new());
    (AppState { store, ledger: ledger.clone() }, ledger)
}

fn json_request(method: &str, uri: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn body_json(resp: axum::response::Response) -> serde_json::Value {
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn create_seeds_the_stock_cache() {
    let (state, ledger) = test_state();
    let app = build_router(state);

    let resp = app
        .oneshot(json_request(
            "POST",
            "/inventory",
            r#"{"productId":1,"productName":"widget","quantity":50,"price":9.99}"#,
        ))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_json(resp).await;
    assert_eq!(body["productId"], 1);
    assert_eq!(body["quantity"], 50);
    assert_eq!(ledger.get_quantity(1).await.unwrap(), 50);
}

#[tokio::test]
async fn duplicate_create_conflicts() {
    let (state, _) = test_state();
    let app = build_router(state);
    let payload = r#"{"productId":1,"productName":"widget","quantity":50,"price":9.99}"#;

    let first = app
        .clone()
        .oneshot(json_request("POST", "/inventory", payload))
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::OK);

    let second = app
        .oneshot(json_request("POST", "/inventory", payload))
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::CONFLICT);
    assert_eq!(second.headers().get("X-Error-Code").unwrap(), "product_exists");
}

#[tokio::test]
async fn create_rejects_negative_quantity() {
    let (state, ledger) = test_state();
    let app = build_router(state);

    let resp = app
        .oneshot(json_request(
            "POST",
            "/inventory",
            r#"{"productId":1,"productName":"widget","quantity":-1,"price":9.99}"#,
        ))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert_eq!(resp.headers().get("X-Error-Code").unwrap(), "invalid_quantity");
    assert_eq!(ledger.list_all().await.unwrap().len(), 0);
}

#[tokio::test]
async fn get_and_list_read_back_created_records() {
    let (state, _) = test_state();
    let app = build_router(state);

    for (id, qty) in [(2_i64, 10_i64), (1, 5)] {
        let payload = format!(
            r#"{{"productId":{id},"productName":"widget-{id}","quantity":{qty},"price":1.0}}"#
        );
        let resp = app
            .clone()
            .oneshot(json_request("POST", "/inventory", &payload))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    let resp = app
        .clone()
        .oneshot(Request::builder().uri("/inventory/2").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_json(resp).await["quantity"], 10);

    let resp = app
        .oneshot(Request::builder().uri("/inventory").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let body = body_json(resp).await;
    let listed: Vec<i64> = body
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["productId"].as_i64().unwrap())
        .collect();
    assert_eq!(listed, vec![1, 2]);
}

#[tokio::test]
async fn get_unknown_product_is_not_found() {
    let (state, _) = test_state();
    let app = build_router(state);

    let resp = app
        .oneshot(Request::builder().uri("/inventory/99").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    assert_eq!(resp.headers().get("X-Error-Code").unwrap(), "product_not_found");
}

#[tokio::test]
async fn delete_removes_record_and_cache_entry() {
    let (state, ledger) = test_state();
    let app = build_router(state);

    let resp = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/inventory",
            r#"{"productId":1,"productName":"widget","quantity":50,"price":9.99}"#,
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(ledger.get_quantity(1).await.unwrap(), 50);

    let resp = app
        .clone()
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri("/inventory/1")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_json(resp).await["productId"], 1);

    // Both the record and the cached quantity are gone, so admission has
    // nothing left to reserve against.
    assert!(ledger.list_all().await.unwrap().is_empty());
    let resp = app
        .oneshot(Request::builder().uri("/inventory/1").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn delete_unknown_product_is_not_found() {
    let (state, _) = test_state();
    let app = build_router(state);

    let resp = app
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri("/inventory/99")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    assert_eq!(resp.headers().get("X-Error-Code").unwrap(), "product_not_found");
}

#[tokio::test]
async fn quantity_update_resyncs_the_cache() {
    let (state, ledger) = test_state();
    let app = build_router(state);

    let resp = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/inventory",
            r#"{"productId":1,"productName":"widget","quantity":50,"price":9.99}"#,
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = app
        .clone()
        .oneshot(json_request("PUT", "/inventory/1", r#"{"quantity":80}"#))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_json(resp).await["quantity"], 80);
    assert_eq!(ledger.get_quantity(1).await.unwrap(), 80);

    // A price-only update leaves the cache alone.
    ledger.set_quantity(1, 77).await.unwrap();
    let resp = app
        .oneshot(json_request("PUT", "/inventory/1", r#"{"price":4.5}"#))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(ledger.get_quantity(1).await.unwrap(), 77);
}
