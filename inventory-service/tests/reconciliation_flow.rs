use std::sync::Arc;

use common_event_channel::{
    InMemoryEventChannel, ReservationRequest, ReservationResponse, StockAction,
    INVENTORY_RESPONSE_TOPIC,
};
use inventory_service::inventory::{InMemoryInventoryStore, InventoryStore, NewInventory};
use inventory_service::ReconciliationWorker;
use uuid::Uuid;

async fn seeded_store(product_id: i64, quantity: i64) -> Arc<InMemoryInventoryStore> {
    let store = Arc::new(InMemoryInventoryStore::new());
    store
        .create(NewInventory {
            product_id,
            product_name: "widget".into(),
            quantity,
            price: 9.99,
        })
        .await
        .unwrap();
    store
}

fn worker(store: Arc<InMemoryInventoryStore>) -> (ReconciliationWorker, Arc<InMemoryEventChannel>) {
    let channel = Arc::new(InMemoryEventChannel::new());
    let worker = ReconciliationWorker::new(
        store,
        channel.clone(),
        INVENTORY_RESPONSE_TOPIC.to_string(),
    );
    (worker, channel)
}

#[tokio::test]
async fn decrement_applies_and_succeeds() {
    let store = seeded_store(1, 100).await;
    let (worker, _channel) = worker(store.clone());

    let request = ReservationRequest::decrement(Uuid::new_v4(), 1, 3);
    let response = worker.handle(&request).await;

    assert!(response.success);
    assert_eq!(response.request_id, request.request_id);
    assert_eq!(response.order_id, request.order_id);
    assert_eq!(store.find(1).await.unwrap().quantity, 97);
}

#[tokio::test]
async fn insufficient_stock_fails_without_change() {
    let store = seeded_store(1, 2).await;
    let (worker, _channel) = worker(store.clone());

    let request = ReservationRequest::decrement(Uuid::new_v4(), 1, 5);
    let response = worker.handle(&request).await;

    assert!(!response.success);
    assert_eq!(response.reason, "insufficient stock");
    assert_eq!(store.find(1).await.unwrap().quantity, 2);
}

#[tokio::test]
async fn unknown_product_fails() {
    let store = Arc::new(InMemoryInventoryStore::new());
    let (worker, _channel) = worker(store);

    let request = ReservationRequest::decrement(Uuid::new_v4(), 42, 1);
    let response = worker.handle(&request).await;

    assert!(!response.success);
    assert_eq!(response.reason, "not found");
}

#[tokio::test]
async fn increment_restores_quantity() {
    let store = seeded_store(1, 97).await;
    let (worker, _channel) = worker(store.clone());

    let request = ReservationRequest::increment(Uuid::new_v4(), 1, 3);
    let response = worker.handle(&request).await;

    assert!(response.success);
    assert_eq!(store.find(1).await.unwrap().quantity, 100);
}

#[tokio::test]
async fn increment_on_missing_product_fails() {
    let store = Arc::new(InMemoryInventoryStore::new());
    let (worker, _channel) = worker(store);

    let request = ReservationRequest::increment(Uuid::new_v4(), 7, 3);
    let response = worker.handle(&request).await;

    assert!(!response.success);
    assert_eq!(response.reason, "not found");
}

#[tokio::test]
async fn redelivered_request_is_applied_once() {
    let store = seeded_store(1, 100).await;
    let (worker, _channel) = worker(store.clone());

    let request = ReservationRequest::decrement(Uuid::new_v4(), 1, 3);
    let first = worker.handle(&request).await;
    let second = worker.handle(&request).await;

    assert!(first.success);
    assert!(second.success);
    assert_eq!(second.reason, "duplicate");
    assert_eq!(store.find(1).await.unwrap().quantity, 97);
}

#[tokio::test]
async fn redelivered_failed_request_repeats_the_failure() {
    let store = seeded_store(1, 2).await;
    let (worker, _channel) = worker(store.clone());

    let request = ReservationRequest::decrement(Uuid::new_v4(), 1, 5);
    let first = worker.handle(&request).await;
    let second = worker.handle(&request).await;

    // A failure records no idempotency marker, so redelivery answers with
    // the same failure and the order side can still compensate.
    assert!(!first.success);
    assert!(!second.success);
    assert_eq!(second.reason, "insufficient stock");
    assert_eq!(store.find(1).await.unwrap().quantity, 2);
}

#[tokio::test]
async fn redelivery_after_restock_can_still_apply() {
    let store = seeded_store(1, 2).await;
    let (worker, _channel) = worker(store.clone());

    let request = ReservationRequest::decrement(Uuid::new_v4(), 1, 5);
    assert!(!worker.handle(&request).await.success);

    store
        .update(1, inventory_service::inventory::InventoryUpdate { quantity: Some(10), price: None })
        .await
        .unwrap();
    let retried = worker.handle(&request).await;
    assert!(retried.success);
    assert_eq!(store.find(1).await.unwrap().quantity, 5);
}

#[tokio::test]
async fn store_error_becomes_failure_response() {
    let store = seeded_store(1, 100).await;
    store.fail_applies(true);
    let (worker, _channel) = worker(store);

    let request = ReservationRequest::decrement(Uuid::new_v4(), 1, 3);
    let response = worker.handle(&request).await;

    assert!(!response.success);
    assert!(response.reason.contains("simulated store failure"));
}

#[tokio::test]
async fn process_publishes_response_on_the_wire() {
    let store = seeded_store(1, 2).await;
    let (worker, channel) = worker(store);
    let mut rx = channel.subscribe(INVENTORY_RESPONSE_TOPIC);

    let request = ReservationRequest::decrement(Uuid::new_v4(), 1, 5);
    worker.process(&request).await;

    let payload = rx.recv().await.expect("a response must be published");
    let response: ReservationResponse = serde_json::from_slice(&payload).unwrap();
    assert!(!response.success);
    assert_eq!(response.request_id, request.request_id);
    assert_eq!(response.action, StockAction::Decrement);
}
