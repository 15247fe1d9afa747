use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common_event_channel::{
    InMemoryEventChannel, ReservationRequest, RetryPolicy, StockAction, INVENTORY_REQUEST_TOPIC,
};
use common_stock_ledger::{InMemoryStockLedger, LedgerError, StockLedger};
use order_service::admission::{AdmissionController, AdmissionError, CancelError};
use order_service::orders::{InMemoryOrderStore, NewOrder, OrderStatus};
use tokio::sync::mpsc::UnboundedReceiver;
use uuid::Uuid;

fn retry() -> RetryPolicy {
    RetryPolicy::new(2, Duration::from_millis(1))
}

fn new_order(product_id: i64, quantity: i64) -> NewOrder {
    NewOrder {
        user_id: 1,
        product_id,
        product_name: "widget".into(),
        price: 9.5,
        quantity,
    }
}

struct Harness {
    ledger: Arc<InMemoryStockLedger>,
    store: Arc<InMemoryOrderStore>,
    controller: Arc<AdmissionController>,
    requests: UnboundedReceiver<Vec<u8>>,
}

fn harness() -> Harness {
    let ledger = Arc::new(InMemoryStockLedger::new());
    let store = Arc::new(InMemoryOrderStore::new());
    let channel = InMemoryEventChannel::new();
    let requests = channel.subscribe(INVENTORY_REQUEST_TOPIC);
    let controller = Arc::new(AdmissionController::new(
        ledger.clone(),
        store.clone(),
        Arc::new(channel),
        retry(),
        INVENTORY_REQUEST_TOPIC.to_string(),
    ));
    Harness { ledger, store, controller, requests }
}

fn parse_request(payload: Vec<u8>) -> ReservationRequest {
    serde_json::from_slice(&payload).expect("request payload")
}

#[tokio::test]
async fn admit_reserves_persists_and_publishes_decrement() {
    let mut h = harness();
    h.ledger.set_quantity(7, 100).await.unwrap();

    let order = h.controller.admit(new_order(7, 2)).await.unwrap();
    assert_eq!(order.status, OrderStatus::Pending);
    assert_eq!(order.total_amount, 19.0);
    assert_eq!(h.ledger.get_quantity(7).await.unwrap(), 98);

    let request = parse_request(h.requests.recv().await.unwrap());
    assert_eq!(request.order_id, order.id);
    assert_eq!(request.product_id, 7);
    assert_eq!(request.quantity, 2);
    assert_eq!(request.action, StockAction::Decrement);

    // The durable order record survives independently of reconciliation.
    let found = h.store.find_by_id(order.id, 1).await.unwrap();
    assert_eq!(found.status, OrderStatus::Pending);
}

#[tokio::test]
async fn insufficient_stock_rejects_without_side_effects() {
    let mut h = harness();
    h.ledger.set_quantity(7, 1).await.unwrap();

    let err = h.controller.admit(new_order(7, 2)).await.unwrap_err();
    assert!(matches!(err, AdmissionError::Rejected { product_id: 7 }));
    assert_eq!(h.ledger.get_quantity(7).await.unwrap(), 1);
    assert!(h.requests.try_recv().is_err());
    assert!(h.store.find_by_user(1).await.unwrap().is_empty());
}

#[tokio::test]
async fn concurrent_admissions_never_oversell() {
    let mut h = harness();
    h.ledger.set_quantity(9, 5).await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..10 {
        let controller = h.controller.clone();
        handles.push(tokio::spawn(async move {
            controller.admit(new_order(9, 2)).await
        }));
    }

    let mut admitted = 0;
    let mut rejected = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => admitted += 1,
            Err(AdmissionError::Rejected { .. }) => rejected += 1,
            Err(other) => panic!("unexpected admission error: {other}"),
        }
    }

    assert!(admitted <= 2, "{admitted} admissions against stock 5");
    assert!(rejected >= 8);
    let remaining = h.ledger.get_quantity(9).await.unwrap();
    assert!(remaining >= 0);
    assert_eq!(remaining, 5 - admitted * 2);

    // One decrement request per admitted order, none for rejections.
    let mut published = 0;
    while h.requests.try_recv().is_ok() {
        published += 1;
    }
    assert_eq!(published, admitted);
}

#[tokio::test]
async fn persistence_failure_compensates_before_returning() {
    let mut h = harness();
    h.ledger.set_quantity(7, 100).await.unwrap();
    h.store.fail_creates(true);

    let err = h.controller.admit(new_order(7, 2)).await.unwrap_err();
    assert!(matches!(err, AdmissionError::Persistence(_)));
    // Cache observed back at the pre-admission value.
    assert_eq!(h.ledger.get_quantity(7).await.unwrap(), 100);
    assert!(h.requests.try_recv().is_err());
}

#[tokio::test]
async fn cancel_releases_once_and_publishes_increment() {
    let mut h = harness();
    h.ledger.set_quantity(7, 100).await.unwrap();

    let order = h.controller.admit(new_order(7, 3)).await.unwrap();
    assert_eq!(h.ledger.get_quantity(7).await.unwrap(), 97);
    let _decrement = parse_request(h.requests.recv().await.unwrap());

    let cancelled = h.controller.cancel(order.id, 1).await.unwrap();
    assert_eq!(cancelled.status, OrderStatus::Cancelled);
    assert_eq!(h.ledger.get_quantity(7).await.unwrap(), 100);

    let increment = parse_request(h.requests.recv().await.unwrap());
    assert_eq!(increment.action, StockAction::Increment);
    assert_eq!(increment.order_id, order.id);
    assert_eq!(increment.quantity, 3);

    // A second cancellation is rejected and releases nothing.
    let err = h.controller.cancel(order.id, 1).await.unwrap_err();
    assert!(matches!(err, CancelError::NotCancellable));
    assert_eq!(h.ledger.get_quantity(7).await.unwrap(), 100);
    assert!(h.requests.try_recv().is_err());
}

#[tokio::test]
async fn cancel_unknown_order_is_not_found() {
    let h = harness();
    let err = h.controller.cancel(Uuid::new_v4(), 1).await.unwrap_err();
    assert!(matches!(err, CancelError::NotFound));
}

struct DownLedger;

#[async_trait]
impl StockLedger for DownLedger {
    async fn try_reserve(&self, _: i64, _: i64) -> Result<bool, LedgerError> {
        Err(LedgerError::MalformedValue { key: "stock:7".into(), value: "unreachable".into() })
    }
    async fn release(&self, _: i64, _: i64) -> Result<i64, LedgerError> {
        Err(LedgerError::MalformedValue { key: "stock:7".into(), value: "unreachable".into() })
    }
    async fn set_quantity(&self, _: i64, _: i64) -> Result<(), LedgerError> { Ok(()) }
    async fn bulk_set(&self, _: &[(i64, i64)]) -> Result<(), LedgerError> { Ok(()) }
    async fn get_quantity(&self, _: i64) -> Result<i64, LedgerError> { Ok(0) }
    async fn list_all(&self) -> Result<Vec<(i64, i64)>, LedgerError> { Ok(Vec::new()) }
    async fn remove(&self, _: i64) -> Result<(), LedgerError> { Ok(()) }
    async fn clear_all(&self) -> Result<(), LedgerError> { Ok(()) }
    async fn ping(&self) -> bool { false }
}

#[tokio::test]
async fn unreachable_ledger_is_a_hard_rejection() {
    let store = Arc::new(InMemoryOrderStore::new());
    let controller = AdmissionController::new(
        Arc::new(DownLedger),
        store.clone(),
        Arc::new(InMemoryEventChannel::new()),
        retry(),
        INVENTORY_REQUEST_TOPIC.to_string(),
    );
    let err = controller.admit(new_order(7, 1)).await.unwrap_err();
    assert!(matches!(err, AdmissionError::LedgerUnavailable(_)));
    assert!(store.find_by_user(1).await.unwrap().is_empty());
}
