use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderStatus {
    Pending,
    Completed,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::Completed => "COMPLETED",
            OrderStatus::Cancelled => "CANCELLED",
        }
    }

    fn parse(raw: &str) -> Result<Self, OrderStoreError> {
        match raw {
            "PENDING" => Ok(OrderStatus::Pending),
            "COMPLETED" => Ok(OrderStatus::Completed),
            "CANCELLED" => Ok(OrderStatus::Cancelled),
            other => Err(OrderStoreError::Backend(format!(
                "unknown order status: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: Uuid,
    pub user_id: i64,
    pub product_id: i64,
    pub product_name: String,
    pub price: f64,
    pub quantity: i64,
    pub total_amount: f64,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
}

/// Input to `create_pending`; the total is derived, the id assigned here.
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub user_id: i64,
    pub product_id: i64,
    pub product_name: String,
    pub price: f64,
    pub quantity: i64,
}

#[derive(Debug, Error)]
pub enum OrderStoreError {
    #[error("order not found")]
    NotFound,
    #[error("order cannot be cancelled")]
    NotCancellable,
    #[error("order store error: {0}")]
    Backend(String),
}

impl From<sqlx::Error> for OrderStoreError {
    fn from(err: sqlx::Error) -> Self {
        OrderStoreError::Backend(err.to_string())
    }
}

#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Durably record a new order in `PENDING`.
    async fn create_pending(&self, new_order: NewOrder) -> Result<Order, OrderStoreError>;

    /// Transition `PENDING` -> `CANCELLED`; any other current state is
    /// `NotCancellable`. Scoped to the requesting user.
    async fn mark_cancelled(&self, order_id: Uuid, user_id: i64) -> Result<Order, OrderStoreError>;

    async fn find_by_id(&self, order_id: Uuid, user_id: i64) -> Result<Order, OrderStoreError>;

    /// All orders for a user, newest first.
    async fn find_by_user(&self, user_id: i64) -> Result<Vec<Order>, OrderStoreError>;
}

// ---------------- Postgres Implementation ----------------

#[derive(sqlx::FromRow)]
struct OrderRow {
    id: Uuid,
    user_id: i64,
    product_id: i64,
    product_name: String,
    price: f64,
    quantity: i64,
    total_amount: f64,
    status: String,
    created_at: DateTime<Utc>,
}

impl OrderRow {
    fn into_order(self) -> Result<Order, OrderStoreError> {
        Ok(Order {
            id: self.id,
            user_id: self.user_id,
            product_id: self.product_id,
            product_name: self.product_name,
            price: self.price,
            quantity: self.quantity,
            total_amount: self.total_amount,
            status: OrderStatus::parse(&self.status)?,
            created_at: self.created_at,
        })
    }
}

const ORDER_COLUMNS: &str =
    "id, user_id, product_id, product_name, price, quantity, total_amount, status, created_at";

#[derive(Clone)]
pub struct PgOrderStore {
    db: PgPool,
}

impl PgOrderStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl OrderStore for PgOrderStore {
    async fn create_pending(&self, new_order: NewOrder) -> Result<Order, OrderStoreError> {
        let total_amount = new_order.price * new_order.quantity as f64;
        let row = sqlx::query_as::<_, OrderRow>(&format!(
            "INSERT INTO orders (id, user_id, product_id, product_name, price, quantity, total_amount, status) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, 'PENDING') RETURNING {ORDER_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(new_order.user_id)
        .bind(new_order.product_id)
        .bind(&new_order.product_name)
        .bind(new_order.price)
        .bind(new_order.quantity)
        .bind(total_amount)
        .fetch_one(&self.db)
        .await?;
        row.into_order()
    }

    async fn mark_cancelled(&self, order_id: Uuid, user_id: i64) -> Result<Order, OrderStoreError> {
        let updated = sqlx::query_as::<_, OrderRow>(&format!(
            "UPDATE orders SET status = 'CANCELLED' \
             WHERE id = $1 AND user_id = $2 AND status = 'PENDING' RETURNING {ORDER_COLUMNS}"
        ))
        .bind(order_id)
        .bind(user_id)
        .fetch_optional(&self.db)
        .await?;

        match updated {
            Some(row) => row.into_order(),
            None => {
                // Distinguish a missing order from one in a terminal state.
                let exists = sqlx::query_scalar::<_, i64>(
                    "SELECT 1 FROM orders WHERE id = $1 AND user_id = $2",
                )
                .bind(order_id)
                .bind(user_id)
                .fetch_optional(&self.db)
                .await?;
                match exists {
                    Some(_) => Err(OrderStoreError::NotCancellable),
                    None => Err(OrderStoreError::NotFound),
                }
            }
        }
    }

    async fn find_by_id(&self, order_id: Uuid, user_id: i64) -> Result<Order, OrderStoreError> {
        let row = sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1 AND user_id = $2"
        ))
        .bind(order_id)
        .bind(user_id)
        .fetch_optional(&self.db)
        .await?;
        row.ok_or(OrderStoreError::NotFound)?.into_order()
    }

    async fn find_by_user(&self, user_id: i64) -> Result<Vec<Order>, OrderStoreError> {
        let rows = sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE user_id = $1 ORDER BY created_at DESC"
        ))
        .bind(user_id)
        .fetch_all(&self.db)
        .await?;
        rows.into_iter().map(OrderRow::into_order).collect()
    }
}

// ---------------- In-Memory Implementation (Tests) ----------------

/// Keeps orders in a map and can be told to fail the next durable write,
/// which is how the persistence-failure compensation path gets exercised.
#[derive(Default)]
pub struct InMemoryOrderStore {
    orders: Mutex<HashMap<Uuid, Order>>,
    fail_creates: AtomicBool,
}

impl InMemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_creates(&self, fail: bool) {
        self.fail_creates.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn create_pending(&self, new_order: NewOrder) -> Result<Order, OrderStoreError> {
        if self.fail_creates.load(Ordering::SeqCst) {
            return Err(OrderStoreError::Backend("simulated write failure".into()));
        }
        let order = Order {
            id: Uuid::new_v4(),
            user_id: new_order.user_id,
            product_id: new_order.product_id,
            product_name: new_order.product_name,
            price: new_order.price,
            quantity: new_order.quantity,
            total_amount: new_order.price * new_order.quantity as f64,
            status: OrderStatus::Pending,
            created_at: Utc::now(),
        };
        self.orders.lock().await.insert(order.id, order.clone());
        Ok(order)
    }

    async fn mark_cancelled(&self, order_id: Uuid, user_id: i64) -> Result<Order, OrderStoreError> {
        let mut guard = self.orders.lock().await;
        let order = guard
            .get_mut(&order_id)
            .filter(|order| order.user_id == user_id)
            .ok_or(OrderStoreError::NotFound)?;
        if order.status != OrderStatus::Pending {
            return Err(OrderStoreError::NotCancellable);
        }
        order.status = OrderStatus::Cancelled;
        Ok(order.clone())
    }

    async fn find_by_id(&self, order_id: Uuid, user_id: i64) -> Result<Order, OrderStoreError> {
        self.orders
            .lock()
            .await
            .get(&order_id)
            .filter(|order| order.user_id == user_id)
            .cloned()
            .ok_or(OrderStoreError::NotFound)
    }

    async fn find_by_user(&self, user_id: i64) -> Result<Vec<Order>, OrderStoreError> {
        let mut orders: Vec<Order> = self
            .orders
            .lock()
            .await
            .values()
            .filter(|order| order.user_id == user_id)
            .cloned()
            .collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(orders)
    }
}
