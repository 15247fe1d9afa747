use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::PgPool;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryRecord {
    pub product_id: i64,
    pub product_name: String,
    pub quantity: i64,
    pub price: f64,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewInventory {
    pub product_id: i64,
    pub product_name: String,
    pub quantity: i64,
    pub price: f64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct InventoryUpdate {
    pub quantity: Option<i64>,
    pub price: Option<f64>,
}

/// Terminal result of applying a reservation request to the durable store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied { remaining: i64 },
    /// The request id was already processed; nothing was re-applied.
    Duplicate,
    Insufficient { current: i64 },
    NotFound,
}

#[derive(Debug, Error)]
pub enum InventoryStoreError {
    #[error("product not found in inventory")]
    NotFound,
    #[error("product already exists in inventory")]
    AlreadyExists,
    #[error("inventory store error: {0}")]
    Backend(String),
}

impl From<sqlx::Error> for InventoryStoreError {
    fn from(err: sqlx::Error) -> Self {
        InventoryStoreError::Backend(err.to_string())
    }
}

#[async_trait]
pub trait InventoryStore: Send + Sync {
    /// Decrement if at least `quantity` is durably available, recording
    /// `request_id` so a redelivered request is recognized. The check, the
    /// decrement, and the marker share one transaction; a failed outcome
    /// records nothing, so redelivery repeats the failure response.
    async fn apply_decrement(
        &self,
        request_id: Uuid,
        product_id: i64,
        quantity: i64,
    ) -> Result<ApplyOutcome, InventoryStoreError>;

    /// Unconditional increment of an existing record, deduplicated the same
    /// way. A missing record is `NotFound`.
    async fn apply_increment(
        &self,
        request_id: Uuid,
        product_id: i64,
        quantity: i64,
    ) -> Result<ApplyOutcome, InventoryStoreError>;

    async fn create(&self, new: NewInventory) -> Result<InventoryRecord, InventoryStoreError>;
    async fn find(&self, product_id: i64) -> Result<InventoryRecord, InventoryStoreError>;
    async fn list(&self) -> Result<Vec<InventoryRecord>, InventoryStoreError>;
    async fn update(
        &self,
        product_id: i64,
        update: InventoryUpdate,
    ) -> Result<InventoryRecord, InventoryStoreError>;

    /// Remove the record, returning it; a missing record is `NotFound`.
    async fn delete(&self, product_id: i64) -> Result<InventoryRecord, InventoryStoreError>;
}

// ---------------- Postgres Implementation ----------------

#[derive(sqlx::FromRow)]
struct InventoryRow {
    product_id: i64,
    product_name: String,
    quantity: i64,
    price: f64,
    updated_at: DateTime<Utc>,
}

impl From<InventoryRow> for InventoryRecord {
    fn from(row: InventoryRow) -> Self {
        InventoryRecord {
            product_id: row.product_id,
            product_name: row.product_name,
            quantity: row.quantity,
            price: row.price,
            updated_at: row.updated_at,
        }
    }
}

const INVENTORY_COLUMNS: &str = "product_id, product_name, quantity, price, updated_at";

#[derive(Clone)]
pub struct PgInventoryStore {
    db: PgPool,
}

impl PgInventoryStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    /// Insert the idempotency marker inside `tx`; false means the request
    /// was already processed.
    async fn mark_processed(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        request_id: Uuid,
    ) -> Result<bool, InventoryStoreError> {
        let result = sqlx::query(
            "INSERT INTO processed_requests (request_id) VALUES ($1) ON CONFLICT (request_id) DO NOTHING",
        )
        .bind(request_id)
        .execute(&mut **tx)
        .await?;
        Ok(result.rows_affected() == 1)
    }
}

#[async_trait]
impl InventoryStore for PgInventoryStore {
    async fn apply_decrement(
        &self,
        request_id: Uuid,
        product_id: i64,
        quantity: i64,
    ) -> Result<ApplyOutcome, InventoryStoreError> {
        let mut tx = self.db.begin().await?;
        if !Self::mark_processed(&mut tx, request_id).await? {
            tx.rollback().await?;
            return Ok(ApplyOutcome::Duplicate);
        }

        let updated = sqlx::query_scalar::<_, i64>(
            "UPDATE inventory SET quantity = quantity - $2, updated_at = NOW() \
             WHERE product_id = $1 AND quantity >= $2 RETURNING quantity",
        )
        .bind(product_id)
        .bind(quantity)
        .fetch_optional(&mut *tx)
        .await?;

        let outcome = match updated {
            Some(remaining) => ApplyOutcome::Applied { remaining },
            None => {
                let current = sqlx::query_scalar::<_, i64>(
                    "SELECT quantity FROM inventory WHERE product_id = $1",
                )
                .bind(product_id)
                .fetch_optional(&mut *tx)
                .await?;
                match current {
                    Some(current) => ApplyOutcome::Insufficient { current },
                    None => ApplyOutcome::NotFound,
                }
            }
        };
        // The marker commits only with an applied change; a redelivered
        // failed request must re-emit its failure, not read as a duplicate.
        match outcome {
            ApplyOutcome::Applied { .. } => tx.commit().await?,
            _ => tx.rollback().await?,
        }
        Ok(outcome)
    }

    async fn apply_increment(
        &self,
        request_id: Uuid,
        product_id: i64,
        quantity: i64,
    ) -> Result<ApplyOutcome, InventoryStoreError> {
        let mut tx = self.db.begin().await?;
        if !Self::mark_processed(&mut tx, request_id).await? {
            tx.rollback().await?;
            return Ok(ApplyOutcome::Duplicate);
        }

        let updated = sqlx::query_scalar::<_, i64>(
            "UPDATE inventory SET quantity = quantity + $2, updated_at = NOW() \
             WHERE product_id = $1 RETURNING quantity",
        )
        .bind(product_id)
        .bind(quantity)
        .fetch_optional(&mut *tx)
        .await?;

        let outcome = match updated {
            Some(remaining) => ApplyOutcome::Applied { remaining },
            None => ApplyOutcome::NotFound,
        };
        match outcome {
            ApplyOutcome::Applied { .. } => tx.commit().await?,
            _ => tx.rollback().await?,
        }
        Ok(outcome)
    }

    async fn create(&self, new: NewInventory) -> Result<InventoryRecord, InventoryStoreError> {
        let row = sqlx::query_as::<_, InventoryRow>(&format!(
            "INSERT INTO inventory (product_id, product_name, quantity, price) \
             VALUES ($1, $2, $3, $4) ON CONFLICT (product_id) DO NOTHING RETURNING {INVENTORY_COLUMNS}"
        ))
        .bind(new.product_id)
        .bind(&new.product_name)
        .bind(new.quantity)
        .bind(new.price)
        .fetch_optional(&self.db)
        .await?;
        row.map(InventoryRecord::from)
            .ok_or(InventoryStoreError::AlreadyExists)
    }

    async fn find(&self, product_id: i64) -> Result<InventoryRecord, InventoryStoreError> {
        let row = sqlx::query_as::<_, InventoryRow>(&format!(
            "SELECT {INVENTORY_COLUMNS} FROM inventory WHERE product_id = $1"
        ))
        .bind(product_id)
        .fetch_optional(&self.db)
        .await?;
        row.map(InventoryRecord::from)
            .ok_or(InventoryStoreError::NotFound)
    }

    async fn list(&self) -> Result<Vec<InventoryRecord>, InventoryStoreError> {
        let rows = sqlx::query_as::<_, InventoryRow>(&format!(
            "SELECT {INVENTORY_COLUMNS} FROM inventory ORDER BY product_id"
        ))
        .fetch_all(&self.db)
        .await?;
        Ok(rows.into_iter().map(InventoryRecord::from).collect())
    }

    async fn update(
        &self,
        product_id: i64,
        update: InventoryUpdate,
    ) -> Result<InventoryRecord, InventoryStoreError> {
        let row = sqlx::query_as::<_, InventoryRow>(&format!(
            "UPDATE inventory SET quantity = COALESCE($2, quantity), \
             price = COALESCE($3, price), updated_at = NOW() \
             WHERE product_id = $1 RETURNING {INVENTORY_COLUMNS}"
        ))
        .bind(product_id)
        .bind(update.quantity)
        .bind(update.price)
        .fetch_optional(&self.db)
        .await?;
        row.map(InventoryRecord::from)
            .ok_or(InventoryStoreError::NotFound)
    }

    async fn delete(&self, product_id: i64) -> Result<InventoryRecord, InventoryStoreError> {
        let row = sqlx::query_as::<_, InventoryRow>(&format!(
            "DELETE FROM inventory WHERE product_id = $1 RETURNING {INVENTORY_COLUMNS}"
        ))
        .bind(product_id)
        .fetch_optional(&self.db)
        .await?;
        row.map(InventoryRecord::from)
            .ok_or(InventoryStoreError::NotFound)
    }
}

// ---------------- In-Memory Implementation (Tests) ----------------

#[derive(Default)]
pub struct InMemoryInventoryStore {
    records: Mutex<HashMap<i64, InventoryRecord>>,
    processed: Mutex<HashSet<Uuid>>,
    fail_applies: AtomicBool,
}

impl InMemoryInventoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_applies(&self, fail: bool) {
        self.fail_applies.store(fail, Ordering::SeqCst);
    }

    async fn already_processed(&self, request_id: Uuid) -> bool {
        self.processed.lock().await.contains(&request_id)
    }
}

#[async_trait]
impl InventoryStore for InMemoryInventoryStore {
    async fn apply_decrement(
        &self,
        request_id: Uuid,
        product_id: i64,
        quantity: i64,
    ) -> Result<ApplyOutcome, InventoryStoreError> {
        if self.fail_applies.load(Ordering::SeqCst) {
            return Err(InventoryStoreError::Backend("simulated store failure".into()));
        }
        if self.already_processed(request_id).await {
            return Ok(ApplyOutcome::Duplicate);
        }
        let mut guard = self.records.lock().await;
        match guard.get_mut(&product_id) {
            None => Ok(ApplyOutcome::NotFound),
            Some(record) if record.quantity < quantity => {
                Ok(ApplyOutcome::Insufficient { current: record.quantity })
            }
            Some(record) => {
                record.quantity -= quantity;
                record.updated_at = Utc::now();
                self.processed.lock().await.insert(request_id);
                Ok(ApplyOutcome::Applied { remaining: record.quantity })
            }
        }
    }

    async fn apply_increment(
        &self,
        request_id: Uuid,
        product_id: i64,
        quantity: i64,
    ) -> Result<ApplyOutcome, InventoryStoreError> {
        if self.fail_applies.load(Ordering::SeqCst) {
            return Err(InventoryStoreError::Backend("simulated store failure".into()));
        }
        if self.already_processed(request_id).await {
            return Ok(ApplyOutcome::Duplicate);
        }
        let mut guard = self.records.lock().await;
        match guard.get_mut(&product_id) {
            None => Ok(ApplyOutcome::NotFound),
            Some(record) => {
                record.quantity += quantity;
                record.updated_at = Utc::now();
                self.processed.lock().await.insert(request_id);
                Ok(ApplyOutcome::Applied { remaining: record.quantity })
            }
        }
    }

    async fn create(&self, new: NewInventory) -> Result<InventoryRecord, InventoryStoreError> {
        let mut guard = self.records.lock().await;
        if guard.contains_key(&new.product_id) {
            return Err(InventoryStoreError::AlreadyExists);
        }
        let record = InventoryRecord {
            product_id: new.product_id,
            product_name: new.product_name,
            quantity: new.quantity,
            price: new.price,
            updated_at: Utc::now(),
        };
        guard.insert(record.product_id, record.clone());
        Ok(record)
    }

    async fn find(&self, product_id: i64) -> Result<InventoryRecord, InventoryStoreError> {
        self.records
            .lock()
            .await
            .get(&product_id)
            .cloned()
            .ok_or(InventoryStoreError::NotFound)
    }

    async fn list(&self) -> Result<Vec<InventoryRecord>, InventoryStoreError> {
        let mut records: Vec<InventoryRecord> =
            self.records.lock().await.values().cloned().collect();
        records.sort_by_key(|record| record.product_id);
        Ok(records)
    }

    async fn update(
        &self,
        product_id: i64,
        update: InventoryUpdate,
    ) -> Result<InventoryRecord, InventoryStoreError> {
        let mut guard = self.records.lock().await;
        let record = guard.get_mut(&product_id).ok_or(InventoryStoreError::NotFound)?;
        if let Some(quantity) = update.quantity {
            record.quantity = quantity;
        }
        if let Some(price) = update.price {
            record.price = price;
        }
        record.updated_at = Utc::now();
        Ok(record.clone())
    }

    async fn delete(&self, product_id: i64) -> Result<InventoryRecord, InventoryStoreError> {
        self.records
            .lock()
            .await
            .remove(&product_id)
            .ok_or(InventoryStoreError::NotFound)
    }
}
