//! Stock ledger: the in-memory quantity store that gates order admission.
//!
//! All admission decisions go through [`StockLedger::try_reserve`], a single
//! indivisible check-and-decrement. A read followed by a separate write is
//! exactly the race this crate exists to rule out, so the Redis
//! implementation runs a server-side Lua script and the in-memory
//! implementation holds one lock across the check and the mutation.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;

use redis::aio::ConnectionManager;
use redis::AsyncCommands;

const KEY_PREFIX: &str = "stock:";

/// Key under which a product's cached quantity lives.
pub fn stock_key(product_id: i64) -> String {
    format!("{KEY_PREFIX}{product_id}")
}

fn product_id_from_key(key: &str) -> Option<i64> {
    key.strip_prefix(KEY_PREFIX)?.parse().ok()
}

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("redis command failed: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("malformed ledger value for {key}: {value}")]
    MalformedValue { key: String, value: String },
}

#[async_trait]
pub trait StockLedger: Send + Sync {
    /// Atomically decrement the cached quantity by `quantity` if at least
    /// that much is available (a missing entry counts as zero). Returns
    /// whether the reservation was taken; on `false` nothing changed.
    async fn try_reserve(&self, product_id: i64, quantity: i64) -> Result<bool, LedgerError>;

    /// Unconditionally add `quantity` back (compensation / cancellation).
    /// Returns the new cached value. No bound is enforced: a release may
    /// push the value above whatever was originally set.
    async fn release(&self, product_id: i64, quantity: i64) -> Result<i64, LedgerError>;

    /// Overwrite the absolute cached quantity (init / admin correction).
    async fn set_quantity(&self, product_id: i64, quantity: i64) -> Result<(), LedgerError>;

    /// Overwrite several absolute quantities in one round trip.
    async fn bulk_set(&self, entries: &[(i64, i64)]) -> Result<(), LedgerError>;

    /// Current cached quantity; a missing entry reads as zero.
    async fn get_quantity(&self, product_id: i64) -> Result<i64, LedgerError>;

    /// Every cached entry, sorted ascending by product id.
    async fn list_all(&self) -> Result<Vec<(i64, i64)>, LedgerError>;

    /// Remove one cached entry; a missing entry is not an error.
    async fn remove(&self, product_id: i64) -> Result<(), LedgerError>;

    /// Remove every cached entry.
    async fn clear_all(&self) -> Result<(), LedgerError>;

    /// Liveness probe for the backing store.
    async fn ping(&self) -> bool;
}

// ---------------- Redis Implementation ----------------

/// Checks the current value and decrements in one server-side step, so
/// concurrent reservations for the same product are linearized by Redis.
const TRY_RESERVE_SCRIPT: &str = r#"
local key = KEYS[1]
local quantity = tonumber(ARGV[1])
local current = tonumber(redis.call('GET', key) or 0)
if current >= quantity then
  redis.call('DECRBY', key, quantity)
  return 1
else
  return 0
end
"#;

#[derive(Clone)]
pub struct RedisStockLedger {
    manager: ConnectionManager,
    reserve_script: redis::Script,
}

impl RedisStockLedger {
    pub async fn new(redis_url: &str) -> Result<Self, LedgerError> {
        let client = redis::Client::open(redis_url)?;
        let manager = ConnectionManager::new(client).await?;
        Ok(Self::from_manager(manager))
    }

    pub fn from_manager(manager: ConnectionManager) -> Self {
        Self {
            manager,
            reserve_script: redis::Script::new(TRY_RESERVE_SCRIPT),
        }
    }

    async fn keys_in_namespace(&self) -> Result<Vec<String>, LedgerError> {
        let mut conn = self.manager.clone();
        let mut keys = Vec::new();
        let mut iter = conn.scan_match::<_, String>(format!("{KEY_PREFIX}*")).await?;
        while let Some(key) = iter.next_item().await {
            keys.push(key);
        }
        Ok(keys)
    }
}

#[async_trait]
impl StockLedger for RedisStockLedger {
    async fn try_reserve(&self, product_id: i64, quantity: i64) -> Result<bool, LedgerError> {
        let mut conn = self.manager.clone();
        let taken: i64 = self
            .reserve_script
            .key(stock_key(product_id))
            .arg(quantity)
            .invoke_async(&mut conn)
            .await?;
        Ok(taken == 1)
    }

    async fn release(&self, product_id: i64, quantity: i64) -> Result<i64, LedgerError> {
        let mut conn = self.manager.clone();
        let value: i64 = conn.incr(stock_key(product_id), quantity).await?;
        Ok(value)
    }

    async fn set_quantity(&self, product_id: i64, quantity: i64) -> Result<(), LedgerError> {
        let mut conn = self.manager.clone();
        let _: () = conn.set(stock_key(product_id), quantity).await?;
        Ok(())
    }

    async fn bulk_set(&self, entries: &[(i64, i64)]) -> Result<(), LedgerError> {
        if entries.is_empty() {
            return Ok(());
        }
        let mut pipe = redis::pipe();
        for (product_id, quantity) in entries {
            pipe.set(stock_key(*product_id), *quantity).ignore();
        }
        let mut conn = self.manager.clone();
        let _: () = pipe.query_async(&mut conn).await?;
        Ok(())
    }

    async fn get_quantity(&self, product_id: i64) -> Result<i64, LedgerError> {
        let mut conn = self.manager.clone();
        let value: Option<String> = conn.get(stock_key(product_id)).await?;
        match value {
            None => Ok(0),
            Some(raw) => raw.parse().map_err(|_| LedgerError::MalformedValue {
                key: stock_key(product_id),
                value: raw,
            }),
        }
    }

    async fn list_all(&self) -> Result<Vec<(i64, i64)>, LedgerError> {
        let keys = self.keys_in_namespace().await?;
        let mut conn = self.manager.clone();
        let mut entries = Vec::with_capacity(keys.len());
        for key in keys {
            let Some(product_id) = product_id_from_key(&key) else {
                continue;
            };
            let value: Option<i64> = conn.get(&key).await?;
            // Entry can expire between SCAN and GET; treat as gone.
            if let Some(quantity) = value {
                entries.push((product_id, quantity));
            }
        }
        entries.sort_by_key(|(product_id, _)| *product_id);
        Ok(entries)
    }

    async fn remove(&self, product_id: i64) -> Result<(), LedgerError> {
        let mut conn = self.manager.clone();
        let _: i64 = conn.del(stock_key(product_id)).await?;
        Ok(())
    }

    async fn clear_all(&self) -> Result<(), LedgerError> {
        let keys = self.keys_in_namespace().await?;
        if keys.is_empty() {
            return Ok(());
        }
        let mut conn = self.manager.clone();
        let removed: i64 = conn.del(keys).await?;
        tracing::info!(removed, "cleared stock ledger entries");
        Ok(())
    }

    async fn ping(&self) -> bool {
        let mut conn = self.manager.clone();
        match redis::cmd("PING").query_async::<_, String>(&mut conn).await {
            Ok(reply) => reply == "PONG",
            Err(err) => {
                tracing::warn!(error = %err, "stock ledger ping failed");
                false
            }
        }
    }
}

// ---------------- In-Memory Implementation (Tests) ----------------

/// Lock-per-call mirror of the Redis semantics. The mutex spans the
/// check and the decrement, which is what makes `try_reserve` linearizable.
#[derive(Clone, Default)]
pub struct InMemoryStockLedger {
    inner: Arc<Mutex<HashMap<i64, i64>>>,
}

impl InMemoryStockLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StockLedger for InMemoryStockLedger {
    async fn try_reserve(&self, product_id: i64, quantity: i64) -> Result<bool, LedgerError> {
        let mut guard = self.inner.lock().await;
        let current = guard.get(&product_id).copied().unwrap_or(0);
        if current >= quantity {
            guard.insert(product_id, current - quantity);
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn release(&self, product_id: i64, quantity: i64) -> Result<i64, LedgerError> {
        let mut guard = self.inner.lock().await;
        let value = guard.entry(product_id).or_insert(0);
        *value += quantity;
        Ok(*value)
    }

    async fn set_quantity(&self, product_id: i64, quantity: i64) -> Result<(), LedgerError> {
        self.inner.lock().await.insert(product_id, quantity);
        Ok(())
    }

    async fn bulk_set(&self, entries: &[(i64, i64)]) -> Result<(), LedgerError> {
        let mut guard = self.inner.lock().await;
        for (product_id, quantity) in entries {
            guard.insert(*product_id, *quantity);
        }
        Ok(())
    }

    async fn get_quantity(&self, product_id: i64) -> Result<i64, LedgerError> {
        Ok(self.inner.lock().await.get(&product_id).copied().unwrap_or(0))
    }

    async fn list_all(&self) -> Result<Vec<(i64, i64)>, LedgerError> {
        let mut entries: Vec<(i64, i64)> = self
            .inner
            .lock()
            .await
            .iter()
            .map(|(product_id, quantity)| (*product_id, *quantity))
            .collect();
        entries.sort_by_key(|(product_id, _)| *product_id);
        Ok(entries)
    }

    async fn remove(&self, product_id: i64) -> Result<(), LedgerError> {
        self.inner.lock().await.remove(&product_id);
        Ok(())
    }

    async fn clear_all(&self) -> Result<(), LedgerError> {
        self.inner.lock().await.clear();
        Ok(())
    }

    async fn ping(&self) -> bool {
        true
    }
}
