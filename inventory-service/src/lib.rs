pub mod app;
pub mod config;
pub mod inventory;
pub mod inventory_handlers;
pub mod reconciliation;

pub use app::{build_router, AppState};
pub use config::InventoryServiceConfig;
pub use reconciliation::ReconciliationWorker;
