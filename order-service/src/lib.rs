pub mod admission;
pub mod app;
pub mod compensation;
pub mod config;
pub mod order_handlers;
pub mod orders;
pub mod stock_handlers;

pub use admission::{AdmissionController, AdmissionError, CancelError};
pub use app::{build_router, AppState};
pub use compensation::CompensationListener;
pub use config::OrderServiceConfig;
