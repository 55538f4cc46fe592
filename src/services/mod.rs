//! Services module for revenue-matcher.

pub mod database;
pub mod memory;
pub mod metrics;
pub mod store;

pub use database::Database;
pub use memory::InMemoryLedger;
pub use metrics::{get_metrics, init_metrics};
pub use store::{BatchOutcome, HealthReport, LedgerStore, LedgerWrite};
