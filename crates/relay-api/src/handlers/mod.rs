//! HTTP request handlers.

pub mod health;
pub mod ingest;
pub mod logs;

pub use health::{health_check, liveness_check, readiness_check};
pub use ingest::{ingest_account_data, IngestError};
pub use logs::search_logs;
