//! Event relay HTTP API.
//!
//! Exposes the ingestion endpoint that authenticates inbound account data,
//! admits it through the rate limiter, fans it out to registered
//! destinations, and offloads background processing, plus the audit-log
//! search and health surfaces around it.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod auth;
pub mod config;
pub mod handlers;
pub mod limit;
pub mod server;

pub use config::RelayConfig;
pub use server::{create_router, start_server, AppState};

/// Header carrying the account's secret token.
pub const TOKEN_HEADER: &str = "cl-x-token";

/// Header carrying the caller-supplied event correlation id.
pub const EVENT_ID_HEADER: &str = "cl-x-event-id";
