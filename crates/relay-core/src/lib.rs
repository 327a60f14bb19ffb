//! Core domain types and contracts for the event relay.
//!
//! Defines the account, destination, and audit-log models, the persistence
//! contract used by every component, the audit sink that records pipeline
//! decisions, and the clock abstraction that keeps time-dependent logic
//! deterministic under test.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod audit;
pub mod error;
pub mod models;
pub mod storage;
pub mod time;

pub use audit::{AuditRecord, AuditSink, StorageAuditSink};
pub use error::{CoreError, Result};
pub use models::{
    Account, AccountId, Destination, DestinationId, DispatchEvent, EventId, EventStatus,
    HttpMethod, LogEntry, LogEntryId, LogLevel, UserId,
};
pub use storage::{LogFilter, PostgresStorage, RelayStorage};
pub use time::{Clock, RealClock, TestClock};

/// Log entries returned by a search when the caller gives no limit.
pub const DEFAULT_SEARCH_LIMIT: u32 = 100;
