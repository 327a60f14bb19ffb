//! Append-only audit trail for pipeline observations.
//!
//! Every stage of the relay reports what happened through an [`AuditSink`].
//! Sinks are fire-and-forget: recording never returns an error and never
//! blocks the pipeline, because losing an audit entry must not change the
//! outcome of the request that produced it.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::models::{LogEntry, LogEntryId, LogLevel, UserId};
use crate::storage::RelayStorage;
use crate::time::Clock;

/// One observation on its way into the audit trail.
///
/// Carries everything except the entry ID and timestamp, which the sink
/// assigns at write time.
#[derive(Debug, Clone)]
pub struct AuditRecord {
    /// Severity of the observation.
    pub level: LogLevel,
    /// Stable human-readable summary.
    pub message: String,
    /// Structured context: correlation ids, outcomes, counts.
    pub details: Value,
    /// Acting user, when the stage had one.
    pub user_id: Option<UserId>,
}

impl AuditRecord {
    /// Creates an info-level record.
    pub fn info(message: impl Into<String>, details: Value) -> Self {
        Self { level: LogLevel::Info, message: message.into(), details, user_id: None }
    }

    /// Creates a warn-level record.
    pub fn warn(message: impl Into<String>, details: Value) -> Self {
        Self { level: LogLevel::Warn, message: message.into(), details, user_id: None }
    }

    /// Creates an error-level record.
    pub fn error(message: impl Into<String>, details: Value) -> Self {
        Self { level: LogLevel::Error, message: message.into(), details, user_id: None }
    }

    /// Attributes the record to a user, when one is known.
    pub fn with_user(mut self, user_id: impl Into<Option<UserId>>) -> Self {
        self.user_id = user_id.into();
        self
    }
}

/// Destination for audit records.
///
/// Implementations must swallow their own failures. A sink that cannot
/// persist an entry reports it through operational logging and drops the
/// entry; callers never observe the loss.
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Records one observation. Infallible from the caller's perspective.
    async fn record(&self, record: AuditRecord);
}

/// Audit sink backed by relay storage.
pub struct StorageAuditSink {
    storage: Arc<dyn RelayStorage>,
    clock: Arc<dyn Clock>,
}

impl StorageAuditSink {
    /// Creates a sink writing entries through the given storage.
    pub fn new(storage: Arc<dyn RelayStorage>, clock: Arc<dyn Clock>) -> Self {
        Self { storage, clock }
    }
}

#[async_trait]
impl AuditSink for StorageAuditSink {
    async fn record(&self, record: AuditRecord) {
        let entry = LogEntry {
            id: LogEntryId::new(),
            level: record.level,
            message: record.message,
            details: record.details,
            user_id: record.user_id,
            timestamp: self.clock.now_utc(),
        };

        let message = entry.message.clone();
        if let Err(error) = self.storage.insert_log(entry).await {
            tracing::warn!(%error, dropped = %message, "audit write dropped");
        }
    }
}

/// In-memory audit sink for tests.
pub mod mock {
    use std::sync::{Arc, RwLock};

    use async_trait::async_trait;

    use super::{AuditRecord, AuditSink};
    use crate::models::{LogEntry, LogEntryId};
    use crate::time::{Clock, RealClock};

    /// Collects audit entries in memory so tests can assert on them.
    pub struct MemoryAuditSink {
        entries: RwLock<Vec<LogEntry>>,
        clock: Arc<dyn Clock>,
    }

    impl MemoryAuditSink {
        /// Creates an empty sink stamping entries with the real clock.
        pub fn new() -> Self {
            Self::with_clock(Arc::new(RealClock))
        }

        /// Creates an empty sink stamping entries with the given clock.
        pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
            Self { entries: RwLock::new(Vec::new()), clock }
        }

        /// Snapshot of all recorded entries in insertion order.
        pub fn entries(&self) -> Vec<LogEntry> {
            self.entries.read().expect("audit entries lock poisoned").clone()
        }

        /// Messages of all recorded entries in insertion order.
        pub fn messages(&self) -> Vec<String> {
            self.entries().into_iter().map(|entry| entry.message).collect()
        }

        /// Number of recorded entries with exactly this message.
        pub fn count_message(&self, message: &str) -> usize {
            self.entries().iter().filter(|entry| entry.message == message).count()
        }

        /// All recorded entries with exactly this message.
        pub fn entries_with_message(&self, message: &str) -> Vec<LogEntry> {
            self.entries().into_iter().filter(|entry| entry.message == message).collect()
        }
    }

    impl Default for MemoryAuditSink {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl AuditSink for MemoryAuditSink {
        async fn record(&self, record: AuditRecord) {
            let entry = LogEntry {
                id: LogEntryId::new(),
                level: record.level,
                message: record.message,
                details: record.details,
                user_id: record.user_id,
                timestamp: self.clock.now_utc(),
            };
            self.entries.write().expect("audit entries lock poisoned").push(entry);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::mock::MemoryAuditSink;
    use super::*;
    use crate::models::LogLevel;
    use crate::storage::mock::MemoryStorage;
    use crate::time::TestClock;

    #[tokio::test]
    async fn storage_sink_persists_entry_with_clock_timestamp() {
        let storage = Arc::new(MemoryStorage::new());
        let clock = Arc::new(TestClock::new());
        let sink = StorageAuditSink::new(storage.clone(), clock.clone());

        clock.advance(Duration::from_millis(250));
        sink.record(
            AuditRecord::info("Event dispatched", json!({"event_id": "evt-1"})).with_user(
                crate::models::UserId::new(),
            ),
        )
        .await;

        let entries = storage.logs();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].level, LogLevel::Info);
        assert_eq!(entries[0].message, "Event dispatched");
        assert_eq!(entries[0].details["event_id"], json!("evt-1"));
        assert!(entries[0].user_id.is_some());
    }

    #[tokio::test]
    async fn storage_sink_swallows_write_failures() {
        let storage = Arc::new(MemoryStorage::new());
        storage.fail_log_writes(true);
        let sink = StorageAuditSink::new(storage.clone(), Arc::new(TestClock::new()));

        // Must not panic or surface the failure.
        sink.record(AuditRecord::error("Webhook delivery failed", json!({}))).await;

        assert!(storage.logs().is_empty());
    }

    #[tokio::test]
    async fn memory_sink_counts_messages() {
        let sink = MemoryAuditSink::new();
        sink.record(AuditRecord::info("Webhook delivered", json!({"status": 200}))).await;
        sink.record(AuditRecord::info("Webhook delivered", json!({"status": 204}))).await;
        sink.record(AuditRecord::error("Webhook delivery failed", json!({"status": 500}))).await;

        assert_eq!(sink.count_message("Webhook delivered"), 2);
        assert_eq!(sink.count_message("Webhook delivery failed"), 1);
        assert_eq!(sink.messages().len(), 3);
    }
}
