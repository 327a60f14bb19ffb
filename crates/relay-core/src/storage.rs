//! Persistence layer for accounts, destinations, and the audit log.
//!
//! [`RelayStorage`] is the seam between the pipeline and Postgres. Handlers
//! and dispatchers hold `Arc<dyn RelayStorage>` so tests can swap in the
//! in-memory [`mock::MemoryStorage`] without a database.

use std::future::Future;
use std::pin::Pin;

use sqlx::PgPool;

use crate::error::Result;
use crate::models::{Account, Destination, LogEntry, LogLevel, UserId};
use crate::DEFAULT_SEARCH_LIMIT;

/// Filter for audit-log searches.
///
/// Every field is optional; an unset field matches all entries. `event_id`
/// matches against the correlation id recorded in entry details.
#[derive(Debug, Clone, Default)]
pub struct LogFilter {
    /// Match entries at exactly this severity.
    pub level: Option<LogLevel>,
    /// Match entries whose details carry this correlation id.
    pub event_id: Option<String>,
    /// Match entries attributed to this user.
    pub user_id: Option<UserId>,
    /// Match entries at or after this time.
    pub from: Option<chrono::DateTime<chrono::Utc>>,
    /// Match entries at or before this time.
    pub to: Option<chrono::DateTime<chrono::Utc>>,
    /// Maximum entries returned, newest first.
    pub limit: Option<u32>,
}

/// Storage operations the relay pipeline depends on.
pub trait RelayStorage: Send + Sync {
    /// Resolves the account owning this secret token, if any.
    fn find_account_by_token(
        &self,
        token: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Account>>> + Send + '_>>;

    /// Loads every registered destination.
    fn list_destinations(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Destination>>> + Send + '_>>;

    /// Appends one entry to the audit log.
    fn insert_log(
        &self,
        entry: LogEntry,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Searches the audit log, newest entries first.
    fn search_logs(
        &self,
        filter: LogFilter,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<LogEntry>>> + Send + '_>>;

    /// Verifies the backing store is reachable.
    fn ping(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}

/// Postgres-backed storage.
#[derive(Debug, Clone)]
pub struct PostgresStorage {
    pool: PgPool,
}

impl PostgresStorage {
    /// Creates storage over an existing connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl RelayStorage for PostgresStorage {
    fn find_account_by_token(
        &self,
        token: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Account>>> + Send + '_>> {
        let token = token.to_owned();
        Box::pin(async move {
            let account = sqlx::query_as::<_, Account>(
                "SELECT id, account_name, secret_token, website, created_by, updated_by, \
                 created_at, updated_at \
                 FROM accounts WHERE secret_token = $1",
            )
            .bind(token)
            .fetch_optional(&self.pool)
            .await?;
            Ok(account)
        })
    }

    fn list_destinations(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Destination>>> + Send + '_>> {
        Box::pin(async move {
            let destinations = sqlx::query_as::<_, Destination>(
                "SELECT id, url, http_method, headers, created_at, updated_at \
                 FROM destinations ORDER BY created_at",
            )
            .fetch_all(&self.pool)
            .await?;
            Ok(destinations)
        })
    }

    fn insert_log(
        &self,
        entry: LogEntry,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            sqlx::query(
                "INSERT INTO log_entries (id, level, message, details, user_id, timestamp) \
                 VALUES ($1, $2, $3, $4, $5, $6)",
            )
            .bind(entry.id)
            .bind(entry.level)
            .bind(entry.message)
            .bind(entry.details)
            .bind(entry.user_id)
            .bind(entry.timestamp)
            .execute(&self.pool)
            .await?;
            Ok(())
        })
    }

    fn search_logs(
        &self,
        filter: LogFilter,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<LogEntry>>> + Send + '_>> {
        Box::pin(async move {
            let limit = i64::from(filter.limit.unwrap_or(DEFAULT_SEARCH_LIMIT));
            let entries = sqlx::query_as::<_, LogEntry>(
                "SELECT id, level, message, details, user_id, timestamp \
                 FROM log_entries \
                 WHERE ($1::text IS NULL OR level = $1) \
                   AND ($2::text IS NULL OR details->>'event_id' = $2) \
                   AND ($3::uuid IS NULL OR user_id = $3) \
                   AND ($4::timestamptz IS NULL OR timestamp >= $4) \
                   AND ($5::timestamptz IS NULL OR timestamp <= $5) \
                 ORDER BY timestamp DESC LIMIT $6",
            )
            .bind(filter.level.map(|level| level.to_string()))
            .bind(filter.event_id)
            .bind(filter.user_id)
            .bind(filter.from)
            .bind(filter.to)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
            Ok(entries)
        })
    }

    fn ping(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            sqlx::query("SELECT 1").execute(&self.pool).await?;
            Ok(())
        })
    }
}

/// In-memory storage for tests.
pub mod mock {
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
    use std::sync::RwLock;

    use serde_json::Value;

    use super::{LogFilter, RelayStorage};
    use crate::error::{CoreError, Result};
    use crate::models::{Account, Destination, LogEntry};
    use crate::DEFAULT_SEARCH_LIMIT;

    /// Vec-backed storage with failure injection.
    ///
    /// Failure flags make the corresponding operation return
    /// [`CoreError::Unavailable`], modelling a lost database connection.
    pub struct MemoryStorage {
        accounts: RwLock<Vec<Account>>,
        destinations: RwLock<Vec<Destination>>,
        logs: RwLock<Vec<LogEntry>>,
        fail_account_lookups: AtomicBool,
        fail_destination_loads: AtomicBool,
        fail_log_writes: AtomicBool,
        fail_log_searches: AtomicBool,
        fail_pings: AtomicBool,
        account_lookups: AtomicU64,
    }

    impl MemoryStorage {
        /// Creates empty storage with no injected failures.
        pub fn new() -> Self {
            Self {
                accounts: RwLock::new(Vec::new()),
                destinations: RwLock::new(Vec::new()),
                logs: RwLock::new(Vec::new()),
                fail_account_lookups: AtomicBool::new(false),
                fail_destination_loads: AtomicBool::new(false),
                fail_log_writes: AtomicBool::new(false),
                fail_log_searches: AtomicBool::new(false),
                fail_pings: AtomicBool::new(false),
                account_lookups: AtomicU64::new(0),
            }
        }

        /// Registers an account.
        pub fn insert_account(&self, account: Account) {
            self.accounts.write().expect("accounts lock poisoned").push(account);
        }

        /// Registers a destination.
        pub fn insert_destination(&self, destination: Destination) {
            self.destinations.write().expect("destinations lock poisoned").push(destination);
        }

        /// Seeds a pre-built audit entry without going through a sink.
        pub fn insert_log_entry(&self, entry: LogEntry) {
            self.logs.write().expect("logs lock poisoned").push(entry);
        }

        /// Snapshot of the audit log in insertion order.
        pub fn logs(&self) -> Vec<LogEntry> {
            self.logs.read().expect("logs lock poisoned").clone()
        }

        /// Audit entries with exactly this message.
        pub fn logs_with_message(&self, message: &str) -> Vec<LogEntry> {
            self.logs().into_iter().filter(|entry| entry.message == message).collect()
        }

        /// Number of audit entries with exactly this message.
        pub fn count_message(&self, message: &str) -> usize {
            self.logs().iter().filter(|entry| entry.message == message).count()
        }

        /// Makes account lookups fail.
        pub fn fail_account_lookups(&self, fail: bool) {
            self.fail_account_lookups.store(fail, Ordering::SeqCst);
        }

        /// Makes destination loads fail.
        pub fn fail_destination_loads(&self, fail: bool) {
            self.fail_destination_loads.store(fail, Ordering::SeqCst);
        }

        /// Makes audit writes fail.
        pub fn fail_log_writes(&self, fail: bool) {
            self.fail_log_writes.store(fail, Ordering::SeqCst);
        }

        /// Makes audit searches fail.
        pub fn fail_log_searches(&self, fail: bool) {
            self.fail_log_searches.store(fail, Ordering::SeqCst);
        }

        /// Makes pings fail.
        pub fn fail_pings(&self, fail: bool) {
            self.fail_pings.store(fail, Ordering::SeqCst);
        }

        /// Number of account lookups performed so far.
        pub fn account_lookups(&self) -> u64 {
            self.account_lookups.load(Ordering::SeqCst)
        }
    }

    impl Default for MemoryStorage {
        fn default() -> Self {
            Self::new()
        }
    }

    impl RelayStorage for MemoryStorage {
        fn find_account_by_token(
            &self,
            token: &str,
        ) -> Pin<Box<dyn Future<Output = Result<Option<Account>>> + Send + '_>> {
            self.account_lookups.fetch_add(1, Ordering::SeqCst);
            let result = if self.fail_account_lookups.load(Ordering::SeqCst) {
                Err(CoreError::unavailable("injected account lookup failure"))
            } else {
                let accounts = self.accounts.read().expect("accounts lock poisoned");
                Ok(accounts.iter().find(|account| account.secret_token == token).cloned())
            };
            Box::pin(async move { result })
        }

        fn list_destinations(
            &self,
        ) -> Pin<Box<dyn Future<Output = Result<Vec<Destination>>> + Send + '_>> {
            let result = if self.fail_destination_loads.load(Ordering::SeqCst) {
                Err(CoreError::unavailable("injected destination load failure"))
            } else {
                Ok(self.destinations.read().expect("destinations lock poisoned").clone())
            };
            Box::pin(async move { result })
        }

        fn insert_log(
            &self,
            entry: LogEntry,
        ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
            let result = if self.fail_log_writes.load(Ordering::SeqCst) {
                Err(CoreError::unavailable("injected log write failure"))
            } else {
                self.logs.write().expect("logs lock poisoned").push(entry);
                Ok(())
            };
            Box::pin(async move { result })
        }

        fn search_logs(
            &self,
            filter: LogFilter,
        ) -> Pin<Box<dyn Future<Output = Result<Vec<LogEntry>>> + Send + '_>> {
            if self.fail_log_searches.load(Ordering::SeqCst) {
                return Box::pin(async move {
                    Err(CoreError::unavailable("injected log search failure"))
                });
            }
            let limit = filter.limit.unwrap_or(DEFAULT_SEARCH_LIMIT) as usize;
            let logs = self.logs.read().expect("logs lock poisoned");
            let mut matches: Vec<LogEntry> = logs
                .iter()
                .filter(|entry| {
                    filter.level.is_none_or(|level| entry.level == level)
                        && filter.event_id.as_deref().is_none_or(|id| {
                            entry.details.get("event_id").and_then(Value::as_str) == Some(id)
                        })
                        && filter.user_id.is_none_or(|user| entry.user_id == Some(user))
                        && filter.from.is_none_or(|from| entry.timestamp >= from)
                        && filter.to.is_none_or(|to| entry.timestamp <= to)
                })
                .cloned()
                .collect();
            matches.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
            matches.truncate(limit);
            Box::pin(async move { Ok(matches) })
        }

        fn ping(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
            let result = if self.fail_pings.load(Ordering::SeqCst) {
                Err(CoreError::unavailable("injected ping failure"))
            } else {
                Ok(())
            };
            Box::pin(async move { result })
        }
    }
}
