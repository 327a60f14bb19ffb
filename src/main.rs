//! Event relay service.
//!
//! Main entry point. Loads configuration, connects storage, wires the
//! ingestion pipeline, and serves HTTP until shutdown.

use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use tracing::{error, info};

use relay_api::{start_server, AppState, RelayConfig};
use relay_core::{AuditSink, PostgresStorage, RealClock, RelayStorage, StorageAuditSink};
use relay_dispatch::{AccountEventProcessor, EventOffload};

/// Registry name of the built-in account event processor.
const ACCOUNT_PROCESSOR: &str = "account-events";

#[tokio::main]
async fn main() -> Result<()> {
    let config = RelayConfig::load().context("Failed to load configuration")?;
    config.validate()?;

    init_tracing(&config);

    info!("Starting event relay service");
    info!(
        environment = %config.environment,
        database_url = %config.database_url_masked(),
        max_connections = config.database_max_connections,
        "Configuration loaded"
    );

    // Create database connection pool
    let db_pool = create_database_pool(&config).await?;
    info!("Database connection pool established");

    // Run database migrations
    run_migrations(&db_pool).await?;
    info!("Database migrations completed");

    let addr = config.parse_server_addr().context("Invalid server bind address")?;

    let clock: Arc<dyn relay_core::Clock> = Arc::new(RealClock);
    let storage: Arc<dyn RelayStorage> = Arc::new(PostgresStorage::new(db_pool.clone()));
    let audit: Arc<dyn AuditSink> =
        Arc::new(StorageAuditSink::new(storage.clone(), clock.clone()));

    let offload = EventOffload::new(config.offload_processor.clone(), audit.clone())
        .register(ACCOUNT_PROCESSOR, Arc::new(AccountEventProcessor));

    let state = AppState::new(config, storage, audit, clock, offload)
        .context("Failed to wire request pipeline")?;

    // Start HTTP server
    let server_handle = tokio::spawn(async move {
        if let Err(e) = start_server(state, addr).await {
            error!(error = %e, "Server failed");
        }
    });

    info!(%addr, "Event relay is ready to receive account data");

    // Wait for shutdown signal
    shutdown_signal().await;
    info!("Shutdown signal received, starting graceful shutdown");

    // Give in-flight requests time to complete
    tokio::select! {
        _ = tokio::time::sleep(Duration::from_secs(30)) => {
            info!("Shutdown grace period expired");
        }
        _ = server_handle => {
            info!("Server stopped");
        }
    }

    // Close database connections
    db_pool.close().await;
    info!("Database connections closed");

    info!("Event relay shutdown complete");
    Ok(())
}

/// Initializes tracing from the resolved configuration.
fn init_tracing(config: &RelayConfig) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter =
        EnvFilter::try_new(&config.rust_log).unwrap_or_else(|_| EnvFilter::new("info"));

    let fmt_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true);

    tracing_subscriber::registry().with(filter).with(fmt_layer).init();
}

/// Creates the database connection pool with retry logic.
async fn create_database_pool(config: &RelayConfig) -> Result<sqlx::PgPool> {
    let mut retries = 0;
    const MAX_RETRIES: u32 = 5;
    const RETRY_DELAY: Duration = Duration::from_secs(2);

    loop {
        match PgPoolOptions::new()
            .max_connections(config.database_max_connections)
            .min_connections(config.database_min_connections)
            .acquire_timeout(Duration::from_secs(10))
            .idle_timeout(Duration::from_secs(600))
            .max_lifetime(Duration::from_secs(1800))
            .connect(&config.database_url)
            .await
        {
            Ok(pool) => {
                // Verify connection works
                sqlx::query("SELECT 1")
                    .fetch_one(&pool)
                    .await
                    .context("Failed to verify database connection")?;

                return Ok(pool);
            },
            Err(_e) if retries < MAX_RETRIES => {
                retries += 1;
                info!(
                    attempt = retries,
                    max_retries = MAX_RETRIES,
                    "Database connection failed, retrying..."
                );
                tokio::time::sleep(RETRY_DELAY).await;
            },
            Err(e) => {
                return Err(e).context("Failed to create database connection pool after retries");
            },
        }
    }
}

/// Runs database migrations.
async fn run_migrations(pool: &sqlx::PgPool) -> Result<()> {
    // TODO: move to sqlx::migrate! once a migrations directory exists

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS accounts (
            id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
            account_name TEXT NOT NULL,
            secret_token TEXT NOT NULL UNIQUE,
            website TEXT,
            created_by UUID,
            updated_by UUID,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    )
    .execute(pool)
    .await
    .context("Failed to create accounts table")?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS destinations (
            id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
            url TEXT NOT NULL,
            http_method TEXT NOT NULL DEFAULT 'POST',
            headers JSONB,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    )
    .execute(pool)
    .await
    .context("Failed to create destinations table")?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS log_entries (
            id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
            level TEXT NOT NULL,
            message TEXT NOT NULL,
            details JSONB NOT NULL DEFAULT '{}'::jsonb,
            user_id UUID,
            timestamp TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    )
    .execute(pool)
    .await
    .context("Failed to create log_entries table")?;

    // Create indexes
    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_log_entries_timestamp
        ON log_entries(timestamp DESC)
        "#,
    )
    .execute(pool)
    .await
    .context("Failed to create log_entries timestamp index")?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_log_entries_level
        ON log_entries(level, timestamp DESC)
        "#,
    )
    .execute(pool)
    .await
    .context("Failed to create log_entries level index")?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_log_entries_event_id
        ON log_entries((details->>'event_id'))
        "#,
    )
    .execute(pool)
    .await
    .context("Failed to create log_entries event id index")?;

    Ok(())
}

/// Waits for shutdown signal (CTRL+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received CTRL+C signal");
        },
        () = terminate => {
            info!("Received SIGTERM signal");
        },
    }
}
