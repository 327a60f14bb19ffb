//! HTTP server wiring and request routing.
//!
//! Builds the Axum router over the shared [`AppState`] and serves it with
//! graceful shutdown. Requests flow through middleware in order:
//! 1. Request ID generation
//! 2. Request/response tracing
//! 3. Timeout enforcement (configurable, 30s default)
//! 4. Handler execution
//!
//! Authentication and rate limiting are per-route concerns handled inside
//! the ingestion handler, not middleware: only `/api-account/accounts`
//! requires the tenant headers.
//!
//! # Graceful Shutdown
//!
//! The server handles SIGTERM and CTRL+C by refusing new connections and
//! draining in-flight requests before returning.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use axum::{
    extract::Request,
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Router,
};
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use tracing::{info, warn};
use uuid::Uuid;

use relay_core::{AuditSink, Clock, RelayStorage};
use relay_dispatch::{DispatchError, EventOffload, FanoutClient, FanoutDispatcher};

use crate::{auth::AuthGate, config::RelayConfig, handlers, limit::RateLimiter};

/// Shared state injected into every handler.
///
/// Everything is behind `Arc`, so cloning the state per request is cheap.
#[derive(Clone)]
pub struct AppState {
    /// Account, destination, and audit-log persistence.
    pub storage: Arc<dyn RelayStorage>,
    /// Durable audit trail writer.
    pub audit: Arc<dyn AuditSink>,
    /// Header validation and token authentication.
    pub auth: Arc<AuthGate>,
    /// Fixed-window request admission.
    pub limiter: Arc<RateLimiter>,
    /// Webhook fan-out over all registered destinations.
    pub dispatcher: Arc<FanoutDispatcher>,
    /// Background event processing registry.
    pub offload: Arc<EventOffload>,
    /// Time source shared with the limiter and health checks.
    pub clock: Arc<dyn Clock>,
    /// Resolved service configuration.
    pub config: Arc<RelayConfig>,
}

impl AppState {
    /// Wires the request-path components from their collaborators.
    ///
    /// The offload registry is passed in fully built so callers control
    /// which processors are registered.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::ClientBuild`] if the delivery client
    /// cannot be constructed from `config`.
    pub fn new(
        config: RelayConfig,
        storage: Arc<dyn RelayStorage>,
        audit: Arc<dyn AuditSink>,
        clock: Arc<dyn Clock>,
        offload: EventOffload,
    ) -> Result<Self, DispatchError> {
        let auth = Arc::new(AuthGate::new(storage.clone(), audit.clone()));
        let limiter = Arc::new(RateLimiter::new(config.to_limit_config(), clock.clone()));
        let client = FanoutClient::new(config.to_client_config())?;
        let dispatcher = Arc::new(FanoutDispatcher::new(client, audit.clone()));

        Ok(Self {
            storage,
            audit,
            auth,
            limiter,
            dispatcher,
            offload: Arc::new(offload),
            clock,
            config: Arc::new(config),
        })
    }
}

/// Creates the Axum router with all routes and middleware.
///
/// Sets up:
/// - Ingestion under `/api-account`, log search under `/api-log`
/// - Health endpoints at `/health`, `/health/ready`, `/health/live`
/// - Request tracing, request IDs, and timeout handling
pub fn create_router(state: AppState) -> Router {
    let health_routes = Router::new()
        .route("/health", get(handlers::health_check))
        .route("/health/ready", get(handlers::readiness_check))
        .route("/health/live", get(handlers::liveness_check));

    let account_routes = Router::new().route("/accounts", post(handlers::ingest_account_data));

    let log_routes = Router::new().route("/search", get(handlers::search_logs));

    let timeout = Duration::from_secs(state.config.request_timeout_seconds);

    Router::new()
        .merge(health_routes)
        .nest("/api-account", account_routes)
        .nest("/api-log", log_routes)
        .layer(TimeoutLayer::new(timeout))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(inject_request_id))
        .with_state(state)
}

/// Middleware to inject request ID into all responses.
///
/// Adds X-Request-Id header for tracing requests across services.
async fn inject_request_id(req: Request, next: Next) -> Response {
    let request_id = Uuid::new_v4().to_string();

    let mut req = req;
    req.extensions_mut().insert(request_id.clone());

    let mut response = next.run(req).await;

    if let Ok(header_value) = request_id.parse() {
        response.headers_mut().insert("X-Request-Id", header_value);
    }

    response
}

/// Starts the HTTP server with graceful shutdown support.
///
/// Binds to the specified address and serves requests until a shutdown
/// signal arrives. Connection peer addresses are propagated so handlers
/// can key rate limits on the caller origin.
///
/// # Errors
///
/// Returns `std::io::Error` if the port is already in use or the
/// network interface is unavailable.
pub async fn start_server(state: AppState, addr: SocketAddr) -> Result<(), std::io::Error> {
    let app = create_router(state);

    info!("Starting HTTP server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let actual_addr = listener.local_addr()?;

    info!("HTTP server listening on {}", actual_addr);

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("HTTP server stopped gracefully");
    Ok(())
}

/// Waits for shutdown signal (CTRL+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received CTRL+C, starting graceful shutdown");
        },
        () = terminate => {
            info!("Received SIGTERM, starting graceful shutdown");
        },
    }

    warn!("Draining in-flight requests before exit");
}
