//! Health check handlers for service monitoring.
//!
//! Provides liveness, readiness, and health endpoints with database
//! connectivity checks for orchestration systems like Kubernetes.

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use relay_core::{Clock, RelayStorage};
use serde::Serialize;
use tracing::{debug, error, instrument};

use crate::AppState;

/// Health check response structure.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Overall service health status
    pub status: HealthStatus,
    /// Timestamp when health check was performed
    pub timestamp: DateTime<Utc>,
    /// Individual component health checks
    pub checks: HealthChecks,
    /// Service version information
    pub version: String,
}

/// Overall health status enumeration.
#[derive(Debug, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// All systems operational
    Healthy,
    /// Critical systems failing
    Unhealthy,
}

/// Individual component health check results.
#[derive(Debug, Serialize)]
pub struct HealthChecks {
    /// Database connectivity and basic query test
    pub database: ComponentHealth,
}

/// Health status for individual components.
#[derive(Debug, Serialize)]
pub struct ComponentHealth {
    /// Component status
    pub status: ComponentStatus,
    /// Optional error message if unhealthy
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Response time in milliseconds
    pub response_time_ms: u64,
}

/// Component-level health status.
#[derive(Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    /// Component is healthy
    Up,
    /// Component is experiencing issues
    Down,
}

/// Health service that encapsulates the clock dependency so checks stay
/// testable.
pub struct HealthService {
    clock: Arc<dyn Clock>,
}

impl HealthService {
    /// Creates a new health service with the given clock.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    /// Performs service health checks.
    pub async fn health_check(&self, storage: &dyn RelayStorage) -> HealthResponse {
        debug!("Performing health check");

        let timestamp = self.clock.now_utc();
        let start_time = self.clock.now();

        let database = self.check_database_health(storage).await;
        let db_duration = self.clock.now().saturating_duration_since(start_time);

        let status = match database.status {
            ComponentStatus::Up => HealthStatus::Healthy,
            ComponentStatus::Down => HealthStatus::Unhealthy,
        };

        HealthResponse {
            status,
            timestamp,
            checks: HealthChecks {
                database: ComponentHealth {
                    status: database.status,
                    message: database.message,
                    response_time_ms: u64::try_from(db_duration.as_millis())
                        .unwrap_or(u64::MAX),
                },
            },
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    /// Checks database connectivity with a lightweight query.
    async fn check_database_health(&self, storage: &dyn RelayStorage) -> DatabaseHealth {
        match storage.ping().await {
            Ok(()) => {
                debug!("Database health check passed");
                DatabaseHealth { status: ComponentStatus::Up, message: None }
            },
            Err(e) => {
                error!("Database health check failed: {}", e);
                DatabaseHealth {
                    status: ComponentStatus::Down,
                    message: Some(format!("Database connection failed: {e}")),
                }
            },
        }
    }
}

/// Internal structure for database health check results.
struct DatabaseHealth {
    status: ComponentStatus,
    message: Option<String>,
}

/// Health check endpoint handler.
///
/// Called frequently by orchestration systems and load balancers, so it
/// avoids expensive operations.
#[instrument(name = "health_check", skip(app_state))]
pub async fn health_check(State(app_state): State<AppState>) -> Response {
    let health_service = HealthService::new(app_state.clock.clone());
    let response = health_service.health_check(app_state.storage.as_ref()).await;

    let status_code = match response.status {
        HealthStatus::Healthy => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    debug!(
        status = ?response.status,
        db_status = ?response.checks.database.status,
        "Health check completed"
    );

    (status_code, Json(response)).into_response()
}

/// Readiness check endpoint for Kubernetes probes.
///
/// Similar to health check but focuses on whether the service is ready
/// to accept traffic.
#[instrument(name = "readiness_check", skip(app_state))]
pub async fn readiness_check(State(app_state): State<AppState>) -> Response {
    health_check(State(app_state)).await
}

/// Liveness check endpoint for Kubernetes probes.
///
/// Returns a simple response indicating the service process is alive.
/// This is a minimal check that doesn't test external dependencies,
/// focusing only on whether the HTTP server is responding.
#[instrument(name = "liveness_check", skip(app_state))]
pub async fn liveness_check(State(app_state): State<AppState>) -> Response {
    debug!("Performing liveness check");

    let response = serde_json::json!({
        "status": "alive",
        "timestamp": app_state.clock.now_utc(),
        "service": "event-relay"
    });

    (StatusCode::OK, Json(response)).into_response()
}
