//! Audit-log search handler.
//!
//! Read-only surface over the append-only audit trail. Searches are
//! themselves audited, so operators can see who queried what.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, error, instrument, warn};
use uuid::Uuid;

use relay_core::{AuditRecord, LogEntry, LogFilter, LogLevel, UserId};

use crate::AppState;

/// Query parameters accepted by the log search endpoint.
#[derive(Debug, Deserialize)]
pub struct LogSearchParams {
    /// Match entries at exactly this severity (`info`, `warn`, `error`).
    pub level: Option<String>,
    /// Match entries whose details carry this correlation id.
    pub event_id: Option<String>,
    /// Match entries attributed to this user.
    pub user_id: Option<Uuid>,
    /// Match entries at or after this time.
    pub from: Option<DateTime<Utc>>,
    /// Match entries at or before this time.
    pub to: Option<DateTime<Utc>>,
    /// Maximum entries returned, newest first.
    pub limit: Option<u32>,
}

/// Envelope returned by the log search endpoint.
#[derive(Debug, Serialize)]
pub struct LogSearchResponse {
    /// Whether the search ran.
    pub success: bool,
    /// Outcome description.
    pub message: String,
    /// Matching entries, newest first. Absent on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Vec<LogEntry>>,
}

/// Searches the audit log.
///
/// Every filter is optional; unfiltered searches return the newest entries
/// up to the configured limit.
#[instrument(name = "search_logs", skip(state, params))]
pub async fn search_logs(
    State(state): State<AppState>,
    Query(params): Query<LogSearchParams>,
) -> Response {
    let level = match params.level.as_deref() {
        None => None,
        Some(raw) => match LogLevel::parse(raw) {
            Some(level) => Some(level),
            None => {
                warn!(level = raw, "Rejected log search with invalid level");
                return failure(StatusCode::BAD_REQUEST, "Invalid level filter");
            },
        },
    };

    let filter = LogFilter {
        level,
        event_id: params.event_id.clone(),
        user_id: params.user_id.map(UserId::from),
        from: params.from,
        to: params.to,
        limit: Some(params.limit.unwrap_or(state.config.log_search_limit)),
    };

    match state.storage.search_logs(filter).await {
        Ok(entries) => {
            let count = entries.len();
            debug!(count, "Log search completed");

            state
                .audit
                .record(AuditRecord::info(
                    "Logs searched successfully",
                    json!({
                        "query": {
                            "level": params.level,
                            "event_id": params.event_id,
                            "user_id": params.user_id,
                            "from": params.from,
                            "to": params.to,
                            "limit": params.limit,
                        },
                        "count": count,
                    }),
                ))
                .await;

            (
                StatusCode::OK,
                Json(LogSearchResponse {
                    success: true,
                    message: "Logs retrieved successfully".to_owned(),
                    data: Some(entries),
                }),
            )
                .into_response()
        },
        Err(err) => {
            error!(error = %err, "Log search failed");
            state
                .audit
                .record(AuditRecord::error(
                    "Failed to retrieve logs",
                    json!({"error": err.to_string()}),
                ))
                .await;
            failure(StatusCode::INTERNAL_SERVER_ERROR, "Failed to retrieve logs")
        },
    }
}

fn failure(status: StatusCode, message: &str) -> Response {
    (
        status,
        Json(LogSearchResponse { success: false, message: message.to_owned(), data: None }),
    )
        .into_response()
}
