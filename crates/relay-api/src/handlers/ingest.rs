//! Account data ingestion: validate, authenticate, admit, fan out, offload.
//!
//! One logical flow per inbound request. The response reflects only
//! validation, authentication, and rate limiting; delivery and background
//! processing outcomes are observable exclusively through the audit log.

use std::net::SocketAddr;

use axum::{
    body::Bytes,
    extract::{ConnectInfo, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

use relay_core::{AuditRecord, DispatchEvent};

use crate::auth::AuthError;
use crate::limit::RateKey;
use crate::{AppState, EVENT_ID_HEADER, TOKEN_HEADER};

/// Event type recorded when the payload does not declare one.
const DEFAULT_EVENT_TYPE: &str = "account.data";

/// Terminal ingestion failures, each mapped to one HTTP status and body.
///
/// Auditing happens at the rejection site inside the handler; this type
/// only carries what the caller sees.
#[derive(Debug, Error)]
pub enum IngestError {
    /// Token or correlation-id header absent.
    #[error("missing required headers")]
    MissingHeaders,
    /// Body empty, malformed, or not a JSON object or array.
    #[error("invalid request body")]
    InvalidPayload,
    /// Token resolved to no account.
    #[error("invalid secret token")]
    InvalidToken,
    /// Caller exhausted its request budget for the current window.
    #[error("rate limit exceeded")]
    RateLimited,
    /// Account lookup or destination load failed.
    #[error("destination lookup failed")]
    StorageUnavailable,
    /// No processor is registered under the configured name.
    #[error("event processor unavailable")]
    OffloadUnavailable,
}

impl IntoResponse for IngestError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::MissingHeaders => (StatusCode::BAD_REQUEST, "Missing required headers"),
            Self::InvalidPayload => (StatusCode::BAD_REQUEST, "Invalid request body"),
            Self::InvalidToken => (StatusCode::UNAUTHORIZED, "Invalid secret token"),
            Self::RateLimited => (StatusCode::TOO_MANY_REQUESTS, "Rate limit exceeded"),
            Self::StorageUnavailable => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Failed to fetch destinations")
            },
            Self::OffloadUnavailable => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Failed to process account data")
            },
        };

        message_response(status, message)
    }
}

/// Ingests account data and relays it to every registered destination.
///
/// The caller sees the outcome of validation, authentication, and rate
/// limiting only. Once those pass, the response is `202 Accepted`
/// regardless of how deliveries or background processing fare.
///
/// # Errors
///
/// Returns status codes per stage:
/// - 400: invalid body, or missing token/correlation-id headers
/// - 401: token resolves to no account
/// - 429: rate limit exceeded for this caller
/// - 500: storage unavailable or no processor registered
#[instrument(
    name = "ingest_account_data",
    skip(state, headers, body),
    fields(
        remote = %addr,
        event_id = headers.get(EVENT_ID_HEADER).and_then(|v| v.to_str().ok()).unwrap_or("none"),
    )
)]
pub async fn ingest_account_data(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, IngestError> {
    debug!("Processing account data ingestion");

    let token = header_value(&headers, TOKEN_HEADER);
    let event_header = header_value(&headers, EVENT_ID_HEADER);

    let Some(payload) = parse_payload(&body) else {
        warn!("Rejected request with invalid body");
        state
            .audit
            .record(AuditRecord::warn(
                "Invalid request body",
                json!({"event_id": event_header}),
            ))
            .await;
        return Err(IngestError::InvalidPayload);
    };

    let (account, event_id) = match state.auth.authenticate(token, event_header).await {
        Ok(authenticated) => authenticated,
        Err(AuthError::MissingHeaders) => return Err(IngestError::MissingHeaders),
        Err(AuthError::InvalidToken) => return Err(IngestError::InvalidToken),
        Err(AuthError::Unavailable(error)) => {
            error!(%error, "Account lookup failed");
            state
                .audit
                .record(AuditRecord::error(
                    "Failed to fetch destinations",
                    json!({
                        "event_id": event_header,
                        "stage": "authentication",
                        "error": error.to_string(),
                    }),
                ))
                .await;
            return Err(IngestError::StorageUnavailable);
        },
    };

    let key = RateKey::derive(token, addr.ip());
    if !state.limiter.allow(&key) {
        warn!(account_id = %account.id, "Rate limit exceeded");
        state
            .audit
            .record(
                AuditRecord::warn(
                    "Rate limit exceeded",
                    json!({"event_id": event_id, "account_id": account.id}),
                )
                .with_user(account.created_by),
            )
            .await;
        return Err(IngestError::RateLimited);
    }

    let destinations = match state.storage.list_destinations().await {
        Ok(destinations) => destinations,
        Err(error) => {
            error!(%error, "Failed to load destinations");
            state
                .audit
                .record(
                    AuditRecord::error(
                        "Failed to fetch destinations",
                        json!({"event_id": event_id, "error": error.to_string()}),
                    )
                    .with_user(account.created_by),
                )
                .await;
            return Err(IngestError::StorageUnavailable);
        },
    };

    debug!(count = destinations.len(), "Loaded destinations");

    let event_type = payload
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or(DEFAULT_EVENT_TYPE)
        .to_owned();
    let event =
        DispatchEvent::new(event_type, payload, account.id, event_id, account.created_by);

    let summary = state.dispatcher.dispatch(&event, &destinations).await;
    info!(
        event_id = %event.event_id,
        attempted = summary.attempted(),
        delivered = summary.delivered(),
        failed = summary.failed(),
        "Fan-out settled"
    );

    match state.offload.dispatch(event).await {
        Ok(handle) => {
            // The response does not wait on background processing; a
            // detached task observes the settlement for operational logs.
            tokio::spawn(async move {
                match handle.settled().await {
                    Ok(result) => debug!(?result, "Background processing settled"),
                    Err(error) => debug!(%error, "Background processing failed"),
                }
            });
        },
        Err(error) => {
            error!(%error, "Failed to offload event");
            return Err(IngestError::OffloadUnavailable);
        },
    }

    Ok(message_response(StatusCode::ACCEPTED, "Account data received and forwarded"))
}

/// Reads a header as UTF-8, treating empty values as absent.
fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
}

/// Parses an ingestion body into a structured payload.
///
/// Accepts JSON objects and arrays. Empty bodies, malformed JSON, and bare
/// scalars are all rejected; the pipeline only relays structured data.
pub fn parse_payload(body: &[u8]) -> Option<Value> {
    match serde_json::from_slice::<Value>(body) {
        Ok(value @ (Value::Object(_) | Value::Array(_))) => Some(value),
        _ => None,
    }
}

/// Builds the uniform `{"message": ...}` response body.
fn message_response(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({"message": message}))).into_response()
}
