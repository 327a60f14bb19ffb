//! Token authentication for ingestion requests.
//!
//! Both required headers are checked before any storage lookup so a
//! malformed request never costs a query. Lookups are exact matches on the
//! stored secret token; the rejection message never distinguishes between
//! near-miss and unknown tokens.

use std::sync::Arc;

use serde_json::json;
use thiserror::Error;

use relay_core::{Account, AuditRecord, AuditSink, CoreError, EventId, RelayStorage};

/// Why an ingestion request failed authentication.
#[derive(Debug, Error)]
pub enum AuthError {
    /// The token or correlation-id header is absent or empty.
    #[error("missing required headers")]
    MissingHeaders,

    /// No account owns the presented token.
    #[error("invalid secret token")]
    InvalidToken,

    /// The account lookup could not be performed.
    #[error(transparent)]
    Unavailable(#[from] CoreError),
}

/// Resolves inbound credentials to accounts and audits every outcome.
pub struct AuthGate {
    storage: Arc<dyn RelayStorage>,
    audit: Arc<dyn AuditSink>,
}

impl AuthGate {
    /// Creates a gate authenticating against the given storage.
    pub fn new(storage: Arc<dyn RelayStorage>, audit: Arc<dyn AuditSink>) -> Self {
        Self { storage, audit }
    }

    /// Authenticates one ingestion request.
    ///
    /// Requires both the secret token and the caller's correlation id;
    /// either one absent or empty rejects the request before any lookup.
    /// Missing headers, unknown tokens, and successful lookups are all
    /// audited, tagged with the correlation id when the caller sent one.
    pub async fn authenticate(
        &self,
        token: Option<&str>,
        event_id: Option<&str>,
    ) -> Result<(Account, EventId), AuthError> {
        let token = token.filter(|value| !value.is_empty());
        let event_id = event_id.filter(|value| !value.is_empty());

        let (Some(token), Some(event_id)) = (token, event_id) else {
            self.audit
                .record(AuditRecord::warn(
                    "Missing required headers",
                    json!({"event_id": event_id}),
                ))
                .await;
            return Err(AuthError::MissingHeaders);
        };

        let account = self.storage.find_account_by_token(token).await?;

        let Some(account) = account else {
            self.audit
                .record(AuditRecord::warn(
                    "Invalid secret token",
                    json!({"event_id": event_id}),
                ))
                .await;
            return Err(AuthError::InvalidToken);
        };

        self.audit
            .record(
                AuditRecord::info(
                    "Account authenticated",
                    json!({
                        "event_id": event_id,
                        "account_id": account.id,
                        "account_name": account.account_name,
                    }),
                )
                .with_user(account.created_by),
            )
            .await;

        Ok((account, EventId::new(event_id)))
    }
}
