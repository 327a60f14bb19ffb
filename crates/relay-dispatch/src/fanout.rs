//! Concurrent webhook fan-out to registered destinations.
//!
//! Every admitted event is forwarded to every registered destination. The
//! deliveries run concurrently, each against the destination's own method
//! and header configuration, and the dispatcher waits for all of them to
//! settle before reporting. One destination's failure never short-circuits
//! the others; it becomes an audit entry and a line in the summary.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use serde_json::{json, Value};
use tracing::{info_span, Instrument};

use relay_core::{AuditRecord, AuditSink, Destination, DestinationId, DispatchEvent, HttpMethod};

use crate::error::DispatchError;

/// Configuration for the outbound delivery client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Timeout for each delivery request.
    pub timeout: Duration,
    /// User agent string for requests.
    pub user_agent: String,
    /// Maximum number of redirects to follow.
    pub max_redirects: u32,
    /// Whether to verify TLS certificates.
    pub verify_tls: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            user_agent: "Event-Relay/1.0".to_string(),
            max_redirects: 3,
            verify_tls: true,
        }
    }
}

/// HTTP client used for webhook deliveries.
///
/// Connection pooling makes concurrent fan-out to many endpoints cheap;
/// the per-request timeout bounds how long one slow destination can hold
/// the dispatch open.
#[derive(Debug, Clone)]
pub struct FanoutClient {
    client: reqwest::Client,
}

impl FanoutClient {
    /// Creates a delivery client with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::ClientBuild`] if the HTTP client cannot be
    /// configured with the provided settings.
    pub fn new(config: ClientConfig) -> Result<Self, DispatchError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects as usize))
            .danger_accept_invalid_certs(!config.verify_tls)
            .build()
            .map_err(DispatchError::ClientBuild)?;

        Ok(Self { client })
    }

    /// Creates a delivery client with default configuration.
    pub fn with_defaults() -> Result<Self, DispatchError> {
        Self::new(ClientConfig::default())
    }

    /// Sends one event to one destination and classifies the result.
    pub async fn deliver(
        &self,
        event: &DispatchEvent,
        destination: &Destination,
    ) -> DeliveryOutcome {
        let headers = match build_destination_headers(destination) {
            Ok(headers) => headers,
            Err(error) => return DeliveryOutcome::InvalidConfig { message: error.to_string() },
        };

        tracing::debug!("Starting webhook delivery");

        let method = match destination.http_method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Delete => reqwest::Method::DELETE,
            HttpMethod::Put => reqwest::Method::PUT,
        };

        let response = self
            .client
            .request(method, &destination.url)
            .headers(headers)
            .json(&event.payload)
            .send()
            .await;

        match response {
            Ok(response) => {
                let status = response.status().as_u16();
                tracing::debug!(status, "Received response");
                if response.status().is_success() {
                    DeliveryOutcome::Delivered { status }
                } else {
                    DeliveryOutcome::RejectedStatus { status }
                }
            },
            Err(error) => {
                tracing::warn!("Request failed: {}", error);
                let message = if error.is_timeout() {
                    format!("request timed out: {error}")
                } else if error.is_connect() {
                    format!("connection failed: {error}")
                } else {
                    error.to_string()
                };
                DeliveryOutcome::TransportError { message }
            },
        }
    }
}

/// Builds the outbound header map from a destination's stored configuration.
///
/// Stored headers must be a JSON object with string values. Destinations
/// without stored headers get a JSON content type. A `null` value counts as
/// unset, matching how legacy rows were written.
pub fn build_destination_headers(destination: &Destination) -> Result<HeaderMap, DispatchError> {
    let mut headers = HeaderMap::new();

    match &destination.headers {
        None | Some(Value::Null) => {
            headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        },
        Some(Value::Object(entries)) => {
            for (name, value) in entries {
                let value = value.as_str().ok_or_else(|| {
                    DispatchError::malformed_headers(format!(
                        "value for '{name}' must be a string"
                    ))
                })?;
                let header_name = HeaderName::from_bytes(name.as_bytes()).map_err(|_| {
                    DispatchError::malformed_headers(format!("invalid header name '{name}'"))
                })?;
                let header_value = HeaderValue::from_str(value).map_err(|_| {
                    DispatchError::malformed_headers(format!("invalid value for '{name}'"))
                })?;
                headers.insert(header_name, header_value);
            }
        },
        Some(other) => {
            return Err(DispatchError::malformed_headers(format!(
                "stored headers must be a JSON object, got {}",
                json_kind(other)
            )));
        },
    }

    Ok(headers)
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Classified result of one delivery attempt.
#[derive(Debug, Clone)]
pub enum DeliveryOutcome {
    /// The destination accepted the event with a 2xx status.
    Delivered {
        /// HTTP status returned by the destination.
        status: u16,
    },
    /// The destination answered with a non-2xx status.
    RejectedStatus {
        /// HTTP status returned by the destination.
        status: u16,
    },
    /// The request never completed: connect failure, timeout, or protocol
    /// error.
    TransportError {
        /// What went wrong on the wire.
        message: String,
    },
    /// The destination's stored configuration could not produce a request.
    InvalidConfig {
        /// What made the configuration unusable.
        message: String,
    },
}

impl DeliveryOutcome {
    /// Whether the destination accepted the event.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Delivered { .. })
    }
}

/// Outcome of one delivery, tagged with where it went.
#[derive(Debug, Clone)]
pub struct DispatchReport {
    /// Destination the delivery targeted.
    pub destination_id: DestinationId,
    /// URL the delivery targeted.
    pub url: String,
    /// How the delivery ended.
    pub outcome: DeliveryOutcome,
}

/// Aggregate result of fanning one event out to all destinations.
#[derive(Debug, Clone)]
pub struct DispatchSummary {
    /// Per-destination reports in registration order.
    pub reports: Vec<DispatchReport>,
}

impl DispatchSummary {
    /// Number of destinations attempted.
    pub fn attempted(&self) -> usize {
        self.reports.len()
    }

    /// Number of destinations that accepted the event.
    pub fn delivered(&self) -> usize {
        self.reports.iter().filter(|report| report.outcome.is_success()).count()
    }

    /// Number of destinations that did not accept the event.
    pub fn failed(&self) -> usize {
        self.attempted() - self.delivered()
    }
}

/// Fans events out to every registered destination and audits each outcome.
pub struct FanoutDispatcher {
    client: FanoutClient,
    audit: Arc<dyn AuditSink>,
}

impl FanoutDispatcher {
    /// Creates a dispatcher delivering through the given client.
    pub fn new(client: FanoutClient, audit: Arc<dyn AuditSink>) -> Self {
        Self { client, audit }
    }

    /// Delivers one event to all destinations concurrently.
    ///
    /// Resolves only after every delivery has settled. Always returns a
    /// summary; individual failures are recorded in the audit trail and in
    /// the per-destination reports, never raised to the caller.
    pub async fn dispatch(
        &self,
        event: &DispatchEvent,
        destinations: &[Destination],
    ) -> DispatchSummary {
        let deliveries = destinations.iter().map(|destination| self.deliver(event, destination));
        let reports = join_all(deliveries).await;

        let summary = DispatchSummary { reports };
        tracing::debug!(
            attempted = summary.attempted(),
            delivered = summary.delivered(),
            failed = summary.failed(),
            "Fan-out complete"
        );
        summary
    }

    async fn deliver(&self, event: &DispatchEvent, destination: &Destination) -> DispatchReport {
        let span = info_span!(
            "webhook_delivery",
            destination_id = %destination.id,
            event_id = %event.event_id,
            url = %destination.url,
        );

        async move {
            let outcome = self.client.deliver(event, destination).await;
            self.audit_outcome(event, destination, &outcome).await;
            DispatchReport {
                destination_id: destination.id,
                url: destination.url.clone(),
                outcome,
            }
        }
        .instrument(span)
        .await
    }

    async fn audit_outcome(
        &self,
        event: &DispatchEvent,
        destination: &Destination,
        outcome: &DeliveryOutcome,
    ) {
        let record = match outcome {
            DeliveryOutcome::Delivered { status } => AuditRecord::info(
                "Webhook delivered",
                json!({
                    "destination_id": destination.id,
                    "url": destination.url,
                    "event_id": event.event_id,
                    "status": status,
                }),
            ),
            DeliveryOutcome::RejectedStatus { status } => AuditRecord::error(
                "Webhook delivery failed",
                json!({
                    "destination_id": destination.id,
                    "url": destination.url,
                    "event_id": event.event_id,
                    "status": status,
                }),
            ),
            DeliveryOutcome::TransportError { message } => AuditRecord::error(
                "Webhook delivery failed",
                json!({
                    "destination_id": destination.id,
                    "url": destination.url,
                    "event_id": event.event_id,
                    "error": message,
                }),
            ),
            DeliveryOutcome::InvalidConfig { message } => AuditRecord::error(
                "Malformed destination headers",
                json!({
                    "destination_id": destination.id,
                    "url": destination.url,
                    "event_id": event.event_id,
                    "error": message,
                }),
            ),
        };

        self.audit.record(record.with_user(event.user_id)).await;
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use relay_core::audit::mock::MemoryAuditSink;
    use relay_core::{AccountId, EventId};
    use wiremock::{matchers, Mock, MockServer, ResponseTemplate};

    use super::*;

    fn destination(url: impl Into<String>, headers: Option<Value>) -> Destination {
        Destination {
            id: DestinationId::new(),
            url: url.into(),
            http_method: HttpMethod::Post,
            headers,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn sample_event() -> DispatchEvent {
        DispatchEvent::new(
            "account.data",
            json!({"plan": "pro"}),
            AccountId::new(),
            EventId::new("evt-500"),
            None,
        )
    }

    fn dispatcher(audit: Arc<MemoryAuditSink>) -> FanoutDispatcher {
        FanoutDispatcher::new(FanoutClient::with_defaults().unwrap(), audit)
    }

    #[test]
    fn default_headers_when_unset() {
        let dest = destination("http://example.invalid/hook", None);
        let headers = build_destination_headers(&dest).unwrap();

        assert_eq!(headers.len(), 1);
        assert_eq!(headers.get(CONTENT_TYPE).unwrap(), "application/json");
    }

    #[test]
    fn null_headers_count_as_unset() {
        let dest = destination("http://example.invalid/hook", Some(Value::Null));
        let headers = build_destination_headers(&dest).unwrap();

        assert_eq!(headers.get(CONTENT_TYPE).unwrap(), "application/json");
    }

    #[test]
    fn stored_headers_replace_defaults() {
        let dest = destination(
            "http://example.invalid/hook",
            Some(json!({"X-Api-Key": "secret", "Accept": "application/json"})),
        );
        let headers = build_destination_headers(&dest).unwrap();

        assert_eq!(headers.len(), 2);
        assert_eq!(headers.get("X-Api-Key").unwrap(), "secret");
        assert!(headers.get(CONTENT_TYPE).is_none());
    }

    #[test]
    fn non_object_headers_rejected() {
        let dest = destination("http://example.invalid/hook", Some(json!(["not", "headers"])));
        let error = build_destination_headers(&dest).unwrap_err();

        assert!(error.to_string().contains("must be a JSON object"));
    }

    #[test]
    fn non_string_header_value_rejected() {
        let dest = destination("http://example.invalid/hook", Some(json!({"X-Retries": 3})));
        let error = build_destination_headers(&dest).unwrap_err();

        assert!(error.to_string().contains("'X-Retries' must be a string"));
    }

    #[test]
    fn invalid_header_name_rejected() {
        let dest =
            destination("http://example.invalid/hook", Some(json!({"bad header": "value"})));
        let error = build_destination_headers(&dest).unwrap_err();

        assert!(error.to_string().contains("invalid header name"));
    }

    #[tokio::test]
    async fn successful_delivery_is_audited() {
        let server = MockServer::start().await;
        Mock::given(matchers::method("POST"))
            .and(matchers::path("/hook"))
            .and(matchers::header("content-type", "application/json"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let audit = Arc::new(MemoryAuditSink::new());
        let summary = dispatcher(audit.clone())
            .dispatch(&sample_event(), &[destination(format!("{}/hook", server.uri()), None)])
            .await;

        assert_eq!(summary.delivered(), 1);
        assert_eq!(summary.failed(), 0);

        let delivered = audit.entries_with_message("Webhook delivered");
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].details["status"], json!(200));
        assert_eq!(delivered[0].details["event_id"], json!("evt-500"));
    }

    #[tokio::test]
    async fn rejected_status_is_audited_as_failure() {
        let server = MockServer::start().await;
        Mock::given(matchers::method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let audit = Arc::new(MemoryAuditSink::new());
        let summary = dispatcher(audit.clone())
            .dispatch(&sample_event(), &[destination(format!("{}/hook", server.uri()), None)])
            .await;

        assert_eq!(summary.delivered(), 0);
        assert_eq!(summary.failed(), 1);

        let failed = audit.entries_with_message("Webhook delivery failed");
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].details["status"], json!(500));
    }

    #[tokio::test]
    async fn transport_error_is_audited_as_failure() {
        // Nothing listens on port 1; the connect fails immediately.
        let audit = Arc::new(MemoryAuditSink::new());
        let summary = dispatcher(audit.clone())
            .dispatch(&sample_event(), &[destination("http://127.0.0.1:1/hook", None)])
            .await;

        assert_eq!(summary.failed(), 1);

        let failed = audit.entries_with_message("Webhook delivery failed");
        assert_eq!(failed.len(), 1);
        assert!(failed[0].details["error"].as_str().unwrap().contains("connection failed"));
    }

    #[tokio::test]
    async fn malformed_headers_skip_only_that_destination() {
        let server = MockServer::start().await;
        Mock::given(matchers::method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let healthy = destination(format!("{}/hook", server.uri()), None);
        let broken = destination(format!("{}/hook", server.uri()), Some(json!("not an object")));

        let audit = Arc::new(MemoryAuditSink::new());
        let summary =
            dispatcher(audit.clone()).dispatch(&sample_event(), &[broken, healthy]).await;

        assert_eq!(summary.attempted(), 2);
        assert_eq!(summary.delivered(), 1);
        assert_eq!(audit.count_message("Malformed destination headers"), 1);
        assert_eq!(audit.count_message("Webhook delivered"), 1);
    }

    #[tokio::test]
    async fn custom_method_and_headers_forwarded() {
        let server = MockServer::start().await;
        Mock::given(matchers::method("PUT"))
            .and(matchers::header("X-Api-Key", "secret"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let mut dest =
            destination(format!("{}/hook", server.uri()), Some(json!({"X-Api-Key": "secret"})));
        dest.http_method = HttpMethod::Put;

        let audit = Arc::new(MemoryAuditSink::new());
        let summary = dispatcher(audit.clone()).dispatch(&sample_event(), &[dest]).await;

        assert_eq!(summary.delivered(), 1);
        assert_eq!(
            audit.entries_with_message("Webhook delivered")[0].details["status"],
            json!(204)
        );
    }
}
