//! Test infrastructure for the event relay.
//!
//! Provides a fully wired in-memory application environment, fixture
//! builders for accounts and destinations, and destination stubs over
//! wiremock. Storage and audit assertions read straight from the shared
//! in-memory store, so tests never need a database.

#![warn(missing_docs)]
#![forbid(unsafe_code)]

use std::{net::SocketAddr, sync::Arc, time::Duration};

use axum::{
    body::Body,
    extract::connect_info::MockConnectInfo,
    http::{header, Method, Request},
    response::Response,
    Router,
};
use serde_json::Value;
use tower::ServiceExt;

use relay_api::{create_router, AppState, RelayConfig, EVENT_ID_HEADER, TOKEN_HEADER};
use relay_core::{
    audit::AuditSink, storage::mock::MemoryStorage, Account, Clock, Destination, RelayStorage,
    StorageAuditSink, TestClock,
};
use relay_dispatch::{AccountEventProcessor, EventOffload, EventProcessor};

pub mod fixtures;
pub mod net;

pub use fixtures::{scenarios, AccountBuilder, DestinationBuilder};

/// Registry name the built-in account processor is mounted under.
const ACCOUNT_PROCESSOR: &str = "account-events";

/// In-memory application environment for router-level tests.
///
/// Wires the real handlers, auth gate, rate limiter, fan-out dispatcher,
/// and offload registry over mock storage and a deterministic clock. The
/// audit trail is written through the production sink, so every pipeline
/// decision is assertable via [`MemoryStorage::logs_with_message`].
pub struct RelayTestEnv {
    /// Shared in-memory persistence with failure injection.
    pub storage: Arc<MemoryStorage>,
    /// Deterministic clock driving the rate limiter and audit timestamps.
    pub clock: Arc<TestClock>,
    /// Wired application state, as handed to the router.
    pub state: AppState,
    router: Router,
}

impl RelayTestEnv {
    /// Creates an environment with default configuration.
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Starts building a customized environment.
    pub fn builder() -> TestEnvBuilder {
        TestEnvBuilder::new()
    }

    /// Seeds an account authenticating with the given token.
    pub fn seed_account(&self, token: &str) -> Account {
        let account = AccountBuilder::with_defaults().secret_token(token).build();
        self.storage.insert_account(account.clone());
        account
    }

    /// Seeds a POST destination with default headers.
    pub fn seed_destination(&self, url: &str) -> Destination {
        let destination = DestinationBuilder::with_defaults().url(url).build();
        self.storage.insert_destination(destination.clone());
        destination
    }

    /// Seeds a pre-built destination.
    pub fn seed_built_destination(&self, destination: Destination) -> Destination {
        self.storage.insert_destination(destination.clone());
        destination
    }

    /// Sends a request through the router.
    ///
    /// # Panics
    ///
    /// Panics if the router itself fails, which no handler does.
    pub async fn send(&self, request: Request<Body>) -> Response {
        self.router.clone().oneshot(request).await.expect("router call failed")
    }

    /// Posts a payload to the ingestion endpoint with both tenant headers.
    pub async fn ingest(&self, token: &str, event_id: &str, payload: &Value) -> Response {
        self.send(ingest_request(token, event_id, payload)).await
    }

    /// Runs a log search, e.g. `search("?level=error&limit=5")`.
    pub async fn search(&self, query: &str) -> Response {
        let request = Request::builder()
            .method(Method::GET)
            .uri(format!("/api-log/search{query}"))
            .body(Body::empty())
            .expect("valid search request");
        self.send(request).await
    }

    /// Waits until the audit trail holds at least `expected` entries with
    /// this message.
    ///
    /// Background workers settle asynchronously; polling the store is how
    /// tests observe them without racing.
    ///
    /// # Panics
    ///
    /// Panics if the count is not reached within two seconds.
    pub async fn wait_for_audit(&self, message: &str, expected: usize) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        loop {
            let count = self.storage.count_message(message);
            if count >= expected {
                return;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "audit message {message:?} seen {count} times, expected {expected}"
            );
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

impl Default for RelayTestEnv {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder customizing the test environment before wiring.
pub struct TestEnvBuilder {
    config: RelayConfig,
    processors: Vec<(String, Arc<dyn EventProcessor>)>,
    peer: SocketAddr,
}

impl TestEnvBuilder {
    fn new() -> Self {
        Self {
            config: RelayConfig::default(),
            processors: Vec::new(),
            peer: SocketAddr::from(([127, 0, 0, 1], 4000)),
        }
    }

    /// Replaces the service configuration.
    #[must_use]
    pub fn config(mut self, config: RelayConfig) -> Self {
        self.config = config;
        self
    }

    /// Registers an additional background processor.
    #[must_use]
    pub fn processor(
        mut self,
        name: impl Into<String>,
        processor: Arc<dyn EventProcessor>,
    ) -> Self {
        self.processors.push((name.into(), processor));
        self
    }

    /// Sets the peer address handlers see for every request.
    #[must_use]
    pub fn peer(mut self, peer: SocketAddr) -> Self {
        self.peer = peer;
        self
    }

    /// Wires the environment.
    ///
    /// # Panics
    ///
    /// Panics if the delivery client cannot be built from the
    /// configuration.
    pub fn build(self) -> RelayTestEnv {
        let storage = Arc::new(MemoryStorage::new());
        let clock = Arc::new(TestClock::new());

        let storage_dyn: Arc<dyn RelayStorage> = storage.clone();
        let clock_dyn: Arc<dyn Clock> = clock.clone();
        let audit: Arc<dyn AuditSink> =
            Arc::new(StorageAuditSink::new(storage_dyn.clone(), clock_dyn.clone()));

        let mut offload = EventOffload::new(self.config.offload_processor.clone(), audit.clone())
            .register(ACCOUNT_PROCESSOR, Arc::new(AccountEventProcessor));
        for (name, processor) in self.processors {
            offload = offload.register(name, processor);
        }

        let state = AppState::new(self.config, storage_dyn, audit, clock_dyn, offload)
            .expect("failed to wire test application state");

        let router = create_router(state.clone()).layer(MockConnectInfo(self.peer));

        RelayTestEnv { storage, clock, state, router }
    }
}

/// Builds an ingestion request with both tenant headers set.
pub fn ingest_request(token: &str, event_id: &str, payload: &Value) -> Request<Body> {
    raw_ingest_request(Some(token), Some(event_id), &payload.to_string())
}

/// Builds an ingestion request with arbitrary header presence and raw body.
///
/// # Panics
///
/// Panics if a header value is not valid ASCII.
pub fn raw_ingest_request(
    token: Option<&str>,
    event_id: Option<&str>,
    body: &str,
) -> Request<Body> {
    let mut builder = Request::builder()
        .method(Method::POST)
        .uri("/api-account/accounts")
        .header(header::CONTENT_TYPE, "application/json");

    if let Some(token) = token {
        builder = builder.header(TOKEN_HEADER, token);
    }
    if let Some(event_id) = event_id {
        builder = builder.header(EVENT_ID_HEADER, event_id);
    }

    builder.body(Body::from(body.to_owned())).expect("valid ingest request")
}

/// Reads a response body as JSON.
///
/// # Panics
///
/// Panics if the body is not valid JSON.
pub async fn response_json(response: Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("response body readable");
    serde_json::from_slice(&bytes).expect("response body is json")
}

/// Reads the `message` field of a JSON response body.
pub async fn response_message(response: Response) -> String {
    response_json(response).await["message"].as_str().unwrap_or_default().to_owned()
}
