//! Destination stubs over wiremock.

use wiremock::{
    matchers::{method, path},
    Mock, ResponseTemplate,
};

pub use wiremock::MockServer;

/// Mounts a stub answering POSTs to `route` with `status`.
pub async fn mount_destination(server: &MockServer, route: &str, status: u16) {
    Mock::given(method("POST"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(status))
        .mount(server)
        .await;
}

/// Mounts a stub that fails the test unless hit exactly `expected` times.
pub async fn mount_destination_expecting(
    server: &MockServer,
    route: &str,
    status: u16,
    expected: u64,
) {
    Mock::given(method("POST"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(status))
        .expect(expected)
        .mount(server)
        .await;
}
