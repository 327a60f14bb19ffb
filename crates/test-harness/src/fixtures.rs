//! Test data builders for accounts and destinations.
//!
//! Builder patterns with sensible defaults so tests only state what they
//! care about.

use chrono::Utc;
use serde_json::{json, Value};
use uuid::Uuid;

use relay_core::{Account, AccountId, Destination, DestinationId, HttpMethod, UserId};

/// Builder for test accounts.
pub struct AccountBuilder {
    account_name: Option<String>,
    secret_token: Option<String>,
    website: Option<String>,
    created_by: Option<UserId>,
}

impl AccountBuilder {
    /// Creates a new account builder with no defaults.
    pub fn new() -> Self {
        Self { account_name: None, secret_token: None, website: None, created_by: None }
    }

    /// Creates an account builder with sensible defaults.
    pub fn with_defaults() -> Self {
        Self {
            account_name: Some(format!("account-{}", Uuid::new_v4().simple())),
            secret_token: Some(format!("tok_{}", Uuid::new_v4().simple())),
            website: Some("https://example.com".to_string()),
            created_by: Some(UserId::new()),
        }
    }

    /// Sets the account name.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.account_name = Some(name.into());
        self
    }

    /// Sets the secret token used to authenticate ingestion requests.
    #[must_use]
    pub fn secret_token(mut self, token: impl Into<String>) -> Self {
        self.secret_token = Some(token.into());
        self
    }

    /// Sets the account website.
    #[must_use]
    pub fn website(mut self, website: impl Into<String>) -> Self {
        self.website = Some(website.into());
        self
    }

    /// Sets the user the account is attributed to.
    #[must_use]
    pub fn created_by(mut self, user: UserId) -> Self {
        self.created_by = Some(user);
        self
    }

    /// Builds the account.
    pub fn build(self) -> Account {
        let now = Utc::now();
        Account {
            id: AccountId::new(),
            account_name: self
                .account_name
                .unwrap_or_else(|| format!("account-{}", Uuid::new_v4().simple())),
            secret_token: self
                .secret_token
                .unwrap_or_else(|| format!("tok_{}", Uuid::new_v4().simple())),
            website: self.website,
            created_by: self.created_by,
            updated_by: self.created_by,
            created_at: now,
            updated_at: now,
        }
    }
}

impl Default for AccountBuilder {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Builder for test destinations.
pub struct DestinationBuilder {
    url: Option<String>,
    http_method: Option<HttpMethod>,
    headers: Option<Value>,
}

impl DestinationBuilder {
    /// Creates a new destination builder with no defaults.
    pub fn new() -> Self {
        Self { url: None, http_method: None, headers: None }
    }

    /// Creates a destination builder with sensible defaults.
    pub fn with_defaults() -> Self {
        Self {
            url: Some("https://example.com/hook".to_string()),
            http_method: Some(HttpMethod::Post),
            headers: None,
        }
    }

    /// Sets the delivery URL.
    #[must_use]
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Sets the HTTP method used for delivery.
    #[must_use]
    pub fn method(mut self, method: HttpMethod) -> Self {
        self.http_method = Some(method);
        self
    }

    /// Sets the stored header configuration verbatim.
    ///
    /// Pass a non-object value or non-string entries to model a destination
    /// with broken configuration.
    #[must_use]
    pub fn headers(mut self, headers: Value) -> Self {
        self.headers = Some(headers);
        self
    }

    /// Builds the destination.
    pub fn build(self) -> Destination {
        let now = Utc::now();
        Destination {
            id: DestinationId::new(),
            url: self.url.unwrap_or_else(|| "https://example.com/hook".to_string()),
            http_method: self.http_method.unwrap_or_default(),
            headers: self.headers,
            created_at: now,
            updated_at: now,
        }
    }
}

impl Default for DestinationBuilder {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Factory functions for common test scenarios.
pub mod scenarios {
    use super::{json, Destination, DestinationBuilder, Value};

    /// Destination with an explicit JSON content type header.
    pub fn json_destination(url: impl Into<String>) -> Destination {
        DestinationBuilder::with_defaults()
            .url(url)
            .headers(json!({"Content-Type": "application/json"}))
            .build()
    }

    /// Destination carrying a custom authentication header.
    pub fn authed_destination(url: impl Into<String>, api_key: &str) -> Destination {
        DestinationBuilder::with_defaults()
            .url(url)
            .headers(json!({
                "Content-Type": "application/json",
                "X-Api-Key": api_key,
            }))
            .build()
    }

    /// Destination whose stored headers cannot be applied to a request.
    pub fn malformed_destination(url: impl Into<String>) -> Destination {
        DestinationBuilder::with_defaults().url(url).headers(json!({"X-Api-Key": 42})).build()
    }

    /// Typical ingestion payload with a declared event type.
    pub fn account_payload() -> Value {
        json!({
            "type": "account.updated",
            "plan": "enterprise",
            "seats": 250,
            "billing": {
                "cycle": "annual",
                "currency": "usd"
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn account_builder_with_defaults() {
        let account = AccountBuilder::with_defaults().build();
        assert!(account.secret_token.starts_with("tok_"));
        assert!(account.created_by.is_some());
        assert_eq!(account.created_by, account.updated_by);
    }

    #[test]
    fn account_builder_customization() {
        let account = AccountBuilder::new().secret_token("fixed-token").name("acme").build();
        assert_eq!(account.secret_token, "fixed-token");
        assert_eq!(account.account_name, "acme");
        assert_eq!(account.created_by, None);
    }

    #[test]
    fn destination_builder_defaults_to_post_without_headers() {
        let destination = DestinationBuilder::with_defaults().build();
        assert_eq!(destination.http_method, HttpMethod::Post);
        assert!(destination.headers.is_none());
    }

    #[test]
    fn malformed_scenario_carries_non_string_header() {
        let destination = scenarios::malformed_destination("https://example.com/x");
        let headers = destination.headers.expect("headers set");
        assert!(headers["X-Api-Key"].is_number());
    }
}
