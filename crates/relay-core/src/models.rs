//! Domain models and strongly-typed identifiers.
//!
//! Defines accounts, destinations, audit-log entries, and the transient
//! dispatch event that flows through the fan-out pipeline. Newtype ID
//! wrappers carry their own database serialization so identifiers cannot be
//! mixed up at compile time.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

type PgDb = sqlx::Postgres;
type PgValueRef<'r> = sqlx::postgres::PgValueRef<'r>;
type PgTypeInfo = sqlx::postgres::PgTypeInfo;
type PgArgumentBuffer = sqlx::postgres::PgArgumentBuffer;
type EncodeResult =
    Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync + 'static>>;
type BoxDynError = sqlx::error::BoxDynError;

/// Strongly-typed account identifier.
///
/// Wraps a UUID to prevent mixing with other ID types. Accounts own the
/// secret tokens that authenticate inbound events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccountId(pub Uuid);

impl AccountId {
    /// Creates a new random account ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for AccountId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for AccountId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl sqlx::Type<PgDb> for AccountId {
    fn type_info() -> PgTypeInfo {
        <Uuid as sqlx::Type<PgDb>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, PgDb> for AccountId {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let uuid = <Uuid as sqlx::Decode<PgDb>>::decode(value)?;
        Ok(Self(uuid))
    }
}

impl sqlx::Encode<'_, PgDb> for AccountId {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> EncodeResult {
        <Uuid as sqlx::Encode<PgDb>>::encode_by_ref(&self.0, buf)
    }
}

/// Strongly-typed destination identifier.
///
/// Each destination is an outbound endpoint registered independently of any
/// account; its ID appears in every delivery-outcome audit entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DestinationId(pub Uuid);

impl DestinationId {
    /// Creates a new random destination ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for DestinationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DestinationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for DestinationId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl sqlx::Type<PgDb> for DestinationId {
    fn type_info() -> PgTypeInfo {
        <Uuid as sqlx::Type<PgDb>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, PgDb> for DestinationId {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let uuid = <Uuid as sqlx::Decode<PgDb>>::decode(value)?;
        Ok(Self(uuid))
    }
}

impl sqlx::Encode<'_, PgDb> for DestinationId {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> EncodeResult {
        <Uuid as sqlx::Encode<PgDb>>::encode_by_ref(&self.0, buf)
    }
}

/// Strongly-typed user identifier.
///
/// References the account-owning user recorded in audit fields. The relay
/// never creates users; the ID only flows into audit-log attribution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub Uuid);

impl UserId {
    /// Creates a new random user ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for UserId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl sqlx::Type<PgDb> for UserId {
    fn type_info() -> PgTypeInfo {
        <Uuid as sqlx::Type<PgDb>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, PgDb> for UserId {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let uuid = <Uuid as sqlx::Decode<PgDb>>::decode(value)?;
        Ok(Self(uuid))
    }
}

impl sqlx::Encode<'_, PgDb> for UserId {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> EncodeResult {
        <Uuid as sqlx::Encode<PgDb>>::encode_by_ref(&self.0, buf)
    }
}

/// Strongly-typed audit-log entry identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LogEntryId(pub Uuid);

impl LogEntryId {
    /// Creates a new random log entry ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for LogEntryId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for LogEntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for LogEntryId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl sqlx::Type<PgDb> for LogEntryId {
    fn type_info() -> PgTypeInfo {
        <Uuid as sqlx::Type<PgDb>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, PgDb> for LogEntryId {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let uuid = <Uuid as sqlx::Decode<PgDb>>::decode(value)?;
        Ok(Self(uuid))
    }
}

impl sqlx::Encode<'_, PgDb> for LogEntryId {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> EncodeResult {
        <Uuid as sqlx::Encode<PgDb>>::encode_by_ref(&self.0, buf)
    }
}

/// Caller-supplied event correlation identifier.
///
/// Arrives on the ingestion request as an opaque header value and is carried
/// through every audit entry the event produces. Unlike the UUID newtypes,
/// the relay never generates these; it only propagates them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId(String);

impl EventId {
    /// Wraps a caller-supplied correlation id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The correlation id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for EventId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

impl From<String> for EventId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// HTTP methods a destination may be registered with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    /// HTTP GET method.
    Get,
    /// HTTP POST method (default).
    #[default]
    Post,
    /// HTTP DELETE method.
    Delete,
    /// HTTP PUT method.
    Put,
}

impl HttpMethod {
    /// Canonical uppercase name, matching the stored representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Delete => "DELETE",
            Self::Put => "PUT",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl sqlx::Type<PgDb> for HttpMethod {
    fn type_info() -> PgTypeInfo {
        <str as sqlx::Type<PgDb>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, PgDb> for HttpMethod {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let s = <&str as sqlx::Decode<PgDb>>::decode(value)?;
        match s {
            "GET" => Ok(Self::Get),
            "POST" => Ok(Self::Post),
            "DELETE" => Ok(Self::Delete),
            "PUT" => Ok(Self::Put),
            _ => Err(format!("invalid http method: {s}").into()),
        }
    }
}

impl sqlx::Encode<'_, PgDb> for HttpMethod {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> EncodeResult {
        <String as sqlx::Encode<PgDb>>::encode_by_ref(&self.to_string(), buf)
    }
}

/// Severity of an audit-log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Expected pipeline progress.
    Info,
    /// Rejected requests and other recoverable anomalies.
    Warn,
    /// Failures that need operator attention.
    Error,
}

impl LogLevel {
    /// Canonical lowercase name, matching the stored representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }

    /// Parses the stored representation back into a level.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "info" => Some(Self::Info),
            "warn" => Some(Self::Warn),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl sqlx::Type<PgDb> for LogLevel {
    fn type_info() -> PgTypeInfo {
        <str as sqlx::Type<PgDb>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, PgDb> for LogLevel {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let s = <&str as sqlx::Decode<PgDb>>::decode(value)?;
        LogLevel::parse(s).ok_or_else(|| format!("invalid log level: {s}").into())
    }
}

impl sqlx::Encode<'_, PgDb> for LogLevel {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> EncodeResult {
        <String as sqlx::Encode<PgDb>>::encode_by_ref(&self.to_string(), buf)
    }
}

/// Lifecycle status of one dispatched event.
///
/// Terminal in all three end states; there are no retries and no re-sends:
///
/// ```text
/// Created -> Sent -> Succeeded
///                 -> Failed
///                 -> Errored
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    /// Built from a validated request, not yet handed to the pipeline.
    Created,
    /// Accepted by the dispatcher; fan-out and offload are in flight.
    Sent,
    /// Background processing reported a success result.
    Succeeded,
    /// Background processing reported an explicit error.
    Failed,
    /// Background processing terminated without reporting an outcome.
    Errored,
}

impl EventStatus {
    /// Whether this status ends the event's lifecycle.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Errored)
    }
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Sent => write!(f, "sent"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
            Self::Errored => write!(f, "errored"),
        }
    }
}

/// An account registered with the relay.
///
/// The secret token is the account's sole inbound credential and resolves to
/// at most one account; the database enforces uniqueness.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Account {
    /// Unique identifier for this account.
    pub id: AccountId,

    /// Human-readable account name.
    pub account_name: String,

    /// Opaque credential presented on ingestion requests.
    pub secret_token: String,

    /// Optional public website for the account.
    pub website: Option<String>,

    /// User that created the account.
    pub created_by: Option<UserId>,

    /// User that last modified the account.
    pub updated_by: Option<UserId>,

    /// When this account was created.
    pub created_at: DateTime<Utc>,

    /// When this account was last updated.
    pub updated_at: DateTime<Utc>,
}

/// A registered outbound endpoint receiving forwarded events.
///
/// Destinations are global: every authenticated event fans out to every
/// registered destination regardless of which account sent it.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Destination {
    /// Unique identifier for this destination.
    pub id: DestinationId,

    /// Target URL for forwarded events.
    pub url: String,

    /// HTTP method used when forwarding.
    pub http_method: HttpMethod,

    /// Stored header configuration.
    ///
    /// Kept as raw JSON because operators edit it directly; the dispatcher
    /// validates the shape per delivery so one malformed destination cannot
    /// poison loading the rest. `None` falls back to a JSON content type.
    pub headers: Option<Value>,

    /// When this destination was created.
    pub created_at: DateTime<Utc>,

    /// When this destination was last updated.
    pub updated_at: DateTime<Utc>,
}

/// Transient in-flight unit handed to fan-out and offload.
///
/// Owned by the request lifecycle that created it; nothing outlives the
/// request except the audit entries that reference these fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchEvent {
    /// Caller-declared event type, `account.data` when unspecified.
    pub event_type: String,

    /// Arbitrary structured request body.
    pub payload: Value,

    /// Account the event was authenticated against.
    pub account_id: AccountId,

    /// Caller-supplied correlation id.
    pub event_id: EventId,

    /// User attribution inherited from the account, when known.
    pub user_id: Option<UserId>,
}

impl DispatchEvent {
    /// Builds a dispatch event from a validated ingestion request.
    pub fn new(
        event_type: impl Into<String>,
        payload: Value,
        account_id: AccountId,
        event_id: EventId,
        user_id: Option<UserId>,
    ) -> Self {
        Self { event_type: event_type.into(), payload, account_id, event_id, user_id }
    }
}

/// Append-only audit-log record.
///
/// Write-once: entries are never updated or deleted. `user_id` is absent for
/// stages that run before authentication.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct LogEntry {
    /// Unique identifier for this entry.
    pub id: LogEntryId,

    /// Severity of the recorded observation.
    pub level: LogLevel,

    /// Stable human-readable summary.
    pub message: String,

    /// Structured context: correlation ids, outcomes, counts.
    pub details: Value,

    /// Acting user when the stage was authenticated.
    pub user_id: Option<UserId>,

    /// When the observation was recorded.
    pub timestamp: DateTime<Utc>,
}
