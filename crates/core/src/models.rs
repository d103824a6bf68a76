//! Core domain models for the gateway
//!
//! These models represent the core business entities and map to database tables.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Delivery priority of a message.
///
/// Stored as an integer weight so that `ORDER BY priority DESC` yields
/// urgent-first ordering directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
#[derive(sqlx::Type)]
#[repr(i32)]
#[serde(rename_all = "UPPERCASE")]
pub enum Priority {
    Low = 0,
    Normal = 1,
    High = 2,
    Urgent = 3,
}

/// Backoff strategy applied between delivery attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[derive(sqlx::Type)]
#[sqlx(rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum RetryStrategy {
    Exp,
    Linear,
    Fixed,
}

/// Lifecycle state of a message.
///
/// `Claimed` is the transient reservation between the scheduler picking a
/// row and a dispatcher worker flipping it to `Sending`. It never leaves
/// the process boundary: API reads report it via [`Message::public_status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[derive(sqlx::Type)]
#[sqlx(rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum MessageStatus {
    Queued,
    Scheduled,
    Claimed,
    Sending,
    Sent,
    Failed,
    Cancelled,
}

impl MessageStatus {
    /// True for states a message can never leave.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Sent | Self::Failed | Self::Cancelled)
    }

    /// Wire name of the status, as stored and serialized.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "QUEUED",
            Self::Scheduled => "SCHEDULED",
            Self::Claimed => "CLAIMED",
            Self::Sending => "SENDING",
            Self::Sent => "SENT",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
        }
    }
}

impl std::fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A queued SMS message and all state tracking its journey.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[derive(sqlx::FromRow)]
pub struct Message {
    pub id: i64,
    pub phone_number: String,
    pub content: String,
    pub priority: Priority,
    pub retry_strategy: RetryStrategy,
    pub status: MessageStatus,
    pub created_at: DateTime<Utc>,
    /// Earliest wall-clock time the gateway may attempt delivery.
    pub scheduled_at: Option<DateTime<Utc>>,
    pub sent_at: Option<DateTime<Utc>>,
    pub retry_count: i32,
    pub max_retries: i32,
    pub last_error: Option<String>,
    /// Monotonic tie-breaker assigned at insert; FIFO within a priority.
    pub queue_seq: i64,
    /// Cancel intent observed by a worker around an in-flight send.
    pub cancel_requested: bool,
}

impl Message {
    /// Status as reported over the API: the internal claim state is
    /// indistinguishable from the state it was claimed out of.
    pub fn public_status(&self) -> MessageStatus {
        match self.status {
            MessageStatus::Claimed if self.scheduled_at.is_none() => MessageStatus::Queued,
            MessageStatus::Claimed => MessageStatus::Scheduled,
            other => other,
        }
    }
}

/// Fields supplied when enqueueing a new message.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub phone_number: String,
    pub content: String,
    pub priority: Priority,
    pub retry_strategy: RetryStrategy,
    pub max_retries: i32,
    pub scheduled_at: Option<DateTime<Utc>>,
}

impl NewMessage {
    pub fn new(phone_number: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            phone_number: phone_number.into(),
            content: content.into(),
            priority: Priority::Normal,
            retry_strategy: RetryStrategy::Exp,
            max_retries: crate::backoff::DEFAULT_MAX_RETRIES,
            scheduled_at: None,
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_strategy(mut self, strategy: RetryStrategy) -> Self {
        self.retry_strategy = strategy;
        self
    }

    pub fn with_max_retries(mut self, max_retries: i32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn scheduled_at(mut self, at: DateTime<Utc>) -> Self {
        self.scheduled_at = Some(at);
        self
    }
}

/// Token lifetime class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[derive(sqlx::Type)]
#[sqlx(rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum TokenKind {
    Temporary,
    Permanent,
}

/// Bearer token for API access.
///
/// The secret text exists outside the store only at creation time; the row
/// keeps an Argon2id hash.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[derive(sqlx::FromRow)]
pub struct ApiToken {
    pub id: i64,
    pub owner_id: String,
    pub name: String,
    #[serde(skip_serializing)]
    pub hashed_secret: String,
    #[sqlx(json)]
    pub permissions: Vec<String>,
    pub kind: TokenKind,
    pub expires_at: Option<DateTime<Utc>>,
    pub revoked: bool,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
}

/// Identity attached to a request after bearer validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthContext {
    pub token_id: i64,
    pub owner_id: String,
    pub permissions: Vec<String>,
}

impl AuthContext {
    /// Whether the token grants a permission string.
    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions.iter().any(|p| p == permission)
    }
}

/// Rate-limit scope, each with its own cap and escalation block duration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[derive(sqlx::Type)]
#[sqlx(rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum RateLimitScope {
    Request,
    Auth,
    Admin,
}

/// Audit severity level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[derive(sqlx::Type)]
#[sqlx(rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum AuditSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

/// Append-only audit trail entry.
///
/// Well-known `event_type` values: `API_CALL`, `AUTH_FAILED`,
/// `ACCESS_DENIED`, `SUSPICIOUS`, `SYSTEM_ERROR`, `SECURITY_VIOLATION`,
/// `RECOVERED_IN_FLIGHT`, `CANCEL_AFTER_SEND`, `TOKEN_ISSUED`,
/// `TOKEN_REVOKED`, `RETENTION_SWEEP`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[derive(sqlx::FromRow)]
pub struct AuditEvent {
    pub id: i64,
    pub event_type: String,
    pub severity: AuditSeverity,
    pub owner_id: Option<String>,
    pub client_id: Option<String>,
    pub endpoint: Option<String>,
    pub status_code: Option<i32>,
    #[sqlx(json)]
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Audit entry before insertion.
#[derive(Debug, Clone)]
pub struct NewAuditEvent {
    pub event_type: String,
    pub severity: AuditSeverity,
    pub owner_id: Option<String>,
    pub client_id: Option<String>,
    pub endpoint: Option<String>,
    pub status_code: Option<i32>,
    pub payload: serde_json::Value,
}

impl NewAuditEvent {
    pub fn new(event_type: impl Into<String>, severity: AuditSeverity) -> Self {
        Self {
            event_type: event_type.into(),
            severity,
            owner_id: None,
            client_id: None,
            endpoint: None,
            status_code: None,
            payload: serde_json::Value::Object(serde_json::Map::new()),
        }
    }
}
