//! Error types for gateway domain logic

use thiserror::Error;

/// Core gateway domain errors
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Message not found: {0}")]
    MessageNotFound(i64),

    #[error("Token not found: {0}")]
    TokenNotFound(i64),

    #[error("Invalid phone number: {0}")]
    InvalidPhoneNumber(String),

    #[error("Invalid message content: {0}")]
    InvalidContent(String),

    #[error("Invalid schedule: {0}")]
    InvalidSchedule(String),

    #[error("Invalid retry limit: {0} (allowed range 0-10)")]
    InvalidRetryLimit(i32),

    #[error("Message {id} is {status} and cannot transition")]
    InvalidTransition { id: i64, status: String },

    #[error("Permission denied")]
    PermissionDenied,
}

/// Result type alias for gateway operations
pub type GatewayResult<T> = Result<T, GatewayError>;
