//! Validation constants and utilities
//!
//! Shared validation logic for message submissions across the REST API and
//! the store's insert path.

use crate::error::{GatewayError, GatewayResult};
use chrono::{DateTime, Utc};
use regex::Regex;
use std::sync::LazyLock;

/// Maximum message content length in characters (10 concatenated parts)
pub const MAX_CONTENT_LENGTH: usize = 1600;

/// Characters per SMS part
pub const PART_LENGTH: usize = 160;

/// Maximum number of concatenated parts
pub const MAX_PARTS: usize = 10;

/// Retry limit bounds for a single message
pub const MAX_RETRIES_RANGE: std::ops::RangeInclusive<i32> = 0..=10;

/// E.164 phone number pattern: "+" followed by 2 to 15 digits, no leading zero.
static PHONE_NUMBER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\+[1-9][0-9]{1,14}$").expect("phone number pattern is valid")
});

/// Validate an E.164 phone number
pub fn validate_phone_number(phone_number: &str) -> GatewayResult<()> {
    if PHONE_NUMBER_RE.is_match(phone_number) {
        Ok(())
    } else {
        Err(GatewayError::InvalidPhoneNumber(phone_number.to_string()))
    }
}

/// Validate message content: non-empty and within the part budget
pub fn validate_content(content: &str) -> GatewayResult<()> {
    let len = content.chars().count();
    if len == 0 {
        return Err(GatewayError::InvalidContent("content is empty".to_string()));
    }
    if len > MAX_CONTENT_LENGTH {
        return Err(GatewayError::InvalidContent(format!(
            "content is {} characters (max {})",
            len, MAX_CONTENT_LENGTH
        )));
    }
    Ok(())
}

/// Number of SMS parts the content occupies
pub fn message_parts(content: &str) -> usize {
    content.chars().count().div_ceil(PART_LENGTH)
}

/// Validate a per-message retry limit override
pub fn validate_max_retries(max_retries: i32) -> GatewayResult<()> {
    if MAX_RETRIES_RANGE.contains(&max_retries) {
        Ok(())
    } else {
        Err(GatewayError::InvalidRetryLimit(max_retries))
    }
}

/// Validate an appointment time: must be strictly in the future
pub fn validate_appointment(appointment: DateTime<Utc>, now: DateTime<Utc>) -> GatewayResult<()> {
    if appointment > now {
        Ok(())
    } else {
        Err(GatewayError::InvalidSchedule(format!(
            "appointment time {} is not in the future",
            appointment.to_rfc3339()
        )))
    }
}
