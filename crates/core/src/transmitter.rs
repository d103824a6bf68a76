//! Abstract SMS transmission capability
//!
//! The gateway core never talks to a modem directly; it consumes this
//! capability and classifies its faults into retryable and terminal ones.

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

/// Faults worth another delivery attempt.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryableFault {
    #[error("NETWORK")]
    Network,
    #[error("TIMEOUT")]
    Timeout,
    #[error("NO_SERVICE")]
    NoService,
    #[error("NO_SIGNAL")]
    NoSignal,
    #[error("SIM_BUSY")]
    SimBusy,
    #[error("RATE_LIMITED")]
    RateLimited,
}

/// Faults that no amount of retrying will fix.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalFault {
    #[error("INVALID_NUMBER")]
    InvalidNumber,
    #[error("BLOCKED")]
    Blocked,
    #[error("PERMISSION_DENIED")]
    PermissionDenied,
    #[error("INVALID_CONTENT")]
    InvalidContent,
    #[error("MESSAGE_TOO_LONG")]
    MessageTooLong,
}

/// Transmission failure, classified.
///
/// `Other` covers faults the transmitter could not classify; the dispatcher
/// treats them as retryable until the retry budget runs out.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransmitError {
    #[error("{0}")]
    Retryable(#[from] RetryableFault),
    #[error("{0}")]
    Terminal(#[from] TerminalFault),
    #[error("{0}")]
    Other(String),
}

impl TransmitError {
    /// Whether the dispatcher should schedule another attempt.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Terminal(_))
    }
}

/// SIM card state reported by the transmitter, surfaced in health checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SimState {
    Ready,
    Absent,
    PinRequired,
    PukRequired,
    NetworkLocked,
    NotReady,
    Error,
}

/// SMS transmission capability provided by an external collaborator.
#[async_trait]
pub trait Transmitter: Send + Sync {
    /// Attempt to deliver one message. At most one call per message is in
    /// flight at any time.
    async fn send(&self, phone_number: &str, content: &str) -> Result<(), TransmitError>;

    /// Current SIM state, for health reporting.
    async fn sim_state(&self) -> SimState;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fault_wire_names() {
        assert_eq!(RetryableFault::Timeout.to_string(), "TIMEOUT");
        assert_eq!(RetryableFault::NoService.to_string(), "NO_SERVICE");
        assert_eq!(TerminalFault::InvalidNumber.to_string(), "INVALID_NUMBER");
        assert_eq!(
            TransmitError::Retryable(RetryableFault::Timeout).to_string(),
            "TIMEOUT"
        );
        assert_eq!(
            TransmitError::Other("MODEM_ON_FIRE".to_string()).to_string(),
            "MODEM_ON_FIRE"
        );
    }

    #[test]
    fn test_classification() {
        assert!(TransmitError::Retryable(RetryableFault::Network).is_retryable());
        assert!(TransmitError::Other("??".to_string()).is_retryable());
        assert!(!TransmitError::Terminal(TerminalFault::Blocked).is_retryable());
    }
}
