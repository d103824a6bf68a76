//! Development transmitter
//!
//! Stands in for the real SMS modem when none is attached: logs the send
//! and reports success. The production transmitter is an external
//! collaborator wired in at deployment.

use async_trait::async_trait;
use smsgate_core::transmitter::{SimState, TransmitError, Transmitter};
use tracing::info;

#[derive(Debug, Default)]
pub struct LogTransmitter;

#[async_trait]
impl Transmitter for LogTransmitter {
    async fn send(&self, phone_number: &str, content: &str) -> Result<(), TransmitError> {
        info!(
            "LogTransmitter: would send {} characters to {}",
            content.chars().count(),
            phone_number
        );
        Ok(())
    }

    async fn sim_state(&self) -> SimState {
        SimState::Ready
    }
}
