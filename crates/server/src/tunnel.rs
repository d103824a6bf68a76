//! No-op tunnel supervisor
//!
//! Placeholder for the external HTTPS tunnel; tracks requested state so
//! admin endpoints and health checks behave coherently without a real
//! supervisor attached.

use async_trait::async_trait;
use smsgate_core::tunnel::{Tunnel, TunnelConfig, TunnelStatus};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::info;

#[derive(Debug, Default)]
pub struct NoopTunnel {
    active: AtomicBool,
}

#[async_trait]
impl Tunnel for NoopTunnel {
    async fn start(&self, config: TunnelConfig) -> anyhow::Result<()> {
        info!("NoopTunnel: start requested (hostname: {:?})", config.hostname);
        self.active.store(true, Ordering::Relaxed);
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        info!("NoopTunnel: stop requested");
        self.active.store(false, Ordering::Relaxed);
        Ok(())
    }

    async fn status(&self) -> TunnelStatus {
        if self.active.load(Ordering::Relaxed) {
            TunnelStatus::Active
        } else {
            TunnelStatus::Inactive
        }
    }
}
