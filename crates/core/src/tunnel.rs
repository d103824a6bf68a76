//! Abstract HTTPS tunnel capability
//!
//! External reachability is supervised outside the core; admin endpoints
//! drive it through this interface and health checks report its status.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Tunnel supervisor state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TunnelStatus {
    Inactive,
    Active,
    Error,
}

/// Settings passed when starting the tunnel.
#[derive(Debug, Clone, Default, Serialize, Deserialize, utoipa::ToSchema)]
pub struct TunnelConfig {
    /// Requested public hostname; the supervisor picks one when absent.
    pub hostname: Option<String>,
}

/// External tunnel capability. Not required for dispatch correctness.
#[async_trait]
pub trait Tunnel: Send + Sync {
    async fn start(&self, config: TunnelConfig) -> anyhow::Result<()>;

    async fn stop(&self) -> anyhow::Result<()>;

    async fn status(&self) -> TunnelStatus;
}
