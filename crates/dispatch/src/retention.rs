//! Daily retention sweep
//!
//! Purges delivered and cancelled messages past the retention window and
//! drops expired temporary tokens.

use anyhow::Result;
use chrono::Utc;
use smsgate_core::models::{AuditSeverity, NewAuditEvent};
use std::time::Duration;
use store::Store;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Retention sweep configuration.
#[derive(Debug, Clone)]
pub struct RetentionConfig {
    /// Age after which SENT/CANCELLED messages are purged.
    pub max_age: Duration,
    /// How often the sweep runs.
    pub interval: Duration,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            max_age: Duration::from_secs(90 * 24 * 3600),
            interval: Duration::from_secs(24 * 3600),
        }
    }
}

/// Run the sweep loop until cancelled. The first sweep happens at startup.
pub async fn run_retention(
    store: Store,
    config: RetentionConfig,
    shutdown: CancellationToken,
) -> Result<()> {
    info!(
        "Starting retention job: max_age={:?}, interval={:?}",
        config.max_age, config.interval
    );

    let mut ticker = tokio::time::interval(config.interval);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }

        if let Err(e) = sweep(&store, &config).await {
            warn!("Retention sweep failed: {}", e);
        }
    }

    info!("Retention job stopped");
    Ok(())
}

async fn sweep(store: &Store, config: &RetentionConfig) -> Result<()> {
    let now = Utc::now();
    let cutoff = now
        - chrono::Duration::from_std(config.max_age)
            .map_err(|e| anyhow::anyhow!("retention max_age out of range: {}", e))?;

    let purged = store.purge_messages(cutoff).await?;
    let expired_tokens = store.cleanup_expired_tokens(now).await?;

    if purged > 0 || expired_tokens > 0 {
        info!(
            "Retention sweep: purged {} messages, dropped {} expired tokens",
            purged, expired_tokens
        );

        let mut event = NewAuditEvent::new("RETENTION_SWEEP", AuditSeverity::Info);
        event.payload = serde_json::json!({
            "purged_messages": purged,
            "expired_tokens": expired_tokens,
        });
        if let Err(e) = store.append_audit(event).await {
            warn!("Failed to audit retention sweep: {}", e);
        }
    }

    Ok(())
}
