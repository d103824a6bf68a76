//! Unified gateway binary
//!
//! Wires store, scheduler, worker pool, retention job and the HTTP surface
//! together and owns the graceful shutdown sequence.

use anyhow::Result;
use chrono::Utc;
use smsgate_core::transmitter::Transmitter;
use smsgate_core::tunnel::Tunnel;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use store::Store;
use tokio::signal;
use tokio_util::sync::CancellationToken;

mod config;
mod transmitter;
mod tunnel;

#[tokio::main]
async fn main() -> Result<()> {
    smsgate_shared::bootstrap::init_env();

    // The guard must stay alive for the duration of the program so file
    // logs are flushed
    let _guard = smsgate_shared::bootstrap::init_tracing("smsgate");

    tracing::info!("🚀 Starting SMS gateway");

    let config = config::UnifiedConfig::from_env()?;
    tracing::info!("✓ Configuration loaded");

    let pool = smsgate_shared::bootstrap::init_db(&config.core).await?;
    sqlx::migrate!("../../migrations").run(&pool).await?;
    tracing::info!("✓ Migrations completed");

    let store = Store::new(pool);

    // Repair claims and in-flight rows from a previous run before anything
    // starts claiming again
    let report = store.recover(Utc::now()).await?;
    if report.released_claims > 0 || report.requeued_sending > 0 {
        tracing::warn!(
            "✓ Recovery: released {} claims, requeued {} in-flight sends",
            report.released_claims,
            report.requeued_sending
        );
    } else {
        tracing::info!("✓ Recovery: clean state");
    }

    // External collaborators; real deployments substitute hardware-backed
    // implementations here
    let transmitter: Arc<dyn Transmitter> = Arc::new(transmitter::LogTransmitter);
    let tunnel: Arc<dyn Tunnel> = Arc::new(tunnel::NoopTunnel::default());

    let shutdown = CancellationToken::new();
    let queue_paused = Arc::new(AtomicBool::new(false));
    let (task_tx, task_rx) = dispatch::task_channel(config.dispatch.workers);

    let state = api::AppState {
        store: store.clone(),
        auth_cache: api::AppState::auth_cache(),
        rate_limits: config.rate_limits.clone(),
        queue_paused: queue_paused.clone(),
        transmitter: transmitter.clone(),
        tunnel,
    };

    let api_handle = {
        let api_config = config.to_api_config();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            tokio::select! {
                result = api::run_api(state, &api_config) => {
                    tracing::error!("API service exited: {:?}", result);
                    result.map_err(|e| anyhow::anyhow!(e))
                }
                _ = shutdown.cancelled() => {
                    tracing::info!("API service shutting down");
                    Ok(())
                }
            }
        })
    };

    let scheduler_handle = tokio::spawn(dispatch::run_scheduler(
        store.clone(),
        task_tx,
        config.dispatch.clone(),
        queue_paused,
        shutdown.clone(),
    ));

    let workers_handle = tokio::spawn(dispatch::run_workers(
        store.clone(),
        task_rx,
        transmitter,
        config.dispatch.clone(),
        shutdown.clone(),
    ));

    let retention_handle = tokio::spawn(dispatch::run_retention(
        store,
        config.retention.clone(),
        shutdown.clone(),
    ));

    tracing::info!("✓ All services started");

    wait_for_shutdown().await;
    tracing::info!("📡 Shutdown signal received");

    // Listener closes, scheduler finishes its tick, workers finish their
    // current task; anything still SENDING past the grace period is
    // repaired by recovery on the next start
    shutdown.cancel();

    let drain = async {
        let _ = tokio::join!(
            api_handle,
            scheduler_handle,
            workers_handle,
            retention_handle
        );
    };

    match tokio::time::timeout(config.shutdown_grace, drain).await {
        Ok(()) => tracing::info!("✓ All services stopped gracefully"),
        Err(_) => tracing::warn!(
            "Shutdown grace period ({:?}) expired, exiting with work in flight",
            config.shutdown_grace
        ),
    }

    Ok(())
}

async fn wait_for_shutdown() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
