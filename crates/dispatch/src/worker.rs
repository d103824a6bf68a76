//! Delivery worker pool
//!
//! A fixed pool of workers drains the dispatch channel, drives the
//! transmitter with a per-call timeout and commits every outcome back to
//! the store: sent, terminal failure, or a retry with backoff and jitter.

use crate::{DispatchConfig, DispatchTask};
use anyhow::Result;
use chrono::Utc;
use rand::RngExt;
use smsgate_core::backoff;
use smsgate_core::models::{AuditSeverity, Message, NewAuditEvent};
use smsgate_core::transmitter::{RetryableFault, TransmitError, Transmitter};
use std::sync::Arc;
use store::Store;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Run the worker pool until cancelled and the current tasks finish.
///
/// Workers share the receiving end of the bounded channel; each takes one
/// task at a time, so a message is handled by exactly one worker.
pub async fn run_workers(
    store: Store,
    rx: mpsc::Receiver<DispatchTask>,
    transmitter: Arc<dyn Transmitter>,
    config: DispatchConfig,
    shutdown: CancellationToken,
) -> Result<()> {
    info!(
        "Starting {} dispatch workers (send_timeout={:?})",
        config.workers, config.send_timeout
    );

    let rx = Arc::new(Mutex::new(rx));
    let mut workers = JoinSet::new();

    for slot in 0..config.workers {
        let store = store.clone();
        let rx = rx.clone();
        let transmitter = transmitter.clone();
        let config = config.clone();
        let shutdown = shutdown.clone();

        workers.spawn(async move {
            worker_loop(slot, store, rx, transmitter, config, shutdown).await;
        });
    }

    while let Some(res) = workers.join_next().await {
        if let Err(e) = res {
            error!("Worker task panicked: {}", e);
        }
    }

    info!("All dispatch workers stopped");
    Ok(())
}

async fn worker_loop(
    slot: usize,
    store: Store,
    rx: Arc<Mutex<mpsc::Receiver<DispatchTask>>>,
    transmitter: Arc<dyn Transmitter>,
    config: DispatchConfig,
    shutdown: CancellationToken,
) {
    loop {
        let task = tokio::select! {
            _ = shutdown.cancelled() => break,
            task = async { rx.lock().await.recv().await } => task,
        };

        let Some(task) = task else {
            // Channel closed: scheduler is gone
            break;
        };

        if let Err(e) = handle_task(&store, transmitter.as_ref(), &config, task.message).await {
            error!("Worker {} failed to record outcome: {}", slot, e);
        }
    }

    debug!("Worker {} stopped", slot);
}

/// Drive one delivery attempt and persist its outcome.
pub(crate) async fn handle_task(
    store: &Store,
    transmitter: &dyn Transmitter,
    config: &DispatchConfig,
    message: Message,
) -> Result<()> {
    let id = message.id;

    if !store.commit_sending(id).await? {
        // Cancelled (or repaired by recovery) since it was claimed
        debug!("Message {} no longer claimed, skipping", id);
        return Ok(());
    }

    // Last look at the cancel intent before spending a transmitter call
    if store.cancel_requested(id).await? && store.cancel_in_flight(id).await? {
        info!("Message {} cancelled before transmission", id);
        return Ok(());
    }

    let outcome = match tokio::time::timeout(
        config.send_timeout,
        transmitter.send(&message.phone_number, &message.content),
    )
    .await
    {
        Ok(result) => result,
        Err(_) => Err(TransmitError::Retryable(RetryableFault::Timeout)),
    };

    match outcome {
        Ok(()) => {
            let now = Utc::now();
            store.commit_sent(id, now).await?;
            info!("Message {} sent", id);

            if store.cancel_requested(id).await? {
                // Cancellation is best effort for in-flight sends; the
                // outcome stands, but leave a trace.
                audit_cancel_after_send(store, id, "SENT").await;
            }
        }
        Err(TransmitError::Terminal(fault)) => {
            warn!("Message {} failed terminally: {}", id, fault);
            store.commit_failed(id, &fault.to_string()).await?;

            if store.cancel_requested(id).await? {
                audit_cancel_after_send(store, id, "FAILED").await;
            }
        }
        Err(err) => {
            // Retryable or unclassified: back off and reschedule
            let attempt = message.retry_count.max(0) as u32;
            let unit: f64 = rand::rng().random();
            let delay =
                backoff::backoff_delay(message.retry_strategy, message.priority, attempt, unit);

            let next_attempt = Utc::now()
                + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());

            let row = store.commit_retry(id, next_attempt, &err.to_string()).await?;
            match row {
                Some(row) if row.status == smsgate_core::models::MessageStatus::Failed => {
                    warn!(
                        "Message {} exhausted its {} retries: {}",
                        id, row.max_retries, err
                    );
                }
                Some(row) => {
                    info!(
                        "Message {} retry {} scheduled in {:?}: {}",
                        id, row.retry_count, delay, err
                    );
                }
                None => warn!("Message {} left SENDING before retry was recorded", id),
            }
        }
    }

    Ok(())
}

async fn audit_cancel_after_send(store: &Store, id: i64, outcome: &str) {
    let mut event = NewAuditEvent::new("CANCEL_AFTER_SEND", AuditSeverity::Warning);
    event.payload = serde_json::json!({ "message_id": id, "outcome": outcome });
    if let Err(e) = store.append_audit(event).await {
        warn!("Failed to audit late cancel of message {}: {}", id, e);
    }
}
