//! Time-driven promotion of due messages
//!
//! One logical task. Each tick acknowledges future-scheduled rows, claims
//! the due ones in priority order and publishes them to the worker channel.
//! A full channel releases the unpublished claims and ends the tick early.

use crate::{DispatchConfig, DispatchTask};
use anyhow::Result;
use chrono::Utc;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use store::Store;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Run the scheduler loop until cancelled.
///
/// Callers must run [`Store::recover`] before the first tick so claims and
/// in-flight rows from a previous process are repaired.
pub async fn run_scheduler(
    store: Store,
    tx: mpsc::Sender<DispatchTask>,
    config: DispatchConfig,
    paused: Arc<AtomicBool>,
    shutdown: CancellationToken,
) -> Result<()> {
    info!(
        "Starting scheduler: tick_interval={:?}, batch_size={}",
        config.tick_interval, config.batch_size
    );

    let mut ticker = tokio::time::interval(config.tick_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }

        if paused.load(Ordering::Relaxed) {
            debug!("Queue paused, skipping tick");
            continue;
        }

        // Adaptive: a full batch means more work is probably due; re-tick
        // immediately instead of sleeping through the backlog.
        loop {
            match run_tick(&store, &tx, &config).await {
                Ok(TickOutcome::FullBatch) if !shutdown.is_cancelled() => continue,
                Ok(_) => break,
                Err(e) => {
                    error!("Scheduler tick failed: {}", e);
                    break;
                }
            }
        }
    }

    info!("Scheduler stopped");
    Ok(())
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum TickOutcome {
    Idle,
    Published,
    FullBatch,
    /// Channel filled up; remaining claims were released.
    Backpressure,
}

pub(crate) async fn run_tick(
    store: &Store,
    tx: &mpsc::Sender<DispatchTask>,
    config: &DispatchConfig,
) -> Result<TickOutcome> {
    let now = Utc::now();

    store.schedule_pending(now).await?;

    let batch = store.claim_due(now, config.batch_size).await?;
    if batch.is_empty() {
        return Ok(TickOutcome::Idle);
    }

    let claimed = batch.len();
    debug!("Claimed {} due messages", claimed);

    let mut pending = batch.into_iter();
    while let Some(message) = pending.next() {
        let id = message.id;
        if let Err(err) = tx.try_send(DispatchTask { message }) {
            let reason = match err {
                TrySendError::Full(_) => "full",
                TrySendError::Closed(_) => "closed",
            };
            warn!("Dispatch channel {}, releasing remaining claims", reason);

            store.release_claim(id).await?;
            for rest in pending {
                store.release_claim(rest.id).await?;
            }
            return Ok(TickOutcome::Backpressure);
        }
    }

    if claimed as i64 >= config.batch_size {
        Ok(TickOutcome::FullBatch)
    } else {
        Ok(TickOutcome::Published)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smsgate_core::models::{MessageStatus, NewMessage, Priority};
    use sqlx::SqlitePool;

    fn config(batch_size: i64) -> DispatchConfig {
        DispatchConfig {
            batch_size,
            ..DispatchConfig::default()
        }
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn test_tick_publishes_due_in_priority_order(pool: SqlitePool) {
        let store = Store::new(pool);
        let (tx, mut rx) = mpsc::channel(16);

        let low = store
            .insert_message(NewMessage::new("+48100000001", "low").with_priority(Priority::Low))
            .await
            .unwrap();
        let urgent = store
            .insert_message(
                NewMessage::new("+48100000002", "urgent").with_priority(Priority::Urgent),
            )
            .await
            .unwrap();

        let outcome = run_tick(&store, &tx, &config(32)).await.unwrap();
        assert_eq!(outcome, TickOutcome::Published);

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first.message.id, urgent.id);
        assert_eq!(second.message.id, low.id);
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn test_tick_ignores_future_rows(pool: SqlitePool) {
        let store = Store::new(pool);
        let (tx, mut rx) = mpsc::channel(16);

        let future = store
            .insert_message(
                NewMessage::new("+48100000001", "later")
                    .scheduled_at(Utc::now() + chrono::Duration::hours(1)),
            )
            .await
            .unwrap();

        let outcome = run_tick(&store, &tx, &config(32)).await.unwrap();
        assert_eq!(outcome, TickOutcome::Idle);
        assert!(rx.try_recv().is_err());

        // The future row was acknowledged into SCHEDULED, not claimed
        let row = store.get_message(future.id).await.unwrap().unwrap();
        assert_eq!(row.status, MessageStatus::Scheduled);
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn test_backpressure_releases_claims(pool: SqlitePool) {
        let store = Store::new(pool);
        // Tiny channel, no consumers
        let (tx, _rx) = mpsc::channel(2);

        for i in 0..5 {
            store
                .insert_message(NewMessage::new(&format!("+4810000000{}", i), "msg"))
                .await
                .unwrap();
        }

        let outcome = run_tick(&store, &tx, &config(32)).await.unwrap();
        assert_eq!(outcome, TickOutcome::Backpressure);

        let (claimed, _) = store
            .list_messages(None, 1, 10)
            .await
            .unwrap();
        let claimed_count = claimed
            .iter()
            .filter(|m| m.status == MessageStatus::Claimed)
            .count();
        let queued_count = claimed
            .iter()
            .filter(|m| m.status == MessageStatus::Queued)
            .count();

        // Two published rows stay claimed, the rest went back to the queue
        assert_eq!(claimed_count, 2);
        assert_eq!(queued_count, 3);
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn test_full_batch_requests_immediate_retick(pool: SqlitePool) {
        let store = Store::new(pool);
        let (tx, mut rx) = mpsc::channel(16);

        for i in 0..3 {
            store
                .insert_message(NewMessage::new(&format!("+4810000000{}", i), "msg"))
                .await
                .unwrap();
        }

        let outcome = run_tick(&store, &tx, &config(2)).await.unwrap();
        assert_eq!(outcome, TickOutcome::FullBatch);

        let outcome = run_tick(&store, &tx, &config(2)).await.unwrap();
        assert_eq!(outcome, TickOutcome::Published);

        let mut seen = 0;
        while rx.try_recv().is_ok() {
            seen += 1;
        }
        assert_eq!(seen, 3);
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn test_paused_scheduler_claims_nothing(pool: SqlitePool) {
        let store = Store::new(pool.clone());
        let (tx, _rx) = mpsc::channel(16);

        store
            .insert_message(NewMessage::new("+48123456789", "held"))
            .await
            .unwrap();

        let paused = Arc::new(AtomicBool::new(true));
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(run_scheduler(
            store.clone(),
            tx,
            DispatchConfig {
                tick_interval: std::time::Duration::from_millis(10),
                ..DispatchConfig::default()
            },
            paused.clone(),
            shutdown.clone(),
        ));

        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        let (items, _) = store.list_messages(None, 1, 10).await.unwrap();
        assert!(items.iter().all(|m| m.status == MessageStatus::Queued));

        shutdown.cancel();
        handle.await.unwrap().unwrap();
    }
}
