//! End-to-end dispatch pipeline tests: scheduler, bounded channel and the
//! worker pool running against a scripted transmitter.

use async_trait::async_trait;
use chrono::Utc;
use dispatch::{DispatchConfig, run_scheduler, run_workers, task_channel};
use smsgate_core::models::{Message, MessageStatus, NewMessage, Priority, RetryStrategy};
use smsgate_core::transmitter::{RetryableFault, SimState, TransmitError, Transmitter};
use sqlx::SqlitePool;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use store::Store;
use tokio_util::sync::CancellationToken;

/// Replays a per-number script of outcomes, recording every call and
/// flagging any overlapping sends for the same number.
#[derive(Default)]
struct ScriptedTransmitter {
    scripts: Mutex<HashMap<String, VecDeque<Result<(), TransmitError>>>>,
    calls: Mutex<Vec<String>>,
    in_flight: Mutex<HashSet<String>>,
    overlap_seen: AtomicBool,
}

impl ScriptedTransmitter {
    fn script(&self, phone: &str, outcomes: Vec<Result<(), TransmitError>>) {
        self.scripts
            .lock()
            .unwrap()
            .insert(phone.to_string(), outcomes.into());
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transmitter for ScriptedTransmitter {
    async fn send(&self, phone_number: &str, _content: &str) -> Result<(), TransmitError> {
        if !self.in_flight.lock().unwrap().insert(phone_number.to_string()) {
            self.overlap_seen.store(true, Ordering::SeqCst);
        }
        self.calls.lock().unwrap().push(phone_number.to_string());

        // Give a concurrent attempt (if the pipeline ever produced one) a
        // chance to overlap before we release the slot.
        tokio::time::sleep(Duration::from_millis(20)).await;

        let outcome = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(phone_number)
            .and_then(|script| script.pop_front())
            .unwrap_or(Ok(()));

        self.in_flight.lock().unwrap().remove(phone_number);
        outcome
    }

    async fn sim_state(&self) -> SimState {
        SimState::Ready
    }
}

struct Pipeline {
    shutdown: CancellationToken,
    scheduler: tokio::task::JoinHandle<anyhow::Result<()>>,
    workers: tokio::task::JoinHandle<anyhow::Result<()>>,
}

impl Pipeline {
    async fn stop(self) {
        self.shutdown.cancel();
        self.scheduler.await.unwrap().unwrap();
        self.workers.await.unwrap().unwrap();
    }
}

fn start_pipeline(
    store: &Store,
    transmitter: Arc<ScriptedTransmitter>,
    workers: usize,
) -> Pipeline {
    let config = DispatchConfig {
        workers,
        batch_size: 8,
        tick_interval: Duration::from_millis(20),
        send_timeout: Duration::from_secs(5),
    };

    let (tx, rx) = task_channel(config.workers);
    let shutdown = CancellationToken::new();
    let paused = Arc::new(AtomicBool::new(false));

    let scheduler = tokio::spawn(run_scheduler(
        store.clone(),
        tx,
        config.clone(),
        paused,
        shutdown.clone(),
    ));
    let workers = tokio::spawn(run_workers(
        store.clone(),
        rx,
        transmitter,
        config,
        shutdown.clone(),
    ));

    Pipeline {
        shutdown,
        scheduler,
        workers,
    }
}

async fn wait_for_status(store: &Store, id: i64, status: MessageStatus) -> Message {
    let deadline = Duration::from_secs(20);
    let poll = async {
        loop {
            let row = store.get_message(id).await.unwrap().unwrap();
            if row.status == status {
                return row;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    };

    tokio::time::timeout(deadline, poll)
        .await
        .unwrap_or_else(|_| panic!("message {} never reached {:?}", id, status))
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_due_message_is_delivered(pool: SqlitePool) {
    let store = Store::new(pool);
    let transmitter = Arc::new(ScriptedTransmitter::default());

    let pipeline = start_pipeline(&store, transmitter.clone(), 4);

    let before = Utc::now();
    let msg = store
        .insert_message(NewMessage::new("+48123456789", "Hi"))
        .await
        .unwrap();

    let row = wait_for_status(&store, msg.id, MessageStatus::Sent).await;
    assert!(row.sent_at.unwrap() >= before);
    assert_eq!(row.retry_count, 0);
    assert_eq!(transmitter.calls(), vec!["+48123456789"]);

    pipeline.stop().await;
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_retryable_failures_then_success(pool: SqlitePool) {
    let store = Store::new(pool);
    let transmitter = Arc::new(ScriptedTransmitter::default());
    transmitter.script(
        "+48123456789",
        vec![
            Err(TransmitError::Retryable(RetryableFault::Timeout)),
            Err(TransmitError::Retryable(RetryableFault::Timeout)),
            Ok(()),
        ],
    );

    let pipeline = start_pipeline(&store, transmitter.clone(), 4);

    // URGENT keeps the backoff window short for the test
    let msg = store
        .insert_message(
            NewMessage::new("+48123456789", "Hi").with_priority(Priority::Urgent),
        )
        .await
        .unwrap();

    let row = wait_for_status(&store, msg.id, MessageStatus::Sent).await;
    assert_eq!(row.retry_count, 2);
    assert_eq!(row.last_error.as_deref(), Some("TIMEOUT"));
    assert_eq!(transmitter.calls().len(), 3);

    pipeline.stop().await;
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_exhausted_retries_fail(pool: SqlitePool) {
    let store = Store::new(pool);
    let transmitter = Arc::new(ScriptedTransmitter::default());
    transmitter.script(
        "+48123456789",
        vec![Err(TransmitError::Retryable(RetryableFault::Timeout)); 4],
    );

    let pipeline = start_pipeline(&store, transmitter.clone(), 4);

    let msg = store
        .insert_message(
            NewMessage::new("+48123456789", "Hi")
                .with_priority(Priority::Urgent)
                .with_strategy(RetryStrategy::Fixed)
                .with_max_retries(2),
        )
        .await
        .unwrap();

    let row = wait_for_status(&store, msg.id, MessageStatus::Failed).await;
    assert_eq!(row.retry_count, 2);
    assert_eq!(row.last_error.as_deref(), Some("TIMEOUT"));
    // Initial attempt plus two retries
    assert_eq!(transmitter.calls().len(), 3);

    pipeline.stop().await;
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_urgent_preempts_low_among_due(pool: SqlitePool) {
    let store = Store::new(pool);
    let transmitter = Arc::new(ScriptedTransmitter::default());

    // Seed both before the pipeline starts so one tick sees them together;
    // a single worker forces serialized sends.
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

    let pipeline = start_pipeline(&store, transmitter.clone(), 1);

    wait_for_status(&store, low.id, MessageStatus::Sent).await;
    wait_for_status(&store, urgent.id, MessageStatus::Sent).await;

    assert_eq!(transmitter.calls(), vec!["+48100000002", "+48100000001"]);

    pipeline.stop().await;
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_at_most_one_attempt_in_flight_per_message(pool: SqlitePool) {
    let store = Store::new(pool);
    let transmitter = Arc::new(ScriptedTransmitter::default());

    // One number keeps failing retryably, the others succeed immediately;
    // the failing one re-enters the pipeline repeatedly.
    transmitter.script(
        "+48100000000",
        vec![Err(TransmitError::Retryable(RetryableFault::Network)); 3],
    );

    let pipeline = start_pipeline(&store, transmitter.clone(), 4);

    let mut ids = Vec::new();
    for i in 0..6 {
        let msg = store
            .insert_message(
                NewMessage::new(&format!("+4810000000{}", i), "load")
                    .with_priority(Priority::Urgent)
                    .with_strategy(RetryStrategy::Fixed),
            )
            .await
            .unwrap();
        ids.push(msg.id);
    }

    for id in ids {
        wait_for_status(&store, id, MessageStatus::Sent).await;
    }

    assert!(
        !transmitter.overlap_seen.load(Ordering::SeqCst),
        "two attempts for one message overlapped"
    );

    pipeline.stop().await;
}
