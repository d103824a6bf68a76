//! Dispatch pipeline - scheduler and worker pool
//!
//! Promotes due messages out of the store, hands them to a fixed pool of
//! workers over a bounded channel, and records every delivery outcome back
//! into the store with retry and backoff semantics.

pub mod retention;
pub mod scheduler;
pub mod worker;

pub use retention::{RetentionConfig, run_retention};
pub use scheduler::run_scheduler;
pub use worker::run_workers;

use smsgate_core::models::Message;
use std::time::Duration;
use tokio::sync::mpsc;

/// A claimed message snapshot travelling from scheduler to a worker.
#[derive(Debug, Clone)]
pub struct DispatchTask {
    pub message: Message,
}

/// Tuning knobs for the dispatch pipeline.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Fixed number of worker slots.
    pub workers: usize,
    /// Rows claimed per scheduler tick.
    pub batch_size: i64,
    /// Scheduler tick period; a full batch re-ticks immediately.
    pub tick_interval: Duration,
    /// Hard cap on a single transmitter call.
    pub send_timeout: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            batch_size: 32,
            tick_interval: Duration::from_secs(1),
            send_timeout: Duration::from_secs(30),
        }
    }
}

/// Build the bounded scheduler-to-workers channel.
///
/// Capacity is twice the worker count, so a healthy pool always has a tick's
/// worth of work staged while the scheduler gets backpressure long before
/// claims pile up.
pub fn task_channel(workers: usize) -> (mpsc::Sender<DispatchTask>, mpsc::Receiver<DispatchTask>) {
    mpsc::channel(workers.max(1) * 2)
}
