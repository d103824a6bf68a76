//! Durable gateway state
//!
//! The store is the only owner of persisted state: messages, API tokens,
//! rate-limit buckets and the audit trail, all in one embedded SQLite
//! database. Scheduler, dispatcher and the HTTP surface hold a cloneable
//! [`Store`] handle and communicate exclusively through its operations.

pub mod audit;
pub mod messages;
pub mod rate_limit;
pub mod retention;
pub mod tokens;

pub use messages::{CancelOutcome, RecoveryReport};
pub use rate_limit::{RateDecision, ScopePolicy};
pub use tokens::{AuthRejection, NewToken};

use smsgate_core::GatewayError;
use sqlx::SqlitePool;
use thiserror::Error;

/// Errors surfaced by store operations
#[derive(Error, Debug)]
pub enum StoreError {
    /// A domain invariant would be broken by the write.
    #[error("validation failed: {0}")]
    Validation(String),

    #[error(transparent)]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<GatewayError> for StoreError {
    fn from(err: GatewayError) -> Self {
        Self::Validation(err.to_string())
    }
}

/// Result type alias for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Handle to the embedded database.
///
/// Cheap to clone; all methods issue short single-row transactions or
/// single-statement writes so SQLite's writer lock stays briefly held.
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}
