//! Retention sweep operations
//!
//! Operator-triggered cleanup of delivered and cancelled messages. Failed
//! messages are kept for inspection.

use crate::{Store, StoreResult};
use chrono::{DateTime, Utc};

impl Store {
    /// Purge `SENT` and `CANCELLED` messages older than `cutoff`.
    ///
    /// Sent rows age from their delivery time, cancelled rows from their
    /// creation time. `FAILED` rows are retained.
    pub async fn purge_messages(&self, cutoff: DateTime<Utc>) -> StoreResult<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM messages
            WHERE status IN ('SENT', 'CANCELLED')
              AND COALESCE(sent_at, created_at) < ?1
            "#,
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}
