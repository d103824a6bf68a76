//! Message queue operations
//!
//! Insert, claim, commit and recovery paths for the persistent message
//! queue. The claim flow is the single-writer critical section that keeps
//! at most one delivery attempt in flight per message.

use crate::{Store, StoreResult};
use chrono::{DateTime, Utc};
use smsgate_core::models::{Message, MessageStatus, NewMessage, Priority};
use smsgate_core::validation;
use sqlx::QueryBuilder;

/// Outcome of a cancellation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The message is now (or already was) `CANCELLED`.
    Cancelled,
    /// The message already reached `SENT` or `FAILED`.
    AlreadyTerminal(MessageStatus),
    /// A worker holds the message; the cancel intent flag was set and the
    /// worker will observe it around the transmitter call.
    InFlight,
    NotFound,
}

/// Rows repaired by startup recovery.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecoveryReport {
    /// Orphaned claims returned to their logical pre-claim state.
    pub released_claims: u64,
    /// `SENDING` rows from a vanished process, rescheduled for now.
    pub requeued_sending: u64,
}

impl Store {
    /// Insert a new message in `QUEUED` state.
    ///
    /// Assigns the id and a monotonic `queue_seq`. A `scheduled_at` earlier
    /// than the insert time means "as soon as allowed" and is floored to
    /// `created_at` so `scheduled_at >= created_at` always holds.
    pub async fn insert_message(&self, new: NewMessage) -> StoreResult<Message> {
        validation::validate_phone_number(&new.phone_number)?;
        validation::validate_content(&new.content)?;
        validation::validate_max_retries(new.max_retries)?;

        let created_at = Utc::now();
        let scheduled_at = new.scheduled_at.map(|at| at.max(created_at));

        let msg = sqlx::query_as::<_, Message>(
            r#"
            INSERT INTO messages
                (phone_number, content, priority, retry_strategy, status,
                 created_at, scheduled_at, retry_count, max_retries, queue_seq,
                 cancel_requested)
            VALUES
                (?1, ?2, ?3, ?4, 'QUEUED', ?5, ?6, 0, ?7,
                 (SELECT COALESCE(MAX(queue_seq), 0) + 1 FROM messages), 0)
            RETURNING *
            "#,
        )
        .bind(&new.phone_number)
        .bind(&new.content)
        .bind(new.priority)
        .bind(new.retry_strategy)
        .bind(created_at)
        .bind(scheduled_at)
        .bind(new.max_retries)
        .fetch_one(&self.pool)
        .await?;

        Ok(msg)
    }

    pub async fn get_message(&self, id: i64) -> StoreResult<Option<Message>> {
        let msg = sqlx::query_as::<_, Message>("SELECT * FROM messages WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(msg)
    }

    /// Page through messages, newest first, optionally filtered by status.
    ///
    /// The filter accepts public statuses; claimed rows surface under the
    /// status they were claimed out of.
    pub async fn list_messages(
        &self,
        filter: Option<MessageStatus>,
        page: u32,
        size: u32,
    ) -> StoreResult<(Vec<Message>, i64)> {
        let offset = i64::from(page.saturating_sub(1)) * i64::from(size);

        let mut count = QueryBuilder::new("SELECT COUNT(*) FROM messages WHERE ");
        push_status_filter(&mut count, filter);
        let total: i64 = count.build_query_scalar().fetch_one(&self.pool).await?;

        let mut query = QueryBuilder::new("SELECT * FROM messages WHERE ");
        push_status_filter(&mut query, filter);
        query
            .push(" ORDER BY created_at DESC, id DESC LIMIT ")
            .push_bind(i64::from(size))
            .push(" OFFSET ")
            .push_bind(offset);

        let items = query
            .build_query_as::<Message>()
            .fetch_all(&self.pool)
            .await?;

        Ok((items, total))
    }

    /// Number of messages still travelling towards delivery.
    pub async fn count_pending(&self) -> StoreResult<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM messages WHERE status IN ('QUEUED', 'SCHEDULED', 'CLAIMED', 'SENDING')",
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    /// Stage-1 promotion: acknowledge future-scheduled `QUEUED` rows into
    /// `SCHEDULED`. After this pass, every remaining `QUEUED` row is due.
    pub async fn schedule_pending(&self, now: DateTime<Utc>) -> StoreResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE messages SET status = 'SCHEDULED'
            WHERE status = 'QUEUED'
              AND scheduled_at IS NOT NULL
              AND scheduled_at > ?1
            "#,
        )
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Atomically reserve up to `limit` due rows for dispatch.
    ///
    /// Flips them to the claim state in one statement so no two scheduler
    /// passes (or a pass racing recovery) see the same row. Snapshots come
    /// back in dispatch order: priority first, then earliest due time, then
    /// insertion order.
    pub async fn claim_due(&self, now: DateTime<Utc>, limit: i64) -> StoreResult<Vec<Message>> {
        let mut rows = sqlx::query_as::<_, Message>(
            r#"
            UPDATE messages SET status = 'CLAIMED'
            WHERE id IN (
                SELECT id FROM messages
                WHERE (status = 'QUEUED' AND (scheduled_at IS NULL OR scheduled_at <= ?1))
                   OR (status = 'SCHEDULED' AND scheduled_at <= ?1)
                ORDER BY priority DESC, COALESCE(scheduled_at, created_at) ASC, queue_seq ASC
                LIMIT ?2
            )
            RETURNING *
            "#,
        )
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        // RETURNING does not promise the subquery's ordering
        rows.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| {
                    a.scheduled_at
                        .unwrap_or(a.created_at)
                        .cmp(&b.scheduled_at.unwrap_or(b.created_at))
                })
                .then_with(|| a.queue_seq.cmp(&b.queue_seq))
        });

        Ok(rows)
    }

    /// Return a claimed row to its logical pre-claim state (backpressure or
    /// recovery).
    pub async fn release_claim(&self, id: i64) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE messages
            SET status = CASE WHEN scheduled_at IS NULL THEN 'QUEUED' ELSE 'SCHEDULED' END
            WHERE id = ?1 AND status = 'CLAIMED'
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Claim -> `SENDING`. Returns false when the row was cancelled (or
    /// otherwise moved) since it was claimed; the worker must then skip it.
    pub async fn commit_sending(&self, id: i64) -> StoreResult<bool> {
        let result =
            sqlx::query("UPDATE messages SET status = 'SENDING' WHERE id = ?1 AND status = 'CLAIMED'")
                .bind(id)
                .execute(&self.pool)
                .await?;

        Ok(result.rows_affected() == 1)
    }

    /// `SENDING` -> `SENT`, stamping the delivery time.
    pub async fn commit_sent(&self, id: i64, now: DateTime<Utc>) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE messages SET status = 'SENT', sent_at = ?2 WHERE id = ?1 AND status = 'SENDING'",
        )
        .bind(id)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Record a retryable failure.
    ///
    /// `SENDING` -> `SCHEDULED` with the retry counter bumped and the next
    /// attempt time set. Once the bump would exceed the retry budget the row
    /// goes to `FAILED` instead, with counter and schedule left frozen.
    pub async fn commit_retry(
        &self,
        id: i64,
        next_attempt_at: DateTime<Utc>,
        error: &str,
    ) -> StoreResult<Option<Message>> {
        let msg = sqlx::query_as::<_, Message>(
            r#"
            UPDATE messages SET
                status = CASE WHEN retry_count + 1 > max_retries THEN 'FAILED' ELSE 'SCHEDULED' END,
                retry_count = CASE WHEN retry_count + 1 > max_retries THEN retry_count ELSE retry_count + 1 END,
                scheduled_at = CASE WHEN retry_count + 1 > max_retries THEN scheduled_at ELSE ?2 END,
                last_error = ?3
            WHERE id = ?1 AND status = 'SENDING'
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(next_attempt_at)
        .bind(error)
        .fetch_optional(&self.pool)
        .await?;

        Ok(msg)
    }

    /// Record a terminal transmitter fault: `SENDING` -> `FAILED` with the
    /// retry budget spent.
    pub async fn commit_failed(&self, id: i64, error: &str) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE messages
            SET status = 'FAILED', retry_count = max_retries, last_error = ?2
            WHERE id = ?1 AND status = 'SENDING'
            "#,
        )
        .bind(id)
        .bind(error)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Cancel a message.
    ///
    /// Pre-flight states go straight to `CANCELLED`; an in-flight send gets
    /// the intent flag for the worker to observe. Cancelling an already
    /// cancelled message is a no-op success.
    pub async fn cancel(&self, id: i64) -> StoreResult<CancelOutcome> {
        let direct = sqlx::query(
            r#"
            UPDATE messages SET status = 'CANCELLED'
            WHERE id = ?1 AND status IN ('QUEUED', 'SCHEDULED', 'CLAIMED')
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        if direct.rows_affected() == 1 {
            return Ok(CancelOutcome::Cancelled);
        }

        let flagged = sqlx::query(
            "UPDATE messages SET cancel_requested = 1 WHERE id = ?1 AND status = 'SENDING'",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        if flagged.rows_affected() == 1 {
            return Ok(CancelOutcome::InFlight);
        }

        let status: Option<MessageStatus> =
            sqlx::query_scalar("SELECT status FROM messages WHERE id = ?1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        match status {
            None => Ok(CancelOutcome::NotFound),
            Some(MessageStatus::Cancelled) => Ok(CancelOutcome::Cancelled),
            Some(s @ (MessageStatus::Sent | MessageStatus::Failed)) => {
                Ok(CancelOutcome::AlreadyTerminal(s))
            }
            // The row moved between our updates and the read; treat the
            // request as accepted, the flag path will catch it next time.
            Some(_) => Ok(CancelOutcome::InFlight),
        }
    }

    /// Whether a cancel intent is pending on the row.
    pub async fn cancel_requested(&self, id: i64) -> StoreResult<bool> {
        let flag: Option<bool> =
            sqlx::query_scalar("SELECT cancel_requested FROM messages WHERE id = ?1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(flag.unwrap_or(false))
    }

    /// Honor a pending cancel intent before the transmitter was invoked:
    /// `SENDING` -> `CANCELLED`.
    pub async fn cancel_in_flight(&self, id: i64) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE messages SET status = 'CANCELLED'
            WHERE id = ?1 AND status = 'SENDING' AND cancel_requested = 1
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Change priority of a message that has not yet entered delivery.
    pub async fn update_priority(&self, id: i64, priority: Priority) -> StoreResult<Option<Message>> {
        let msg = sqlx::query_as::<_, Message>(
            r#"
            UPDATE messages SET priority = ?2
            WHERE id = ?1 AND status IN ('QUEUED', 'SCHEDULED', 'CLAIMED')
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(priority)
        .fetch_optional(&self.pool)
        .await?;

        Ok(msg)
    }

    /// Startup repair after an unclean exit.
    ///
    /// Orphaned claims are released; rows stuck in `SENDING` (their worker
    /// is gone) are rescheduled for immediate retry without touching the
    /// retry counter — from the caller's viewpoint the send never happened.
    /// Each requeued row leaves a `RECOVERED_IN_FLIGHT` audit event.
    pub async fn recover(&self, now: DateTime<Utc>) -> StoreResult<RecoveryReport> {
        let sending_ids: Vec<i64> =
            sqlx::query_scalar("SELECT id FROM messages WHERE status = 'SENDING'")
                .fetch_all(&self.pool)
                .await?;

        let released = sqlx::query(
            r#"
            UPDATE messages
            SET status = CASE WHEN scheduled_at IS NULL THEN 'QUEUED' ELSE 'SCHEDULED' END
            WHERE status = 'CLAIMED'
            "#,
        )
        .execute(&self.pool)
        .await?
        .rows_affected();

        let requeued = sqlx::query(
            r#"
            UPDATE messages SET status = 'SCHEDULED', scheduled_at = ?1
            WHERE status = 'SENDING'
            "#,
        )
        .bind(now)
        .execute(&self.pool)
        .await?
        .rows_affected();

        for id in sending_ids {
            let mut event = smsgate_core::models::NewAuditEvent::new(
                "RECOVERED_IN_FLIGHT",
                smsgate_core::models::AuditSeverity::Warning,
            );
            event.payload = serde_json::json!({ "message_id": id });
            if let Err(e) = self.append_audit(event).await {
                tracing::warn!("Failed to audit recovery of message {}: {}", id, e);
            }
        }

        Ok(RecoveryReport {
            released_claims: released,
            requeued_sending: requeued,
        })
    }
}

fn push_status_filter(query: &mut QueryBuilder<'_, sqlx::Sqlite>, filter: Option<MessageStatus>) {
    match filter {
        None => {
            query.push("1 = 1");
        }
        Some(MessageStatus::Queued) => {
            query.push("(status = 'QUEUED' OR (status = 'CLAIMED' AND scheduled_at IS NULL))");
        }
        Some(MessageStatus::Scheduled) => {
            query.push("(status = 'SCHEDULED' OR (status = 'CLAIMED' AND scheduled_at IS NOT NULL))");
        }
        Some(other) => {
            query.push("status = ").push_bind(other);
        }
    }
}
