//! Persistent rate-limit buckets
//!
//! Fixed-window counters keyed by `(client, scope)` with escalation: three
//! consecutive overruns of one scope within an hour earn a scope-specific
//! block. Admission happens in a single conditional UPDATE so concurrent
//! bursts cannot both slip under the cap.

use crate::{Store, StoreResult};
use chrono::{DateTime, Duration, Utc};
use smsgate_core::models::RateLimitScope;

/// Consecutive overruns that trigger a block.
const STRIKES_TO_BLOCK: i64 = 3;

/// Cap and penalty configuration for one scope.
#[derive(Debug, Clone, Copy)]
pub struct ScopePolicy {
    pub limit: u32,
    pub window: std::time::Duration,
    pub block: std::time::Duration,
}

impl ScopePolicy {
    pub const fn new(limit: u32, window: std::time::Duration, block: std::time::Duration) -> Self {
        Self {
            limit,
            window,
            block,
        }
    }
}

/// Admission decision plus the numbers behind the rate-limit headers.
#[derive(Debug, Clone, Copy)]
pub struct RateDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    /// When the active window (or block) ends.
    pub reset_at: DateTime<Utc>,
    /// Present on deny.
    pub retry_after: Option<std::time::Duration>,
}

impl Store {
    /// Count one request against `(client_id, scope)`.
    ///
    /// Allow and deny paths are each a single UPDATE statement, so the
    /// check-and-increment is atomic under SQLite's writer lock.
    pub async fn rate_check(
        &self,
        client_id: &str,
        scope: RateLimitScope,
        policy: &ScopePolicy,
        now: DateTime<Utc>,
    ) -> StoreResult<RateDecision> {
        let window = Duration::from_std(policy.window)
            .map_err(|e| anyhow::anyhow!("window out of range: {}", e))?;
        let block = Duration::from_std(policy.block)
            .map_err(|e| anyhow::anyhow!("block out of range: {}", e))?;
        let window_cutoff = now - window;
        let strike_cutoff = now - Duration::hours(1);
        let limit = i64::from(policy.limit);

        sqlx::query(
            r#"
            INSERT INTO rate_limits (client_id, scope, window_start, count, strikes)
            VALUES (?1, ?2, ?3, 0, 0)
            ON CONFLICT (client_id, scope) DO NOTHING
            "#,
        )
        .bind(client_id)
        .bind(scope)
        .bind(now)
        .execute(&self.pool)
        .await?;

        // An allow resets the overrun streak; an expired window restarts the
        // counter at one.
        let admitted: Option<(i64, DateTime<Utc>)> = sqlx::query_as(
            r#"
            UPDATE rate_limits SET
                count = CASE WHEN window_start > ?3 THEN count + 1 ELSE 1 END,
                window_start = CASE WHEN window_start > ?3 THEN window_start ELSE ?4 END,
                strikes = 0,
                last_strike_at = NULL
            WHERE client_id = ?1 AND scope = ?2
              AND (blocked_until IS NULL OR blocked_until <= ?4)
              AND (CASE WHEN window_start > ?3 THEN count ELSE 0 END) < ?5
            RETURNING count, window_start
            "#,
        )
        .bind(client_id)
        .bind(scope)
        .bind(window_cutoff)
        .bind(now)
        .bind(limit)
        .fetch_optional(&self.pool)
        .await?;

        if let Some((count, window_start)) = admitted {
            return Ok(RateDecision {
                allowed: true,
                limit: policy.limit,
                remaining: policy.limit.saturating_sub(count as u32),
                reset_at: window_start + window,
                retry_after: None,
            });
        }

        // Overrun: record a strike unless a block is already active.
        sqlx::query(
            r#"
            UPDATE rate_limits SET
                strikes = CASE WHEN last_strike_at IS NOT NULL AND last_strike_at > ?3
                               THEN strikes + 1 ELSE 1 END,
                last_strike_at = ?4,
                blocked_until = CASE
                    WHEN (CASE WHEN last_strike_at IS NOT NULL AND last_strike_at > ?3
                               THEN strikes + 1 ELSE 1 END) >= ?5
                    THEN ?6 ELSE blocked_until END
            WHERE client_id = ?1 AND scope = ?2
              AND (blocked_until IS NULL OR blocked_until <= ?4)
            "#,
        )
        .bind(client_id)
        .bind(scope)
        .bind(strike_cutoff)
        .bind(now)
        .bind(STRIKES_TO_BLOCK)
        .bind(now + block)
        .execute(&self.pool)
        .await?;

        let (window_start, blocked_until): (DateTime<Utc>, Option<DateTime<Utc>>) =
            sqlx::query_as(
                "SELECT window_start, blocked_until FROM rate_limits WHERE client_id = ?1 AND scope = ?2",
            )
            .bind(client_id)
            .bind(scope)
            .fetch_one(&self.pool)
            .await?;

        let reset_at = blocked_until
            .filter(|until| *until > now)
            .unwrap_or(window_start + window);
        let retry_after = (reset_at - now).to_std().unwrap_or_default();

        Ok(RateDecision {
            allowed: false,
            limit: policy.limit,
            remaining: 0,
            reset_at,
            retry_after: Some(retry_after),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::SqlitePool;
    use std::time::Duration as StdDuration;

    fn policy(limit: u32) -> ScopePolicy {
        ScopePolicy::new(
            limit,
            StdDuration::from_secs(3600),
            StdDuration::from_secs(1800),
        )
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn test_allows_under_limit(pool: SqlitePool) {
        let store = Store::new(pool);
        let policy = policy(3);

        for expected_remaining in [2, 1, 0] {
            let decision = store
                .rate_check("ip:10.0.0.1", RateLimitScope::Request, &policy, Utc::now())
                .await
                .unwrap();
            assert!(decision.allowed);
            assert_eq!(decision.limit, 3);
            assert_eq!(decision.remaining, expected_remaining);
            assert!(decision.retry_after.is_none());
        }
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn test_denies_over_limit_with_retry_after(pool: SqlitePool) {
        let store = Store::new(pool);
        let policy = policy(2);

        let now = Utc::now();
        for _ in 0..2 {
            store
                .rate_check("ip:10.0.0.1", RateLimitScope::Request, &policy, now)
                .await
                .unwrap();
        }

        let denied = store
            .rate_check("ip:10.0.0.1", RateLimitScope::Request, &policy, now)
            .await
            .unwrap();

        assert!(!denied.allowed);
        assert_eq!(denied.remaining, 0);
        assert!(denied.retry_after.unwrap() > StdDuration::ZERO);
        assert!(denied.reset_at > now);
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn test_window_expiry_resets_count(pool: SqlitePool) {
        let store = Store::new(pool);
        let policy = policy(1);

        let now = Utc::now();
        assert!(
            store
                .rate_check("ip:10.0.0.1", RateLimitScope::Request, &policy, now)
                .await
                .unwrap()
                .allowed
        );
        assert!(
            !store
                .rate_check("ip:10.0.0.1", RateLimitScope::Request, &policy, now)
                .await
                .unwrap()
                .allowed
        );

        // Two hours later the window has rolled over
        let later = now + Duration::hours(2);
        let decision = store
            .rate_check("ip:10.0.0.1", RateLimitScope::Request, &policy, later)
            .await
            .unwrap();
        assert!(decision.allowed);
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn test_scopes_and_clients_are_independent(pool: SqlitePool) {
        let store = Store::new(pool);
        let policy = policy(1);

        let now = Utc::now();
        store
            .rate_check("ip:10.0.0.1", RateLimitScope::Request, &policy, now)
            .await
            .unwrap();

        let other_scope = store
            .rate_check("ip:10.0.0.1", RateLimitScope::Auth, &policy, now)
            .await
            .unwrap();
        assert!(other_scope.allowed);

        let other_client = store
            .rate_check("ip:10.0.0.2", RateLimitScope::Request, &policy, now)
            .await
            .unwrap();
        assert!(other_client.allowed);
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn test_three_strikes_escalate_to_block(pool: SqlitePool) {
        let store = Store::new(pool);
        // Block outlasts the window so the escalation is observable on its own
        let policy = ScopePolicy::new(
            1,
            StdDuration::from_secs(3600),
            StdDuration::from_secs(7200),
        );

        let now = Utc::now();
        store
            .rate_check("ip:10.0.0.1", RateLimitScope::Admin, &policy, now)
            .await
            .unwrap();

        // Three consecutive overruns
        for _ in 0..3 {
            let denied = store
                .rate_check("ip:10.0.0.1", RateLimitScope::Admin, &policy, now)
                .await
                .unwrap();
            assert!(!denied.allowed);
        }

        // Even a fresh window stays blocked for the block duration
        let after_window = now + Duration::hours(1) + Duration::minutes(1);
        let blocked = store
            .rate_check("ip:10.0.0.1", RateLimitScope::Admin, &policy, after_window)
            .await
            .unwrap();
        assert!(!blocked.allowed);
        assert!(blocked.reset_at > after_window);

        // Block expired: allowed again and the streak is reset
        let after_block = now + Duration::hours(2) + Duration::minutes(1);
        let released = store
            .rate_check("ip:10.0.0.1", RateLimitScope::Admin, &policy, after_block)
            .await
            .unwrap();
        assert!(released.allowed);
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn test_allow_resets_strike_streak(pool: SqlitePool) {
        let store = Store::new(pool);
        let policy = policy(1);

        let mut now = Utc::now();
        for _ in 0..5 {
            // One allow then one deny per window: strikes never accumulate
            assert!(
                store
                    .rate_check("ip:10.0.0.1", RateLimitScope::Request, &policy, now)
                    .await
                    .unwrap()
                    .allowed
            );
            assert!(
                !store
                    .rate_check("ip:10.0.0.1", RateLimitScope::Request, &policy, now)
                    .await
                    .unwrap()
                    .allowed
            );
            now += Duration::hours(2);
        }

        // Still only denied by the window, never blocked
        let decision = store
            .rate_check("ip:10.0.0.1", RateLimitScope::Request, &policy, now)
            .await
            .unwrap();
        assert!(decision.allowed);
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn test_concurrent_burst_respects_cap(pool: SqlitePool) {
        let store = Store::new(pool);
        let policy = policy(10);

        let mut handles = Vec::new();
        for _ in 0..25 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .rate_check("ip:10.0.0.1", RateLimitScope::Request, &policy, Utc::now())
                    .await
                    .unwrap()
                    .allowed
            }));
        }

        let mut allowed = 0;
        for handle in handles {
            if handle.await.unwrap() {
                allowed += 1;
            }
        }

        assert_eq!(allowed, 10, "exactly the cap must pass under a burst");
    }
}
