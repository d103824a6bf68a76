//! API token operations
//!
//! Tokens are bearer credentials with argon2-hashed secrets. The plaintext
//! secret is returned exactly once, at creation.

use crate::{Store, StoreResult};
use chrono::{DateTime, Duration, Utc};
use smsgate_core::models::{ApiToken, AuthContext, TokenKind};
use smsgate_core::security;
use sqlx::types::Json;
use thiserror::Error;

/// Default lifetime of a TEMPORARY token in hours.
pub const DEFAULT_TOKEN_TTL_HOURS: i64 = 24;

/// Default lifetime of a TEMPORARY token.
pub fn default_token_ttl() -> Duration {
    Duration::hours(DEFAULT_TOKEN_TTL_HOURS)
}

/// Fields supplied when issuing a token.
#[derive(Debug, Clone)]
pub struct NewToken {
    pub owner_id: String,
    pub name: String,
    pub permissions: Vec<String>,
    pub kind: TokenKind,
    /// Lifetime override; TEMPORARY tokens default to 24 hours.
    pub ttl: Option<Duration>,
}

/// Why a presented secret was rejected.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthRejection {
    #[error("malformed token")]
    Malformed,
    #[error("unknown token")]
    Unknown,
    #[error("token revoked")]
    Revoked,
    #[error("token expired")]
    Expired,
    #[error("secret mismatch")]
    BadSecret,
}

impl Store {
    /// Issue a token. Returns the row and the secret text; the secret is
    /// not recoverable afterwards.
    pub async fn create_token(&self, new: NewToken) -> StoreResult<(ApiToken, String)> {
        let created_at = Utc::now();
        let expires_at = match new.kind {
            TokenKind::Temporary => Some(created_at + new.ttl.unwrap_or_else(default_token_ttl)),
            TokenKind::Permanent => new.ttl.map(|ttl| created_at + ttl),
        };

        // The secret embeds the row id, so insert first with a placeholder
        // hash and fill it in once the id is known.
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO api_tokens
                (owner_id, name, hashed_secret, permissions, kind, expires_at, revoked, created_at)
            VALUES (?1, ?2, '', ?3, ?4, ?5, 0, ?6)
            RETURNING id
            "#,
        )
        .bind(&new.owner_id)
        .bind(&new.name)
        .bind(Json(&new.permissions))
        .bind(new.kind)
        .bind(expires_at)
        .bind(created_at)
        .fetch_one(&self.pool)
        .await?;

        let secret = security::generate_secret(id);
        let hashed = security::hash_secret(&secret)?;

        let token = sqlx::query_as::<_, ApiToken>(
            "UPDATE api_tokens SET hashed_secret = ?2 WHERE id = ?1 RETURNING *",
        )
        .bind(id)
        .bind(&hashed)
        .fetch_one(&self.pool)
        .await?;

        Ok((token, secret))
    }

    pub async fn get_token(&self, id: i64) -> StoreResult<Option<ApiToken>> {
        let token = sqlx::query_as::<_, ApiToken>("SELECT * FROM api_tokens WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(token)
    }

    /// Validate a presented bearer secret.
    ///
    /// The outer error is a store failure; the inner result carries the
    /// admission decision with its rejection reason for auditing.
    pub async fn validate_token(
        &self,
        secret: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<Result<AuthContext, AuthRejection>> {
        let Some(id) = security::parse_secret(secret) else {
            return Ok(Err(AuthRejection::Malformed));
        };

        let Some(token) = self.get_token(id).await? else {
            return Ok(Err(AuthRejection::Unknown));
        };

        if token.revoked {
            return Ok(Err(AuthRejection::Revoked));
        }
        if let Some(expires_at) = token.expires_at
            && expires_at <= now
        {
            return Ok(Err(AuthRejection::Expired));
        }

        if !security::verify_secret(secret, &token.hashed_secret)? {
            return Ok(Err(AuthRejection::BadSecret));
        }

        sqlx::query("UPDATE api_tokens SET last_used_at = ?2 WHERE id = ?1")
            .bind(id)
            .bind(now)
            .execute(&self.pool)
            .await?;

        Ok(Ok(AuthContext {
            token_id: token.id,
            owner_id: token.owner_id,
            permissions: token.permissions,
        }))
    }

    /// Revoke a token owned by `owner_id`. False when no matching live
    /// token exists.
    pub async fn revoke_token(&self, id: i64, owner_id: &str) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE api_tokens SET revoked = 1 WHERE id = ?1 AND owner_id = ?2 AND revoked = 0",
        )
        .bind(id)
        .bind(owner_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Extend a TEMPORARY token's lifetime from `now`.
    pub async fn renew_token(
        &self,
        id: i64,
        owner_id: &str,
        extend: Duration,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<ApiToken>> {
        let token = sqlx::query_as::<_, ApiToken>(
            r#"
            UPDATE api_tokens SET expires_at = ?3
            WHERE id = ?1 AND owner_id = ?2 AND kind = 'TEMPORARY' AND revoked = 0
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(owner_id)
        .bind(now + extend)
        .fetch_optional(&self.pool)
        .await?;

        Ok(token)
    }

    /// Drop TEMPORARY tokens past their expiry.
    pub async fn cleanup_expired_tokens(&self, now: DateTime<Utc>) -> StoreResult<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM api_tokens
            WHERE kind = 'TEMPORARY' AND expires_at IS NOT NULL AND expires_at < ?1
            "#,
        )
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}
