//! Bearer token authentication middleware
//!
//! Validates `Authorization: Bearer <secret>` against the token store, with
//! a short-lived cache in front of the argon2 verification. The validated
//! identity travels in request extensions (and is mirrored onto the
//! response for the audit layer).

use crate::AppState;
use crate::error::ApiError;
use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use smsgate_core::models::AuthContext;
use smsgate_core::security;

/// Require a valid bearer token; attach the [`AuthContext`] on success.
pub async fn require_bearer(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    match authenticate(&state, request.headers()).await {
        Ok(ctx) => {
            request.extensions_mut().insert(ctx.clone());
            let mut response = next.run(request).await;
            response.extensions_mut().insert(ctx);
            response
        }
        Err(err) => err.into_response(),
    }
}

/// Validate the bearer secret from `headers`.
///
/// Store failures surface as 500; everything else is a 401 with the
/// rejection reason as the message.
pub async fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<AuthContext, ApiError> {
    let secret = bearer_secret(headers)
        .ok_or_else(|| ApiError::Unauthenticated("missing bearer token".to_string()))?;

    let fingerprint = security::fingerprint(secret);
    if let Some(ctx) = state.auth_cache.get(&fingerprint).await {
        return Ok(ctx);
    }

    let outcome = state
        .store
        .validate_token(secret, Utc::now())
        .await
        .map_err(|e| ApiError::Internal(format!("token validation failed: {}", e)))?;

    match outcome {
        Ok(ctx) => {
            state.auth_cache.insert(fingerprint, ctx.clone()).await;
            Ok(ctx)
        }
        Err(rejection) => {
            tracing::warn!("Rejected bearer token: {}", rejection);
            Err(ApiError::Unauthenticated(rejection.to_string()))
        }
    }
}

/// Best-effort identity lookup used by the rate limiter to pick the
/// per-user bucket before authentication proper runs.
pub async fn resolve_identity(state: &AppState, headers: &HeaderMap) -> Option<AuthContext> {
    if bearer_secret(headers).is_some() {
        authenticate(state, headers).await.ok()
    } else {
        None
    }
}

/// Check one permission string against the authenticated identity.
pub fn require_permission(ctx: &AuthContext, permission: &str) -> Result<(), ApiError> {
    if ctx.has_permission(permission) {
        Ok(())
    } else {
        Err(ApiError::Forbidden)
    }
}

fn bearer_secret(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(axum::http::header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bearer_extraction() {
        let mut headers = HeaderMap::new();
        assert!(bearer_secret(&headers).is_none());

        headers.insert(
            axum::http::header::AUTHORIZATION,
            "Bearer 1.some_secret".parse().unwrap(),
        );
        assert_eq!(bearer_secret(&headers), Some("1.some_secret"));

        headers.insert(
            axum::http::header::AUTHORIZATION,
            "Basic dXNlcjpwYXNz".parse().unwrap(),
        );
        assert!(bearer_secret(&headers).is_none());
    }

    #[test]
    fn test_require_permission() {
        let ctx = AuthContext {
            token_id: 1,
            owner_id: "ops".to_string(),
            permissions: vec!["sms:read".to_string()],
        };

        assert!(require_permission(&ctx, "sms:read").is_ok());
        assert!(matches!(
            require_permission(&ctx, "sms:write"),
            Err(ApiError::Forbidden)
        ));
    }
}
