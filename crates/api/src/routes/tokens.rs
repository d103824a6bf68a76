//! Token issuance and management endpoints
//!
//! Issuance is the one authentication-exempt write surface; it sits behind
//! the AUTH rate-limit scope instead. The secret appears exactly once, in
//! the issuance response.

use crate::{AppState, error::ApiError, middleware::auth::require_permission};
use axum::{
    Extension, Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, post},
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use smsgate_core::models::{AuditSeverity, AuthContext, NewAuditEvent, TokenKind};
use store::NewToken;
use utoipa::ToSchema;

/// Permissions a token may carry.
const KNOWN_PERMISSIONS: [&str; 3] = ["sms:read", "sms:write", "admin"];

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct IssueTokenRequest {
    /// Stable identifier of the token holder
    #[schema(example = "clinic-frontdesk")]
    pub owner_id: String,
    /// Operator-facing label
    #[schema(example = "front desk tablet")]
    pub name: String,
    /// Any of "sms:read", "sms:write", "admin"
    pub permissions: Vec<String>,
    /// Defaults to TEMPORARY
    pub kind: Option<TokenKind>,
    /// Lifetime in seconds; TEMPORARY defaults to 24 hours
    pub ttl_secs: Option<u32>,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct IssuedTokenResponse {
    pub id: i64,
    /// Shown only here; store it now
    pub secret: String,
    pub owner_id: String,
    pub name: String,
    pub permissions: Vec<String>,
    pub kind: TokenKind,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TokenInfoResponse {
    pub id: i64,
    pub owner_id: String,
    pub name: String,
    pub permissions: Vec<String>,
    pub kind: TokenKind,
    pub expires_at: Option<DateTime<Utc>>,
    pub revoked: bool,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RenewTokenRequest {
    /// Extension in seconds from now; defaults to 24 hours
    pub ttl_secs: Option<u32>,
}

/// Issue a bearer token
#[utoipa::path(
    post,
    path = "/auth/token",
    request_body = IssueTokenRequest,
    responses(
        (status = 201, description = "Token issued", body = IssuedTokenResponse),
        (status = 400, description = "Invalid request"),
        (status = 429, description = "Rate limited")
    ),
    tag = "auth"
)]
pub(crate) async fn issue_token(
    State(state): State<AppState>,
    Json(req): Json<IssueTokenRequest>,
) -> Result<Response, ApiError> {
    if req.owner_id.trim().is_empty() {
        return Err(ApiError::Validation("ownerId must not be empty".to_string()));
    }
    if req.name.trim().is_empty() {
        return Err(ApiError::Validation("name must not be empty".to_string()));
    }
    if req.permissions.is_empty() {
        return Err(ApiError::Validation(
            "at least one permission is required".to_string(),
        ));
    }
    if let Some(unknown) = req
        .permissions
        .iter()
        .find(|p| !KNOWN_PERMISSIONS.contains(&p.as_str()))
    {
        return Err(ApiError::Validation(format!(
            "unknown permission: {}",
            unknown
        )));
    }

    let (token, secret) = state
        .store
        .create_token(NewToken {
            owner_id: req.owner_id,
            name: req.name,
            permissions: req.permissions,
            kind: req.kind.unwrap_or(TokenKind::Temporary),
            ttl: req.ttl_secs.map(|secs| Duration::seconds(i64::from(secs))),
        })
        .await?;

    tracing::info!("Issued token {} for owner {}", token.id, token.owner_id);
    audit_token_event(&state, "TOKEN_ISSUED", token.id, &token.owner_id);

    let response = IssuedTokenResponse {
        id: token.id,
        secret,
        owner_id: token.owner_id,
        name: token.name,
        permissions: token.permissions,
        kind: token.kind,
        expires_at: token.expires_at,
    };
    Ok((StatusCode::CREATED, Json(response)).into_response())
}

/// Revoke a token
#[utoipa::path(
    delete,
    path = "/auth/token/{id}",
    responses(
        (status = 200, description = "Token revoked"),
        (status = 404, description = "Unknown token"),
        (status = 403, description = "Not the token owner"),
        (status = 401, description = "Unauthorized")
    ),
    params(("id" = i64, Path, description = "Token id")),
    tag = "auth",
    security(("bearer_token" = []))
)]
pub(crate) async fn revoke_token(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path(id): Path<i64>,
) -> Result<Json<TokenInfoResponse>, ApiError> {
    let token = state
        .store
        .get_token(id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("token not found: {}", id)))?;

    if token.owner_id != ctx.owner_id {
        require_permission(&ctx, "admin")?;
    }

    state.store.revoke_token(id, &token.owner_id).await?;
    // Cached validations must not outlive the revocation
    state.auth_cache.invalidate_all();
    audit_token_event(&state, "TOKEN_REVOKED", id, &token.owner_id);

    let token = state
        .store
        .get_token(id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("token not found: {}", id)))?;

    Ok(Json(token_info(token)))
}

/// Extend a temporary token
#[utoipa::path(
    post,
    path = "/auth/token/{id}/renew",
    request_body = RenewTokenRequest,
    responses(
        (status = 200, description = "Token renewed", body = TokenInfoResponse),
        (status = 404, description = "Unknown token"),
        (status = 409, description = "Not a temporary token"),
        (status = 401, description = "Unauthorized")
    ),
    params(("id" = i64, Path, description = "Token id")),
    tag = "auth",
    security(("bearer_token" = []))
)]
pub(crate) async fn renew_token(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path(id): Path<i64>,
    Json(req): Json<RenewTokenRequest>,
) -> Result<Json<TokenInfoResponse>, ApiError> {
    let token = state
        .store
        .get_token(id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("token not found: {}", id)))?;

    if token.owner_id != ctx.owner_id {
        require_permission(&ctx, "admin")?;
    }
    if token.kind != TokenKind::Temporary {
        return Err(ApiError::Conflict(format!(
            "token {} is permanent and cannot be renewed",
            id
        )));
    }

    let extend = req
        .ttl_secs
        .map(|secs| Duration::seconds(i64::from(secs)))
        .unwrap_or_else(store::tokens::default_token_ttl);

    let renewed = state
        .store
        .renew_token(id, &token.owner_id, extend, Utc::now())
        .await?
        .ok_or_else(|| ApiError::Conflict(format!("token {} can no longer be renewed", id)))?;

    Ok(Json(token_info(renewed)))
}

fn token_info(token: smsgate_core::models::ApiToken) -> TokenInfoResponse {
    TokenInfoResponse {
        id: token.id,
        owner_id: token.owner_id,
        name: token.name,
        permissions: token.permissions,
        kind: token.kind,
        expires_at: token.expires_at,
        revoked: token.revoked,
    }
}

fn audit_token_event(state: &AppState, event_type: &str, token_id: i64, owner_id: &str) {
    let store = state.store.clone();
    let mut event = NewAuditEvent::new(event_type, AuditSeverity::Info);
    event.owner_id = Some(owner_id.to_string());
    event.payload = serde_json::json!({ "token_id": token_id });

    tokio::spawn(async move {
        if let Err(e) = store.append_audit(event).await {
            tracing::warn!("Failed to audit token event: {}", e);
        }
    });
}

/// Authentication-exempt issuance route (AUTH rate scope only).
pub fn issue_routes() -> Router<AppState> {
    Router::new().route("/auth/token", post(issue_token))
}

/// Token management routes; mounted behind bearer auth.
pub fn manage_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/token/{id}", delete(revoke_token))
        .route("/auth/token/{id}/renew", post(renew_token))
}
