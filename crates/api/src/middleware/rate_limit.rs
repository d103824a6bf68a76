//! Rate limiting middleware
//!
//! Every decision goes through `Store::rate_check`, so caps hold across
//! restarts and concurrent requests. The client identifier is the token
//! owner when the request carries a valid bearer, otherwise the caller IP
//! (honoring proxy headers). Denials answer 429 with `Retry-After`; every
//! response carries the `X-RateLimit-*` headers.

use crate::AppState;
use crate::error::ApiError;
use crate::middleware::auth::resolve_identity;
use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use smsgate_core::models::{AuditSeverity, NewAuditEvent, RateLimitScope};
use std::net::SocketAddr;
use std::time::Duration;
use store::{RateDecision, ScopePolicy};

/// Per-scope policies for the admission layer.
#[derive(Debug, Clone)]
pub struct RateLimitSettings {
    /// REQUEST scope for anonymous callers, keyed by IP.
    pub ip_request: ScopePolicy,
    /// REQUEST scope for authenticated callers, keyed by owner.
    pub user_request: ScopePolicy,
    pub auth: ScopePolicy,
    pub admin: ScopePolicy,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        const MINUTE: u64 = 60;
        Self {
            ip_request: ScopePolicy::new(
                60,
                Duration::from_secs(60 * MINUTE),
                Duration::from_secs(30 * MINUTE),
            ),
            user_request: ScopePolicy::new(
                600,
                Duration::from_secs(60 * MINUTE),
                Duration::from_secs(30 * MINUTE),
            ),
            auth: ScopePolicy::new(
                10,
                Duration::from_secs(10 * MINUTE),
                Duration::from_secs(5 * MINUTE),
            ),
            admin: ScopePolicy::new(
                30,
                Duration::from_secs(60 * MINUTE),
                Duration::from_secs(60 * MINUTE),
            ),
        }
    }
}

/// Rate-limit identifier of the caller, mirrored onto responses for the
/// audit layer.
#[derive(Debug, Clone)]
pub struct ClientId(pub String);

pub async fn request_scope(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    check(state, RateLimitScope::Request, request, next).await
}

pub async fn auth_scope(State(state): State<AppState>, request: Request, next: Next) -> Response {
    check(state, RateLimitScope::Auth, request, next).await
}

pub async fn admin_scope(State(state): State<AppState>, request: Request, next: Next) -> Response {
    check(state, RateLimitScope::Admin, request, next).await
}

async fn check(state: AppState, scope: RateLimitScope, request: Request, next: Next) -> Response {
    let identity = resolve_identity(&state, request.headers()).await;
    let client_id = match &identity {
        Some(ctx) => format!("user:{}", ctx.owner_id),
        None => format!("ip:{}", client_ip(&request)),
    };

    let policy = match scope {
        RateLimitScope::Request if identity.is_some() => state.rate_limits.user_request,
        RateLimitScope::Request => state.rate_limits.ip_request,
        RateLimitScope::Auth => state.rate_limits.auth,
        RateLimitScope::Admin => state.rate_limits.admin,
    };

    let decision = match state
        .store
        .rate_check(&client_id, scope, &policy, Utc::now())
        .await
    {
        Ok(decision) => decision,
        Err(e) => {
            // Fail-safe: a broken limiter must not take down the data plane
            tracing::error!("Rate limiter error, allowing request: {}", e);
            audit_limiter_failure(&state, &client_id, &e.to_string());

            let mut response = next.run(request).await;
            response.extensions_mut().insert(ClientId(client_id));
            return response;
        }
    };

    if !decision.allowed {
        tracing::warn!(
            "Rate limit exceeded for {} (scope {:?}, retry in {:?})",
            client_id,
            scope,
            decision.retry_after
        );

        let mut response = ApiError::RateLimited(format!(
            "too many requests, retry in {} seconds",
            decision.retry_after.unwrap_or_default().as_secs().max(1)
        ))
        .into_response();
        apply_headers(response.headers_mut(), &decision);
        response.extensions_mut().insert(ClientId(client_id));
        return response;
    }

    let mut response = next.run(request).await;
    apply_headers(response.headers_mut(), &decision);
    response.extensions_mut().insert(ClientId(client_id));
    response
}

fn apply_headers(headers: &mut HeaderMap, decision: &RateDecision) {
    let insert = |headers: &mut HeaderMap, name: &'static str, value: String| {
        if let Ok(value) = HeaderValue::from_str(&value) {
            headers.insert(name, value);
        }
    };

    insert(headers, "X-RateLimit-Limit", decision.limit.to_string());
    insert(
        headers,
        "X-RateLimit-Remaining",
        decision.remaining.to_string(),
    );
    insert(
        headers,
        "X-RateLimit-Reset",
        decision.reset_at.timestamp().to_string(),
    );

    if let Some(retry_after) = decision.retry_after {
        insert(
            headers,
            "Retry-After",
            retry_after.as_secs().max(1).to_string(),
        );
    }
}

/// Caller address for anonymous buckets: X-Forwarded-For, then X-Real-IP,
/// then the socket peer.
fn client_ip(request: &Request) -> String {
    let headers = request.headers();

    if let Some(forwarded) = headers.get("x-forwarded-for")
        && let Ok(value) = forwarded.to_str()
        && let Some(first) = value.split(',').next()
        && !first.trim().is_empty()
    {
        return first.trim().to_string();
    }

    if let Some(real_ip) = headers.get("x-real-ip")
        && let Ok(value) = real_ip.to_str()
        && !value.trim().is_empty()
    {
        return value.trim().to_string();
    }

    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn audit_limiter_failure(state: &AppState, client_id: &str, error: &str) {
    let store = state.store.clone();
    let mut event = NewAuditEvent::new("SYSTEM_ERROR", AuditSeverity::Error);
    event.client_id = Some(client_id.to_string());
    event.payload = serde_json::json!({ "subsystem": "rate_limit", "error": error });

    tokio::spawn(async move {
        if let Err(e) = store.append_audit(event).await {
            tracing::warn!("Failed to audit rate limiter failure: {}", e);
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use std::net::{IpAddr, Ipv4Addr};

    fn request_with_addr() -> Request {
        let mut request = Request::new(Body::empty());
        request.extensions_mut().insert(ConnectInfo(SocketAddr::new(
            IpAddr::V4(Ipv4Addr::new(192, 168, 1, 100)),
            8080,
        )));
        request
    }

    #[test]
    fn test_client_ip_prefers_forwarded_for() {
        let mut request = request_with_addr();
        request
            .headers_mut()
            .insert("x-forwarded-for", "203.0.113.195, 10.0.0.1".parse().unwrap());

        assert_eq!(client_ip(&request), "203.0.113.195");
    }

    #[test]
    fn test_client_ip_real_ip_fallback() {
        let mut request = request_with_addr();
        request
            .headers_mut()
            .insert("x-real-ip", "203.0.113.7".parse().unwrap());

        assert_eq!(client_ip(&request), "203.0.113.7");
    }

    #[test]
    fn test_client_ip_socket_fallback() {
        let request = request_with_addr();
        assert_eq!(client_ip(&request), "192.168.1.100");
    }

    #[test]
    fn test_headers_applied() {
        let decision = RateDecision {
            allowed: false,
            limit: 10,
            remaining: 0,
            reset_at: Utc::now() + chrono::Duration::minutes(10),
            retry_after: Some(Duration::from_secs(600)),
        };

        let mut headers = HeaderMap::new();
        apply_headers(&mut headers, &decision);

        assert_eq!(headers.get("X-RateLimit-Limit").unwrap(), "10");
        assert_eq!(headers.get("X-RateLimit-Remaining").unwrap(), "0");
        assert!(headers.contains_key("X-RateLimit-Reset"));
        assert_eq!(headers.get("Retry-After").unwrap(), "600");
    }
}
