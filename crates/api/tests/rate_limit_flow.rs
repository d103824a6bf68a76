//! Rate-limit behavior through the full router: anonymous IP buckets,
//! per-user buckets and the AUTH scope on token issuance.

use api::{AppState, RateLimitSettings, create_router};
use async_trait::async_trait;
use axum::{
    body::Body,
    extract::ConnectInfo,
    http::{Request, StatusCode, header},
};
use chrono::{Duration, Utc};
use serde_json::{Value, json};
use smsgate_core::models::TokenKind;
use smsgate_core::transmitter::{SimState, TransmitError, Transmitter};
use smsgate_core::tunnel::{Tunnel, TunnelConfig, TunnelStatus};
use sqlx::SqlitePool;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration as StdDuration;
use store::{NewToken, ScopePolicy, Store};
use tower::ServiceExt;

struct ReadyTransmitter;

#[async_trait]
impl Transmitter for ReadyTransmitter {
    async fn send(&self, _: &str, _: &str) -> Result<(), TransmitError> {
        Ok(())
    }

    async fn sim_state(&self) -> SimState {
        SimState::Ready
    }
}

struct IdleTunnel;

#[async_trait]
impl Tunnel for IdleTunnel {
    async fn start(&self, _: TunnelConfig) -> anyhow::Result<()> {
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn status(&self) -> TunnelStatus {
        TunnelStatus::Inactive
    }
}

/// Ten anonymous requests per hour, as in the gateway's strictest profile.
fn tight_limits() -> RateLimitSettings {
    RateLimitSettings {
        ip_request: ScopePolicy::new(
            10,
            StdDuration::from_secs(3600),
            StdDuration::from_secs(1800),
        ),
        auth: ScopePolicy::new(2, StdDuration::from_secs(600), StdDuration::from_secs(300)),
        ..RateLimitSettings::default()
    }
}

fn test_state(pool: SqlitePool, rate_limits: RateLimitSettings) -> AppState {
    AppState {
        store: Store::new(pool),
        auth_cache: AppState::auth_cache(),
        rate_limits,
        queue_paused: Arc::new(AtomicBool::new(false)),
        transmitter: Arc::new(ReadyTransmitter),
        tunnel: Arc::new(IdleTunnel),
    }
}

fn queue_request(bearer: Option<&str>) -> Request<Body> {
    let body = json!({
        "phoneNumber": "+48123456789",
        "message": "Hi",
        "appointmentTime": (Utc::now() + Duration::hours(25)).to_rfc3339(),
    });

    let mut builder = Request::builder()
        .method("POST")
        .uri("/api/v1/sms/queue")
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(secret) = bearer {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", secret));
    }

    let mut req = builder.body(Body::from(body.to_string())).unwrap();
    req.extensions_mut().insert(ConnectInfo(SocketAddr::new(
        IpAddr::V4(Ipv4Addr::new(203, 0, 113, 9)),
        40000,
    )));
    req
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap_or(Value::Null)
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_anonymous_ip_limit(pool: SqlitePool) {
    let state = test_state(pool, tight_limits());
    let app = create_router(state, "*");

    // Ten anonymous calls pass the limiter (and then fail auth)
    for i in 0..10 {
        let response = app.clone().oneshot(queue_request(None)).await.unwrap();
        assert_eq!(
            response.status(),
            StatusCode::UNAUTHORIZED,
            "request {} should reach auth",
            i
        );
        assert_eq!(
            response.headers().get("X-RateLimit-Limit").unwrap(),
            "10"
        );
    }

    // The eleventh is rejected by the limiter itself
    let response = app.clone().oneshot(queue_request(None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

    let retry_after: u64 = response
        .headers()
        .get("Retry-After")
        .expect("Retry-After header on 429")
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    assert!(retry_after > 0);
    assert_eq!(response.headers().get("X-RateLimit-Remaining").unwrap(), "0");

    let body = body_json(response).await;
    assert_eq!(body["code"], "RATE_LIMITED");
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_authenticated_bucket_is_independent(pool: SqlitePool) {
    let state = test_state(pool, tight_limits());
    let store = state.store.clone();
    let app = create_router(state, "*");

    let (_, secret) = store
        .create_token(NewToken {
            owner_id: "ops".to_string(),
            name: "writer".to_string(),
            permissions: vec!["sms:write".to_string()],
            kind: TokenKind::Permanent,
            ttl: None,
        })
        .await
        .unwrap();

    // Exhaust the anonymous bucket for this IP
    for _ in 0..11 {
        app.clone().oneshot(queue_request(None)).await.unwrap();
    }
    let response = app.clone().oneshot(queue_request(None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

    // A valid token switches to the per-user bucket and still gets through
    let response = app
        .clone()
        .oneshot(queue_request(Some(&secret)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_token_issuance_uses_auth_scope(pool: SqlitePool) {
    let state = test_state(pool, tight_limits());
    let app = create_router(state, "*");

    let issue = || {
        let mut req = Request::builder()
            .method("POST")
            .uri("/api/v1/auth/token")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(
                json!({
                    "ownerId": "ops",
                    "name": "burst",
                    "permissions": ["sms:read"],
                })
                .to_string(),
            ))
            .unwrap();
        req.extensions_mut().insert(ConnectInfo(SocketAddr::new(
            IpAddr::V4(Ipv4Addr::new(203, 0, 113, 9)),
            40000,
        )));
        req
    };

    // AUTH scope allows two
    for _ in 0..2 {
        let response = app.clone().oneshot(issue()).await.unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
    }

    let response = app.clone().oneshot(issue()).await.unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(response.headers().contains_key("Retry-After"));
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_denials_are_audited_as_suspicious(pool: SqlitePool) {
    let state = test_state(pool, tight_limits());
    let store = state.store.clone();
    let app = create_router(state, "*");

    for _ in 0..12 {
        app.clone().oneshot(queue_request(None)).await.unwrap();
    }

    tokio::time::sleep(StdDuration::from_millis(200)).await;

    let events = store.recent_audit(30).await.unwrap();
    assert!(
        events
            .iter()
            .any(|e| e.event_type == "SUSPICIOUS" && e.status_code == Some(429))
    );
}
