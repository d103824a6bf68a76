//! HTTP admission surface for the SMS gateway
//!
//! Every request flows through rate limiting, bearer authentication and the
//! audit trail before a handler turns it into store operations.

pub mod config;
pub mod error;
pub mod middleware;
pub mod routes;

pub use middleware::rate_limit::RateLimitSettings;

use axum::{Router, middleware as axum_middleware};
use moka::future::Cache;
use smsgate_core::models::AuthContext;
use smsgate_core::transmitter::Transmitter;
use smsgate_core::tunnel::Tunnel;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use store::Store;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

/// Seconds a validated bearer secret stays in the auth cache.
pub const AUTH_CACHE_TTL_SECS: u64 = 300;

#[derive(Clone)]
pub struct AppState {
    pub store: Store,
    /// Validated secrets keyed by SHA-256 fingerprint.
    pub auth_cache: Cache<String, AuthContext>,
    pub rate_limits: RateLimitSettings,
    /// Shared with the scheduler; true stops claiming.
    pub queue_paused: Arc<AtomicBool>,
    pub transmitter: Arc<dyn Transmitter>,
    pub tunnel: Arc<dyn Tunnel>,
}

impl AppState {
    /// Build the standard auth cache.
    pub fn auth_cache() -> Cache<String, AuthContext> {
        Cache::builder()
            .time_to_live(std::time::Duration::from_secs(AUTH_CACHE_TTL_SECS))
            .max_capacity(10_000)
            .build()
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        routes::health::health_check,
        routes::messages::queue_message,
        routes::messages::message_status,
        routes::messages::message_history,
        routes::messages::cancel_message,
        routes::messages::update_priority,
        routes::messages::queue_bulk,
        routes::tokens::issue_token,
        routes::tokens::revoke_token,
        routes::tokens::renew_token,
        routes::admin::pause_queue,
        routes::admin::resume_queue,
        routes::admin::tunnel_start,
        routes::admin::tunnel_stop,
        routes::admin::tunnel_status,
    ),
    components(
        schemas(
            smsgate_core::models::Priority,
            smsgate_core::models::RetryStrategy,
            smsgate_core::models::MessageStatus,
            smsgate_core::models::TokenKind,
            smsgate_core::tunnel::TunnelConfig,
            error::ErrorResponse,
            routes::messages::QueueRequest,
            routes::messages::QueueResponse,
            routes::messages::BulkRequest,
            routes::messages::BulkRejection,
            routes::messages::BulkResponse,
            routes::messages::HistoryResponse,
            routes::messages::MessageResponse,
            routes::messages::CancelResponse,
            routes::messages::PriorityRequest,
            routes::messages::PriorityResponse,
            routes::tokens::IssueTokenRequest,
            routes::tokens::IssuedTokenResponse,
            routes::tokens::TokenInfoResponse,
            routes::tokens::RenewTokenRequest,
            routes::admin::QueueStateResponse,
            routes::admin::TunnelStatusResponse,
            routes::health::HealthResponse,
            routes::health::HealthComponents,
            routes::health::QueueHealth,
            routes::health::TransmitterHealth,
            routes::health::TunnelHealth,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "sms", description = "Message queue endpoints"),
        (name = "auth", description = "Token endpoints"),
        (name = "admin", description = "Operator endpoints"),
    ),
    modifiers(&SecurityAddon)
)]
pub struct ApiDoc;

struct SecurityAddon;

impl utoipa::Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_token",
                utoipa::openapi::security::SecurityScheme::Http(
                    utoipa::openapi::security::HttpBuilder::new()
                        .scheme(utoipa::openapi::security::HttpAuthScheme::Bearer)
                        .build(),
                ),
            );
        }
    }
}

/// Create the application router
pub fn create_router(state: AppState, cors_origin: &str) -> Router {
    let cors = if cors_origin == "*" {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else if cors_origin == "mirror" {
        CorsLayer::new()
            .allow_origin(AllowOrigin::predicate(|_: &_, _: &_| true))
            .allow_methods(Any)
            .allow_headers(Any)
            .allow_credentials(true)
    } else {
        match cors_origin.parse::<axum::http::HeaderValue>() {
            Ok(origin) => CorsLayer::new()
                .allow_origin(origin)
                .allow_methods(Any)
                .allow_headers(Any),
            Err(e) => {
                // Startup configuration error; refuse to run half-open
                panic!("Invalid CORS origin '{}': {}", cors_origin, e);
            }
        }
    };

    // Per-subtree middleware: REQUEST scope for the message surface, ADMIN
    // for operator routes, AUTH for the token surface. Bearer auth sits
    // inside the rate limit, the audit layer outside everything so denials
    // are recorded too.
    let sms_routes = routes::messages::routes()
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::auth::require_bearer,
        ))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::rate_limit::request_scope,
        ));

    let admin_routes = routes::admin::routes()
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::auth::require_bearer,
        ))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::rate_limit::admin_scope,
        ));

    let token_routes = routes::tokens::manage_routes()
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::auth::require_bearer,
        ))
        .merge(routes::tokens::issue_routes())
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::rate_limit::auth_scope,
        ));

    let api = sms_routes
        .merge(admin_routes)
        .merge(token_routes)
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::audit::audit_trail,
        ))
        .merge(routes::health::routes());

    Router::new()
        .nest("/api/v1", api)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(cors)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &axum::http::Request<_>| {
                    let remote_addr = request
                        .extensions()
                        .get::<axum::extract::ConnectInfo<std::net::SocketAddr>>()
                        .map(|ci| ci.0.to_string())
                        .unwrap_or_else(|| "unknown".into());

                    tracing::info_span!(
                        "request",
                        method = %request.method(),
                        uri = %request.uri(),
                        remote_addr = %remote_addr,
                    )
                })
                .on_response(
                    |response: &axum::http::Response<_>,
                     latency: std::time::Duration,
                     _span: &tracing::Span| {
                        tracing::info!(
                            latency_ms = %latency.as_millis(),
                            status = %response.status(),
                            "finished processing request"
                        );
                    },
                ),
        )
        .with_state(state)
}

/// Run the API server
///
/// This function starts the HTTP server and blocks until it exits.
pub async fn run_api(state: AppState, config: &config::Config) -> Result<(), std::io::Error> {
    let app = create_router(state, &config.cors_allowed_origin);
    let addr = format!("{}:{}", config.host, config.port);

    tracing::info!("API server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await
}
