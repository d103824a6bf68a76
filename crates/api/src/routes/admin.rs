//! Operator endpoints: queue pause/resume and tunnel control
//!
//! All of these require the `admin` permission and sit behind the ADMIN
//! rate-limit scope.

use crate::{AppState, error::ApiError, middleware::auth::require_permission};
use axum::{
    Extension, Json, Router,
    extract::State,
    routing::{get, post},
};
use serde::Serialize;
use smsgate_core::models::AuthContext;
use smsgate_core::tunnel::{TunnelConfig, TunnelStatus};
use std::sync::atomic::Ordering;
use utoipa::ToSchema;

#[derive(Debug, Serialize, ToSchema)]
pub struct QueueStateResponse {
    pub paused: bool,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct TunnelStatusResponse {
    #[schema(value_type = String)]
    pub status: TunnelStatus,
}

/// Pause dispatch; queued messages keep accumulating
#[utoipa::path(
    post,
    path = "/sms/queue/pause",
    responses(
        (status = 200, description = "Queue paused", body = QueueStateResponse),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Missing admin permission")
    ),
    tag = "admin",
    security(("bearer_token" = []))
)]
pub(crate) async fn pause_queue(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
) -> Result<Json<QueueStateResponse>, ApiError> {
    require_permission(&ctx, "admin")?;

    state.queue_paused.store(true, Ordering::Relaxed);
    tracing::warn!("Dispatch queue paused by {}", ctx.owner_id);

    Ok(Json(QueueStateResponse { paused: true }))
}

/// Resume dispatch
#[utoipa::path(
    post,
    path = "/sms/queue/resume",
    responses(
        (status = 200, description = "Queue resumed", body = QueueStateResponse),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Missing admin permission")
    ),
    tag = "admin",
    security(("bearer_token" = []))
)]
pub(crate) async fn resume_queue(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
) -> Result<Json<QueueStateResponse>, ApiError> {
    require_permission(&ctx, "admin")?;

    state.queue_paused.store(false, Ordering::Relaxed);
    tracing::info!("Dispatch queue resumed by {}", ctx.owner_id);

    Ok(Json(QueueStateResponse { paused: false }))
}

/// Start the external tunnel
#[utoipa::path(
    post,
    path = "/admin/tunnel/start",
    request_body(content = TunnelConfig, content_type = "application/json"),
    responses(
        (status = 200, description = "Tunnel starting", body = TunnelStatusResponse),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Missing admin permission")
    ),
    tag = "admin",
    security(("bearer_token" = []))
)]
pub(crate) async fn tunnel_start(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    body: Option<Json<TunnelConfig>>,
) -> Result<Json<TunnelStatusResponse>, ApiError> {
    require_permission(&ctx, "admin")?;

    let config = body.map(|Json(config)| config).unwrap_or_default();
    state
        .tunnel
        .start(config)
        .await
        .map_err(|e| ApiError::Internal(format!("tunnel start failed: {}", e)))?;

    Ok(Json(TunnelStatusResponse {
        status: state.tunnel.status().await,
    }))
}

/// Stop the external tunnel
#[utoipa::path(
    post,
    path = "/admin/tunnel/stop",
    responses(
        (status = 200, description = "Tunnel stopped", body = TunnelStatusResponse),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Missing admin permission")
    ),
    tag = "admin",
    security(("bearer_token" = []))
)]
pub(crate) async fn tunnel_stop(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
) -> Result<Json<TunnelStatusResponse>, ApiError> {
    require_permission(&ctx, "admin")?;

    state
        .tunnel
        .stop()
        .await
        .map_err(|e| ApiError::Internal(format!("tunnel stop failed: {}", e)))?;

    Ok(Json(TunnelStatusResponse {
        status: state.tunnel.status().await,
    }))
}

/// Tunnel status
#[utoipa::path(
    get,
    path = "/admin/tunnel/status",
    responses(
        (status = 200, description = "Tunnel status", body = TunnelStatusResponse),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Missing admin permission")
    ),
    tag = "admin",
    security(("bearer_token" = []))
)]
pub(crate) async fn tunnel_status(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
) -> Result<Json<TunnelStatusResponse>, ApiError> {
    require_permission(&ctx, "admin")?;

    Ok(Json(TunnelStatusResponse {
        status: state.tunnel.status().await,
    }))
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/sms/queue/pause", post(pause_queue))
        .route("/sms/queue/resume", post(resume_queue))
        .route("/admin/tunnel/start", post(tunnel_start))
        .route("/admin/tunnel/stop", post(tunnel_stop))
        .route("/admin/tunnel/status", get(tunnel_status))
}
