//! Health check endpoint

use crate::AppState;
use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Serialize;
use smsgate_core::transmitter::SimState;
use smsgate_core::tunnel::TunnelStatus;
use std::sync::atomic::Ordering;
use utoipa::ToSchema;

/// Health check response
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    pub overall: String,
    pub components: HealthComponents,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthComponents {
    pub database: String,
    pub queue: QueueHealth,
    pub transmitter: TransmitterHealth,
    pub tunnel: TunnelHealth,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct QueueHealth {
    pub paused: bool,
    pub pending: i64,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TransmitterHealth {
    #[schema(value_type = String)]
    pub sim_state: SimState,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct TunnelHealth {
    #[schema(value_type = String)]
    pub status: TunnelStatus,
}

/// Gateway health
///
/// Unauthenticated; reports per-component state and an overall verdict.
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Gateway healthy or degraded", body = HealthResponse),
        (status = 503, description = "Database unreachable", body = HealthResponse)
    ),
    tag = "health"
)]
pub(crate) async fn health_check(State(state): State<AppState>) -> Response {
    let pending = state.store.count_pending().await;
    let database_healthy = pending.is_ok();
    if let Err(e) = &pending {
        tracing::error!("Database health check failed: {}", e);
    }

    let sim_state = state.transmitter.sim_state().await;
    let tunnel_status = state.tunnel.status().await;
    let paused = state.queue_paused.load(Ordering::Relaxed);

    let overall = if !database_healthy {
        "unhealthy"
    } else if sim_state != SimState::Ready || tunnel_status == TunnelStatus::Error || paused {
        "degraded"
    } else {
        "ok"
    };

    let response = HealthResponse {
        overall: overall.to_string(),
        components: HealthComponents {
            database: if database_healthy {
                "healthy".to_string()
            } else {
                "unhealthy".to_string()
            },
            queue: QueueHealth {
                paused,
                pending: pending.unwrap_or(-1),
            },
            transmitter: TransmitterHealth { sim_state },
            tunnel: TunnelHealth {
                status: tunnel_status,
            },
        },
    };

    let status_code = if database_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(response)).into_response()
}

pub fn routes() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
