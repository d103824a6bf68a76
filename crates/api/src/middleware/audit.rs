//! Audit trail middleware
//!
//! Appends one event per API call after the response is built, classified
//! by outcome. The write happens off the request path and its failure is
//! logged, never surfaced.

use crate::AppState;
use crate::middleware::rate_limit::ClientId;
use axum::{
    extract::{OriginalUri, Request, State},
    middleware::Next,
    response::Response,
};
use smsgate_core::models::{AuditSeverity, AuthContext, NewAuditEvent};

pub async fn audit_trail(State(state): State<AppState>, request: Request, next: Next) -> Response {
    // Nested routers strip their prefix from the matched URI
    let path = request
        .extensions()
        .get::<OriginalUri>()
        .map(|uri| uri.path().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());
    let endpoint = format!("{} {}", request.method(), path);

    let response = next.run(request).await;

    let status = response.status().as_u16();
    let (event_type, severity) = classify(status);

    let mut event = NewAuditEvent::new(event_type, severity);
    event.endpoint = Some(endpoint);
    event.status_code = Some(i32::from(status));
    event.owner_id = response
        .extensions()
        .get::<AuthContext>()
        .map(|ctx| ctx.owner_id.clone());
    event.client_id = response
        .extensions()
        .get::<ClientId>()
        .map(|client| client.0.clone());

    let store = state.store.clone();
    tokio::spawn(async move {
        if let Err(e) = store.append_audit(event).await {
            tracing::warn!("Failed to append audit event: {}", e);
        }
    });

    response
}

fn classify(status: u16) -> (&'static str, AuditSeverity) {
    match status {
        401 => ("AUTH_FAILED", AuditSeverity::Warning),
        403 => ("ACCESS_DENIED", AuditSeverity::Warning),
        429 => ("SUSPICIOUS", AuditSeverity::Warning),
        500.. => ("SYSTEM_ERROR", AuditSeverity::Error),
        400.. => ("API_CALL", AuditSeverity::Warning),
        _ => ("API_CALL", AuditSeverity::Info),
    }
}
